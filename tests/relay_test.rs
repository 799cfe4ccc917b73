//! HLS relay integration tests.
//!
//! Runs the router on a random port in front of a `wiremock` origin.

mod common;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use common::{Remote, TestHarness};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const MASTER: &str = "#EXTM3U\n#EXT-X-STREAM-INF:...\nstream1.m3u8\n";

// ---------------------------------------------------------------------------
// Playlists
// ---------------------------------------------------------------------------

#[tokio::test]
async fn master_playlist_is_rewritten() {
    let (harness, addr) = TestHarness::with_server().await;
    Mock::given(method("GET"))
        .and(path("/stream1/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
        .expect(1)
        .mount(&harness.origin)
        .await;

    let resp = reqwest::get(format!("http://{addr}/proxy/stream/stream1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/vnd.apple.mpegurl");
    assert_eq!(resp.headers()["cache-control"], "no-cache");
    assert_eq!(
        resp.text().await.unwrap(),
        "#EXTM3U\n#EXT-X-STREAM-INF:...\n/proxy/segment/stream1/stream1.m3u8\n"
    );
}

#[tokio::test]
async fn media_playlist_keeps_directives_and_queries() {
    let (harness, addr) = TestHarness::with_server().await;
    let media = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:7\n\
                 #EXTINF:2.000,\nseg7.ts?session=abc\n#EXTINF:2.000,\nseg8.ts\n";
    Mock::given(method("GET"))
        .and(path("/cam_2/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media))
        .mount(&harness.origin)
        .await;

    let body = reqwest::get(format!("http://{addr}/proxy/stream/cam_2"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(
        body,
        "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:7\n\
         #EXTINF:2.000,\n/proxy/segment/cam_2/seg7.ts?session=abc\n#EXTINF:2.000,\n\
         /proxy/segment/cam_2/seg8.ts\n"
    );
}

#[tokio::test]
async fn playlist_origin_error_status_is_passed_through() {
    let (harness, addr) = TestHarness::with_server().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.origin)
        .await;

    let resp = reqwest::get(format!("http://{addr}/proxy/stream/stream3"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "origin_status");
    assert!(json["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn stalled_origin_times_out_with_504() {
    let harness = TestHarness::build(Remote::Accept, |c| c.origin.fetch_timeout_secs = 1).await;
    let addr = harness.serve().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(MASTER)
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&harness.origin)
        .await;

    let started = Instant::now();
    let resp = reqwest::get(format!("http://{addr}/proxy/stream/stream1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(5));

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "timeout");
}

#[tokio::test]
async fn unreachable_origin_is_502() {
    let harness = TestHarness::build(Remote::Accept, |c| {
        c.origin.base_url = Some("http://127.0.0.1:9".into());
    })
    .await;
    let addr = harness.serve().await;

    let resp = reqwest::get(format!("http://{addr}/proxy/stream/stream1"))
        .await
        .unwrap();
    // Some sandboxes blackhole instead of refusing; that surfaces as a timeout.
    assert!(
        resp.status() == 502 || resp.status() == 504,
        "unexpected status {}",
        resp.status()
    );
}

#[tokio::test]
async fn missing_origin_is_config_error() {
    let harness = TestHarness::build(Remote::Accept, |c| c.origin.base_url = None).await;
    let addr = harness.serve().await;

    let resp = reqwest::get(format!("http://{addr}/proxy/stream/stream1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "config_error");
}

#[tokio::test]
async fn concurrent_playlists_do_not_interfere() {
    let (harness, addr) = TestHarness::with_server().await;
    for n in 1..=5 {
        Mock::given(method("GET"))
            .and(path(format!("/stream{n}/index.m3u8")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("#EXTM3U\n#EXTINF:2,\nseg{n}.ts\n"))
                    .set_delay(Duration::from_millis(50 * (6 - n))),
            )
            .mount(&harness.origin)
            .await;
    }

    let client = reqwest::Client::new();
    let requests = (1..=5).map(|n| {
        let client = client.clone();
        async move {
            let body = client
                .get(format!("http://{addr}/proxy/stream/stream{n}"))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap();
            (n, body)
        }
    });

    for (n, body) in futures::future::join_all(requests).await {
        assert_eq!(body, format!("#EXTM3U\n#EXTINF:2,\n/proxy/segment/stream{n}/seg{n}.ts\n"));
    }
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn segment_bytes_stream_through_unmodified() {
    let (harness, addr) = TestHarness::with_server().await;
    let payload: Vec<u8> = (0..=255u8).cycle().take(188 * 20_000).collect();
    Mock::given(method("GET"))
        .and(path("/stream2/seg42.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(payload.clone()),
        )
        .mount(&harness.origin)
        .await;

    let resp = reqwest::get(format!("http://{addr}/proxy/segment/stream2/seg42.ts"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp2t");
    assert_eq!(resp.headers()["cache-control"], "no-cache");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), payload.as_slice());
}

#[tokio::test]
async fn nested_playlist_is_served_verbatim() {
    let (harness, addr) = TestHarness::with_server().await;
    let media = "#EXTM3U\n#EXTINF:2,\nseg1.ts\n";
    Mock::given(method("GET"))
        .and(path("/stream1/stream1.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media))
        .mount(&harness.origin)
        .await;

    let resp = reqwest::get(format!("http://{addr}/proxy/segment/stream1/stream1.m3u8"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/vnd.apple.mpegurl");
    assert_eq!(resp.text().await.unwrap(), media);
}

#[tokio::test]
async fn segment_origin_404_stays_404() {
    let (harness, addr) = TestHarness::with_server().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&harness.origin)
        .await;

    let resp = reqwest::get(format!("http://{addr}/proxy/segment/stream1/seg999.ts"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "not found");
}

#[tokio::test]
async fn stalled_segment_times_out_with_504() {
    let harness = TestHarness::build(Remote::Accept, |c| c.origin.fetch_timeout_secs = 1).await;
    let addr = harness.serve().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&harness.origin)
        .await;

    let started = Instant::now();
    let resp = reqwest::get(format!("http://{addr}/proxy/segment/stream1/seg1.ts"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// A bare TCP origin that answers one request with a `video/mp2t` head
/// announcing `content_length` bytes, then hands the socket to `body`.
async fn raw_origin<F, Fut>(content_length: usize, body: F) -> SocketAddr
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: video/mp2t\r\ncontent-length: {content_length}\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        body(socket).await;
    });

    addr
}

#[tokio::test]
async fn segment_stalling_mid_body_aborts_the_response() {
    let origin = raw_origin(100_000, |mut socket| async move {
        socket.write_all(&[0x47; 188]).await.unwrap();
        // Keep the connection open without sending anything else.
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    })
    .await;

    let harness = TestHarness::build(Remote::Accept, |c| {
        c.origin.base_url = Some(format!("http://{origin}"));
        c.origin.idle_timeout_secs = 1;
    })
    .await;
    let addr = harness.serve().await;

    let started = Instant::now();
    let resp = reqwest::get(format!("http://{addr}/proxy/segment/stream1/seg1.ts"))
        .await
        .unwrap();
    // The head went out before the stall, so the status stays 200 and the
    // failure shows up as a truncated body rather than a JSON error.
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp2t");

    assert!(resp.bytes().await.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn client_disconnect_drops_origin_connection() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let origin = raw_origin(1 << 30, |mut socket| async move {
        let chunk = vec![0x47u8; 64 * 1024];
        while socket.write_all(&chunk).await.is_ok() {}
        let _ = closed_tx.send(());
    })
    .await;

    let harness = TestHarness::build(Remote::Accept, |c| {
        c.origin.base_url = Some(format!("http://{origin}"));
    })
    .await;
    let addr = harness.serve().await;

    let mut resp = reqwest::get(format!("http://{addr}/proxy/segment/stream1/seg1.ts"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.chunk().await.unwrap().is_some());
    drop(resp);

    tokio::time::timeout(Duration::from_secs(10), closed_rx)
        .await
        .expect("origin connection was not dropped")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_paths_are_rejected_before_fetching() {
    let (harness, addr) = TestHarness::with_server().await;

    for p in [
        "/proxy/segment/stream1/..%2F..%2Fetc%2Fpasswd.ts",
        "/proxy/segment/stream1/seg1.mp4",
        "/proxy/segment/stream1/.hidden.ts",
        "/proxy/segment/stream%2F1/seg1.ts",
        "/proxy/stream/stream.1",
    ] {
        let resp = reqwest::get(format!("http://{addr}{p}")).await.unwrap();
        assert_eq!(resp.status(), 400, "{p}");
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["code"], "validation_error", "{p}");
    }

    assert_eq!(harness.origin_hits().await, 0);
}

#[tokio::test]
async fn responses_carry_request_id_and_cors() {
    let (_harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/proxy/stream/bad.id"))
        .header("origin", "https://viewer.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let header_id = resp.headers()["x-request-id"].to_str().unwrap().to_owned();

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["request_id"], header_id);
}
