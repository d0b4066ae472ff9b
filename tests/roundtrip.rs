//! End-to-end request/response exchanges over the mock pipe.

use std::time::Duration;

use http::Method;

use h2mux::{mock, Request};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("h2mux=trace")
        .try_init();
}

#[tokio::test]
async fn post_json_roundtrip() {
    init_tracing();
    let mut server = mock::expect_connect("roundtrip-json.test", 443).await;
    let conn = mock::connect("roundtrip-json.test", 443).await.unwrap();

    // On connect each side sends its preamble; the client does not read yet.
    assert_eq!(server.read().await.unwrap().unwrap(), "[Preamble]");

    let request = Request::new(Method::POST, "/dummy")
        .json(&serde_json::json!({"a": 1}))
        .unwrap();
    let live = conn.send(request).await.unwrap();
    assert_eq!(live.stream_id(), 1);
    assert_eq!(conn.active_requests().await, 1);

    // The request went out in full: headers, then the body with the stream
    // end on its final frame. Still nothing has been read from the server.
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Headers] stream_id=1 end_stream=false \
         :method=POST :path=/dummy :authority=roundtrip-json.test :scheme=https \
         content-type=application/json; charset=utf-8\n\
         [Data] stream_id=1 end_stream=true len=7 data={\"a\":1}"
    );

    server
        .send_headers(1, &[(":status", "200"), ("content-type", "text/plain")], false)
        .unwrap();
    server.send_data(1, "dummy response", true).unwrap();
    server.flush().await.unwrap();

    // Awaiting drives the read loop until the stream ends.
    let response = live.wait().await.unwrap();
    assert_eq!(response.status, 200);
    assert!(response.is_success());
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.text().unwrap(), "dummy response");
    assert_eq!(conn.active_requests().await, 0);

    // Awaiting again returns the stored completion without any more reads.
    let again = live.wait().await.unwrap();
    assert_eq!(again.text().unwrap(), "dummy response");

    // While reading, the client acknowledged the received body bytes.
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[WindowUpdate] stream_id=1 increment=14"
    );

    conn.close().await.unwrap();
    assert_eq!(server.read().await.unwrap().unwrap(), "[Shutdown]");
    assert_eq!(server.read().await.unwrap(), None);
}

#[tokio::test]
async fn empty_body_request_ends_stream_on_headers() {
    init_tracing();
    let mut server = mock::expect_connect("roundtrip-get.test", 443).await;
    let conn = mock::connect("roundtrip-get.test", 443).await.unwrap();

    let live = conn.request(Method::GET, "/dummy").await.unwrap();
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Preamble]\n\
         [Headers] stream_id=1 end_stream=true \
         :method=GET :path=/dummy :authority=roundtrip-get.test :scheme=https"
    );

    server.send_headers(1, &[(":status", "204")], true).unwrap();
    server.flush().await.unwrap();

    let response = live.wait().await.unwrap();
    assert_eq!(response.status, 204);
    assert!(response.body().is_empty());
    assert_eq!(conn.active_requests().await, 0);
}

#[tokio::test]
async fn peer_close_ends_reads_without_dispatch() {
    init_tracing();
    let server = mock::expect_connect("roundtrip-close.test", 443).await;
    let conn = mock::connect("roundtrip-close.test", 443).await.unwrap();
    let live = conn.request(Method::GET, "/dummy").await.unwrap();

    drop(server);

    // The server preamble is still buffered in the pipe; after that, every
    // read reports end-of-stream.
    assert!(conn.read().await.unwrap());
    assert!(!conn.read().await.unwrap());
    assert!(!conn.read().await.unwrap());

    // No error is synthesized: the request stays registered and incomplete.
    assert_eq!(conn.active_requests().await, 1);
    let stalled = tokio::time::timeout(Duration::from_millis(50), live.wait()).await;
    assert!(stalled.is_err());
}
