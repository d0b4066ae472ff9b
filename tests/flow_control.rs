//! Flow-control-gated body sending.

use http::Method;

use h2mux::mock::{self, MockEngine};
use h2mux::Request;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("h2mux=trace")
        .try_init();
}

#[tokio::test]
async fn window_then_frame_size_limit_chunking() {
    init_tracing();
    let mut server = mock::expect_connect("flow-chunks.test", 443).await;
    let engine = MockEngine::client().initial_window(5).max_frame_size(7);
    let conn = mock::connect_with("flow-chunks.test", 443, engine)
        .await
        .unwrap();

    let live = conn
        .send(Request::new(Method::POST, "/upload").body(&b"555557777777333"[..]))
        .await
        .unwrap();

    // Only the first 5 bytes fit the window; the rest stays pending.
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Preamble]\n\
         [Headers] stream_id=1 end_stream=false \
         :method=POST :path=/upload :authority=flow-chunks.test :scheme=https\n\
         [Data] stream_id=1 end_stream=false len=5 data=55555"
    );

    // Raising the window resumes the body: one full frame, then the
    // remainder, with the stream end on the final frame only.
    server.send_window_update(1, 100);
    server.flush().await.unwrap();
    assert!(conn.read().await.unwrap());
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Data] stream_id=1 end_stream=false len=7 data=7777777\n\
         [Data] stream_id=1 end_stream=true len=3 data=333"
    );

    server.send_headers(1, &[(":status", "200")], true).unwrap();
    server.flush().await.unwrap();
    let response = live.wait().await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(conn.active_requests().await, 0);
}

#[tokio::test]
async fn zero_window_sends_headers_but_no_data() {
    init_tracing();
    let mut server = mock::expect_connect("flow-zero.test", 443).await;
    let conn = mock::connect_with(
        "flow-zero.test",
        443,
        MockEngine::client().initial_window(0),
    )
    .await
    .unwrap();

    let live = conn
        .send(Request::new(Method::POST, "/upload").text("hello"))
        .await
        .unwrap();

    // Headers go out straight away; the body waits for a window.
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Preamble]\n\
         [Headers] stream_id=1 end_stream=false \
         :method=POST :path=/upload :authority=flow-zero.test :scheme=https \
         content-type=text/plain; charset=utf-8"
    );

    server.send_window_update(1, 100);
    server.flush().await.unwrap();
    assert!(conn.read().await.unwrap());
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Data] stream_id=1 end_stream=true len=5 data=hello"
    );

    server.send_headers(1, &[(":status", "200")], true).unwrap();
    server.flush().await.unwrap();
    live.wait().await.unwrap();
}

#[tokio::test]
async fn frame_size_limits_each_frame() {
    init_tracing();
    let mut server = mock::expect_connect("flow-frames.test", 443).await;
    let engine = MockEngine::client().initial_window(1000).max_frame_size(4);
    let conn = mock::connect_with("flow-frames.test", 443, engine)
        .await
        .unwrap();

    conn.send(Request::new(Method::POST, "/upload").body(&b"0123456789"[..]))
        .await
        .unwrap();

    // 10 bytes over 4-byte frames: 4, 4, then the 2-byte remainder.
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Preamble]\n\
         [Headers] stream_id=1 end_stream=false \
         :method=POST :path=/upload :authority=flow-frames.test :scheme=https\n\
         [Data] stream_id=1 end_stream=false len=4 data=0123\n\
         [Data] stream_id=1 end_stream=false len=4 data=4567\n\
         [Data] stream_id=1 end_stream=true len=2 data=89"
    );
}

#[tokio::test]
async fn window_update_with_no_pending_body_is_a_noop() {
    init_tracing();
    let mut server = mock::expect_connect("flow-noop.test", 443).await;
    let conn = mock::connect("flow-noop.test", 443).await.unwrap();

    let live = conn.request(Method::GET, "/dummy").await.unwrap();
    assert_eq!(
        server.read().await.unwrap().unwrap(),
        "[Preamble]\n\
         [Headers] stream_id=1 end_stream=true \
         :method=GET :path=/dummy :authority=flow-noop.test :scheme=https"
    );

    // A window update for a request with nothing left to send changes
    // nothing on the wire.
    server.send_window_update(1, 50);
    server.flush().await.unwrap();
    assert!(conn.read().await.unwrap());

    server.send_headers(1, &[(":status", "200")], true).unwrap();
    server.flush().await.unwrap();
    live.wait().await.unwrap();
    conn.close().await.unwrap();

    // Everything the client sent since the request: just the shutdown.
    // No DATA frame ever appeared.
    assert_eq!(server.read().await.unwrap().unwrap(), "[Shutdown]");
}
