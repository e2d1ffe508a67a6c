//! Keepalive and idle-deadline tests, run against a live socket under
//! tokio's paused test clock: the virtual clock jumps straight to the
//! next timer whenever the runtime is idle, so the 30 s ping mark and
//! the 60 s idle deadline elapse in milliseconds of real time.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use wsrpc_transport::{Options, Server};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

async fn start_server() -> SocketAddr {
    let server = Server::with_default_app();
    let options = Options {
        host: "127.0.0.1".to_owned(),
        port: 0,
        // Large enough that the idle-shutdown timer (real time, not the
        // test clock) never fires during the test.
        timeout_secs: 600,
        threads_num: 2,
    };
    let bound = server.bind(options).await.expect("bind");
    let addr = bound.local_addr().expect("local addr");
    tokio::spawn(async move {
        bound.run().await.expect("serve");
    });
    addr
}

#[tokio::test(start_paused = true)]
async fn keepalive_ping_fires_after_the_ping_interval() {
    let addr = start_server().await;
    let connected = tokio::time::Instant::now();
    let (mut ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("connect");

    // Send nothing: the first frame the server ever produces must be a
    // keepalive ping, and not before the ping interval has elapsed.
    let frame = ws
        .next()
        .await
        .expect("stream open")
        .expect("socket error");
    assert!(matches!(frame, Message::Ping(_)), "expected ping, got {frame:?}");
    assert!(
        connected.elapsed() >= PING_INTERVAL,
        "ping arrived at {:?}, before the {PING_INTERVAL:?} mark",
        connected.elapsed()
    );

    // Reading the ping queued an automatic pong, which counts as
    // inbound traffic server-side: the connection must still be live.
    ws.send(Message::Text(
        r#"{"id":"1","method":"echo","params":1}"#.into(),
    ))
    .await
    .expect("send");
    loop {
        match ws
            .next()
            .await
            .expect("stream open")
            .expect("socket error")
        {
            Message::Text(text) => {
                let resp: Value = serde_json::from_str(&text).expect("response is JSON");
                assert_eq!(resp["id"], "1");
                assert_eq!(resp["result"], 1);
                break;
            }
            // Further keepalives may interleave with the response.
            Message::Ping(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn silent_socket_closed_after_the_idle_deadline() {
    let addr = start_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("connect");

    // Send nothing and read nothing: with no reads there are no
    // automatic pongs, so the server's idle deadline expires after one
    // unanswered ping.
    tokio::time::sleep(IDLE_TIMEOUT + PING_INTERVAL + Duration::from_secs(60)).await;

    let mut pings = 0;
    loop {
        match ws.next().await {
            Some(Ok(Message::Ping(_))) => pings += 1,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(other)) => panic!("unexpected frame: {other:?}"),
        }
    }
    assert!(pings >= 1, "expected a keepalive ping before the close");
}
