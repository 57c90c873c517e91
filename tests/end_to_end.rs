//! End-to-end tests over real TCP connections.

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};

use rstest::rstest;
use serde_json::json;
use tokio::{sync::oneshot, task::JoinHandle};
use topicwire::{App, PipelineConfig, ServerError, TopicServer};
use topicwire_testing::{LoggerHandle, ScriptedApp, TestClient, logger};

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    async fn stop(self) {
        let _ = self.stop.send(());
        self.handle
            .await
            .expect("server task panicked")
            .expect("server failed");
    }
}

async fn start() -> Running {
    let listener = StdTcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
        .expect("bind free port");
    let addr = listener.local_addr().expect("listener address");
    let app = App::new(PipelineConfig::default()).route("/ws", ScriptedApp::new());
    let server = TopicServer::new(app.build())
        .workers(2)
        .bind_existing_listener(listener)
        .expect("adopt listener");
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.ready_signal(ready_tx).run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await.expect("server never became ready");
    Running { addr, stop, handle }
}

async fn welcomed(addr: SocketAddr) -> (TestClient, String) {
    let mut client = TestClient::connect(addr).await.expect("connect");
    let head = client
        .handshake("/ws", Some("localhost"))
        .await
        .expect("handshake");
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected response {head:?}");
    let welcome = client.recv().await.expect("read").expect("welcome");
    assert_eq!(welcome[0], 0);
    let session = welcome[1].as_str().expect("session id").to_owned();
    (client, session)
}

#[tokio::test]
async fn publish_subscribe_between_clients() {
    let server = start().await;
    let (mut alice, _) = welcomed(server.addr).await;
    let (mut bob, _) = welcomed(server.addr).await;

    for client in [&mut alice, &mut bob] {
        client.send(&json!([5, "news"])).await.expect("subscribe");
        client
            .send(&json!([2, "sync", "http://x/p#echo"]))
            .await
            .expect("call");
        assert_eq!(
            client.recv().await.expect("read"),
            Some(json!([3, "sync", []]))
        );
    }

    alice
        .send(&json!([7, "news", {"headline": "hi"}, true]))
        .await
        .expect("publish");
    assert_eq!(
        bob.recv().await.expect("read"),
        Some(json!([8, "news", {"headline": "hi"}]))
    );

    alice
        .send(&json!([2, "c2", "http://x/p#echo", 7]))
        .await
        .expect("call");
    // The publisher excluded itself, so the call result comes first.
    assert_eq!(
        alice.recv().await.expect("read"),
        Some(json!([3, "c2", [7]]))
    );

    server.stop().await;
}

#[tokio::test]
async fn foreign_origin_is_refused() {
    let server = start().await;
    let mut client = TestClient::connect(server.addr).await.expect("connect");
    let head = client
        .handshake("/ws", Some("attacker.example"))
        .await
        .expect("handshake");
    assert!(head.starts_with("HTTP/1.1 403"), "unexpected response {head:?}");
    client.closed().await.expect("server closes");
    server.stop().await;
}

#[rstest]
#[tokio::test]
async fn protocol_violation_closes_and_logs(mut logger: LoggerHandle) {
    let server = start().await;
    let (mut client, _) = welcomed(server.addr).await;
    client.send(&json!([0, "forged", 1, "x"])).await.expect("send");
    assert_eq!(client.recv().await.expect("read"), None);
    assert!(logger.contains("closing connection"));
    server.stop().await;
}
