//! Tests for server runtime behaviour.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use rstest::{fixture, rstest};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::{Duration, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use topicwire_testing::{LoggerHandle, logger};

use super::{
    BackoffConfig,
    accept::{AcceptListener, AcceptLoopOptions, accept_loop},
};
use crate::{
    app::{App, Pipeline},
    config::PipelineConfig,
    protocol::{AppResult, Application, Arguments, Session},
    server::{Bound, OutboundRegistry, TopicServer, connection::ConnectionHandles},
};

#[fixture]
fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

struct Panicky;

impl Application for Panicky {
    fn on_call(&mut self, _: &mut Session<'_>, _: &str, _: &str, _: Arguments) -> AppResult {
        panic!("call handler exploded");
    }

    fn on_publish(
        &mut self,
        _: &mut Session<'_>,
        _: &str,
        _: Value,
        _: &[String],
        _: Option<&[String]>,
    ) -> AppResult {
        Ok(())
    }
}

fn pipeline() -> Pipeline {
    let config = PipelineConfig {
        allowed_origins: vec!["*".into()],
        ..PipelineConfig::default()
    };
    App::new(config).route("/", Panicky).build()
}

fn bind_server(listener: StdTcpListener) -> TopicServer<crate::http::Router, Bound> {
    TopicServer::new(pipeline())
        .workers(1)
        .bind_existing_listener(listener)
        .expect("bind failed")
}

#[rstest]
#[tokio::test]
async fn run_with_immediate_shutdown(free_listener: StdTcpListener) {
    let server = bind_server(free_listener);
    let shutdown_future = async { tokio::time::sleep(Duration::from_millis(10)).await };
    let result = timeout(
        Duration::from_millis(1000),
        server.run_with_shutdown(shutdown_future),
    )
    .await;
    assert!(result.expect("server did not finish in time").is_ok());
}

#[rstest]
#[tokio::test]
async fn ready_signal_fires(free_listener: StdTcpListener) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = bind_server(free_listener).ready_signal(ready_tx);
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    timeout(Duration::from_secs(1), ready_rx)
        .await
        .expect("ready signal timed out")
        .expect("ready sender dropped");
    let _ = stop_tx.send(());
    handle
        .await
        .expect("server join error")
        .expect("server run failed");
}

#[rstest]
#[tokio::test]
async fn callback_panic_closes_only_that_connection(
    free_listener: StdTcpListener,
    mut logger: LoggerHandle,
) {
    let addr = free_listener.local_addr().expect("listener address");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(bind_server(free_listener).run_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .expect("write handshake");
    let call = br#"[2,"c1","proc"]"#;
    let len = u32::try_from(call.len() + 1).expect("small frame");
    let mut frame = len.to_be_bytes().to_vec();
    frame.push(crate::codec::KIND_TEXT);
    frame.extend_from_slice(call);
    stream.write_all(&frame).await.expect("write call");

    let mut received = Vec::new();
    timeout(Duration::from_secs(2), stream.read_to_end(&mut received))
        .await
        .expect("connection was not closed")
        .expect("read failed");
    assert!(received.starts_with(b"HTTP/1.1 101"));
    assert!(logger.contains("pipeline callback panicked"));

    let _ = stop_tx.send(());
    handle
        .await
        .expect("server join error")
        .expect("pipeline survived the panic");
}

struct FailingListener {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl AcceptListener for FailingListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::other("accept failed"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
    }
}

#[tokio::test(start_paused = true)]
async fn accept_failures_back_off_until_shutdown() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(FailingListener {
        attempts: Arc::clone(&attempts),
    });
    let (events, _events_rx) = mpsc::channel(1);
    let shutdown = CancellationToken::new();
    let options = AcceptLoopOptions {
        handles: ConnectionHandles {
            events,
            outbound: Arc::new(OutboundRegistry::new()),
            shutdown: shutdown.clone(),
        },
        tracker: TaskTracker::new(),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let handle = tokio::spawn(accept_loop(listener, options));

    // Waits of 10, 20, 40 and 40 ms fit in 115 ms.
    tokio::time::sleep(Duration::from_millis(115)).await;
    shutdown.cancel();
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("accept loop did not stop")
        .expect("accept loop panicked");
    let seen = attempts.load(Ordering::SeqCst);
    assert!((4..=6).contains(&seen), "unexpected attempt count {seen}");
}
