//! Listen, accept and connection-reuse behaviour of the server.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tcpserver::config::ListenConfig;
use tcpserver::{
    Connection, ConnectionContext, PooledConnection, Server, ServerError, ServerHandle,
    ServerPhase, Stream, TcpConn,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

#[tokio::test]
async fn test_serves_on_ephemeral_port_and_counts() {
    let (server, addr, serving) = common::start_echo_server().await;
    assert_ne!(addr.port(), 0);
    assert_eq!(server.phase(), ServerPhase::Accepting);

    for i in 0..3 {
        let msg = format!("hello {}", i);
        assert_eq!(common::roundtrip(addr, msg.as_bytes()).await, msg.as_bytes());
    }

    assert_eq!(server.accepted_connections(), 3);
    assert!(common::wait_until(Duration::from_secs(2), || server.active_connections() == 0).await);

    server.shutdown(Duration::ZERO).await.unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(server.phase(), ServerPhase::Closed);
    assert_eq!(server.accepted_connections(), 3);
}

#[tokio::test]
async fn test_active_tracks_open_connections() {
    let (server, addr, serving) = common::start_echo_server().await;

    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();
    for stream in [&mut a, &mut b] {
        stream.write_all(b"x").await.unwrap();
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
    }
    assert_eq!(server.active_connections(), 2);

    drop(a);
    assert!(common::wait_until(Duration::from_secs(2), || server.active_connections() == 1).await);
    drop(b);
    assert!(common::wait_until(Duration::from_secs(2), || server.active_connections() == 0).await);

    server.shutdown(Duration::ZERO).await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_accept_ceiling_stops_accepting() {
    let server = Server::new("127.0.0.1:0").unwrap();
    server.set_max_accept_connections(2);
    server.listen().await.unwrap();
    let addr = server.listen_addr().unwrap();
    let serving = common::spawn_serve(&server, common::echo);

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    for stream in [&mut first, &mut second] {
        stream.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");
    }
    assert_eq!(server.accepted_connections(), 2);

    // The listener is gone: either the connect is refused or the stream is dead.
    if let Ok(mut third) = TcpStream::connect(addr).await {
        let _ = third.write_all(b"ping").await;
        let mut reply = [0u8; 4];
        let read = tokio::time::timeout(Duration::from_secs(2), third.read(&mut reply))
            .await
            .expect("third connection must not hang");
        assert!(matches!(read, Ok(0) | Err(_)));
    }
    assert_eq!(server.accepted_connections(), 2);

    // Serving ends once the accepted handlers finish.
    drop(first);
    drop(second);
    tokio::time::timeout(Duration::from_secs(2), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(server.phase(), ServerPhase::Closed);
    assert_eq!(server.active_connections(), 0);
}

#[tokio::test]
async fn test_accept_ceiling_with_concurrent_clients() {
    let server = Server::new("127.0.0.1:0").unwrap();
    server.set_max_accept_connections(2);
    server.listen().await.unwrap();
    let addr = server.listen_addr().unwrap();
    let serving = common::spawn_serve(&server, common::echo);

    let (a, b, c) = tokio::join!(
        TcpStream::connect(addr),
        TcpStream::connect(addr),
        TcpStream::connect(addr)
    );

    let mut echoed = 0;
    let mut clients = Vec::new();
    for mut stream in [a, b, c].into_iter().flatten() {
        let _ = stream.write_all(b"ping").await;
        let mut reply = [0u8; 4];
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut reply))
            .await
            .expect("no client may hang");
        if read.is_ok() && &reply == b"ping" {
            echoed += 1;
        }
        clients.push(stream);
    }

    assert_eq!(echoed, 2);
    assert_eq!(server.accepted_connections(), 2);

    drop(clients);
    tokio::time::timeout(Duration::from_secs(2), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(server.accepted_connections(), 2);
}

#[tokio::test]
async fn test_listen_on_busy_port_fails() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = holder.local_addr().unwrap();

    let server = Server::new(&addr.to_string()).unwrap();
    server
        .set_listen_config(ListenConfig {
            reuse_port: false,
            ..ListenConfig::default()
        })
        .unwrap();

    match server.listen().await {
        Err(ServerError::Listen { address, source }) => {
            assert_eq!(address, addr);
            assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
        }
        other => panic!("expected a listen error, got {:?}", other),
    }
    assert_eq!(server.phase(), ServerPhase::Idle);
    assert!(server.listen_addr().is_none());
}

#[tokio::test]
async fn test_invalid_address_rejected() {
    assert!(matches!(
        Server::new("definitely not an address"),
        Err(ServerError::Address { .. })
    ));
    assert!(matches!(Server::new("127.0.0.1:99999"), Err(ServerError::Address { .. })));
}

#[tokio::test]
async fn test_colon_port_listens_on_all_interfaces() {
    let server = Server::new(":0").unwrap();
    server.listen().await.unwrap();
    let addr = server.listen_addr().unwrap();
    assert!(addr.ip().is_unspecified());
    assert!(addr.is_ipv4());

    let local: SocketAddr = format!("127.0.0.1:{}", addr.port()).parse().unwrap();
    let serving = common::spawn_serve(&server, common::echo);
    assert_eq!(common::roundtrip(local, b"any").await, b"any");

    server.shutdown(Duration::ZERO).await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lifecycle_misuse_reports_state_errors() {
    let server = Server::new("127.0.0.1:0").unwrap();

    assert!(matches!(server.enable_tls(), Err(ServerError::Config(_))));
    assert!(!server.is_tls_enabled());
    assert!(matches!(
        server.serve(common::echo).await,
        Err(ServerError::State(_))
    ));

    server.listen().await.unwrap();
    assert!(matches!(server.listen().await, Err(ServerError::State(_))));
    assert!(matches!(
        server.set_listen_config(ListenConfig::default()),
        Err(ServerError::State(_))
    ));

    let serving = common::spawn_serve(&server, common::echo);
    assert!(common::wait_until(Duration::from_secs(2), || server.phase() == ServerPhase::Accepting).await);
    assert!(matches!(
        server.serve(common::echo).await,
        Err(ServerError::State(_))
    ));

    server.shutdown(Duration::ZERO).await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_objects_are_reused() {
    let (server, addr, serving) = common::start_echo_server().await;

    for _ in 0..3 {
        common::roundtrip(addr, b"again").await;
        assert!(common::wait_until(Duration::from_secs(2), || server.active_connections() == 0).await);
    }

    assert_eq!(server.pool().created_count(), 1);
    assert_eq!(server.pool().reused_count(), 2);
    assert_eq!(server.pool().idle_count(), 1);

    server.shutdown(Duration::ZERO).await.unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(server.pool().idle_count(), 0);
}

/// A connection that counts how often it is recycled.
#[derive(Debug)]
struct Tracked {
    inner: TcpConn,
    resets: Arc<AtomicUsize>,
}

impl Connection for Tracked {
    fn stream(&self) -> Option<&Stream> {
        self.inner.stream()
    }

    fn stream_mut(&mut self) -> Option<&mut Stream> {
        self.inner.stream_mut()
    }

    fn take_stream(&mut self) -> Option<Stream> {
        self.inner.take_stream()
    }

    fn set_stream(&mut self, stream: Stream) {
        self.inner.set_stream(stream)
    }

    fn server(&self) -> Option<&ServerHandle> {
        self.inner.server()
    }

    fn start_time(&self) -> Option<Instant> {
        self.inner.start_time()
    }

    fn context(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.inner.context()
    }

    fn set_context(&mut self, context: Option<ConnectionContext>) {
        self.inner.set_context(context)
    }

    fn start(&mut self) {
        self.inner.start()
    }

    fn reset(&mut self, stream: Option<Stream>) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.inner.reset(stream)
    }

    fn set_server(&mut self, server: ServerHandle) {
        self.inner.set_server(server)
    }
}

#[tokio::test]
async fn test_custom_connection_state_is_cleared_between_tenants() {
    let resets = Arc::new(AtomicUsize::new(0));
    let leaked = Arc::new(AtomicBool::new(false));

    let creator_resets = Arc::clone(&resets);
    let server = Server::with_creator("127.0.0.1:0", move || Tracked {
        inner: TcpConn::new(),
        resets: Arc::clone(&creator_resets),
    })
    .unwrap();
    server.listen().await.unwrap();
    let addr = server.listen_addr().unwrap();

    let seen_leak = Arc::clone(&leaked);
    let serving = common::spawn_serve(&server, move |mut conn: PooledConnection<Tracked>| {
        let seen_leak = Arc::clone(&seen_leak);
        async move {
            if conn.context().is_some() {
                seen_leak.store(true, Ordering::SeqCst);
            }
            assert!(conn.start_time().is_some());
            assert!(conn.server().is_some_and(|s| s.is_attached()));
            assert_eq!(conn.server_addr(), conn.server().and_then(|s| s.listen_addr()));
            let peer = conn.client_addr().map(|a| a.to_string()).unwrap_or_default();
            conn.set_context(Some(Box::new(peer)));
            common::echo(conn).await;
        }
    });

    for _ in 0..2 {
        assert_eq!(common::roundtrip(addr, b"tenant").await, b"tenant");
        assert!(common::wait_until(Duration::from_secs(2), || server.active_connections() == 0).await);
    }

    assert!(!leaked.load(Ordering::SeqCst));
    // One reset when checked out and one when returned, per tenant.
    assert_eq!(resets.load(Ordering::SeqCst), 4);
    assert_eq!(server.pool().created_count(), 1);

    server.shutdown(Duration::ZERO).await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let server = Server::new("127.0.0.1:0").unwrap();
    server.listen().await.unwrap();
    let addr = server.listen_addr().unwrap();
    let serving = common::spawn_serve(&server, |mut conn: PooledConnection| async move {
        let mut first = [0u8; 1];
        if conn.read_exact(&mut first).await.is_ok() && first[0] == b'!' {
            panic!("handler blew up");
        }
        let _ = conn.write_all(&first).await;
        common::echo(conn).await;
    });

    let mut doomed = TcpStream::connect(addr).await.unwrap();
    doomed.write_all(b"!").await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), doomed.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    assert_eq!(common::roundtrip(addr, b"fine").await, b"fine");
    assert!(common::wait_until(Duration::from_secs(2), || server.active_connections() == 0).await);
    assert_eq!(server.accepted_connections(), 2);
    assert_eq!(server.pool().created_count(), 1);

    server.shutdown(Duration::ZERO).await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_ballast_is_opt_in() {
    let server = Server::new("127.0.0.1:0").unwrap();
    assert_eq!(server.ballast_bytes(), 0);
    server.set_ballast(1);
    assert_eq!(server.ballast_bytes(), 1 << 20);
}
