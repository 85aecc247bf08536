//! Outbound dialer using the same session factory pattern as the acceptor.

use crate::error::Result;
use crate::session::{Session, SessionFactory};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Opens one connection and starts its receive loop.
pub async fn connect(addr: SocketAddr, factory: &SessionFactory) -> Result<Arc<Session>> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let session = Session::new(stream, Some(addr), factory());
    session.start();
    Ok(session)
}

/// Dials `count` connections concurrently and returns the ones that succeeded.
pub async fn connect_many(addr: SocketAddr, count: usize, factory: SessionFactory) -> Vec<Arc<Session>> {
    let attempts: Vec<_> = (0..count)
        .map(|_| {
            let factory = Arc::clone(&factory);
            tokio::spawn(async move { connect(addr, &factory).await })
        })
        .collect();

    let mut sessions = Vec::with_capacity(count);
    for attempt in attempts {
        match attempt.await {
            Ok(Ok(session)) => sessions.push(session),
            Ok(Err(e)) => warn!("Connection to {} failed: {}", addr, e),
            Err(e) => warn!("Connect task for {} failed: {}", addr, e),
        }
    }

    info!("Connected {}/{} sessions to {}", sessions.len(), count, addr);
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Listener;
    use crate::session::SessionHandler;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct Counter {
        connected: AtomicUsize,
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl SessionHandler for Counter {
        fn on_connected(&self, _session: &Arc<Session>) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_packet(&self, _session: &Arc<Session>, frame: &[u8]) {
            self.frames.lock().push(frame.to_vec());
        }
    }

    /// Echoes every frame straight back.
    struct Echo;

    impl SessionHandler for Echo {
        fn on_packet(&self, session: &Arc<Session>, frame: &[u8]) {
            session.send(Bytes::copy_from_slice(frame));
        }
    }

    fn shared_factory(handler: Arc<Counter>) -> SessionFactory {
        Arc::new(move || handler.clone() as Arc<dyn SessionHandler>)
    }

    async fn eventually(check: impl Fn() -> bool) {
        let wait = async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        timeout(Duration::from_secs(5), wait).await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_accepts_many_dials() {
        let inbound = Arc::new(Counter::default());
        let listener = Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            shared_factory(inbound.clone()),
        )
        .await
        .unwrap();
        listener.start(2);

        let outbound = Arc::new(Counter::default());
        let sessions = connect_many(listener.local_addr(), 5, shared_factory(outbound.clone())).await;

        assert_eq!(sessions.len(), 5);
        assert_eq!(outbound.connected.load(Ordering::SeqCst), 5);
        eventually(|| inbound.connected.load(Ordering::SeqCst) == 5).await;
    }

    #[tokio::test]
    async fn test_round_trip_through_echo() {
        let listener = Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(|| Arc::new(Echo) as Arc<dyn SessionHandler>),
        )
        .await
        .unwrap();
        listener.start(1);

        let client = Arc::new(Counter::default());
        let session = connect(listener.local_addr(), &shared_factory(client.clone()))
            .await
            .unwrap();

        let frames: Vec<Bytes> = (1..=3u8)
            .map(|i| {
                let mut frame = vec![4 + i, 0, i, 0];
                frame.extend(std::iter::repeat(i).take(usize::from(i)));
                Bytes::from(frame)
            })
            .collect();
        session.send_many(frames.clone());

        eventually(|| client.frames.lock().len() == 3).await;
        let echoed = client.frames.lock().clone();
        for (sent, got) in frames.iter().zip(echoed) {
            assert_eq!(sent.as_ref(), got.as_slice());
        }
    }

    #[tokio::test]
    async fn test_failed_dials_are_dropped() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let sessions = connect_many(addr, 3, shared_factory(Arc::new(Counter::default()))).await;
        assert!(sessions.is_empty());
    }
}
