//! Inbound connection acceptor.
//!
//! Keeps a fixed number of accept tasks running against one bound socket.
//! Each accepted stream becomes a [`Session`] with a handler from the
//! factory, and the task goes straight back to accepting.

use crate::error::Result;
use crate::session::{Session, SessionFactory};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct Listener {
    socket: Arc<TcpListener>,
    local_addr: SocketAddr,
    factory: SessionFactory,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, factory: SessionFactory) -> Result<Self> {
        let socket = TcpListener::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("Listening on {}", local_addr);

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            factory,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts `accepts` concurrent accept loops.
    pub fn start(&self, accepts: usize) {
        let mut tasks = self.tasks.lock();
        for index in 0..accepts.max(1) {
            let socket = Arc::clone(&self.socket);
            let factory = Arc::clone(&self.factory);
            tasks.push(tokio::spawn(accept_loop(index, socket, factory)));
        }
    }

    /// Stops accepting; established sessions are unaffected.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(index: usize, socket: Arc<TcpListener>, factory: SessionFactory) {
    loop {
        match socket.accept().await {
            Ok((stream, peer)) => {
                debug!("Acceptor {} accepted {}", index, peer);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }
                let session = Session::new(stream, Some(peer), factory());
                session.start();
            }
            Err(e) => {
                error!("Acceptor {} failed to accept: {}", index, e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}
