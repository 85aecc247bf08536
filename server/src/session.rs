//! Per-peer connection: receive loop, coalescing send queue, and teardown.
//!
//! ## Receive
//! One read is outstanding at a time, into the tail of a [`RecvBuffer`].
//! After each read the buffered bytes go through [`decode_frames`]; complete
//! frames are handed to the [`SessionHandler`] and the read cursor slides
//! past them. A zero-length read, an I/O error, or a malformed frame ends
//! the loop and disconnects.
//!
//! ## Send
//! [`Session::send`] appends to a pending list under a short lock. If no
//! write is in flight, the caller registers one write task carrying every
//! buffer queued so far as a single vectored write. When it completes, the
//! task picks up whatever arrived meanwhile, so per-connection order is the
//! order in which callers took the lock.
//!
//! ## Teardown
//! [`Session::disconnect`] is guarded by an atomic swap: concurrent failure
//! signals from the read and write sides collapse into one teardown.

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::frame::decode_frames;
use shared::{RecvBuffer, RECV_BUFFER_SIZE};
use std::fmt;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::Notify;

pub type SessionId = u64;

/// Upper bound on buffers handed to one vectored write.
const MAX_IOVECS: usize = 64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Callbacks a connection delivers to its owner.
pub trait SessionHandler: Send + Sync + 'static {
    fn on_connected(&self, _session: &Arc<Session>) {}

    /// Called once per complete frame, header included.
    fn on_packet(&self, session: &Arc<Session>, frame: &[u8]);

    fn on_disconnected(&self, _session: &Arc<Session>) {}
}

/// Builds the handler for each new connection.
pub type SessionFactory = Arc<dyn Fn() -> Arc<dyn SessionHandler> + Send + Sync>;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct SendQueue {
    pending: Vec<Bytes>,
    sending: bool,
}

pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    handler: Arc<dyn SessionHandler>,
    runtime: Handle,
    reader: Mutex<Option<BoxedReader>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    send_queue: Mutex<SendQueue>,
    connected: AtomicBool,
    shutdown: Notify,
}

impl Session {
    /// Wraps a connected stream. Must be called inside a tokio runtime.
    pub fn new<S>(stream: S, peer: Option<SocketAddr>, handler: Arc<dyn SessionHandler>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            handler,
            runtime: Handle::current(),
            reader: Mutex::new(Some(Box::new(reader))),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            send_queue: Mutex::new(SendQueue::default()),
            connected: AtomicBool::new(true),
            shutdown: Notify::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Fires the connected notification and starts the receive loop.
    ///
    /// Only the first call has any effect.
    pub fn start(self: &Arc<Self>) {
        let Some(reader) = self.reader.lock().take() else {
            return;
        };

        self.handler.on_connected(self);

        let session = Arc::clone(self);
        self.runtime.spawn(async move {
            session.recv_loop(reader).await;
        });
    }

    async fn recv_loop(self: Arc<Self>, mut reader: BoxedReader) {
        let mut buffer = RecvBuffer::new(RECV_BUFFER_SIZE);

        let reason = loop {
            buffer.compact();
            if buffer.is_full() {
                break "receive buffer overflow".to_string();
            }

            let read = tokio::select! {
                result = reader.read(buffer.write_segment()) => result,
                _ = self.shutdown.notified() => return,
            };

            match read {
                Ok(0) => break "closed by peer".to_string(),
                Ok(len) => {
                    if !buffer.on_write(len) {
                        break "receive cursor overrun".to_string();
                    }

                    let capacity = buffer.capacity();
                    let decoded = decode_frames(buffer.read_segment(), capacity, |frame| {
                        if self.is_connected() {
                            self.handler.on_packet(&self, frame);
                        }
                    });

                    match decoded {
                        Ok(consumed) => {
                            if !buffer.on_read(consumed) {
                                break "decoder consumed past buffered data".to_string();
                            }
                        }
                        Err(e) => {
                            warn!("Session {}: malformed frame: {}", self.id, e);
                            break format!("protocol violation: {}", e);
                        }
                    }
                }
                Err(e) => break format!("receive error: {}", e),
            }
        };

        self.disconnect(&reason);
    }

    pub fn send(self: &Arc<Self>, frame: Bytes) {
        self.send_many(std::iter::once(frame));
    }

    /// Queues frames for delivery, registering a write if none is in flight.
    pub fn send_many<I>(self: &Arc<Self>, frames: I)
    where
        I: IntoIterator<Item = Bytes>,
    {
        if !self.is_connected() {
            return;
        }

        let register = {
            let mut queue = self.send_queue.lock();
            queue.pending.extend(frames);
            if queue.sending || queue.pending.is_empty() {
                false
            } else {
                queue.sending = true;
                true
            }
        };

        if register {
            let session = Arc::clone(self);
            self.runtime.spawn(async move {
                session.flush_sends().await;
            });
        }
    }

    async fn flush_sends(self: Arc<Self>) {
        let mut writer = self.writer.lock().await;

        loop {
            let batch = {
                let mut queue = self.send_queue.lock();
                if queue.pending.is_empty() || !self.is_connected() {
                    queue.pending.clear();
                    queue.sending = false;
                    return;
                }
                std::mem::take(&mut queue.pending)
            };

            let Some(stream) = writer.as_mut() else {
                self.send_queue.lock().sending = false;
                return;
            };

            if let Err(e) = write_all_vectored(stream, &batch).await {
                drop(writer);
                self.send_queue.lock().sending = false;
                self.disconnect(&format!("send error: {}", e));
                return;
            }
        }
    }

    /// Tears the connection down once; later calls are no-ops.
    pub fn disconnect(self: &Arc<Self>, reason: &str) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        info!("Session {} disconnected: {}", self.id, reason);

        self.shutdown.notify_one();
        self.send_queue.lock().pending.clear();
        self.handler.on_disconnected(self);

        let session = Arc::clone(self);
        self.runtime.spawn(async move {
            if let Some(mut writer) = session.writer.lock().await.take() {
                if let Err(e) = writer.shutdown().await {
                    debug!("Session {}: shutdown error: {}", session.id, e);
                }
            }
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Writes every buffer in order using as few vectored writes as possible.
async fn write_all_vectored(writer: &mut BoxedWriter, frames: &[Bytes]) -> io::Result<()> {
    let mut index = 0;
    let mut offset = 0;

    loop {
        while index < frames.len() && offset == frames[index].len() {
            index += 1;
            offset = 0;
        }
        if index == frames.len() {
            break;
        }

        let slices: Vec<IoSlice<'_>> = std::iter::once(&frames[index][offset..])
            .chain(frames[index + 1..].iter().map(|frame| frame.as_ref()))
            .take(MAX_IOVECS)
            .map(IoSlice::new)
            .collect();

        let mut written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }

        while written > 0 {
            let left = frames[index].len() - offset;
            if written >= left {
                written -= left;
                index += 1;
                offset = 0;
            } else {
                offset += written;
                written = 0;
            }
        }
    }

    writer.flush().await
}
