//! # Room Server Library
//!
//! Authoritative real-time server core. It accepts many concurrent TCP
//! connections, decodes the length-prefixed binary protocol from `shared`,
//! and lets per-room logic mutate shared state without locks around the
//! game code. Two schedulers feed delayed and periodic work back into the
//! same serialized execution domain without ever blocking I/O.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! Every peer is a [`session::Session`]: one outstanding read into a fixed
//! receive window, frame decoding on each completion, and a send queue that
//! coalesces everything queued while a write is in flight into a single
//! vectored write. Teardown happens exactly once no matter how many failure
//! signals race.
//!
//! ### Serialized Room State
//! A [`room::Room`] owns a [`job_queue::JobQueue`]. Any thread may push a
//! job; whichever pusher finds the queue idle drains it, so at most one job
//! touches a room's entities at any instant and jobs run in submission order.
//!
//! ### Timing
//! - [`tick_scheduler::TickScheduler`] is driven by the main loop every
//!   millisecond and runs the recurring room flush (every 25 ticks by default,
//!   roughly 40 Hz).
//! - [`task_scheduler::TaskScheduler`] runs on its own 100 ms timer, firing
//!   absolute-time tasks (respawns, revives) and advancing per-entity
//!   animation states. Its side effects reach rooms only as pushed jobs.
//!
//! ## Module Organization
//!
//! ### Infrastructure
//! - `heap`: array-backed binary min-heap used by the tick scheduler
//! - `job_queue`: the serializing turnstile queue
//! - `clock`: monotonic time source, replaceable in tests
//! - `tick_scheduler` / `task_scheduler`: the two timing authorities
//!
//! ### Networking
//! - `session`: per-connection receive loop, send queue, teardown
//! - `listener` / `connector`: accept and dial with a handler factory
//! - `handler`: maps decoded packets of one session onto its room
//!
//! ### Simulation
//! - `entity`: closed set of entity kinds (players and monsters)
//! - `room`: entity bookkeeping, broadcasts, combat and respawn glue
//! - `network`: the [`network::Server`] root that wires everything up
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::default()).await?;
//!
//!     // Runs until Ctrl+C: accepts connections, flushes rooms on the
//!     // tick scheduler and advances entity states on the task scheduler.
//!     server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Threading Model
//!
//! Socket completions, the task scheduler timer and the main loop all run as
//! tokio tasks on the multi-threaded runtime. Locks guard only queue data
//! structures and are never held while a job body runs. Room state is
//! reachable exclusively from inside that room's jobs.

pub mod clock;
pub mod config;
pub mod connector;
pub mod entity;
pub mod error;
pub mod handler;
pub mod heap;
pub mod job_queue;
pub mod listener;
pub mod network;
pub mod room;
pub mod session;
pub mod task_scheduler;
pub mod tick_scheduler;

pub use error::{Result, ServerError};
