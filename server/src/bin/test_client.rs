//! Smoke-test client: dials a few connections, enters a room, then wanders
//! and chats while logging what comes back.

use clap::Parser;
use log::{debug, info, warn};
use rand::Rng;
use server::connector::connect_many;
use server::session::{Session, SessionFactory, SessionHandler};
use shared::packets::{Chat, EnterRoom, Move};
use shared::{encode_message, Message, Packet, DEFAULT_PORT};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};

#[derive(Parser, Debug)]
#[command(name = "test_client")]
#[command(about = "Room server smoke-test client")]
struct Args {
    /// Server address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of connections to open
    #[arg(short, long, default_value_t = 3)]
    clients: usize,

    /// Room index to enter
    #[arg(short, long, default_value_t = 0)]
    room: u16,

    /// How long to run, in seconds
    #[arg(short, long, default_value_t = 10)]
    duration: u64,
}

#[derive(Default)]
struct PacketLogger {
    received: AtomicUsize,
}

impl SessionHandler for PacketLogger {
    fn on_packet(&self, session: &Arc<Session>, frame: &[u8]) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match Packet::decode(frame) {
            Ok(Packet::RoomJoined(joined)) => info!(
                "Session {} joined room {} as player {} ({} entities)",
                session.id(),
                joined.room,
                joined.player_id,
                joined.entities.len()
            ),
            Ok(Packet::ChatBroadcast(chat)) => {
                info!("Session {} chat from {}: {}", session.id(), chat.id, chat.text)
            }
            Ok(Packet::Damage(damage)) => info!(
                "Session {}: {} hit {} for {} ({} hp left)",
                session.id(),
                damage.attacker,
                damage.target,
                damage.amount,
                damage.hp
            ),
            Ok(packet) => debug!("Session {} received {:?}", session.id(), packet),
            Err(e) => warn!("Session {} received bad frame: {}", session.id(), e),
        }
    }

    fn on_disconnected(&self, session: &Arc<Session>) {
        warn!("Session {} lost its connection", session.id());
    }
}

fn send<M: Message>(session: &Arc<Session>, message: &M) {
    match encode_message(message) {
        Ok(frame) => session.send(frame),
        Err(e) => warn!("Failed to encode message {}: {}", M::PROTOCOL_ID, e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let logger = Arc::new(PacketLogger::default());
    let factory: SessionFactory = {
        let logger = Arc::clone(&logger);
        Arc::new(move || Arc::clone(&logger) as Arc<dyn SessionHandler>)
    };

    let sessions = connect_many(addr, args.clients, factory).await;
    if sessions.is_empty() {
        return Err(format!("could not connect to {}", addr).into());
    }

    for (index, session) in sessions.iter().enumerate() {
        send(
            session,
            &EnterRoom {
                player_name: format!("tester{}", index),
                room: args.room,
            },
        );
    }

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut timer = interval(Duration::from_millis(250));
    let mut step = 0u64;

    while Instant::now() < deadline {
        timer.tick().await;
        step += 1;

        for session in sessions.iter().filter(|s| s.is_connected()) {
            let (x, y) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0))
            };
            send(session, &Move { x, y });

            if step % 8 == 0 {
                send(
                    session,
                    &Chat {
                        text: format!("hello from session {} at step {}", session.id(), step),
                    },
                );
            }
        }
    }

    for session in &sessions {
        session.disconnect("test finished");
    }

    info!(
        "Finished: {} packets received across {} session(s)",
        logger.received.load(Ordering::Relaxed),
        sessions.len()
    );
    Ok(())
}
