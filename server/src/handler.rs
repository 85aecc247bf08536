//! Per-connection packet handler tying a session to the room it joined.

use crate::entity::{allocate_player_id, EntityId};
use crate::error::{Result, ServerError};
use crate::room::{new_player, Room};
use crate::session::{Session, SessionFactory, SessionHandler};
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::Packet;
use std::sync::Arc;

/// Longest accepted player name, in characters.
pub const MAX_NAME_CHARS: usize = 24;

struct Membership {
    room: Arc<Room>,
    player_id: EntityId,
}

#[derive(Default)]
struct Seat {
    current: Option<Membership>,
    /// Set once the session is gone; no room may be entered afterwards.
    closed: bool,
}

pub struct RoomHandler {
    rooms: Arc<[Arc<Room>]>,
    seat: Mutex<Seat>,
}

impl RoomHandler {
    pub fn new(rooms: Arc<[Arc<Room>]>) -> Self {
        Self {
            rooms,
            seat: Mutex::new(Seat::default()),
        }
    }

    /// Builds one handler per accepted connection, all sharing `rooms`.
    pub fn factory(rooms: Arc<[Arc<Room>]>) -> SessionFactory {
        Arc::new(move || Arc::new(RoomHandler::new(Arc::clone(&rooms))) as Arc<dyn SessionHandler>)
    }

    pub fn player_id(&self) -> Option<EntityId> {
        self.seat.lock().current.as_ref().map(|m| m.player_id)
    }

    fn find_room(&self, id: u16) -> Result<Arc<Room>> {
        self.rooms
            .get(usize::from(id))
            .cloned()
            .ok_or(ServerError::UnknownRoom(id))
    }

    fn leave_current(&self) {
        if let Some(membership) = self.seat.lock().current.take() {
            membership.room.leave(membership.player_id);
        }
    }

    /// Leaves the room for good. Later enters are refused.
    fn close(&self) {
        let mut seat = self.seat.lock();
        seat.closed = true;
        if let Some(membership) = seat.current.take() {
            membership.room.leave(membership.player_id);
        }
    }

    /// Joins `room`, leaving the previous one first.
    ///
    /// The seat stays locked until the enter job is queued, so a concurrent
    /// close always queues its leave after it.
    fn enter(&self, session: &Arc<Session>, room: Arc<Room>, player_name: &str) {
        let mut seat = self.seat.lock();
        if seat.closed || !session.is_connected() {
            debug!("Session {} closed before entering room {}", session.id(), room.id());
            return;
        }
        if let Some(previous) = seat.current.take() {
            previous.room.leave(previous.player_id);
        }

        let id = allocate_player_id();
        let name = sanitize_name(player_name, id);
        let player = new_player(id, name, Arc::clone(session), room.content());

        seat.current = Some(Membership {
            room: Arc::clone(&room),
            player_id: id,
        });
        room.enter(player);
    }

    fn dispatch(&self, session: &Arc<Session>, packet: Packet) -> Result<()> {
        match packet {
            Packet::EnterRoom(enter) => {
                let room = self.find_room(enter.room)?;
                self.enter(session, room, &enter.player_name);
            }
            Packet::LeaveRoom(_) => self.leave_current(),
            Packet::Move(movement) => {
                if let Some((room, id)) = self.current() {
                    room.move_entity(id, movement.x, movement.y);
                }
            }
            Packet::Chat(chat) => {
                if let Some((room, id)) = self.current() {
                    room.chat(id, chat.text);
                }
            }
            Packet::Attack(attack) => {
                if let Some((room, id)) = self.current() {
                    room.attack(id, attack.target, attack.attack);
                }
            }
            other => {
                warn!(
                    "Session {} sent server-only packet {}",
                    session.id(),
                    other.protocol_id()
                );
            }
        }
        Ok(())
    }

    fn current(&self) -> Option<(Arc<Room>, EntityId)> {
        let seat = self.seat.lock();
        match seat.current.as_ref() {
            Some(m) => Some((Arc::clone(&m.room), m.player_id)),
            None => {
                debug!("Ignoring packet from a session outside any room");
                None
            }
        }
    }
}

impl SessionHandler for RoomHandler {
    fn on_connected(&self, session: &Arc<Session>) {
        match session.peer() {
            Some(peer) => info!("Session {} connected from {}", session.id(), peer),
            None => info!("Session {} connected", session.id()),
        }
    }

    fn on_packet(&self, session: &Arc<Session>, frame: &[u8]) {
        let result = Packet::decode(frame)
            .map_err(ServerError::from)
            .and_then(|packet| self.dispatch(session, packet));

        if let Err(e) = result {
            warn!("Session {}: {}", session.id(), e);
        }
    }

    fn on_disconnected(&self, _session: &Arc<Session>) {
        self.close();
    }
}

fn sanitize_name(raw: &str, id: EntityId) -> String {
    let name: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_CHARS)
        .collect();
    if name.is_empty() {
        format!("player{}", id)
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ContentTable;
    use crate::task_scheduler::TaskScheduler;
    use shared::encode_message;
    use shared::packets::{Chat, EnterRoom, Moved};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;

    fn rooms() -> Arc<[Arc<Room>]> {
        let scheduler = Arc::new(TaskScheduler::new(
            Arc::new(ManualClock::new()),
            ContentTable::default(),
        ));
        vec![
            Room::new(0, "lobby", Arc::clone(&scheduler), Duration::from_secs(1)),
            Room::new(1, "arena", scheduler, Duration::from_secs(1)),
        ]
        .into()
    }

    fn connect(rooms: &Arc<[Arc<Room>]>) -> (Arc<RoomHandler>, Arc<Session>, DuplexStream) {
        let (peer, local) = duplex(64 * 1024);
        let handler = Arc::new(RoomHandler::new(Arc::clone(rooms)));
        let session = Session::new(local, None, handler.clone());
        session.start();
        (handler, session, peer)
    }

    async fn read_packet(peer: &mut DuplexStream) -> Packet {
        let read = async {
            let mut header = [0u8; 4];
            peer.read_exact(&mut header).await.unwrap();
            let length = u16::from_le_bytes([header[0], header[1]]) as usize;
            let mut frame = header.to_vec();
            frame.resize(length, 0);
            peer.read_exact(&mut frame[4..]).await.unwrap();
            Packet::decode(&frame).unwrap()
        };
        timeout(Duration::from_secs(5), read).await.unwrap()
    }

    async fn wait_for_membership(handler: &RoomHandler, present: bool) {
        let wait = async {
            while handler.player_id().is_some() != present {
                tokio::task::yield_now().await;
            }
        };
        timeout(Duration::from_secs(5), wait).await.unwrap();
    }

    fn player_count(room: &Arc<Room>) -> usize {
        let count = Arc::new(Mutex::new(None));
        let out = Arc::clone(&count);
        room.push(move |_, state| *out.lock() = Some(state.player_count()));
        let result = count.lock().take();
        result.unwrap()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  knight ", 4), "knight");
        assert_eq!(sanitize_name("\u{7}", 4), "player4");
        assert_eq!(sanitize_name(&"x".repeat(100), 4).len(), MAX_NAME_CHARS);
    }

    #[tokio::test]
    async fn test_enter_room_over_the_wire() {
        let rooms = rooms();
        let (handler, _session, mut peer) = connect(&rooms);

        let frame = encode_message(&EnterRoom {
            player_name: "knight".to_string(),
            room: 1,
        })
        .unwrap();
        peer.write_all(&frame).await.unwrap();

        match read_packet(&mut peer).await {
            Packet::RoomJoined(joined) => {
                assert_eq!(joined.room, 1);
                assert_eq!(Some(joined.player_id), handler.player_id());
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_room_and_protocol_keep_connection() {
        let rooms = rooms();
        let (handler, session, mut peer) = connect(&rooms);

        let bad_room = encode_message(&EnterRoom {
            player_name: "lost".to_string(),
            room: 9,
        })
        .unwrap();
        peer.write_all(&bad_room).await.unwrap();
        peer.write_all(&[4, 0, 0xEE, 0xEE]).await.unwrap();
        peer.write_all(&encode_message(&Chat { text: "hi".into() }).unwrap())
            .await
            .unwrap();

        let good = encode_message(&EnterRoom {
            player_name: "found".to_string(),
            room: 0,
        })
        .unwrap();
        peer.write_all(&good).await.unwrap();

        assert!(matches!(read_packet(&mut peer).await, Packet::RoomJoined(_)));
        assert!(session.is_connected());
        assert!(handler.player_id().is_some());
    }

    #[tokio::test]
    async fn test_enter_after_disconnect_is_refused() {
        let rooms = rooms();
        let (handler, session, _peer) = connect(&rooms);

        session.disconnect("send error");
        let frame = encode_message(&EnterRoom {
            player_name: "ghost".to_string(),
            room: 0,
        })
        .unwrap();
        handler.on_packet(&session, &frame);

        assert!(!session.is_connected());
        assert_eq!(handler.player_id(), None);
        assert_eq!(player_count(&rooms[0]), 0);
    }

    #[tokio::test]
    async fn test_close_racing_enter_leaves_no_player() {
        let rooms = rooms();
        let frame = encode_message(&EnterRoom {
            player_name: "racer".to_string(),
            room: 1,
        })
        .unwrap();

        for _ in 0..32 {
            let (handler, session, _peer) = connect(&rooms);
            let entering = {
                let (handler, session, frame) = (handler.clone(), session.clone(), frame.clone());
                std::thread::spawn(move || handler.on_packet(&session, &frame))
            };
            session.disconnect("racing close");
            entering.join().unwrap();

            assert_eq!(handler.player_id(), None);
        }
        assert_eq!(player_count(&rooms[1]), 0);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_room() {
        let rooms = rooms();
        let (_watcher, _watcher_session, mut watcher_peer) = connect(&rooms);
        let (handler, _session, mut peer) = connect(&rooms);

        for (stream, name) in [(&mut watcher_peer, "watcher"), (&mut peer, "leaver")] {
            let frame = encode_message(&EnterRoom {
                player_name: name.to_string(),
                room: 0,
            })
            .unwrap();
            stream.write_all(&frame).await.unwrap();
            assert!(matches!(read_packet(stream).await, Packet::RoomJoined(_)));
        }
        wait_for_membership(&handler, true).await;
        let leaver = handler.player_id().unwrap();

        drop(peer);
        wait_for_membership(&handler, false).await;

        rooms[0].move_entity(leaver, 1.0, 1.0);
        rooms[0].flush();

        let mut saw_despawn = false;
        loop {
            match read_packet(&mut watcher_peer).await {
                Packet::Despawn(despawn) => {
                    assert_eq!(despawn.ids, vec![leaver]);
                    saw_despawn = true;
                    break;
                }
                Packet::Moved(Moved { id, .. }) => assert_ne!(id, leaver),
                _ => {}
            }
        }
        assert!(saw_despawn);
    }
}
