//! A simulation partition: its entities, participants, and outbound batch.
//!
//! All room state lives in a [`RoomState`] owned by the room's [`JobQueue`].
//! The only way to read or change it is to [`push`](Room::push) a job, so
//! network handlers, the main loop and the wall-clock scheduler can all
//! submit work from any thread without locking around game logic.
//!
//! Broadcasts are appended to the outbound batch from inside jobs and sent
//! to every participant by the next [`flush`](Room::flush) job. Since
//! broadcasts and flushes run in one serialized order, a flush delivers
//! exactly the broadcasts queued before it.

use crate::config::ContentTable;
use crate::entity::{allocate_monster_id, Entity, EntityId, Monster, Player, Position};
use crate::job_queue::JobQueue;
use crate::session::Session;
use crate::task_scheduler::{EntityEvent, EntityEventSink, RoomId, TaskScheduler};
use bytes::Bytes;
use log::{debug, info, warn};
use rand::Rng;
use shared::packets::{
    Animation, ChatBroadcast, Damage, Despawn, EntityInfo, Message, Moved, RoomJoined, Spawn,
};
use shared::{encode_message, AnimState};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Longest chat line relayed, in characters.
pub const MAX_CHAT_CHARS: usize = 200;

/// Half-width of the square monsters spawn in.
const SPAWN_AREA: f32 = 20.0;

#[derive(Default)]
pub struct RoomState {
    entities: BTreeMap<EntityId, Entity>,
    attack_targets: HashMap<EntityId, EntityId>,
    outbound: Vec<Bytes>,
}

impl RoomState {
    /// Queues `message` for every participant at the next flush.
    pub fn broadcast<M: Message>(&mut self, message: &M) {
        match encode_message(message) {
            Ok(frame) => self.outbound.push(frame),
            Err(e) => warn!("Dropping broadcast {}: {}", M::PROTOCOL_ID, e),
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_player()).count()
    }

    pub fn pending_broadcasts(&self) -> usize {
        self.outbound.len()
    }

    fn infos(&self) -> Vec<EntityInfo> {
        self.entities.values().map(Entity::info).collect()
    }

    fn nearest_player(&self, from: Position, range: f32) -> Option<EntityId> {
        self.entities
            .values()
            .filter(|e| e.is_player() && e.is_alive())
            .map(|e| (e.id(), e.position().distance_squared(&from)))
            .filter(|(_, distance)| *distance <= range * range)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Sends the whole batch to every live participant and clears it.
    fn flush(&mut self) -> usize {
        if self.outbound.is_empty() {
            return 0;
        }

        let batch = std::mem::take(&mut self.outbound);
        for session in self.entities.values().filter_map(Entity::session) {
            if session.is_connected() {
                session.send_many(batch.iter().cloned());
            }
        }
        batch.len()
    }
}

pub struct Room {
    id: RoomId,
    name: String,
    queue: JobQueue<RoomState>,
    scheduler: Arc<TaskScheduler>,
    respawn_delay: Duration,
    me: Weak<Room>,
}

impl Room {
    pub fn new(
        id: RoomId,
        name: impl Into<String>,
        scheduler: Arc<TaskScheduler>,
        respawn_delay: Duration,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Self {
            id,
            queue: JobQueue::new(format!("room:{}", name), RoomState::default()),
            name,
            scheduler,
            respawn_delay,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &ContentTable {
        self.scheduler.content()
    }

    fn sink(&self) -> Weak<dyn EntityEventSink> {
        self.me.clone()
    }

    /// Runs `job` on the room's queue with access to its state.
    pub fn push<F>(self: &Arc<Self>, job: F)
    where
        F: FnOnce(&Room, &mut RoomState) + Send + 'static,
    {
        let room = Arc::clone(self);
        self.queue.push(move |state| job(&room, state));
    }

    pub fn flush(self: &Arc<Self>) {
        self.push(|_, state| {
            state.flush();
        });
    }

    pub fn spawn_monsters(self: &Arc<Self>, count: usize) {
        self.push(move |room, state| {
            let content = room.content();
            let mut rng = rand::thread_rng();
            for i in 0..count {
                let position = Position::new(
                    rng.gen_range(-SPAWN_AREA..SPAWN_AREA),
                    rng.gen_range(-SPAWN_AREA..SPAWN_AREA),
                );
                let name = content.monster_names[i % content.monster_names.len()].clone();
                let monster = Monster {
                    id: allocate_monster_id(),
                    name,
                    position,
                    spawn_point: position,
                    hp: content.monster_hp,
                };
                room.spawn_monster(state, monster);
            }
        });
    }

    pub fn spawn_monster(&self, state: &mut RoomState, monster: Monster) {
        let id = monster.id;
        let entity = Entity::Monster(monster);
        let info = entity.info();
        state.entities.insert(id, entity);
        self.scheduler.track(id, true, self.sink());
        state.broadcast(&Spawn {
            entities: vec![info],
        });
        self.refresh_aggro(state);
        debug!("Monster {} spawned in room '{}'", id, self.name);
    }

    /// Adds a player, replies with the room snapshot, and announces them.
    pub fn enter(self: &Arc<Self>, player: Player) {
        self.push(move |room, state| {
            let id = player.id;
            if state.entities.contains_key(&id) {
                warn!("Player {} is already in room '{}'", id, room.name);
                return;
            }

            let session = Arc::clone(&player.session);
            let name = player.name.clone();
            let entity = Entity::Player(player);
            let info = entity.info();
            state.entities.insert(id, entity);
            room.scheduler.track(id, false, room.sink());

            let joined = RoomJoined {
                player_id: id,
                room: room.id,
                entities: state.infos(),
            };
            match encode_message(&joined) {
                Ok(frame) => session.send(frame),
                Err(e) => warn!("Room '{}' snapshot for player {} failed: {}", room.name, id, e),
            }

            state.broadcast(&Spawn {
                entities: vec![info],
            });
            room.refresh_aggro(state);
            info!("{} (player {}) entered room '{}'", name, id, room.name);
        });
    }

    pub fn leave(self: &Arc<Self>, id: EntityId) {
        self.push(move |room, state| {
            if state.entities.remove(&id).is_none() {
                return;
            }

            state
                .attack_targets
                .retain(|attacker, target| *attacker != id && *target != id);
            room.scheduler.forget(id);
            state.broadcast(&Despawn { ids: vec![id] });
            room.refresh_aggro(state);
            info!("Player {} left room '{}'", id, room.name);
        });
    }

    pub fn move_entity(self: &Arc<Self>, id: EntityId, x: f32, y: f32) {
        self.push(move |room, state| {
            if !x.is_finite() || !y.is_finite() {
                warn!("Ignoring non-finite move from {}", id);
                return;
            }
            let Some(entity) = state.entities.get_mut(&id) else {
                return;
            };
            if !entity.is_alive() {
                return;
            }

            entity.set_position(Position::new(x, y));
            state.broadcast(&Moved { id, x, y });

            // Attack and Death keep playing; anything else switches to Run.
            let current = room.scheduler.state_of(id).map(|anim| anim.current);
            if matches!(current, Some(AnimState::Idle | AnimState::Hit))
                && room.scheduler.set_state(id, AnimState::Run, 0)
            {
                state.broadcast(&Animation {
                    id,
                    state: AnimState::Run as u8,
                    attack: 0,
                });
            }
            room.refresh_aggro(state);
        });
    }

    pub fn chat(self: &Arc<Self>, id: EntityId, text: String) {
        self.push(move |_, state| {
            if !state.entities.contains_key(&id) {
                return;
            }
            let text: String = text.trim().chars().take(MAX_CHAT_CHARS).collect();
            if text.is_empty() {
                return;
            }
            state.broadcast(&ChatBroadcast { id, text });
        });
    }

    /// Starts an attack animation; damage lands when the scheduler says so.
    pub fn attack(self: &Arc<Self>, attacker: EntityId, target: EntityId, attack: u8) {
        self.push(move |room, state| {
            if attacker == target {
                return;
            }
            let (Some(source), Some(victim)) =
                (state.entities.get(&attacker), state.entities.get(&target))
            else {
                return;
            };
            if !source.is_alive() || !victim.is_alive() {
                return;
            }

            let range = room.content().attack_range;
            if source.position().distance_squared(&victim.position()) > range * range {
                debug!("Attack from {} on {} out of range", attacker, target);
                return;
            }
            if matches!(
                room.scheduler.state_of(attacker),
                Some(anim) if anim.current == AnimState::Attack
            ) {
                return;
            }

            let attack = if usize::from(attack) < room.content().attacks.len() {
                attack
            } else {
                0
            };
            state.attack_targets.insert(attacker, target);
            room.scheduler.set_state(attacker, AnimState::Attack, attack);
            state.broadcast(&Animation {
                id: attacker,
                state: AnimState::Attack as u8,
                attack,
            });
        });
    }

    fn handle_event(&self, state: &mut RoomState, event: EntityEvent) {
        match event {
            EntityEvent::StateChanged {
                id,
                state: anim,
                attack,
            } => {
                if state.entities.contains_key(&id) {
                    state.broadcast(&Animation {
                        id,
                        state: anim as u8,
                        attack,
                    });
                }
            }
            EntityEvent::DamageRequest { attacker, attack } => {
                self.apply_damage(state, attacker, attack);
            }
        }
    }

    fn apply_damage(&self, state: &mut RoomState, attacker: EntityId, attack: u8) {
        let Some(source) = state.entities.get(&attacker) else {
            return;
        };
        if !source.is_alive() {
            return;
        }

        let target = if source.is_player() {
            state.attack_targets.remove(&attacker)
        } else {
            state.nearest_player(source.position(), self.content().attack_range)
        };
        let Some(target) = target else {
            return;
        };
        let Some(victim) = state.entities.get_mut(&target) else {
            return;
        };
        if !victim.is_alive() {
            return;
        }

        let amount = self.content().attack(attack).damage;
        let hp = victim.take_damage(amount);
        state.broadcast(&Damage {
            attacker,
            target,
            amount,
            hp,
        });

        if hp == 0 {
            self.kill(state, target);
        } else if !matches!(
            self.scheduler.state_of(target),
            Some(anim) if anim.current == AnimState::Attack
        ) {
            // A swing in progress is not interrupted by taking a hit.
            self.scheduler.set_state(target, AnimState::Hit, 0);
            state.broadcast(&Animation {
                id: target,
                state: AnimState::Hit as u8,
                attack: 0,
            });
        }
    }

    fn kill(&self, state: &mut RoomState, id: EntityId) {
        state
            .attack_targets
            .retain(|attacker, target| *attacker != id && *target != id);
        state.broadcast(&Animation {
            id,
            state: AnimState::Death as u8,
            attack: 0,
        });

        let me = self.me.clone();
        let is_player = state.entities.get(&id).map(Entity::is_player);
        match is_player {
            Some(false) => {
                let Some(Entity::Monster(mut monster)) = state.entities.remove(&id) else {
                    return;
                };
                self.scheduler.forget(id);
                state.broadcast(&Despawn { ids: vec![id] });

                monster.hp = self.content().monster_hp;
                monster.position = monster.spawn_point;
                self.scheduler.schedule_after(
                    self.respawn_delay,
                    format!("respawn monster {}", id),
                    None,
                    self.id,
                    move || {
                        if let Some(room) = me.upgrade() {
                            room.push(move |room, state| room.spawn_monster(state, monster));
                        }
                    },
                );
            }
            Some(true) => {
                self.scheduler.set_state(id, AnimState::Death, 0);
                self.scheduler.schedule_after(
                    self.respawn_delay,
                    format!("revive player {}", id),
                    Some(id),
                    self.id,
                    move || {
                        if let Some(room) = me.upgrade() {
                            room.push(move |room, state| room.revive_player(state, id));
                        }
                    },
                );
                info!("Player {} died in room '{}'", id, self.name);
            }
            None => return,
        }

        self.refresh_aggro(state);
    }

    fn revive_player(&self, state: &mut RoomState, id: EntityId) {
        let hp = self.content().player_hp;
        let Some(Entity::Player(player)) = state.entities.get_mut(&id) else {
            return;
        };
        if player.hp > 0 {
            return;
        }

        player.hp = hp;
        let info = Entity::Player(player.clone()).info();
        self.scheduler.set_state(id, AnimState::Idle, 0);
        state.broadcast(&Spawn {
            entities: vec![info],
        });
        state.broadcast(&Animation {
            id,
            state: AnimState::Idle as u8,
            attack: 0,
        });
        self.refresh_aggro(state);
    }

    /// Monsters auto-attack only while a live player is within range.
    fn refresh_aggro(&self, state: &RoomState) {
        let range = self.content().attack_range;
        for monster in state.entities.values().filter(|e| !e.is_player()) {
            let engaged = state.nearest_player(monster.position(), range).is_some();
            self.scheduler.set_repeating(monster.id(), engaged);
        }
    }
}

impl EntityEventSink for Room {
    fn deliver(&self, event: EntityEvent) {
        if let Some(room) = self.me.upgrade() {
            room.push(move |room, state| room.handle_event(state, event));
        }
    }
}

/// Builds a fresh player for `session`.
pub fn new_player(id: EntityId, name: String, session: Arc<Session>, content: &ContentTable) -> Player {
    Player {
        id,
        name,
        position: Position::default(),
        hp: content.player_hp,
        session,
    }
}
