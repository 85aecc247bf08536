//! Wall-clock scheduler for one-shot tasks and entity animation states.
//!
//! Runs on its own periodic timer, independent of the tick-driven main loop.
//! Each [`tick`](TaskScheduler::tick):
//!
//! 1. pulls every [`ScheduledTask`] whose `execute_at` has passed and runs it,
//!    catching and logging panics by task label;
//! 2. advances every tracked [`AnimationState`] against the [`ContentTable`]
//!    durations (hit recovery, attack damage timing, attack end, auto-attack
//!    cooldown).
//!
//! The scheduler never touches room state. State changes and damage requests
//! are handed to the owning room through its [`EntityEventSink`], which turns
//! them into jobs on the room's queue. The scheduler's own lock is released
//! before any task body or sink runs.

use crate::clock::Clock;
use crate::config::ContentTable;
use crate::entity::EntityId;
use crate::job_queue::panic_message;
use log::{debug, error};
use parking_lot::Mutex;
use rand::Rng;
use shared::AnimState;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

pub type RoomId = u16;

pub type TaskAction = Box<dyn FnOnce() + Send + 'static>;

/// A one-shot callback due at an absolute clock reading.
pub struct ScheduledTask {
    pub execute_at: Duration,
    pub action: TaskAction,
    pub label: String,
    pub owner_id: Option<EntityId>,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationState {
    pub current: AnimState,
    pub started_at: Duration,
    pub attack_number: u8,
    pub damage_latched: bool,
    /// Auto-attacks whenever idle and off cooldown.
    pub repeating: bool,
    pub last_fire_time: Option<Duration>,
    /// False for client-controlled entities, which keep `Hit` until told otherwise.
    pub driven_by_schedule: bool,
}

impl AnimationState {
    fn new(now: Duration, driven_by_schedule: bool) -> Self {
        Self {
            current: AnimState::Idle,
            started_at: now,
            attack_number: 0,
            damage_latched: false,
            repeating: false,
            last_fire_time: None,
            driven_by_schedule,
        }
    }

    fn enter(&mut self, state: AnimState, attack: u8, now: Duration) {
        self.current = state;
        self.started_at = now;
        self.attack_number = attack;
        self.damage_latched = false;
        if state == AnimState::Attack {
            self.last_fire_time = Some(now);
        }
    }
}

/// Side effects the scheduler asks a room to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityEvent {
    StateChanged {
        id: EntityId,
        state: AnimState,
        attack: u8,
    },
    DamageRequest {
        attacker: EntityId,
        attack: u8,
    },
}

/// Receives scheduler events for the entities it registered.
pub trait EntityEventSink: Send + Sync {
    fn deliver(&self, event: EntityEvent);
}

struct Tracked {
    state: AnimationState,
    sink: Weak<dyn EntityEventSink>,
}

#[derive(Default)]
struct SchedulerState {
    tasks: Vec<ScheduledTask>,
    entities: HashMap<EntityId, Tracked>,
}

pub struct TaskScheduler {
    clock: Arc<dyn Clock>,
    content: ContentTable,
    state: Mutex<SchedulerState>,
}

impl TaskScheduler {
    pub fn new(clock: Arc<dyn Clock>, content: ContentTable) -> Self {
        Self {
            clock,
            content,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn content(&self) -> &ContentTable {
        &self.content
    }

    pub fn schedule(&self, task: ScheduledTask) {
        debug!(
            "Scheduling '{}' for room {} at {:?}",
            task.label, task.room_id, task.execute_at
        );
        self.state.lock().tasks.push(task);
    }

    /// Schedules `action` to run `delay` from now.
    pub fn schedule_after<F>(
        &self,
        delay: Duration,
        label: impl Into<String>,
        owner_id: Option<EntityId>,
        room_id: RoomId,
        action: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(ScheduledTask {
            execute_at: self.now() + delay,
            action: Box::new(action),
            label: label.into(),
            owner_id,
            room_id,
        });
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Starts tracking an entity in `Idle`.
    pub fn track(&self, id: EntityId, driven_by_schedule: bool, sink: Weak<dyn EntityEventSink>) {
        let now = self.now();
        self.state.lock().entities.insert(
            id,
            Tracked {
                state: AnimationState::new(now, driven_by_schedule),
                sink,
            },
        );
    }

    /// Moves a tracked entity into `state`, restarting its timers.
    ///
    /// Returns false if the entity is not tracked.
    pub fn set_state(&self, id: EntityId, state: AnimState, attack: u8) -> bool {
        let now = self.now();
        match self.state.lock().entities.get_mut(&id) {
            Some(tracked) => {
                tracked.state.enter(state, attack, now);
                true
            }
            None => false,
        }
    }

    pub fn set_repeating(&self, id: EntityId, repeating: bool) {
        if let Some(tracked) = self.state.lock().entities.get_mut(&id) {
            tracked.state.repeating = repeating;
        }
    }

    pub fn state_of(&self, id: EntityId) -> Option<AnimationState> {
        self.state.lock().entities.get(&id).map(|tracked| tracked.state)
    }

    /// Drops the entity's animation state and every task it owns.
    pub fn forget(&self, id: EntityId) {
        let mut state = self.state.lock();
        state.entities.remove(&id);
        state.tasks.retain(|task| task.owner_id != Some(id));
    }

    /// Runs one scheduler pass at the current clock reading.
    ///
    /// Returns the number of tasks executed.
    pub fn tick(&self) -> usize {
        let now = self.now();

        let (due, events) = {
            let mut state = self.state.lock();
            let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.tasks)
                .into_iter()
                .partition(|task| task.execute_at <= now);
            state.tasks = waiting;

            let mut events = Vec::new();
            for (&id, tracked) in state.entities.iter_mut() {
                for event in self.advance(id, &mut tracked.state, now) {
                    events.push((tracked.sink.clone(), event));
                }
            }
            (due, events)
        };

        let executed = due.len();
        for task in due {
            let label = task.label;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task.action)) {
                error!(
                    "Scheduled task '{}' (room {}) panicked: {}",
                    label,
                    task.room_id,
                    panic_message(panic.as_ref())
                );
            }
        }

        for (sink, event) in events {
            if let Some(sink) = sink.upgrade() {
                sink.deliver(event);
            }
        }

        executed
    }

    fn advance(&self, id: EntityId, anim: &mut AnimationState, now: Duration) -> Vec<EntityEvent> {
        let elapsed = now.saturating_sub(anim.started_at);
        let mut events = Vec::new();

        match anim.current {
            AnimState::Hit => {
                if anim.driven_by_schedule && elapsed >= self.content.hit_duration() {
                    anim.enter(AnimState::Idle, 0, now);
                    events.push(EntityEvent::StateChanged {
                        id,
                        state: AnimState::Idle,
                        attack: 0,
                    });
                }
            }
            AnimState::Attack => {
                let profile = self.content.attack(anim.attack_number);
                if !anim.damage_latched && elapsed >= profile.timing() {
                    anim.damage_latched = true;
                    events.push(EntityEvent::DamageRequest {
                        attacker: id,
                        attack: anim.attack_number,
                    });
                }
                if elapsed >= profile.length() {
                    anim.enter(AnimState::Idle, 0, now);
                    events.push(EntityEvent::StateChanged {
                        id,
                        state: AnimState::Idle,
                        attack: 0,
                    });
                }
            }
            AnimState::Idle | AnimState::Run if anim.repeating => {
                let ready = anim
                    .last_fire_time
                    .map_or(true, |last| now.saturating_sub(last) >= self.content.attack_cooldown());
                if ready {
                    let attack = rand::thread_rng().gen_range(0..self.content.attacks.len().max(1)) as u8;
                    anim.enter(AnimState::Attack, attack, now);
                    events.push(EntityEvent::StateChanged {
                        id,
                        state: AnimState::Attack,
                        attack,
                    });
                }
            }
            AnimState::Idle | AnimState::Run | AnimState::Death => {}
        }

        events
    }

    /// Ticks every `period` until the process exits.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            self.tick();
        }
    }
}
