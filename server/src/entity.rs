//! Players and monsters living in a room, plus their id allocators.

use crate::session::Session;
use shared::packets::{EntityInfo, KIND_MONSTER, KIND_PLAYER};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type EntityId = u32;

/// First id handed to monsters; players count up from 1.
pub const MONSTER_ID_BASE: EntityId = 1_000_000;

static NEXT_PLAYER_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_MONSTER_ID: AtomicU32 = AtomicU32::new(MONSTER_ID_BASE);

pub fn allocate_player_id() -> EntityId {
    NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed)
}

pub fn allocate_monster_id() -> EntityId {
    NEXT_MONSTER_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_squared(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }
}

/// A client-controlled participant.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: EntityId,
    pub name: String,
    pub position: Position,
    pub hp: u16,
    pub session: Arc<Session>,
}

/// A server-driven auto-attacker.
#[derive(Debug, Clone)]
pub struct Monster {
    pub id: EntityId,
    pub name: String,
    pub position: Position,
    pub spawn_point: Position,
    pub hp: u16,
}

/// Everything that can live in a room.
#[derive(Debug, Clone)]
pub enum Entity {
    Player(Player),
    Monster(Monster),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Player(player) => player.id,
            Entity::Monster(monster) => monster.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Player(player) => &player.name,
            Entity::Monster(monster) => &monster.name,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Entity::Player(player) => player.position,
            Entity::Monster(monster) => monster.position,
        }
    }

    pub fn set_position(&mut self, position: Position) {
        match self {
            Entity::Player(player) => player.position = position,
            Entity::Monster(monster) => monster.position = position,
        }
    }

    pub fn hp(&self) -> u16 {
        match self {
            Entity::Player(player) => player.hp,
            Entity::Monster(monster) => monster.hp,
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self, Entity::Player(_))
    }

    pub fn is_alive(&self) -> bool {
        self.hp() > 0
    }

    /// Applies `amount` damage and returns the remaining hp.
    pub fn take_damage(&mut self, amount: u16) -> u16 {
        let hp = match self {
            Entity::Player(player) => &mut player.hp,
            Entity::Monster(monster) => &mut monster.hp,
        };
        *hp = hp.saturating_sub(amount);
        *hp
    }

    /// Whether the wall-clock scheduler may move this entity out of `Hit`.
    ///
    /// Players are driven by their client and keep whatever state it sets.
    pub fn driven_by_schedule(&self) -> bool {
        matches!(self, Entity::Monster(_))
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            Entity::Player(player) => Some(&player.session),
            Entity::Monster(_) => None,
        }
    }

    pub fn info(&self) -> EntityInfo {
        let position = self.position();
        EntityInfo {
            id: self.id(),
            kind: match self {
                Entity::Player(_) => KIND_PLAYER,
                Entity::Monster(_) => KIND_MONSTER,
            },
            name: self.name().to_string(),
            x: position.x,
            y: position.y,
            hp: self.hp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monster(hp: u16) -> Entity {
        Entity::Monster(Monster {
            id: MONSTER_ID_BASE + 1,
            name: "slime".to_string(),
            position: Position::new(3.0, 4.0),
            spawn_point: Position::new(3.0, 4.0),
            hp,
        })
    }

    #[test]
    fn test_damage_saturates_at_zero() {
        let mut entity = monster(30);
        assert_eq!(entity.take_damage(12), 18);
        assert!(entity.is_alive());
        assert_eq!(entity.take_damage(100), 0);
        assert!(!entity.is_alive());
    }

    #[test]
    fn test_monster_capabilities() {
        let entity = monster(30);
        assert!(entity.driven_by_schedule());
        assert!(entity.session().is_none());

        let info = entity.info();
        assert_eq!(info.kind, KIND_MONSTER);
        assert_eq!(info.name, "slime");
        assert_eq!(info.hp, 30);
    }

    #[test]
    fn test_id_ranges_do_not_overlap() {
        let player = allocate_player_id();
        let monster = allocate_monster_id();
        assert!(player < MONSTER_ID_BASE);
        assert!(monster >= MONSTER_ID_BASE);
        assert!(allocate_player_id() > player);
    }

    #[test]
    fn test_distance() {
        let origin = Position::default();
        assert_eq!(origin.distance_squared(&Position::new(3.0, 4.0)), 25.0);
    }
}
