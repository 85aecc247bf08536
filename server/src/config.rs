//! Server configuration and gameplay content tables.
//!
//! Everything has a working default; a TOML file may override any subset of
//! fields and command-line flags override the file.

use crate::error::{Result, ServerError};
use serde::Deserialize;
use shared::DEFAULT_PORT;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    /// Number of accept calls kept outstanding at once.
    pub accept_backlog: usize,
    /// Main-loop ticks between room flushes.
    pub flush_interval_ticks: u64,
    pub scheduler_period_ms: u64,
    pub rooms: Vec<String>,
    pub monsters_per_room: usize,
    pub respawn_delay_ms: u64,
    pub content: ContentTable,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            accept_backlog: 10,
            flush_interval_ticks: 25,
            scheduler_period_ms: 100,
            rooms: vec!["field".to_string()],
            monsters_per_room: 3,
            respawn_delay_ms: 5000,
            content: ContentTable::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ServerConfig =
            toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.accept_backlog == 0 {
            return Err(ServerError::Config("accept_backlog must be positive".into()));
        }
        if self.flush_interval_ticks == 0 {
            return Err(ServerError::Config(
                "flush_interval_ticks must be positive".into(),
            ));
        }
        if self.scheduler_period_ms == 0 {
            return Err(ServerError::Config(
                "scheduler_period_ms must be positive".into(),
            ));
        }
        if self.rooms.is_empty() {
            return Err(ServerError::Config("at least one room is required".into()));
        }
        if self.rooms.len() > usize::from(u16::MAX) {
            return Err(ServerError::Config("too many rooms".into()));
        }
        self.content.validate()
    }

    pub fn scheduler_period(&self) -> Duration {
        Duration::from_millis(self.scheduler_period_ms)
    }

    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_delay_ms)
    }
}

/// Timing and damage of one attack animation.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AttackProfile {
    /// Offset into the animation at which damage lands.
    pub timing_ms: u64,
    /// Full animation length; the entity returns to idle afterwards.
    pub length_ms: u64,
    pub damage: u16,
}

impl AttackProfile {
    pub fn timing(&self) -> Duration {
        Duration::from_millis(self.timing_ms)
    }

    pub fn length(&self) -> Duration {
        Duration::from_millis(self.length_ms)
    }
}

/// Durations and values the state machines read; stands in for the
/// externally authored content data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContentTable {
    pub hit_duration_ms: u64,
    pub attack_cooldown_ms: u64,
    pub attacks: Vec<AttackProfile>,
    pub player_hp: u16,
    pub monster_hp: u16,
    pub monster_names: Vec<String>,
    /// Monsters only swing at players closer than this.
    pub attack_range: f32,
}

impl Default for ContentTable {
    fn default() -> Self {
        Self {
            hit_duration_ms: 500,
            attack_cooldown_ms: 2000,
            attacks: vec![
                AttackProfile {
                    timing_ms: 300,
                    length_ms: 800,
                    damage: 8,
                },
                AttackProfile {
                    timing_ms: 450,
                    length_ms: 1100,
                    damage: 14,
                },
            ],
            player_hp: 100,
            monster_hp: 60,
            monster_names: vec!["slime".into(), "goblin".into(), "bat".into()],
            attack_range: 6.0,
        }
    }
}

impl ContentTable {
    pub fn validate(&self) -> Result<()> {
        if self.attacks.is_empty() {
            return Err(ServerError::Config("content needs at least one attack".into()));
        }
        if self.attacks.len() > usize::from(u8::MAX) {
            return Err(ServerError::Config("too many attack profiles".into()));
        }
        for (index, attack) in self.attacks.iter().enumerate() {
            if attack.timing_ms > attack.length_ms {
                return Err(ServerError::Config(format!(
                    "attack {} lands after its animation ends",
                    index
                )));
            }
        }
        if self.monster_names.is_empty() {
            return Err(ServerError::Config("content needs monster names".into()));
        }
        Ok(())
    }

    pub fn hit_duration(&self) -> Duration {
        Duration::from_millis(self.hit_duration_ms)
    }

    pub fn attack_cooldown(&self) -> Duration {
        Duration::from_millis(self.attack_cooldown_ms)
    }

    /// Profile for `index`, falling back to the first one.
    pub fn attack(&self, index: u8) -> AttackProfile {
        self.attacks
            .get(usize::from(index))
            .or_else(|| self.attacks.first())
            .copied()
            .unwrap_or(AttackProfile {
                timing_ms: 0,
                length_ms: 0,
                damage: 0,
            })
    }
}
