//! Process root owning every service: rooms, both schedulers and the acceptor.

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::RoomHandler;
use crate::listener::Listener;
use crate::room::Room;
use crate::task_scheduler::TaskScheduler;
use crate::tick_scheduler::{schedule_recurring, TickScheduler};
use log::{error, info};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Main-loop period; one tick scheduler flush per period.
const MAIN_LOOP_PERIOD: Duration = Duration::from_millis(1);

pub struct Server {
    config: ServerConfig,
    tick_scheduler: Arc<TickScheduler>,
    task_scheduler: Arc<TaskScheduler>,
    rooms: Arc<[Arc<Room>]>,
    listener: Listener,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new())).await
    }

    /// Builds the server on an injected clock and binds the listening socket.
    pub async fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let tick_scheduler = Arc::new(TickScheduler::new(Arc::clone(&clock)));
        let task_scheduler = Arc::new(TaskScheduler::new(clock, config.content.clone()));

        let rooms: Arc<[Arc<Room>]> = config
            .rooms
            .iter()
            .enumerate()
            .map(|(index, name)| {
                Room::new(
                    index as u16,
                    name.clone(),
                    Arc::clone(&task_scheduler),
                    config.respawn_delay(),
                )
            })
            .collect::<Vec<_>>()
            .into();

        for room in rooms.iter() {
            room.spawn_monsters(config.monsters_per_room);
            info!("Room {} '{}' ready", room.id(), room.name());
        }

        let flush_rooms = Arc::clone(&rooms);
        schedule_recurring(&tick_scheduler, config.flush_interval_ticks, move || {
            for room in flush_rooms.iter() {
                room.flush();
            }
        });

        let listener =
            Listener::bind(config.bind_address, RoomHandler::factory(Arc::clone(&rooms))).await?;

        Ok(Self {
            config,
            tick_scheduler,
            task_scheduler,
            rooms,
            listener,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rooms(&self) -> &[Arc<Room>] {
        &self.rooms
    }

    pub fn tick_scheduler(&self) -> &Arc<TickScheduler> {
        &self.tick_scheduler
    }

    pub fn task_scheduler(&self) -> &Arc<TaskScheduler> {
        &self.task_scheduler
    }

    /// Accepts connections and drives both schedulers until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.listener.start(self.config.accept_backlog);

        let mut scheduler = tokio::spawn(
            Arc::clone(&self.task_scheduler).run(self.config.scheduler_period()),
        );

        let mut main_loop = interval(MAIN_LOOP_PERIOD);
        main_loop.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server started on {} with {} room(s)",
            self.local_addr(),
            self.rooms.len()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = main_loop.tick() => {
                    self.tick_scheduler.flush();
                }
                result = &mut scheduler => {
                    error!("Task scheduler stopped unexpectedly: {:?}", result);
                    break;
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        scheduler.abort();
        self.listener.shutdown();
        info!("Server stopped");
        Ok(())
    }
}
