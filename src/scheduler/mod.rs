//! # Node Control Loop
//!
//! A [`Scheduler`] drives a list of [`PeriodicTask`]s from a fixed tick. Each task states
//! how many ticks apart it runs; on every tick the wrapping counter is advanced and each
//! task whose period divides the counter runs, in registration order.
//!
//! [`Lifecycle`] wires the node's own tasks:
//!
//! | task              | cadence (100 ms tick)      |
//! |-------------------|----------------------------|
//! | [`AnnounceTask`]  | 18000 ticks (30 min)       |
//! | [`PersistTask`]   | every tick, no-op if clean |
//! | [`PruneTask`]     | hourly, when enabled       |
//!
//! and announces the node once before the loop starts.

pub mod tasks;

pub use tasks::{AnnounceTask, PersistTask, PruneTask};

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Config;
use crate::meshtastic::{NodeInfo, Transport};
use crate::storage::{PeerPersistence, PeerStore};

/// Work that runs every `every()` ticks.
pub trait PeriodicTask: Send {
    fn name(&self) -> &'static str;

    /// Period in ticks. Zero is treated as one.
    fn every(&self) -> u64;

    fn run(&mut self, tick: u64);
}

pub struct Scheduler {
    period: Duration,
    tasks: Vec<Box<dyn PeriodicTask>>,
    counter: u64,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            tasks: Vec::new(),
            counter: 0,
        }
    }

    pub fn add_task(&mut self, task: Box<dyn PeriodicTask>) {
        debug!(
            "Scheduling '{}' every {} ticks of {:?}",
            task.name(),
            task.every().max(1),
            self.period
        );
        self.tasks.push(task);
    }

    pub fn with_task(mut self, task: impl PeriodicTask + 'static) -> Self {
        self.add_task(Box::new(task));
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Advance one tick and run every due task. Returns how many ran.
    pub fn tick(&mut self) -> usize {
        self.counter = self.counter.wrapping_add(1);
        let tick = self.counter;
        let mut ran = 0;
        for task in self.tasks.iter_mut() {
            if tick % task.every().max(1) == 0 {
                task.run(tick);
                ran += 1;
            }
        }
        ran
    }

    /// Tick forever at the configured period. Late ticks are delayed, not bunched.
    pub async fn run(mut self) {
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately.
        timer.tick().await;
        loop {
            timer.tick().await;
            self.tick();
        }
    }
}

/// The node's periodic duties plus the startup announcement.
pub struct Lifecycle {
    announce: AnnounceTask,
    scheduler: Scheduler,
}

impl Lifecycle {
    pub fn new(
        config: &Config,
        identity: Arc<NodeInfo>,
        transport: Arc<dyn Transport>,
        peers: Arc<PeerStore>,
        persistence: Arc<dyn PeerPersistence>,
    ) -> Self {
        let sched_cfg = &config.scheduler;
        let announce = AnnounceTask::new(identity, transport, sched_cfg.announce_every_ticks());
        let mut scheduler = Scheduler::new(sched_cfg.tick())
            .with_task(announce.clone())
            .with_task(PersistTask::new(peers.clone(), persistence));
        if config.storage.stale_peer_days > 0 {
            scheduler.add_task(Box::new(PruneTask::new(
                peers,
                chrono::Duration::days(i64::from(config.storage.stale_peer_days)),
                sched_cfg.hourly_ticks(),
            )));
        }
        Self {
            announce,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Broadcast this node's NodeInfo right away.
    pub fn announce_now(&mut self) {
        self.announce.run(0);
    }

    /// Announce once, then run the periodic loop for the life of the process.
    pub async fn start(mut self) {
        info!(
            "Control loop starting: tick {:?}, tasks {:?}",
            self.scheduler.period(),
            self.scheduler.task_names()
        );
        self.announce_now();
        self.scheduler.run().await;
    }
}
