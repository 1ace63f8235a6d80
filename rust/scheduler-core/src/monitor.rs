// rust/scheduler-core/src/monitor.rs

//! Training throughput bookkeeping.
//!
//! The monitor is shared with the task manager but guarded by its own lock.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::shard::WorkerId;

/// Number of global-step samples kept for speed estimation.
const MAX_SAMPLES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
struct StepSample {
    global_step: u64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MonitorState {
    samples: VecDeque<StepSample>,
    running_workers: BTreeSet<WorkerId>,
    resets: u64,
}

/// Records global-step samples and the set of workers currently training.
#[derive(Debug, Default)]
pub struct SpeedMonitor {
    state: Mutex<MonitorState>,
}

impl SpeedMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the global step reached at `timestamp`.
    pub fn collect_global_step(&self, global_step: u64, timestamp: DateTime<Utc>) {
        let mut state = self.state();
        if state.samples.len() == MAX_SAMPLES {
            state.samples.pop_front();
        }
        state.samples.push_back(StepSample {
            global_step,
            timestamp,
        });
    }

    /// Steps per second between the oldest and newest sample.
    pub fn running_speed(&self) -> f64 {
        let state = self.state();
        let (Some(first), Some(last)) = (state.samples.front(), state.samples.back()) else {
            return 0.0;
        };
        let elapsed_ms = (last.timestamp - first.timestamp).num_milliseconds();
        if elapsed_ms <= 0 {
            return 0.0;
        }
        let steps = last.global_step.saturating_sub(first.global_step);
        steps as f64 * 1000.0 / elapsed_ms as f64
    }

    /// Drops all samples so the next measurement starts fresh.
    pub fn reset_running_speed_monitor(&self) {
        let mut state = self.state();
        state.samples.clear();
        state.resets += 1;
        debug!(resets = state.resets, "running speed monitor reset");
    }

    pub fn add_running_worker(&self, worker_id: WorkerId) {
        self.state().running_workers.insert(worker_id);
    }

    pub fn remove_running_worker(&self, worker_id: WorkerId) {
        if self.state().running_workers.remove(&worker_id) {
            debug!(worker_id, "worker removed from speed monitor");
        }
    }

    pub fn running_workers(&self) -> Vec<WorkerId> {
        self.state().running_workers.iter().copied().collect()
    }

    /// How many times the speed samples have been reset.
    pub fn reset_count(&self) -> u64 {
        self.state().resets
    }
}
