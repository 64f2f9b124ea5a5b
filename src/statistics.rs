// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::definitions::{OperatingMode, Team, MAX_ROBOTS};
use crate::service::{spawn_service, ServiceHandle};

#[derive(Default)]
struct TeamCounters {
    commands_sent: [AtomicU64; MAX_ROBOTS],
    feedback_received: [AtomicU64; MAX_ROBOTS],
    bytes_sent: AtomicU64,
    packets_dropped: AtomicU64,
    commands_rejected: AtomicU64,
    invalid_frames: AtomicU64,
}

fn take(counter: &AtomicU64) -> u64 {
    counter.swap(0, Ordering::Relaxed)
}

impl TeamCounters {
    fn snapshot_and_reset(&self) -> TeamStatistics {
        TeamStatistics {
            commands_sent: self.commands_sent.each_ref().map(take),
            feedback_received: self.feedback_received.each_ref().map(take),
            bytes_sent: take(&self.bytes_sent),
            packets_dropped: take(&self.packets_dropped),
            commands_rejected: take(&self.commands_rejected),
            invalid_frames: take(&self.invalid_frames),
        }
    }
}

/// Per team and per robot traffic counters.
///
/// Counters use relaxed atomics: a snapshot taken while producers are running may
/// split an increment across two intervals. The numbers are diagnostic only.
#[derive(Default)]
pub struct StatisticsRegistry {
    teams: [TeamCounters; 2],
}

impl StatisticsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn team(&self, team: Team) -> &TeamCounters {
        &self.teams[team.index()]
    }

    /// Ids outside `0..MAX_ROBOTS` are ignored.
    pub fn increment_commands_sent(&self, team: Team, id: u8) {
        if let Some(counter) = self.team(team).commands_sent.get(id as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_feedback_received(&self, team: Team, id: u8) {
        if let Some(counter) = self.team(team).feedback_received.get(id as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_bytes_sent(&self, team: Team, bytes: usize) {
        self.team(team).bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn increment_packets_dropped(&self, team: Team) {
        self.team(team).packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commands_rejected(&self, team: Team) {
        self.team(team).commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_invalid_frames(&self, team: Team) {
        self.team(team).invalid_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            blue: self.team(Team::Blue).snapshot_and_reset(),
            yellow: self.team(Team::Yellow).snapshot_and_reset(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamStatistics {
    pub commands_sent: [u64; MAX_ROBOTS],
    pub feedback_received: [u64; MAX_ROBOTS],
    pub bytes_sent: u64,
    pub packets_dropped: u64,
    pub commands_rejected: u64,
    pub invalid_frames: u64,
}

impl TeamStatistics {
    pub fn is_idle(&self) -> bool {
        *self == TeamStatistics::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub blue: TeamStatistics,
    pub yellow: TeamStatistics,
}

impl StatisticsSnapshot {
    pub fn team(&self, team: Team) -> &TeamStatistics {
        match team {
            Team::Blue => &self.blue,
            Team::Yellow => &self.yellow,
        }
    }
}

const COLUMNS: usize = 4;

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for team in Team::ALL {
            let stats = self.team(team);
            writeln!(
                f,
                "{team}: {} bytes sent, {} dropped, {} rejected, {} invalid frames",
                stats.bytes_sent, stats.packets_dropped, stats.commands_rejected, stats.invalid_frames
            )?;
            for row in (0..MAX_ROBOTS).step_by(COLUMNS) {
                for id in row..(row + COLUMNS).min(MAX_ROBOTS) {
                    write!(f, "{id:>2}: {:>4}/{:<4}\t", stats.commands_sent[id], stats.feedback_received[id])?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Logs and resets the counters once per `interval`.
pub fn run_statistics_report<M>(statistics: Arc<StatisticsRegistry>, interval: Duration, mode: M) -> ServiceHandle
where
    M: Fn() -> OperatingMode + Send + 'static,
{
    spawn_service(move |mut stop| async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut iteration: u64 = 0;
        loop {
            tokio::select! {
                _ = stop.signaled() => break,
                _ = ticker.tick() => {
                    let snapshot = statistics.snapshot_and_reset();
                    info!("==========| {} {} |==========\n{}", iteration, mode(), snapshot);
                    iteration += 1;
                }
            }
        }
    })
}
