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

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{watch, Mutex};

use crate::adapters::{BackendAdapter, FeedbackObserver};
use crate::channel::Publisher;
use crate::definitions::{
    OperatingMode, RobotCommandBatch, RobotData, RobotFeedback, RobotStateInfo, Settings, Team, MAX_ROBOTS,
};
use crate::event_log::EventLogger;
use crate::statistics::StatisticsRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The hub is disabled, nothing was sent.
    Disabled,
    Dispatched {
        sent: usize,
        dropped: usize,
        rejected: usize,
    },
}

/// Records feedback from any backend: statistics, event log and the outbound channel.
pub struct FeedbackRouter {
    statistics: Arc<StatisticsRegistry>,
    event_logger: Arc<dyn EventLogger>,
    publisher: Arc<dyn Publisher<RobotData>>,
}

impl FeedbackRouter {
    pub fn new(
        statistics: Arc<StatisticsRegistry>,
        event_logger: Arc<dyn EventLogger>,
        publisher: Arc<dyn Publisher<RobotData>>,
    ) -> Self {
        Self { statistics, event_logger, publisher }
    }
}

impl FeedbackObserver for FeedbackRouter {
    fn on_feedback(&self, feedback: RobotFeedback) {
        if feedback.id as usize >= MAX_ROBOTS {
            debug!("Discarding feedback for robot {} of team {}", feedback.id, feedback.team);
            self.statistics.increment_invalid_frames(feedback.team);
            return;
        }
        self.statistics.increment_feedback_received(feedback.team, feedback.id);
        self.event_logger.log_feedback(&feedback);
        let team = feedback.team;
        if let Err(e) = self.publisher.publish(&RobotData::feedback(feedback)) {
            debug!("Could not publish feedback: {}", e);
            self.statistics.increment_packets_dropped(team);
        }
    }

    fn on_state_info(&self, info: RobotStateInfo) {
        self.event_logger.log_state_info(&info);
    }

    fn on_invalid_frame(&self, team: Team) {
        self.statistics.increment_invalid_frames(team);
    }
}

/// Routes command batches to the backend selected by the current settings.
pub struct Dispatcher {
    settings: Mutex<Settings>,
    mode_tx: watch::Sender<OperatingMode>,
    simulator: Arc<dyn BackendAdapter>,
    basestation: Arc<dyn BackendAdapter>,
    statistics: Arc<StatisticsRegistry>,
    event_logger: Arc<dyn EventLogger>,
    publisher: Arc<dyn Publisher<RobotData>>,
    feedback: Arc<FeedbackRouter>,
}

impl Dispatcher {
    pub fn new(
        settings: Settings,
        simulator: Arc<dyn BackendAdapter>,
        basestation: Arc<dyn BackendAdapter>,
        statistics: Arc<StatisticsRegistry>,
        event_logger: Arc<dyn EventLogger>,
        publisher: Arc<dyn Publisher<RobotData>>,
    ) -> Self {
        simulator.apply_settings(&settings);
        basestation.apply_settings(&settings);
        let (mode_tx, _) = watch::channel(settings.mode);
        let feedback = Arc::new(FeedbackRouter::new(statistics.clone(), event_logger.clone(), publisher.clone()));
        Self {
            settings: Mutex::new(settings),
            mode_tx,
            simulator,
            basestation,
            statistics,
            event_logger,
            publisher,
            feedback,
        }
    }

    /// Last mode set, readable without waiting for a dispatch in progress.
    pub fn mode(&self) -> OperatingMode {
        *self.mode_tx.borrow()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<OperatingMode> {
        self.mode_tx.subscribe()
    }

    pub fn feedback_observer(&self) -> Arc<dyn FeedbackObserver> {
        self.feedback.clone()
    }

    pub fn on_feedback(&self, feedback: RobotFeedback) {
        self.feedback.on_feedback(feedback);
    }

    /// Sends `batch` to the active backend.
    ///
    /// The settings lock is held until the backend returns, so a settings update
    /// never lands in the middle of a batch.
    pub async fn on_robot_commands(&self, mut batch: RobotCommandBatch, team: Team) -> DispatchOutcome {
        let settings = self.settings.lock().await;
        let adapter = match settings.mode {
            OperatingMode::Disabled => {
                debug!("Hub disabled, dropping {} commands for team {}", batch.commands.len(), team);
                return DispatchOutcome::Disabled;
            }
            OperatingMode::Simulator => &self.simulator,
            OperatingMode::Basestation => &self.basestation,
        };

        let received = batch.commands.len();
        batch.commands.retain(|command| match command.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Rejecting command for robot {} of team {}: {}", command.id, team, e);
                false
            }
        });
        let rejected = received - batch.commands.len();
        for _ in 0..rejected {
            self.statistics.increment_commands_rejected(team);
        }
        if batch.commands.is_empty() {
            return DispatchOutcome::Dispatched { sent: 0, dropped: 0, rejected };
        }

        let report = adapter.send(&batch, team).await;
        drop(settings);
        debug!(
            "Sent {} packets for team {} to {}, {} dropped",
            report.packets.len(),
            team,
            adapter.name(),
            report.dropped_packets()
        );

        self.statistics.add_bytes_sent(team, report.bytes_sent());
        for _ in 0..report.dropped_packets() {
            self.statistics.increment_packets_dropped(team);
        }
        let mut delivered = vec![0usize; MAX_ROBOTS];
        for id in report.delivered_ids() {
            self.statistics.increment_commands_sent(team, id);
            if let Some(count) = delivered.get_mut(id as usize) {
                *count += 1;
            }
        }

        // Echo each delivered command once per delivery, in batch order.
        let sent_commands: Vec<_> = batch
            .commands
            .into_iter()
            .filter(|command| match delivered.get_mut(command.id as usize) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    true
                }
                _ => false,
            })
            .collect();
        let outcome = DispatchOutcome::Dispatched {
            sent: sent_commands.len(),
            dropped: report.dropped_packets(),
            rejected,
        };
        if !sent_commands.is_empty() {
            self.event_logger.log_commands(team, &sent_commands);
            if let Err(e) = self.publisher.publish(&RobotData::sent_commands(team, sent_commands)) {
                debug!("Could not publish sent commands: {}", e);
                self.statistics.increment_packets_dropped(team);
            }
        }
        outcome
    }

    /// Replaces the settings, waiting for any dispatch in progress to finish first.
    pub async fn on_settings_update(&self, settings: Settings) {
        let mut current = self.settings.lock().await;
        if current.mode != settings.mode {
            info!("Switching mode from {} to {}", current.mode, settings.mode);
        }
        self.simulator.apply_settings(&settings);
        self.basestation.apply_settings(&settings);
        self.mode_tx.send_replace(settings.mode);
        *current = settings;
    }
}
