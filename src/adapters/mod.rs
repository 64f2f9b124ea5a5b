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

use async_trait::async_trait;

use crate::definitions::{RobotCommandBatch, RobotFeedback, RobotStateInfo, Settings, Team};

pub mod basestation;
pub mod simulator;

pub use basestation::BasestationAdapter;
pub use simulator::SimulatorAdapter;

/// Receives everything the backends report back.
///
/// Methods are called on the backend's own receiving task, never on the task
/// that dispatched the commands.
pub trait FeedbackObserver: Send + Sync {
    fn on_feedback(&self, feedback: RobotFeedback);

    fn on_state_info(&self, info: RobotStateInfo);

    /// A frame or datagram that could not be decoded was discarded.
    fn on_invalid_frame(&self, team: Team);
}

/// One packet handed to a backend and the commands it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOutcome {
    pub robot_ids: Vec<u8>,
    /// 0 when the packet was dropped.
    pub bytes_sent: usize,
}

impl PacketOutcome {
    pub fn is_dropped(&self) -> bool {
        self.bytes_sent == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub packets: Vec<PacketOutcome>,
}

impl SendReport {
    pub fn bytes_sent(&self) -> usize {
        self.packets.iter().map(|p| p.bytes_sent).sum()
    }

    pub fn dropped_packets(&self) -> usize {
        self.packets.iter().filter(|p| p.is_dropped()).count()
    }

    pub fn delivered_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.packets
            .iter()
            .filter(|p| !p.is_dropped())
            .flat_map(|p| p.robot_ids.iter().copied())
    }
}

/// A place robot commands can be sent to.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sends every command of `batch`. Failures are reported per packet, never raised.
    async fn send(&self, batch: &RobotCommandBatch, team: Team) -> SendReport;

    /// Called with the settings lock held whenever new settings arrive.
    fn apply_settings(&self, _settings: &Settings) {}
}
