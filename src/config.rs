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

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::definitions::Settings;
use crate::usb::transport::TransportConfig;
use crate::usb::BasestationBinding;

/// Startup configuration. Every field has a default so a partial file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub blue_commands_address: String,
    pub yellow_commands_address: String,
    pub settings_address: String,
    /// Where `RobotData` messages are published.
    pub feedback_address: String,
    pub settings: Settings,
    pub blue_basestation: BasestationBinding,
    pub yellow_basestation: BasestationBinding,
    pub statistics_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub failure_threshold: u32,
    pub log_dir: PathBuf,
    pub event_log: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            blue_commands_address: "127.0.0.1:5561".to_string(),
            yellow_commands_address: "127.0.0.1:5562".to_string(),
            settings_address: "127.0.0.1:5563".to_string(),
            feedback_address: "127.0.0.1:5564".to_string(),
            settings: Settings::default(),
            blue_basestation: BasestationBinding::Index(0),
            yellow_basestation: BasestationBinding::Index(1),
            statistics_interval_ms: 1000,
            reconnect_interval_ms: 1000,
            failure_threshold: 10,
            log_dir: PathBuf::from("logs"),
            event_log: true,
        }
    }
}

impl HubConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn statistics_interval(&self) -> Duration {
        Duration::from_millis(self.statistics_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig { failure_threshold: self.failure_threshold, ..TransportConfig::default() }
    }
}
