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

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use thiserror::Error;

use crate::adapters::{BasestationAdapter, SimulatorAdapter};
use crate::channel::{spawn_subscriber, ChannelError, Publisher, TypedSubscriber, UdpPublisher};
use crate::config::HubConfig;
use crate::definitions::{RobotCommandBatch, RobotData, Settings, Team};
use crate::dispatcher::Dispatcher;
use crate::event_log::{EventLogger, FileEventLogger, NoopEventLogger};
use crate::service::MultiServiceHandle;
use crate::statistics::{run_statistics_report, StatisticsRegistry};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Could not open {channel} channel: {source}")]
    Channel {
        channel: &'static str,
        #[source]
        source: ChannelError,
    },

    #[error("Could not bind simulator sockets: {0}")]
    SimulatorSocket(#[source] io::Error),

    #[error("Could not create event logs in {path}: {source}")]
    EventLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StartupError {
    pub fn is_address_in_use(&self) -> bool {
        matches!(self, StartupError::Channel { source, .. } if source.is_address_in_use())
    }
}

async fn bind_channel<T: serde::de::DeserializeOwned>(
    channel: &'static str,
    address: &str,
) -> Result<(TypedSubscriber<T>, SocketAddr), StartupError> {
    let subscriber = TypedSubscriber::bind(address)
        .await
        .map_err(|source| StartupError::Channel { channel, source })?;
    let local_addr = subscriber
        .local_addr()
        .map_err(|e| StartupError::Channel { channel, source: ChannelError::Bind { address: address.to_string(), source: e } })?;
    Ok((subscriber, local_addr))
}

pub struct RobotHubHandle {
    dispatcher: Arc<Dispatcher>,
    command_addresses: [SocketAddr; 2],
    settings_address: SocketAddr,
    services: MultiServiceHandle,
}

impl RobotHubHandle {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn command_address(&self, team: Team) -> SocketAddr {
        self.command_addresses[team.index()]
    }

    pub fn settings_address(&self) -> SocketAddr {
        self.settings_address
    }

    /// Stops every task and closes the basestations.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        info!("Shutting down robothub");
        self.services.shutdown().await
    }
}

/// Binds the channels, opens the backends and starts every background task.
///
/// Channels are bound first so a second instance fails before touching any device.
pub async fn run_robothub(config: &HubConfig) -> Result<RobotHubHandle, StartupError> {
    let (blue_commands, blue_address) =
        bind_channel::<RobotCommandBatch>("blue commands", &config.blue_commands_address).await?;
    let (yellow_commands, yellow_address) =
        bind_channel::<RobotCommandBatch>("yellow commands", &config.yellow_commands_address).await?;
    let (settings, settings_address) = bind_channel::<Settings>("settings", &config.settings_address).await?;
    let publisher: Arc<dyn Publisher<RobotData>> = Arc::new(
        UdpPublisher::connect(&config.feedback_address)
            .await
            .map_err(|source| StartupError::Channel { channel: "feedback", source })?,
    );

    let event_logger: Arc<dyn EventLogger> = if config.event_log {
        let logger = FileEventLogger::create(&config.log_dir)
            .map_err(|source| StartupError::EventLog { path: config.log_dir.clone(), source })?;
        Arc::new(logger)
    } else {
        Arc::new(NoopEventLogger)
    };

    let statistics = Arc::new(StatisticsRegistry::new());
    let simulator = Arc::new(
        SimulatorAdapter::bind(config.settings.simulator.clone())
            .await
            .map_err(StartupError::SimulatorSocket)?,
    );
    let basestation = Arc::new(BasestationAdapter::with_usb(
        config.blue_basestation.clone(),
        config.yellow_basestation.clone(),
        config.transport_config(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        config.settings.clone(),
        simulator.clone(),
        basestation.clone(),
        statistics.clone(),
        event_logger,
        publisher,
    ));

    let mut services = MultiServiceHandle::new();
    services.extend(simulator.start(dispatcher.feedback_observer()));
    services.extend(basestation.start(dispatcher.feedback_observer(), config.reconnect_interval()));

    for (team, subscriber) in [(Team::Blue, blue_commands), (Team::Yellow, yellow_commands)] {
        let dispatcher = dispatcher.clone();
        services.add(spawn_subscriber(subscriber, move |batch: RobotCommandBatch| {
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher.on_robot_commands(batch, team).await;
            }
        }));
    }
    let settings_dispatcher = dispatcher.clone();
    services.add(spawn_subscriber(settings, move |update: Settings| {
        let dispatcher = settings_dispatcher.clone();
        async move { dispatcher.on_settings_update(update).await }
    }));

    let mode = dispatcher.subscribe_mode();
    services.add(run_statistics_report(statistics, config.statistics_interval(), move || *mode.borrow()));

    info!(
        "robothub started in {} mode: commands on {} (blue) and {} (yellow), settings on {}",
        dispatcher.mode(),
        blue_address,
        yellow_address,
        settings_address
    );
    Ok(RobotHubHandle {
        dispatcher,
        command_addresses: [blue_address, yellow_address],
        settings_address,
        services,
    })
}
