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
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::adapters::{BackendAdapter, FeedbackObserver, PacketOutcome, SendReport};
use crate::definitions::{RobotCommandBatch, Team};
use crate::protocol::{encode_command, parse_frame, BasestationFrame, BasestationMessage};
use crate::service::{spawn_service, MultiServiceHandle, ServiceHandle};
use crate::usb::transport::{BasestationTransport, LinkOpener, TransportConfig};
use crate::usb::{BasestationBinding, UsbLinkOpener};

/// Demultiplexes a frame on its type header and hands it to `observer`.
pub fn route_frame(frame: BasestationFrame, observer: &dyn FeedbackObserver) {
    match parse_frame(&frame) {
        Ok(BasestationMessage::Feedback(feedback)) => observer.on_feedback(feedback),
        Ok(BasestationMessage::StateInfo(info)) => observer.on_state_info(info),
        Err(e) => {
            debug!("Discarding {} byte frame from basestation for team {}: {}", frame.len(), frame.team, e);
            observer.on_invalid_frame(frame.team);
        }
    }
}

/// Reads frames while the device is active and (re)opens it on schedule otherwise.
///
/// This task is the only reader of the device.
pub fn run_basestation_service<O: LinkOpener>(
    transport: Arc<BasestationTransport<O>>,
    observer: Arc<dyn FeedbackObserver>,
    reconnect_interval: Duration,
) -> ServiceHandle {
    spawn_service(move |mut stop| async move {
        let mut open_failure_reported = false;
        let mut first_attempt = true;
        loop {
            if transport.is_active() {
                tokio::select! {
                    _ = stop.signaled() => break,
                    frame = transport.poll_read() => {
                        if let Some(frame) = frame {
                            route_frame(frame, observer.as_ref());
                        }
                    }
                }
                continue;
            }

            // Every open after the first one waits for the next scheduled attempt,
            // including the reopen after too many failed transfers.
            if !first_attempt {
                tokio::select! {
                    _ = stop.signaled() => break,
                    _ = tokio::time::sleep(reconnect_interval) => {}
                }
            }
            first_attempt = false;

            match transport.reconnect().await {
                Ok(()) => open_failure_reported = false,
                Err(e) if !open_failure_reported => {
                    warn!("Could not open basestation for team {}: {}", transport.team(), e);
                    open_failure_reported = true;
                }
                Err(e) => debug!("Could not open basestation for team {}: {}", transport.team(), e),
            }
        }
        transport.close();
        info!("Basestation service for team {} stopped", transport.team());
    })
}

/// Sends commands to physical robots through one basestation per team.
pub struct BasestationAdapter<O: LinkOpener> {
    transports: [Arc<BasestationTransport<O>>; 2],
}

impl BasestationAdapter<UsbLinkOpener> {
    pub fn with_usb(blue: BasestationBinding, yellow: BasestationBinding, config: TransportConfig) -> Self {
        Self::new(UsbLinkOpener::new(blue), UsbLinkOpener::new(yellow), config)
    }
}

impl<O: LinkOpener> BasestationAdapter<O> {
    pub fn new(blue: O, yellow: O, config: TransportConfig) -> Self {
        Self {
            transports: [
                Arc::new(BasestationTransport::new(Team::Blue, blue, config)),
                Arc::new(BasestationTransport::new(Team::Yellow, yellow, config)),
            ],
        }
    }

    pub fn transport(&self, team: Team) -> &Arc<BasestationTransport<O>> {
        &self.transports[team.index()]
    }

    /// Starts one reader task per basestation.
    pub fn start(&self, observer: Arc<dyn FeedbackObserver>, reconnect_interval: Duration) -> MultiServiceHandle {
        let mut services = MultiServiceHandle::new();
        for transport in &self.transports {
            services.add(run_basestation_service(transport.clone(), observer.clone(), reconnect_interval));
        }
        services
    }
}

#[async_trait]
impl<O: LinkOpener> BackendAdapter for BasestationAdapter<O> {
    fn name(&self) -> &'static str {
        "basestation"
    }

    async fn send(&self, batch: &RobotCommandBatch, team: Team) -> SendReport {
        let transport = self.transport(team);
        let mut report = SendReport::default();
        for command in &batch.commands {
            let bytes_sent = match encode_command(command, batch.world.as_ref(), team) {
                Ok(payload) => transport.write(&payload).await,
                Err(e) => {
                    warn!("Could not encode command for robot {}: {}", command.id, e);
                    0
                }
            };
            report.packets.push(PacketOutcome { robot_ids: vec![command.id], bytes_sent });
        }
        report
    }
}
