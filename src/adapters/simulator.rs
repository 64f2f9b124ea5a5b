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
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::adapters::{BackendAdapter, FeedbackObserver, PacketOutcome, SendReport};
use crate::definitions::{
    FeedbackSource, KickType, RobotCommand, RobotCommandBatch, RobotFeedback, Settings, SimulatorRouting, Team,
};
use crate::service::{spawn_service, MultiServiceHandle, ServiceHandle};

pub const SIMULATOR_SEND_TIMEOUT: Duration = Duration::from_millis(500);
pub const CHIP_ANGLE_DEGREES: f32 = 45.0;
/// Dribbler speed 1.0 corresponds to this many RPM in the simulator.
pub const MAX_DRIBBLER_RPM: f32 = 1000.0;
const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorRobotCommand {
    pub id: u8,
    pub kick_speed: f32,
    /// Degrees above the ground, 0 for a flat kick.
    pub kick_angle: f32,
    pub dribbler_rpm: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub angular_control: bool,
    /// Angular velocity when `angular_control` is set, absolute angle otherwise.
    pub angle: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorCommandPacket {
    pub team: Team,
    pub commands: Vec<SimulatorRobotCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorRobotFeedback {
    pub id: u8,
    #[serde(default)]
    pub dribbler_ball_contact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorFeedbackPacket {
    pub feedback: Vec<SimulatorRobotFeedback>,
    pub errors: Vec<SimulatorError>,
}

pub fn to_simulator_command(command: &RobotCommand) -> SimulatorRobotCommand {
    let (kick_speed, kick_angle) = match command.kick_type {
        KickType::None => (0.0, 0.0),
        KickType::Kick => (command.kick_speed, 0.0),
        KickType::Chip => (command.kick_speed, CHIP_ANGLE_DEGREES),
    };
    SimulatorRobotCommand {
        id: command.id,
        kick_speed,
        kick_angle,
        dribbler_rpm: command.dribbler_speed * MAX_DRIBBLER_RPM,
        velocity_x: command.velocity.x,
        velocity_y: command.velocity.y,
        angular_control: command.use_angular_velocity,
        angle: command.rotation(),
    }
}

pub fn to_simulator_packet(batch: &RobotCommandBatch, team: Team) -> SimulatorCommandPacket {
    SimulatorCommandPacket {
        team,
        commands: batch.commands.iter().map(to_simulator_command).collect(),
    }
}

/// Turns one datagram from the simulator into feedback records.
pub fn parse_feedback_datagram(datagram: &[u8], team: Team) -> Result<Vec<RobotFeedback>, serde_json::Error> {
    let packet: SimulatorFeedbackPacket = serde_json::from_slice(datagram)?;
    for error in &packet.errors {
        warn!("Simulator reported error for team {}: {} {}", team, error.code, error.message);
    }
    Ok(packet
        .feedback
        .into_iter()
        .map(|robot| {
            let mut feedback = RobotFeedback::empty(robot.id, team, FeedbackSource::Simulator);
            feedback.has_ball = robot.dribbler_ball_contact;
            feedback
        })
        .collect())
}

/// Sends robot commands to the simulator, one control port per team.
pub struct SimulatorAdapter {
    sockets: [Arc<UdpSocket>; 2],
    routing: Mutex<SimulatorRouting>,
    send_timeout: Duration,
}

impl SimulatorAdapter {
    /// Binds one ephemeral socket per team.
    pub async fn bind(routing: SimulatorRouting) -> io::Result<Self> {
        let blue = UdpSocket::bind("0.0.0.0:0").await?;
        let yellow = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            sockets: [Arc::new(blue), Arc::new(yellow)],
            routing: Mutex::new(routing),
            send_timeout: SIMULATOR_SEND_TIMEOUT,
        })
    }

    pub fn local_addr(&self, team: Team) -> io::Result<std::net::SocketAddr> {
        self.sockets[team.index()].local_addr()
    }

    fn target(&self, team: Team) -> String {
        let routing = self.routing.lock().unwrap_or_else(PoisonError::into_inner);
        format!("{}:{}", routing.host, routing.port(team))
    }

    /// Starts one listener per team for the simulator's replies.
    pub fn start(&self, observer: Arc<dyn FeedbackObserver>) -> MultiServiceHandle {
        let mut services = MultiServiceHandle::new();
        for team in Team::ALL {
            services.add(run_feedback_listener(self.sockets[team.index()].clone(), team, observer.clone()));
        }
        services
    }
}

fn run_feedback_listener(socket: Arc<UdpSocket>, team: Team, observer: Arc<dyn FeedbackObserver>) -> ServiceHandle {
    spawn_service(move |mut stop| async move {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = stop.signaled() => break,
                received = socket.recv_from(&mut buffer) => match received {
                    Ok((len, _)) => match parse_feedback_datagram(&buffer[..len], team) {
                        Ok(records) => records.into_iter().for_each(|fb| observer.on_feedback(fb)),
                        Err(e) => {
                            debug!("Discarding malformed simulator datagram for team {}: {}", team, e);
                            observer.on_invalid_frame(team);
                        }
                    },
                    // ICMP port unreachable from a previous send surfaces here on some platforms
                    Err(e) => debug!("Simulator socket for team {} reported: {}", team, e),
                },
            }
        }
        info!("Simulator listener for team {} stopped", team);
    })
}

#[async_trait]
impl BackendAdapter for SimulatorAdapter {
    fn name(&self) -> &'static str {
        "simulator"
    }

    async fn send(&self, batch: &RobotCommandBatch, team: Team) -> SendReport {
        if batch.commands.is_empty() {
            return SendReport::default();
        }
        let robot_ids = batch.commands.iter().map(|c| c.id).collect();
        let bytes_sent = match serde_json::to_vec(&to_simulator_packet(batch, team)) {
            Ok(datagram) => {
                let target = self.target(team);
                let socket = &self.sockets[team.index()];
                match timeout(self.send_timeout, socket.send_to(&datagram, target.as_str())).await {
                    Ok(Ok(sent)) => sent,
                    Ok(Err(e)) => {
                        warn!("Failed to send commands for team {} to simulator at {}: {}", team, target, e);
                        0
                    }
                    Err(_) => {
                        warn!("Sending commands for team {} to simulator at {} timed out", team, target);
                        0
                    }
                }
            }
            Err(e) => {
                warn!("Could not serialize simulator packet for team {}: {}", team, e);
                0
            }
        };
        SendReport { packets: vec![PacketOutcome { robot_ids, bytes_sent }] }
    }

    fn apply_settings(&self, settings: &Settings) {
        let mut routing = self.routing.lock().unwrap_or_else(PoisonError::into_inner);
        if *routing != settings.simulator {
            info!(
                "Simulator target changed to {} (blue port {}, yellow port {})",
                settings.simulator.host, settings.simulator.blue_port, settings.simulator.yellow_port
            );
            *routing = settings.simulator.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::basestation::tests::RecordingObserver;
    use crate::definitions::{OperatingMode, Vector2};

    async fn fake_simulator() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn routing_to(blue_port: u16, yellow_port: u16) -> SimulatorRouting {
        SimulatorRouting { host: "127.0.0.1".to_string(), blue_port, yellow_port }
    }

    #[test]
    fn chip_gets_fixed_angle_and_dribbler_is_scaled() {
        let command = RobotCommand {
            id: 3,
            kick_type: KickType::Chip,
            kick_speed: 4.0,
            dribbler_speed: 0.5,
            velocity: Vector2::new(1.0, -2.0),
            use_angular_velocity: true,
            target_angular_velocity: 1.5,
            ..Default::default()
        };
        let sim = to_simulator_command(&command);
        assert_eq!(sim.kick_speed, 4.0);
        assert_eq!(sim.kick_angle, CHIP_ANGLE_DEGREES);
        assert_eq!(sim.dribbler_rpm, 500.0);
        assert_eq!((sim.velocity_x, sim.velocity_y), (1.0, -2.0));
        assert!(sim.angular_control);
        assert_eq!(sim.angle, 1.5);

        let idle = to_simulator_command(&RobotCommand { kick_speed: 3.0, ..Default::default() });
        assert_eq!((idle.kick_speed, idle.kick_angle), (0.0, 0.0));
    }

    #[test]
    fn feedback_datagram_is_tagged_with_team_and_source() {
        let datagram = br#"{"feedback":[{"id":2,"dribbler_ball_contact":true},{"id":5}]}"#;
        let records = parse_feedback_datagram(datagram, Team::Yellow).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].has_ball);
        assert!(!records[1].has_ball);
        assert!(records.iter().all(|r| r.team == Team::Yellow && r.source == FeedbackSource::Simulator));
        assert!(parse_feedback_datagram(b"not json", Team::Blue).is_err());
    }

    #[tokio::test]
    async fn batch_is_sent_as_one_datagram_to_team_port() {
        let (blue_sim, blue_port) = fake_simulator().await;
        let (_yellow_sim, yellow_port) = fake_simulator().await;
        let adapter = SimulatorAdapter::bind(routing_to(blue_port, yellow_port)).await.unwrap();

        let batch = RobotCommandBatch {
            commands: vec![RobotCommand { id: 1, ..Default::default() }, RobotCommand { id: 7, ..Default::default() }],
            world: None,
        };
        let report = adapter.send(&batch, Team::Blue).await;
        assert_eq!(report.packets.len(), 1);
        assert_eq!(report.packets[0].robot_ids, vec![1, 7]);

        let mut buffer = vec![0u8; 4096];
        let (len, _) = timeout(Duration::from_secs(1), blue_sim.recv_from(&mut buffer)).await.unwrap().unwrap();
        assert_eq!(len, report.bytes_sent());
        let packet: SimulatorCommandPacket = serde_json::from_slice(&buffer[..len]).unwrap();
        assert_eq!(packet.team, Team::Blue);
        assert_eq!(packet.commands.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 7]);
    }

    #[tokio::test]
    async fn settings_redirect_commands() {
        let (_old_sim, old_port) = fake_simulator().await;
        let (new_sim, new_port) = fake_simulator().await;
        let adapter = SimulatorAdapter::bind(routing_to(old_port, old_port)).await.unwrap();
        adapter.apply_settings(&Settings { mode: OperatingMode::Simulator, simulator: routing_to(old_port, new_port) });

        let batch = RobotCommandBatch { commands: vec![RobotCommand::default()], world: None };
        adapter.send(&batch, Team::Yellow).await;

        let mut buffer = vec![0u8; 4096];
        let (len, _) = timeout(Duration::from_secs(1), new_sim.recv_from(&mut buffer)).await.unwrap().unwrap();
        let packet: SimulatorCommandPacket = serde_json::from_slice(&buffer[..len]).unwrap();
        assert_eq!(packet.team, Team::Yellow);
    }

    #[tokio::test]
    async fn replies_reach_observer() {
        let (sim, port) = fake_simulator().await;
        let adapter = SimulatorAdapter::bind(routing_to(port, port)).await.unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let services = adapter.start(observer.clone());

        let blue_addr = ("127.0.0.1", adapter.local_addr(Team::Blue).unwrap().port());
        sim.send_to(br#"{"feedback":[{"id":4,"dribbler_ball_contact":true}]}"#, blue_addr).await.unwrap();
        sim.send_to(b"garbage", blue_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let feedback = observer.feedback.lock().unwrap().clone();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].id, 4);
        assert_eq!(feedback[0].team, Team::Blue);
        assert!(feedback[0].has_ball);
        assert_eq!(*observer.invalid.lock().unwrap(), vec![Team::Blue]);
        services.shutdown().await.unwrap();
    }
}
