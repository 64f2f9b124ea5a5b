use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of robot ids a team can field. Valid ids are `0..MAX_ROBOTS`.
pub const MAX_ROBOTS: usize = 16;

/// Upper bound for kick and chip power in m/s.
pub const MAX_KICK_SPEED: f32 = 6.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Blue,
    Yellow,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Blue, Team::Yellow];

    pub fn index(self) -> usize {
        match self {
            Team::Blue => 0,
            Team::Yellow => 1,
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::Blue => write!(f, "blue"),
            Team::Yellow => write!(f, "yellow"),
        }
    }
}

/// Selects which backend receives robot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Disabled,
    Simulator,
    Basestation,
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingMode::Disabled => write!(f, "disabled"),
            OperatingMode::Simulator => write!(f, "simulator"),
            OperatingMode::Basestation => write!(f, "basestation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn angle(&self) -> f32 {
        self.y.atan2(self.x)
    }

    pub fn from_polar(rho: f32, theta: f32) -> Self {
        Self::new(rho * theta.cos(), rho * theta.sin())
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KickType {
    #[default]
    None,
    Kick,
    Chip,
}

/// Backend-agnostic command for a single robot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotCommand {
    pub id: u8,
    pub kick_speed: f32,
    pub kick_type: KickType,
    pub dribbler_speed: f32,
    pub velocity: Vector2,
    /// When set, `target_angular_velocity` drives rotation instead of `target_angle`.
    pub use_angular_velocity: bool,
    pub target_angle: f32,
    pub target_angular_velocity: f32,
    pub camera_angle: Option<f32>,
    pub wait_for_ball: bool,
    pub ignore_feedback: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandValidationError {
    #[error("Robot id {0} out of range")]
    RobotIdOutOfRange(u8),

    #[error("Kick speed {0} outside of [0, {MAX_KICK_SPEED}]")]
    KickSpeedOutOfRange(f32),

    #[error("Dribbler speed {0} outside of [0, 1]")]
    DribblerSpeedOutOfRange(f32),

    #[error("Non-finite value in field {0}")]
    NotFinite(&'static str),
}

impl RobotCommand {
    /// The rotation value as carried on the wire: angular velocity or absolute angle.
    pub fn rotation(&self) -> f32 {
        if self.use_angular_velocity {
            self.target_angular_velocity
        } else {
            self.target_angle
        }
    }

    pub fn validate(&self) -> Result<(), CommandValidationError> {
        if self.id as usize >= MAX_ROBOTS {
            return Err(CommandValidationError::RobotIdOutOfRange(self.id));
        }
        if !self.velocity.is_finite() {
            return Err(CommandValidationError::NotFinite("velocity"));
        }
        if !self.rotation().is_finite() {
            return Err(CommandValidationError::NotFinite("rotation"));
        }
        if self.camera_angle.is_some_and(|a| !a.is_finite()) {
            return Err(CommandValidationError::NotFinite("camera_angle"));
        }
        if !(0.0..=MAX_KICK_SPEED).contains(&self.kick_speed) {
            return Err(CommandValidationError::KickSpeedOutOfRange(self.kick_speed));
        }
        if !(0.0..=1.0).contains(&self.dribbler_speed) {
            return Err(CommandValidationError::DribblerSpeedOutOfRange(self.dribbler_speed));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotPose {
    pub id: u8,
    pub position: Vector2,
    pub yaw: f32,
}

/// Last known world state as seen by the AI, used for orientation-dependent packing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSnapshot {
    pub blue: Vec<RobotPose>,
    pub yellow: Vec<RobotPose>,
}

impl WorldSnapshot {
    pub fn robots(&self, team: Team) -> &[RobotPose] {
        match team {
            Team::Blue => &self.blue,
            Team::Yellow => &self.yellow,
        }
    }

    pub fn find_robot(&self, team: Team, id: u8) -> Option<&RobotPose> {
        self.robots(team).iter().find(|robot| robot.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotCommandBatch {
    pub commands: Vec<RobotCommand>,
    pub world: Option<WorldSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSource {
    Simulator,
    Basestation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotFeedback {
    pub id: u8,
    pub team: Team,
    pub source: FeedbackSource,
    pub has_ball: bool,
    pub ball_position: f32,
    pub ball_sensor_working: bool,
    pub velocity: Vector2,
    pub angle: f32,
    pub battery_level: f32,
    pub capacitor_charged: bool,
    pub xsens_calibrated: bool,
    pub wheel_locked: bool,
    pub wheel_braking: bool,
    pub signal_strength: i32,
}

impl RobotFeedback {
    /// Feedback with every sensor field at its neutral value.
    pub fn empty(id: u8, team: Team, source: FeedbackSource) -> Self {
        Self {
            id,
            team,
            source,
            has_ball: false,
            ball_position: 0.0,
            ball_sensor_working: false,
            velocity: Vector2::default(),
            angle: 0.0,
            battery_level: 0.0,
            capacitor_charged: false,
            xsens_calibrated: false,
            wheel_locked: false,
            wheel_braking: false,
            signal_strength: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStateInfo {
    pub id: u8,
    pub team: Team,
    pub xsens_acc1: f32,
    pub xsens_acc2: f32,
    pub xsens_yaw: f32,
    pub rate_of_turn: f32,
    pub wheel_speeds: [f32; 4],
}

/// Simulator addressing. Each team talks to its own control port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorRouting {
    pub host: String,
    pub blue_port: u16,
    pub yellow_port: u16,
}

impl SimulatorRouting {
    pub fn port(&self, team: Team) -> u16 {
        match team {
            Team::Blue => self.blue_port,
            Team::Yellow => self.yellow_port,
        }
    }
}

impl Default for SimulatorRouting {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            blue_port: 10301,
            yellow_port: 10302,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: OperatingMode,
    pub simulator: SimulatorRouting,
}

/// Message published towards the AI: received feedback and echoed commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotData {
    pub team: Team,
    pub received_feedback: Vec<RobotFeedback>,
    pub sent_commands: Vec<RobotCommand>,
}

impl RobotData {
    pub fn feedback(feedback: RobotFeedback) -> Self {
        Self {
            team: feedback.team,
            received_feedback: vec![feedback],
            sent_commands: Vec::new(),
        }
    }

    pub fn sent_commands(team: Team, sent_commands: Vec<RobotCommand>) -> Self {
        Self {
            team,
            received_feedback: Vec::new(),
            sent_commands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(id: u8) -> RobotCommand {
        RobotCommand { id, ..Default::default() }
    }

    #[test]
    fn default_command_is_valid() {
        assert_eq!(command(0).validate(), Ok(()));
        assert_eq!(command((MAX_ROBOTS - 1) as u8).validate(), Ok(()));
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        assert_eq!(command(MAX_ROBOTS as u8).validate(), Err(CommandValidationError::RobotIdOutOfRange(16)));
    }

    #[test]
    fn dribbler_and_kick_ranges_are_checked() {
        let mut cmd = command(1);
        cmd.dribbler_speed = 1.5;
        assert!(matches!(cmd.validate(), Err(CommandValidationError::DribblerSpeedOutOfRange(_))));

        let mut cmd = command(1);
        cmd.kick_speed = -1.0;
        assert!(matches!(cmd.validate(), Err(CommandValidationError::KickSpeedOutOfRange(_))));
    }

    #[test]
    fn nan_velocity_is_rejected() {
        let mut cmd = command(2);
        cmd.velocity = Vector2::new(f32::NAN, 0.0);
        assert_eq!(cmd.validate(), Err(CommandValidationError::NotFinite("velocity")));
    }

    #[test]
    fn rotation_follows_control_mode() {
        let mut cmd = command(3);
        cmd.target_angle = 1.0;
        cmd.target_angular_velocity = 2.0;
        assert_eq!(cmd.rotation(), 1.0);
        cmd.use_angular_velocity = true;
        assert_eq!(cmd.rotation(), 2.0);
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"mode":"basestation"}"#).unwrap();
        assert_eq!(settings.mode, OperatingMode::Basestation);
        assert_eq!(settings.simulator, SimulatorRouting::default());
    }
}
