use bitflags::bitflags;

/// Protocol revision written into every command payload.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size in bytes of an encoded robot command.
pub const ROBOT_COMMAND_SIZE: usize = 28;
/// Size in bytes of a robot feedback payload.
pub const ROBOT_FEEDBACK_SIZE: usize = 28;
/// Size in bytes of a robot state info payload.
pub const ROBOT_STATE_INFO_SIZE: usize = 40;

/// Leading byte of every basestation frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    RobotCommand = 0x10,
    RobotFeedback = 0x20,
    RobotStateInfo = 0x30,
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(PacketType::RobotCommand),
            0x20 => Ok(PacketType::RobotFeedback),
            0x30 => Ok(PacketType::RobotStateInfo),
            other => Err(other),
        }
    }
}

bitflags! {
    /// Byte 3 of a robot command.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct CommandFlags: u8 {
        const DoKick = 0x01;
        const DoChip = 0x02;
        /// Release the ball immediately instead of waiting for it to be in the dribbler.
        const DoForce = 0x04;
        /// The `angle` field holds an angular velocity.
        const AngularControl = 0x08;
        const UseCameraAngle = 0x10;
        const IgnoreFeedback = 0x20;
    }
}

bitflags! {
    /// Byte 2 of a robot feedback payload.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct FeedbackFlags: u8 {
        const HasBall = 0x01;
        const BallSensorWorking = 0x02;
        const XSensCalibrated = 0x04;
        const CapacitorCharged = 0x08;
    }
}

/// Byte offsets of the robot command payload.
pub(crate) mod command {
    pub const HEADER: usize = 0;
    pub const VERSION: usize = 1;
    pub const ID: usize = 2;
    pub const FLAGS: usize = 3;
    pub const KICK_CHIP_POWER: usize = 4;
    pub const DRIBBLER: usize = 8;
    pub const RHO: usize = 12;
    pub const THETA: usize = 16;
    pub const ANGLE: usize = 20;
    pub const CAMERA_ANGLE: usize = 24;
}

/// Byte offsets of the robot feedback payload. Bytes 6 and 7 are reserved.
pub(crate) mod feedback {
    pub const HEADER: usize = 0;
    pub const ID: usize = 1;
    pub const FLAGS: usize = 2;
    pub const WHEEL_LOCKED: usize = 3;
    pub const WHEEL_BRAKING: usize = 4;
    pub const RSSI: usize = 5;
    pub const BALL_POSITION: usize = 8;
    pub const RHO: usize = 12;
    pub const THETA: usize = 16;
    pub const ANGLE: usize = 20;
    pub const BATTERY_LEVEL: usize = 24;
}

/// Byte offsets of the robot state info payload. Bytes 2 and 3 are reserved.
pub(crate) mod state_info {
    pub const HEADER: usize = 0;
    pub const ID: usize = 1;
    pub const XSENS_ACC1: usize = 4;
    pub const XSENS_ACC2: usize = 8;
    pub const XSENS_YAW: usize = 12;
    pub const RATE_OF_TURN: usize = 16;
    pub const WHEEL_SPEEDS: usize = 20;
}
