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

use crate::definitions::{
    FeedbackSource, KickType, RobotCommand, RobotFeedback, RobotStateInfo, Team, Vector2, WorldSnapshot, MAX_ROBOTS,
};
use crate::protocol::layout::{
    command, feedback, state_info, CommandFlags, FeedbackFlags, PacketType, PROTOCOL_VERSION, ROBOT_COMMAND_SIZE,
    ROBOT_FEEDBACK_SIZE, ROBOT_STATE_INFO_SIZE,
};
use crate::protocol::CodecError;

pub type RobotCommandPayload = [u8; ROBOT_COMMAND_SIZE];

fn put_f32(buffer: &mut [u8], offset: usize, value: f32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_f32(payload: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([payload[offset], payload[offset + 1], payload[offset + 2], payload[offset + 3]])
}

fn check_payload(payload: &[u8], expected_type: PacketType, expected_size: usize) -> Result<(), CodecError> {
    let header = *payload.first().ok_or(CodecError::Empty)?;
    if header != expected_type as u8 {
        return Err(CodecError::UnexpectedPacketType {
            expected: expected_type as u8,
            actual: header,
        });
    }
    if payload.len() < expected_size {
        return Err(CodecError::TooShort {
            name: "payload",
            expected: expected_size,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn check_robot_id(id: u8) -> Result<u8, CodecError> {
    if (id as usize) < MAX_ROBOTS {
        Ok(id)
    } else {
        Err(CodecError::RobotIdOutOfRange(id))
    }
}

/// Packs a command into the basestation wire format.
///
/// When the command has no explicit camera angle, the yaw of the robot in `world`
/// is used so the robot can correct its heading estimate.
pub fn encode_command(
    cmd: &RobotCommand,
    world: Option<&WorldSnapshot>,
    team: Team,
) -> Result<RobotCommandPayload, CodecError> {
    let id = check_robot_id(cmd.id)?;

    let kicking = cmd.kick_speed > 0.0 && cmd.kick_type != KickType::None;
    let mut flags = CommandFlags::empty();
    if kicking {
        match cmd.kick_type {
            KickType::Kick => flags |= CommandFlags::DoKick,
            KickType::Chip => flags |= CommandFlags::DoChip,
            KickType::None => (),
        }
    }
    flags.set(CommandFlags::DoForce, !cmd.wait_for_ball);
    flags.set(CommandFlags::AngularControl, cmd.use_angular_velocity);
    flags.set(CommandFlags::IgnoreFeedback, cmd.ignore_feedback);

    let camera_angle = cmd
        .camera_angle
        .or_else(|| world.and_then(|w| w.find_robot(team, id)).map(|robot| robot.yaw));
    flags.set(CommandFlags::UseCameraAngle, camera_angle.is_some());

    let mut payload = [0u8; ROBOT_COMMAND_SIZE];
    payload[command::HEADER] = PacketType::RobotCommand as u8;
    payload[command::VERSION] = PROTOCOL_VERSION;
    payload[command::ID] = id;
    payload[command::FLAGS] = flags.bits();
    put_f32(&mut payload, command::KICK_CHIP_POWER, if kicking { cmd.kick_speed } else { 0.0 });
    put_f32(&mut payload, command::DRIBBLER, cmd.dribbler_speed);
    put_f32(&mut payload, command::RHO, cmd.velocity.length());
    put_f32(&mut payload, command::THETA, cmd.velocity.angle());
    put_f32(&mut payload, command::ANGLE, cmd.rotation());
    put_f32(&mut payload, command::CAMERA_ANGLE, camera_angle.unwrap_or(0.0));
    Ok(payload)
}

/// Reconstructs the high-level command from a command payload.
pub fn decode_command(payload: &[u8]) -> Result<RobotCommand, CodecError> {
    check_payload(payload, PacketType::RobotCommand, ROBOT_COMMAND_SIZE)?;
    if payload[command::VERSION] != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(payload[command::VERSION]));
    }
    let id = check_robot_id(payload[command::ID])?;
    let flags = CommandFlags::from_bits_truncate(payload[command::FLAGS]);

    let kick_type = if flags.contains(CommandFlags::DoChip) {
        KickType::Chip
    } else if flags.contains(CommandFlags::DoKick) {
        KickType::Kick
    } else {
        KickType::None
    };
    let use_angular_velocity = flags.contains(CommandFlags::AngularControl);
    let angle = get_f32(payload, command::ANGLE);

    Ok(RobotCommand {
        id,
        kick_speed: get_f32(payload, command::KICK_CHIP_POWER),
        kick_type,
        dribbler_speed: get_f32(payload, command::DRIBBLER),
        velocity: Vector2::from_polar(get_f32(payload, command::RHO), get_f32(payload, command::THETA)),
        use_angular_velocity,
        target_angle: if use_angular_velocity { 0.0 } else { angle },
        target_angular_velocity: if use_angular_velocity { angle } else { 0.0 },
        camera_angle: flags
            .contains(CommandFlags::UseCameraAngle)
            .then(|| get_f32(payload, command::CAMERA_ANGLE)),
        wait_for_ball: !flags.contains(CommandFlags::DoForce),
        ignore_feedback: flags.contains(CommandFlags::IgnoreFeedback),
    })
}

/// Decodes a feedback payload produced by a robot of `team`.
///
/// The battery level is kept raw; deciding whether it is low is up to the consumer.
pub fn decode_feedback(payload: &[u8], team: Team) -> Result<RobotFeedback, CodecError> {
    check_payload(payload, PacketType::RobotFeedback, ROBOT_FEEDBACK_SIZE)?;
    let id = check_robot_id(payload[feedback::ID])?;
    let flags = FeedbackFlags::from_bits_truncate(payload[feedback::FLAGS]);

    Ok(RobotFeedback {
        id,
        team,
        source: FeedbackSource::Basestation,
        has_ball: flags.contains(FeedbackFlags::HasBall),
        ball_position: get_f32(payload, feedback::BALL_POSITION),
        ball_sensor_working: flags.contains(FeedbackFlags::BallSensorWorking),
        velocity: Vector2::from_polar(get_f32(payload, feedback::RHO), get_f32(payload, feedback::THETA)),
        angle: get_f32(payload, feedback::ANGLE),
        battery_level: get_f32(payload, feedback::BATTERY_LEVEL),
        capacitor_charged: flags.contains(FeedbackFlags::CapacitorCharged),
        xsens_calibrated: flags.contains(FeedbackFlags::XSensCalibrated),
        wheel_locked: payload[feedback::WHEEL_LOCKED] != 0,
        wheel_braking: payload[feedback::WHEEL_BRAKING] != 0,
        signal_strength: payload[feedback::RSSI] as i8 as i32,
    })
}

/// Packs feedback the way a robot reports it. Used by loopback tooling and tests.
pub fn encode_feedback(fb: &RobotFeedback) -> Result<[u8; ROBOT_FEEDBACK_SIZE], CodecError> {
    let id = check_robot_id(fb.id)?;
    let mut flags = FeedbackFlags::empty();
    flags.set(FeedbackFlags::HasBall, fb.has_ball);
    flags.set(FeedbackFlags::BallSensorWorking, fb.ball_sensor_working);
    flags.set(FeedbackFlags::XSensCalibrated, fb.xsens_calibrated);
    flags.set(FeedbackFlags::CapacitorCharged, fb.capacitor_charged);

    let mut payload = [0u8; ROBOT_FEEDBACK_SIZE];
    payload[feedback::HEADER] = PacketType::RobotFeedback as u8;
    payload[feedback::ID] = id;
    payload[feedback::FLAGS] = flags.bits();
    payload[feedback::WHEEL_LOCKED] = fb.wheel_locked as u8;
    payload[feedback::WHEEL_BRAKING] = fb.wheel_braking as u8;
    payload[feedback::RSSI] = fb.signal_strength.clamp(i8::MIN as i32, i8::MAX as i32) as i8 as u8;
    put_f32(&mut payload, feedback::BALL_POSITION, fb.ball_position);
    put_f32(&mut payload, feedback::RHO, fb.velocity.length());
    put_f32(&mut payload, feedback::THETA, fb.velocity.angle());
    put_f32(&mut payload, feedback::ANGLE, fb.angle);
    put_f32(&mut payload, feedback::BATTERY_LEVEL, fb.battery_level);
    Ok(payload)
}

pub fn decode_state_info(payload: &[u8], team: Team) -> Result<RobotStateInfo, CodecError> {
    check_payload(payload, PacketType::RobotStateInfo, ROBOT_STATE_INFO_SIZE)?;
    let id = check_robot_id(payload[state_info::ID])?;
    let mut wheel_speeds = [0f32; 4];
    for (i, speed) in wheel_speeds.iter_mut().enumerate() {
        *speed = get_f32(payload, state_info::WHEEL_SPEEDS + i * 4);
    }
    Ok(RobotStateInfo {
        id,
        team,
        xsens_acc1: get_f32(payload, state_info::XSENS_ACC1),
        xsens_acc2: get_f32(payload, state_info::XSENS_ACC2),
        xsens_yaw: get_f32(payload, state_info::XSENS_YAW),
        rate_of_turn: get_f32(payload, state_info::RATE_OF_TURN),
        wheel_speeds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::RobotPose;

    const TOLERANCE: f32 = 1e-5;

    fn assert_close(actual: f32, expected: f32) {
        assert!((actual - expected).abs() < TOLERANCE, "expected {expected}, got {actual}");
    }

    #[test]
    fn chip_command_for_robot_three_is_packed_bit_exact() {
        let cmd = RobotCommand {
            id: 3,
            kick_type: KickType::Chip,
            kick_speed: 4.0,
            velocity: Vector2::new(1.0, 0.0),
            ..Default::default()
        };
        let payload = encode_command(&cmd, None, Team::Yellow).unwrap();

        assert_eq!(payload[command::HEADER], PacketType::RobotCommand as u8);
        assert_eq!(payload[command::VERSION], PROTOCOL_VERSION);
        assert_eq!(payload[command::ID], 3);
        let flags = CommandFlags::from_bits_truncate(payload[command::FLAGS]);
        assert!(flags.contains(CommandFlags::DoChip));
        assert!(!flags.contains(CommandFlags::DoKick));
        assert!(flags.contains(CommandFlags::DoForce));
        assert!(!flags.contains(CommandFlags::UseCameraAngle));
        assert_close(get_f32(&payload, command::KICK_CHIP_POWER), 4.0);
        assert_close(get_f32(&payload, command::RHO), 1.0);
        assert_close(get_f32(&payload, command::THETA), 0.0);
    }

    #[test]
    fn kick_bits_are_clear_without_kick_speed() {
        let cmd = RobotCommand { id: 1, kick_type: KickType::Kick, kick_speed: 0.0, ..Default::default() };
        let payload = encode_command(&cmd, None, Team::Blue).unwrap();
        let flags = CommandFlags::from_bits_truncate(payload[command::FLAGS]);
        assert!(!flags.intersects(CommandFlags::DoKick | CommandFlags::DoChip));
        assert_eq!(get_f32(&payload, command::KICK_CHIP_POWER), 0.0);
    }

    #[test]
    fn wait_for_ball_clears_force_bit() {
        let cmd = RobotCommand { id: 1, wait_for_ball: true, ..Default::default() };
        let payload = encode_command(&cmd, None, Team::Blue).unwrap();
        assert!(!CommandFlags::from_bits_truncate(payload[command::FLAGS]).contains(CommandFlags::DoForce));
    }

    #[test]
    fn decoded_command_keeps_kick_dribbler_and_velocity() {
        let cases = [
            (KickType::Kick, 2.5, 0.3, Vector2::new(0.5, -1.5)),
            (KickType::Chip, 6.5, 1.0, Vector2::new(-2.0, 0.25)),
            (KickType::None, 0.0, 0.0, Vector2::new(0.0, 0.0)),
        ];
        for id in [0u8, 7, (MAX_ROBOTS - 1) as u8] {
            for (kick_type, kick_speed, dribbler_speed, velocity) in cases {
                let cmd = RobotCommand { id, kick_type, kick_speed, dribbler_speed, velocity, ..Default::default() };
                let decoded = decode_command(&encode_command(&cmd, None, Team::Blue).unwrap()).unwrap();
                assert_eq!(decoded.id, id);
                assert_eq!(decoded.kick_type, kick_type);
                assert_close(decoded.kick_speed, kick_speed);
                assert_close(decoded.dribbler_speed, dribbler_speed);
                assert_close(decoded.velocity.x, velocity.x);
                assert_close(decoded.velocity.y, velocity.y);
            }
        }
    }

    #[test]
    fn angular_control_selects_meaning_of_angle_field() {
        let cmd = RobotCommand {
            id: 4,
            use_angular_velocity: true,
            target_angle: 1.0,
            target_angular_velocity: -3.0,
            ..Default::default()
        };
        let payload = encode_command(&cmd, None, Team::Blue).unwrap();
        assert_close(get_f32(&payload, command::ANGLE), -3.0);
        let decoded = decode_command(&payload).unwrap();
        assert!(decoded.use_angular_velocity);
        assert_close(decoded.target_angular_velocity, -3.0);
    }

    #[test]
    fn camera_angle_falls_back_to_world_yaw_of_own_team() {
        let world = WorldSnapshot {
            blue: vec![RobotPose { id: 5, position: Vector2::default(), yaw: 0.75 }],
            yellow: vec![RobotPose { id: 5, position: Vector2::default(), yaw: -0.5 }],
        };
        let cmd = RobotCommand { id: 5, ..Default::default() };

        let decoded = decode_command(&encode_command(&cmd, Some(&world), Team::Yellow).unwrap()).unwrap();
        assert_eq!(decoded.camera_angle, Some(-0.5));

        let explicit = RobotCommand { camera_angle: Some(0.1), ..cmd.clone() };
        let decoded = decode_command(&encode_command(&explicit, Some(&world), Team::Blue).unwrap()).unwrap();
        assert_eq!(decoded.camera_angle, Some(0.1));

        let unseen = RobotCommand { id: 6, ..cmd };
        let decoded = decode_command(&encode_command(&unseen, Some(&world), Team::Blue).unwrap()).unwrap();
        assert_eq!(decoded.camera_angle, None);
    }

    #[test]
    fn out_of_range_id_is_not_encoded() {
        let cmd = RobotCommand { id: MAX_ROBOTS as u8, ..Default::default() };
        assert!(matches!(encode_command(&cmd, None, Team::Blue), Err(CodecError::RobotIdOutOfRange(16))));
    }

    #[test]
    fn feedback_is_decoded_from_raw_bytes() {
        let mut payload = [0u8; ROBOT_FEEDBACK_SIZE];
        payload[feedback::HEADER] = PacketType::RobotFeedback as u8;
        payload[feedback::ID] = 9;
        payload[feedback::FLAGS] = (FeedbackFlags::HasBall | FeedbackFlags::CapacitorCharged).bits();
        payload[feedback::WHEEL_LOCKED] = 0b0100;
        payload[feedback::RSSI] = (-42i8) as u8;
        put_f32(&mut payload, feedback::RHO, 2.0);
        put_f32(&mut payload, feedback::THETA, std::f32::consts::FRAC_PI_2);
        put_f32(&mut payload, feedback::BATTERY_LEVEL, 23.5);

        let fb = decode_feedback(&payload, Team::Blue).unwrap();
        assert_eq!(fb.id, 9);
        assert_eq!(fb.team, Team::Blue);
        assert_eq!(fb.source, FeedbackSource::Basestation);
        assert!(fb.has_ball);
        assert!(fb.capacitor_charged);
        assert!(!fb.ball_sensor_working);
        assert!(fb.wheel_locked);
        assert!(!fb.wheel_braking);
        assert_eq!(fb.signal_strength, -42);
        assert_close(fb.velocity.x, 0.0);
        assert_close(fb.velocity.y, 2.0);
        assert_close(fb.battery_level, 23.5);
    }

    #[test]
    fn encoded_feedback_decodes_to_same_record() {
        let mut fb = RobotFeedback::empty(2, Team::Yellow, FeedbackSource::Basestation);
        fb.has_ball = true;
        fb.xsens_calibrated = true;
        fb.wheel_braking = true;
        fb.angle = 1.25;
        fb.signal_strength = -70;
        let decoded = decode_feedback(&encode_feedback(&fb).unwrap(), Team::Yellow).unwrap();
        assert_eq!(decoded, fb);
    }

    #[test]
    fn short_feedback_is_rejected() {
        let payload = [PacketType::RobotFeedback as u8, 1, 0];
        assert!(matches!(
            decode_feedback(&payload, Team::Blue),
            Err(CodecError::TooShort { expected: ROBOT_FEEDBACK_SIZE, actual: 3, .. })
        ));
    }

    #[test]
    fn feedback_with_invalid_id_is_rejected() {
        let mut payload = [0u8; ROBOT_FEEDBACK_SIZE];
        payload[feedback::HEADER] = PacketType::RobotFeedback as u8;
        payload[feedback::ID] = 200;
        assert!(matches!(decode_feedback(&payload, Team::Blue), Err(CodecError::RobotIdOutOfRange(200))));
    }

    #[test]
    fn state_info_wheel_speeds_are_decoded_in_order() {
        let mut payload = [0u8; ROBOT_STATE_INFO_SIZE];
        payload[state_info::HEADER] = PacketType::RobotStateInfo as u8;
        payload[state_info::ID] = 11;
        put_f32(&mut payload, state_info::XSENS_YAW, 0.5);
        for i in 0..4 {
            put_f32(&mut payload, state_info::WHEEL_SPEEDS + i * 4, i as f32 + 1.0);
        }
        let info = decode_state_info(&payload, Team::Yellow).unwrap();
        assert_eq!(info.id, 11);
        assert_eq!(info.xsens_yaw, 0.5);
        assert_eq!(info.wheel_speeds, [1.0, 2.0, 3.0, 4.0]);
    }
}
