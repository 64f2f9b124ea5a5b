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

use thiserror::Error;
use crate::definitions::{RobotFeedback, RobotStateInfo, Team};

pub mod layout;
pub mod packing;

pub use layout::PacketType;
pub use packing::{decode_command, decode_feedback, decode_state_info, encode_command, encode_feedback};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload is empty")]
    Empty,

    #[error("Data is too short to parse {name}: expected {expected}, got {actual} bytes")]
    TooShort {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unexpected packet type: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedPacketType { expected: u8, actual: u8 },

    #[error("Unknown packet type {0:#04x}")]
    UnknownPacketType(u8),

    #[error("Protocol version {0} not supported")]
    UnsupportedVersion(u8),

    #[error("Robot id {0} out of range")]
    RobotIdOutOfRange(u8),
}

/// One bulk transfer received from the basestation of `team`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasestationFrame {
    pub team: Team,
    pub payload: Vec<u8>,
}

impl BasestationFrame {
    pub fn new(team: Team, payload: Vec<u8>) -> Self {
        Self { team, payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn header(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// A frame after demultiplexing on its type header.
#[derive(Debug, Clone, PartialEq)]
pub enum BasestationMessage {
    Feedback(RobotFeedback),
    StateInfo(RobotStateInfo),
}

pub fn parse_frame(frame: &BasestationFrame) -> Result<BasestationMessage, CodecError> {
    let header = frame.header().ok_or(CodecError::Empty)?;
    match PacketType::try_from(header) {
        Ok(PacketType::RobotFeedback) => Ok(BasestationMessage::Feedback(decode_feedback(&frame.payload, frame.team)?)),
        Ok(PacketType::RobotStateInfo) => {
            Ok(BasestationMessage::StateInfo(decode_state_info(&frame.payload, frame.team)?))
        }
        // commands only travel towards the basestation
        Ok(PacketType::RobotCommand) | Err(_) => Err(CodecError::UnknownPacketType(header)),
    }
}
