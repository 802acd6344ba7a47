// CAN payload codec for servo commands and feedback

use core::f32::consts::TAU;

use crate::foc::Status;

/// CAN message IDs
pub mod can_ids {
    /// Command frame base (opcode u8 + argument i16, 3 bytes)
    pub const COMMAND_BASE: u16 = 0x400;

    /// Feedback frame base (status, error, Iq, speed, angle, 8 bytes)
    pub const FEEDBACK_BASE: u16 = 0x500;

    /// Standard ID a servo listens on
    pub const fn command_id(device_id: u8) -> u16 {
        COMMAND_BASE + device_id as u16
    }

    /// Standard ID a servo answers on
    pub const fn feedback_id(device_id: u8) -> u16 {
        FEEDBACK_BASE + device_id as u16
    }

    /// Device id addressed by a command frame, if the ID belongs to the command range
    pub const fn device_of_command(id: u16) -> Option<u8> {
        if id >= COMMAND_BASE && id <= COMMAND_BASE + u8::MAX as u16 {
            Some((id - COMMAND_BASE) as u8)
        } else {
            None
        }
    }
}

/// Command opcodes (first payload byte)
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const START: u8 = 0x01;
    pub const STOP: u8 = 0x02;
    pub const CURRENT: u8 = 0x03;
    pub const SPEED: u8 = 0x04;
    pub const ANGLE: u8 = 0x05;
    pub const LOW_SPEED: u8 = 0x06;
    pub const CALIBRATE: u8 = 0x07;
    pub const ANTICOGGING_CALIBRATE: u8 = 0x08;
    pub const ANTICOGGING_ENABLE: u8 = 0x09;
    pub const SET_DEVICE_ID: u8 = 0x0A;
    pub const STORE_PID: u8 = 0x0B;
    pub const STORE_LIMITS: u8 = 0x0C;
    pub const RESTORE: u8 = 0x0D;
}

/// Command payload length
pub const COMMAND_LEN: usize = 3;

/// Feedback payload length
pub const FEEDBACK_LEN: usize = 8;

/// Full scale of the current argument and feedback [A]
pub const CURRENT_FULL_SCALE: f32 = 10.0;

/// Full scale of the speed arguments [rpm]
pub const SPEED_FULL_SCALE: f32 = 1000.0;

/// Full scale of the speed feedback [rpm]
pub const SPEED_FEEDBACK_FULL_SCALE: f32 = 5000.0;

/// Feedback status bits
pub mod status_bits {
    pub const STARTED: u8 = 1 << 0;
    pub const ANTICOGGING_CALIBRATING: u8 = 1 << 1;
    pub const CALIBRATED: u8 = 1 << 2;
    pub const ANTICOGGING_CALIBRATED: u8 = 1 << 3;
    pub const ANTICOGGING_ENABLED: u8 = 1 << 4;
}

/// Decoded servo command
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Only request a feedback frame
    Nop,
    Start,
    Stop,
    /// Q-axis current target [A]
    Current(f32),
    /// Speed target [rpm]
    Speed(f32),
    /// Angle target [rad]
    Angle(f32),
    /// Low-speed virtual-angle tracking [rpm]
    LowSpeed(f32),
    Calibrate,
    AnticoggingCalibrate,
    SetAnticogging(bool),
    SetDeviceId(u8),
    StorePid,
    StoreLimits,
    Restore,
}

/// Live values carried by a feedback frame
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Feedback {
    /// Status bits, see [`status_bits`]
    pub status: u8,
    /// Reserved error code
    pub error: u8,
    /// Q-axis current [A]
    pub current: f32,
    /// Speed [rpm]
    pub speed: f32,
    /// Angle [rad]
    pub angle: f32,
}

impl Feedback {
    pub fn is_started(&self) -> bool {
        self.status & status_bits::STARTED != 0
    }

    pub fn is_calibrated(&self) -> bool {
        self.status & status_bits::CALIBRATED != 0
    }
}

/// Pack the controller flags into the feedback status byte
pub fn status_byte(status: &Status) -> u8 {
    let mut bits = 0;
    if status.started {
        bits |= status_bits::STARTED;
    }
    if status.anticogging_calibrating {
        bits |= status_bits::ANTICOGGING_CALIBRATING;
    }
    if status.calibrated {
        bits |= status_bits::CALIBRATED;
    }
    if status.anticogging_calibrated {
        bits |= status_bits::ANTICOGGING_CALIBRATED;
    }
    if status.anticogging_enabled {
        bits |= status_bits::ANTICOGGING_ENABLED;
    }
    bits
}

/// Parse a command payload
///
/// # Arguments
/// * `data` - CAN frame data (at least 3 bytes: opcode, i16 LE argument)
///
/// # Returns
/// * `Some(command)` if parsing successful
/// * `None` if data length is incorrect or the opcode is unknown
pub fn parse_command(data: &[u8]) -> Option<Command> {
    if data.len() < COMMAND_LEN {
        error!("Command: invalid data length {}", data.len());
        return None;
    }

    let raw = [data[1], data[2]];
    let signed = i16::from_le_bytes(raw) as f32 / i16::MAX as f32;

    let command = match data[0] {
        opcodes::NOP => Command::Nop,
        opcodes::START => Command::Start,
        opcodes::STOP => Command::Stop,
        opcodes::CURRENT => Command::Current(signed * CURRENT_FULL_SCALE),
        opcodes::SPEED => Command::Speed(signed * SPEED_FULL_SCALE),
        opcodes::ANGLE => {
            let turns = u16::from_le_bytes(raw) as f32 / u16::MAX as f32;
            Command::Angle(turns * TAU)
        }
        opcodes::LOW_SPEED => Command::LowSpeed(signed * SPEED_FULL_SCALE),
        opcodes::CALIBRATE => Command::Calibrate,
        opcodes::ANTICOGGING_CALIBRATE => Command::AnticoggingCalibrate,
        opcodes::ANTICOGGING_ENABLE => Command::SetAnticogging(raw != [0, 0]),
        opcodes::SET_DEVICE_ID => Command::SetDeviceId(raw[0]),
        opcodes::STORE_PID => Command::StorePid,
        opcodes::STORE_LIMITS => Command::StoreLimits,
        opcodes::RESTORE => Command::Restore,
        op => {
            warn!("Command: unknown opcode {:#x}", op);
            return None;
        }
    };

    debug!("Command received: {:?}", command);
    Some(command)
}

/// Encode a command payload (host side)
///
/// Arguments outside the full scale saturate.
pub fn encode_command(command: &Command) -> [u8; COMMAND_LEN] {
    let (op, arg) = match *command {
        Command::Nop => (opcodes::NOP, [0, 0]),
        Command::Start => (opcodes::START, [0, 0]),
        Command::Stop => (opcodes::STOP, [0, 0]),
        Command::Current(a) => (opcodes::CURRENT, to_i16(a / CURRENT_FULL_SCALE)),
        Command::Speed(rpm) => (opcodes::SPEED, to_i16(rpm / SPEED_FULL_SCALE)),
        Command::Angle(rad) => (opcodes::ANGLE, to_u16(rad / TAU)),
        Command::LowSpeed(rpm) => (opcodes::LOW_SPEED, to_i16(rpm / SPEED_FULL_SCALE)),
        Command::Calibrate => (opcodes::CALIBRATE, [0, 0]),
        Command::AnticoggingCalibrate => (opcodes::ANTICOGGING_CALIBRATE, [0, 0]),
        Command::SetAnticogging(on) => (opcodes::ANTICOGGING_ENABLE, [on as u8, 0]),
        Command::SetDeviceId(id) => (opcodes::SET_DEVICE_ID, [id, 0]),
        Command::StorePid => (opcodes::STORE_PID, [0, 0]),
        Command::StoreLimits => (opcodes::STORE_LIMITS, [0, 0]),
        Command::Restore => (opcodes::RESTORE, [0, 0]),
    };
    [op, arg[0], arg[1]]
}

/// Encode a feedback payload
///
/// # Arguments
/// * `status` - Controller flags
/// * `current` - Filtered Q-axis current [A]
/// * `speed` - Filtered speed [rpm]
/// * `angle` - Output angle [rad], expected in [0, 2π)
pub fn encode_feedback(status: &Status, current: f32, speed: f32, angle: f32) -> [u8; FEEDBACK_LEN] {
    let mut data = [0u8; FEEDBACK_LEN];
    data[0] = status_byte(status);
    // 1: error code (reserved)
    data[2..4].copy_from_slice(&to_i16(current / CURRENT_FULL_SCALE));
    data[4..6].copy_from_slice(&to_i16(speed / SPEED_FEEDBACK_FULL_SCALE));
    data[6..8].copy_from_slice(&to_u16(angle / TAU));
    data
}

/// Parse a feedback payload (host side)
pub fn parse_feedback(data: &[u8]) -> Option<Feedback> {
    if data.len() < FEEDBACK_LEN {
        error!("Feedback: invalid data length {}", data.len());
        return None;
    }

    let current = i16::from_le_bytes([data[2], data[3]]) as f32 / i16::MAX as f32;
    let speed = i16::from_le_bytes([data[4], data[5]]) as f32 / i16::MAX as f32;
    let angle = u16::from_le_bytes([data[6], data[7]]) as f32 / u16::MAX as f32;

    Some(Feedback {
        status: data[0],
        error: data[1],
        current: current * CURRENT_FULL_SCALE,
        speed: speed * SPEED_FEEDBACK_FULL_SCALE,
        angle: angle * TAU,
    })
}

// `as` saturates float-to-int casts and maps NaN to 0
fn to_i16(ratio: f32) -> [u8; 2] {
    ((ratio * i16::MAX as f32) as i16).to_le_bytes()
}

fn to_u16(ratio: f32) -> [u8; 2] {
    ((ratio * u16::MAX as f32) as u16).to_le_bytes()
}
