//! Field-oriented control engine for a permanent-magnet BLDC motor.
//!
//! The crate holds everything between the hardware drivers and the command
//! link: the current/speed/angle cascade, guided self-calibration, the
//! anti-cogging table and the fixed-offset calibration record. Hardware is
//! reached only through the traits in [`hardware`], so the whole engine runs
//! on the host under `cargo test`.

#![cfg_attr(not(test), no_std)]

// マクロを他のモジュールから見えるように最初に宣言する
mod fmt;

pub mod can_protocol;
pub mod config;
pub mod foc;
pub mod hardware;
pub mod servo;
pub mod state;

pub use config::{FocConfig, Limits, PidGains};
pub use foc::{CalibrationError, ControlMode, Foc, Status};
pub use hardware::{CurrentSensor, Driver, Encoder, Filter, Storage, StorageError};
pub use servo::Servo;
pub use state::ControllerCell;
