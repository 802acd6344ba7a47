//! MT6825 磁気エンコーダ（SPI1）
//!
//! 18ビット絶対角。角度レジスタ0x03から3バイトを連続読み出しします。
//!
//! ## ハードウェア構成
//! - SPI1 (PA5/PA6/PA7)、モード3
//! - CS: PA4（アクティブLow）

use core::f32::consts::TAU;

use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::Spi;
use foc_engine::hardware::Device;
use foc_engine::Encoder;

use crate::fmt::*;

/// 角度レジスタ読み出しコマンド（読み出しビット | アドレス0x03）
const READ_ANGLE: u8 = 0x83;

/// 1回転あたりのカウント数（2^18）
const COUNTS_PER_REV: f32 = 262_144.0;

pub struct Mt6825Encoder {
    spi: Spi<'static, Blocking>,
    cs: Output<'static>,
    initialized: bool,
    enabled: bool,
    last_angle: f32,
}

impl Mt6825Encoder {
    pub fn new(spi: Spi<'static, Blocking>, cs: Output<'static>) -> Self {
        Self {
            spi,
            cs,
            initialized: false,
            enabled: false,
            last_angle: 0.0,
        }
    }

    fn read_raw(&mut self) -> Option<u32> {
        let mut buf = [READ_ANGLE, 0x00, 0x00, 0x00];
        self.cs.set_low();
        let result = self.spi.blocking_transfer_in_place(&mut buf);
        self.cs.set_high();
        result.ok()?;

        let raw = ((buf[1] as u32) << 10) | (((buf[2] & 0xFC) as u32) << 2) | ((buf[3] >> 4) as u32);
        Some(raw)
    }
}

impl Device for Mt6825Encoder {
    fn init(&mut self) {
        self.cs.set_high();
        match self.read_raw() {
            Some(raw) => info!("MT6825 initialized: raw={}", raw),
            None => error!("MT6825 read failed during init"),
        }
        self.initialized = true;
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Encoder for Mt6825Encoder {
    fn angle(&mut self) -> f32 {
        // 通信失敗時は直前値を返す
        if let Some(raw) = self.read_raw() {
            self.last_angle = raw as f32 / COUNTS_PER_REV * TAU;
        }
        self.last_angle
    }
}
