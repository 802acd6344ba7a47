//! 校正レコードの永続化レイアウト
//!
//! 固定オフセットのレコード形式。先頭のマジックバイトが正しい場合のみ
//! ステータスバイトを信用し、各グループはステータスの対応ビットが
//! 立っているときだけ有効とみなします。数値はリトルエンディアン。

use super::{Limits, PidGains, Tuning};
use crate::hardware::{Storage, StorageError};

/// マジックバイト
pub const RECORD_MAGIC: u8 = 0xAA;

/// ストレージ領域のサイズ（10KB）
pub const REGION_SIZE: usize = 0x2800;

/// 各フィールドのバイトオフセット
pub mod offsets {
    pub const MAGIC: usize = 0x000;
    pub const STATUS: usize = 0x010;

    // === 基本校正 ===
    pub const ENCODER_DIRECTION: usize = 0x100;
    pub const ZERO_ELECTRICAL_ANGLE: usize = 0x110;
    pub const IU_OFFSET: usize = 0x120;
    pub const IV_OFFSET: usize = 0x130;
    pub const PHASE_RESISTANCE: usize = 0x140;
    pub const PHASE_INDUCTANCE: usize = 0x150;

    // === PIDパラメータ ===
    pub const SPEED_KP: usize = 0x210;
    pub const SPEED_KI: usize = 0x220;
    pub const SPEED_KD: usize = 0x230;
    pub const ANGLE_KP: usize = 0x240;
    pub const ANGLE_KI: usize = 0x250;
    pub const ANGLE_KD: usize = 0x260;

    // === 出力制限 ===
    pub const SPEED_LIMIT: usize = 0x300;
    pub const CURRENT_LIMIT: usize = 0x310;

    pub const DEVICE_ID: usize = 0x400;
    pub const ZERO_POSITION: usize = 0x500;
    pub const ANTICOGGING_TABLE: usize = 0x800;
}

/// レコードのフィールドグループ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordGroup {
    Base,
    Anticogging,
    Pid,
    Limits,
    DeviceId,
    ZeroPosition,
}

impl RecordGroup {
    pub const fn bit(self) -> u8 {
        match self {
            RecordGroup::Base => 0x01,
            RecordGroup::Anticogging => 0x02,
            RecordGroup::Pid => 0x04,
            RecordGroup::Limits => 0x08,
            RecordGroup::DeviceId => 0x10,
            RecordGroup::ZeroPosition => 0x20,
        }
    }
}

/// ステータスビットフィールド
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageStatus(u8);

impl StorageStatus {
    /// 有効なグループなし
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, group: RecordGroup) -> bool {
        self.0 & group.bit() != 0
    }

    pub const fn with(self, group: RecordGroup) -> Self {
        Self(self.0 | group.bit())
    }
}

/// 基本校正の結果
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaseCalibration {
    /// センサの回転方向がq軸正方向と一致するか
    pub encoder_direction: bool,
    /// 電気角ゼロ点 [rad]
    pub zero_electrical_angle: f32,
    /// U相電流オフセット [A]
    pub iu_offset: f32,
    /// V相電流オフセット [A]
    pub iv_offset: f32,
    /// 相抵抗 [Ω]
    pub phase_resistance: f32,
    /// 相インダクタンス [H]（予約）
    pub phase_inductance: f32,
}

impl BaseCalibration {
    pub const fn new() -> Self {
        Self {
            encoder_direction: true,
            zero_electrical_angle: 0.0,
            iu_offset: 0.0,
            iv_offset: 0.0,
            phase_resistance: 0.0,
            phase_inductance: 0.0,
        }
    }
}

impl Default for BaseCalibration {
    fn default() -> Self {
        Self::new()
    }
}

/// 補正テーブルを分割して読み書きするときの区間長
pub const COGGING_CHUNK: usize = 64;

/// 固定レイアウトでストレージを読み書きするラッパ
pub struct RecordStore<S> {
    storage: S,
}

impl<S> RecordStore<S> {
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }
}

impl<S: Storage> RecordStore<S> {
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    /// 有効なグループの一覧（マジック不一致なら空）
    pub fn status(&mut self) -> Result<StorageStatus, StorageError> {
        if self.read_u8(offsets::MAGIC)? != RECORD_MAGIC {
            return Ok(StorageStatus::EMPTY);
        }
        Ok(StorageStatus::from_bits(self.read_u8(offsets::STATUS)?))
    }

    /// グループを書き込み、ステータスビットをOR結合で立てる
    ///
    /// マジックが無い場合はステータスを空にしてからマジックを書き込む。
    fn commit(
        &mut self,
        group: RecordGroup,
        write: impl FnOnce(&mut Self) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let status = if self.read_u8(offsets::MAGIC)? == RECORD_MAGIC {
            StorageStatus::from_bits(self.read_u8(offsets::STATUS)?)
        } else {
            self.write_u8(offsets::STATUS, StorageStatus::EMPTY.bits())?;
            self.write_u8(offsets::MAGIC, RECORD_MAGIC)?;
            StorageStatus::EMPTY
        };
        write(self)?;
        self.write_u8(offsets::STATUS, status.with(group).bits())?;
        self.storage.flush()
    }

    pub fn store_base(&mut self, base: &BaseCalibration) -> Result<(), StorageError> {
        self.commit(RecordGroup::Base, |rs| {
            rs.write_u8(offsets::ENCODER_DIRECTION, base.encoder_direction as u8)?;
            rs.write_f32(offsets::ZERO_ELECTRICAL_ANGLE, base.zero_electrical_angle)?;
            rs.write_f32(offsets::IU_OFFSET, base.iu_offset)?;
            rs.write_f32(offsets::IV_OFFSET, base.iv_offset)?;
            rs.write_f32(offsets::PHASE_RESISTANCE, base.phase_resistance)?;
            rs.write_f32(offsets::PHASE_INDUCTANCE, base.phase_inductance)
        })
    }

    /// 基本校正を読み込む（無効なら `None`）
    pub fn load_base(&mut self) -> Result<Option<BaseCalibration>, StorageError> {
        if !self.status()?.contains(RecordGroup::Base) {
            return Ok(None);
        }
        Ok(Some(BaseCalibration {
            encoder_direction: self.read_u8(offsets::ENCODER_DIRECTION)? != 0,
            zero_electrical_angle: self.read_f32(offsets::ZERO_ELECTRICAL_ANGLE)?,
            iu_offset: self.read_f32(offsets::IU_OFFSET)?,
            iv_offset: self.read_f32(offsets::IV_OFFSET)?,
            phase_resistance: self.read_f32(offsets::PHASE_RESISTANCE)?,
            phase_inductance: self.read_f32(offsets::PHASE_INDUCTANCE)?,
        }))
    }

    pub fn store_tuning(&mut self, tuning: &Tuning) -> Result<(), StorageError> {
        self.commit(RecordGroup::Pid, |rs| {
            rs.write_f32(offsets::SPEED_KP, tuning.speed.kp)?;
            rs.write_f32(offsets::SPEED_KI, tuning.speed.ki)?;
            rs.write_f32(offsets::SPEED_KD, tuning.speed.kd)?;
            rs.write_f32(offsets::ANGLE_KP, tuning.angle.kp)?;
            rs.write_f32(offsets::ANGLE_KI, tuning.angle.ki)?;
            rs.write_f32(offsets::ANGLE_KD, tuning.angle.kd)
        })
    }

    pub fn load_tuning(&mut self) -> Result<Option<Tuning>, StorageError> {
        if !self.status()?.contains(RecordGroup::Pid) {
            return Ok(None);
        }
        Ok(Some(Tuning {
            speed: PidGains::new(
                self.read_f32(offsets::SPEED_KP)?,
                self.read_f32(offsets::SPEED_KI)?,
                self.read_f32(offsets::SPEED_KD)?,
            ),
            angle: PidGains::new(
                self.read_f32(offsets::ANGLE_KP)?,
                self.read_f32(offsets::ANGLE_KI)?,
                self.read_f32(offsets::ANGLE_KD)?,
            ),
        }))
    }

    pub fn store_limits(&mut self, limits: &Limits) -> Result<(), StorageError> {
        self.commit(RecordGroup::Limits, |rs| {
            rs.write_f32(offsets::SPEED_LIMIT, limits.speed)?;
            rs.write_f32(offsets::CURRENT_LIMIT, limits.current)
        })
    }

    pub fn load_limits(&mut self) -> Result<Option<Limits>, StorageError> {
        if !self.status()?.contains(RecordGroup::Limits) {
            return Ok(None);
        }
        Ok(Some(Limits {
            speed: self.read_f32(offsets::SPEED_LIMIT)?,
            current: self.read_f32(offsets::CURRENT_LIMIT)?,
        }))
    }

    pub fn store_device_id(&mut self, id: u8) -> Result<(), StorageError> {
        self.commit(RecordGroup::DeviceId, |rs| rs.write_u8(offsets::DEVICE_ID, id))
    }

    pub fn load_device_id(&mut self) -> Result<Option<u8>, StorageError> {
        if !self.status()?.contains(RecordGroup::DeviceId) {
            return Ok(None);
        }
        self.read_u8(offsets::DEVICE_ID).map(Some)
    }

    pub fn store_zero_position(&mut self, position: f32) -> Result<(), StorageError> {
        self.commit(RecordGroup::ZeroPosition, |rs| {
            rs.write_f32(offsets::ZERO_POSITION, position)
        })
    }

    pub fn load_zero_position(&mut self) -> Result<Option<f32>, StorageError> {
        if !self.status()?.contains(RecordGroup::ZeroPosition) {
            return Ok(None);
        }
        self.read_f32(offsets::ZERO_POSITION).map(Some)
    }

    pub fn store_cogging_table(&mut self, table: &[f32]) -> Result<(), StorageError> {
        self.store_cogging_table_with(table.len(), |start, chunk| {
            chunk.copy_from_slice(&table[start..start + chunk.len()]);
        })
    }

    /// 補正テーブルを `COGGING_CHUNK` 個ずつ書き込む
    ///
    /// `fill(start, chunk)` が `start` から始まる区間の値を埋める。
    /// 呼び出し側はテーブル全体をコピーせずに済む。
    pub fn store_cogging_table_with(
        &mut self,
        len: usize,
        mut fill: impl FnMut(usize, &mut [f32]),
    ) -> Result<(), StorageError> {
        self.commit(RecordGroup::Anticogging, |rs| {
            let mut buf = [0.0f32; COGGING_CHUNK];
            for start in (0..len).step_by(COGGING_CHUNK) {
                let chunk = &mut buf[..COGGING_CHUNK.min(len - start)];
                fill(start, chunk);
                for (i, value) in chunk.iter().enumerate() {
                    rs.write_f32(offsets::ANTICOGGING_TABLE + 4 * (start + i), *value)?;
                }
            }
            Ok(())
        })
    }

    /// 補正テーブルを読み込む。無効なら `table` は変更せず `false`
    pub fn load_cogging_table(&mut self, table: &mut [f32]) -> Result<bool, StorageError> {
        self.load_cogging_table_with(table.len(), |start, chunk| {
            table[start..start + chunk.len()].copy_from_slice(chunk);
        })
    }

    /// 補正テーブルを `COGGING_CHUNK` 個ずつ読み出して `apply(start, chunk)` に渡す
    pub fn load_cogging_table_with(
        &mut self,
        len: usize,
        mut apply: impl FnMut(usize, &[f32]),
    ) -> Result<bool, StorageError> {
        if !self.status()?.contains(RecordGroup::Anticogging) {
            return Ok(false);
        }
        let mut buf = [0.0f32; COGGING_CHUNK];
        for start in (0..len).step_by(COGGING_CHUNK) {
            let chunk = &mut buf[..COGGING_CHUNK.min(len - start)];
            for (i, value) in chunk.iter_mut().enumerate() {
                *value = self.read_f32(offsets::ANTICOGGING_TABLE + 4 * (start + i))?;
            }
            apply(start, chunk);
        }
        Ok(true)
    }

    fn read_u8(&mut self, address: usize) -> Result<u8, StorageError> {
        let mut buf = [0u8; 1];
        self.read(address, &mut buf)?;
        Ok(buf[0])
    }

    fn write_u8(&mut self, address: usize, value: u8) -> Result<(), StorageError> {
        self.write(address, &[value])
    }

    fn read_f32(&mut self, address: usize) -> Result<f32, StorageError> {
        let mut buf = [0u8; 4];
        self.read(address, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn write_f32(&mut self, address: usize, value: f32) -> Result<(), StorageError> {
        self.write(address, &value.to_le_bytes())
    }

    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_range(address, buf.len())?;
        self.storage.read(address, buf)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError> {
        check_range(address, data.len())?;
        self.storage.write(address, data)
    }
}

fn check_range(address: usize, len: usize) -> Result<(), StorageError> {
    match address.checked_add(len) {
        Some(end) if end <= REGION_SIZE => Ok(()),
        _ => Err(StorageError::OutOfRange),
    }
}

// 補正テーブルが領域に収まることをコンパイル時に検証
const _: () = assert!(
    offsets::ANTICOGGING_TABLE + 4 * super::anticogging::TABLE_LEN <= REGION_SIZE,
    "cogging table exceeds the storage region"
);
