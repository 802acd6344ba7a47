//! 校正レコードの読み込みと保存
//!
//! レコードの入出力はすべてセルのレコード側ロックで行い、制御エンジンのロックは
//! 値のコピーにだけ使います。フラッシュ操作中も制御割り込みは走り続けます。

use super::Foc;
use crate::config::anticogging::TABLE_LEN;
use crate::hardware::{CurrentSensor, Driver, Encoder, Filter, Storage, StorageError};
use crate::state::ControllerCell;

impl<D, E, C, F, S> ControllerCell<Foc<D, E, C, F>, S>
where
    D: Driver,
    E: Encoder,
    C: CurrentSensor,
    F: Filter,
    S: Storage,
{
    /// ハードウェアとストレージを初期化し、永続化レコードを読み込む
    pub fn init(&self) {
        self.lock(|foc| foc.init_hardware());

        let storage_ready = self.with_record(|record| {
            if !record.storage().is_initialized() {
                record.storage_mut().init()?;
            }
            Ok(())
        });
        if let Err(e) = storage_ready {
            error!("Storage init failed: {:?}", e);
        }
        if let Err(e) = self.restore() {
            error!("Failed to load calibration record: {:?}, using defaults", e);
        }

        let (pole_pairs, calibrated) =
            self.lock(|foc| (foc.config.pole_pairs, foc.status.calibrated));
        info!(
            "FOC initialized: pole pairs={}, calibrated={}",
            pole_pairs,
            calibrated
        );
    }

    /// 永続化レコードから有効なグループを読み込む
    pub fn restore(&self) -> Result<(), StorageError> {
        self.with_record(|record| {
            let status = record.status()?;
            debug!("Record status bits: 0x{:02X}", status.bits());

            if let Some(base) = record.load_base()? {
                info!(
                    "Base calibration loaded: direction={}, zero={}",
                    base.encoder_direction,
                    base.zero_electrical_angle
                );
                self.lock(|foc| foc.apply_base(base));
            }
            let loaded = record.load_cogging_table_with(TABLE_LEN, |start, chunk| {
                self.lock(|foc| {
                    foc.cogging.values_mut()[start..start + chunk.len()].copy_from_slice(chunk)
                });
            })?;
            if loaded {
                info!("Anti-cogging table loaded");
                self.lock(|foc| foc.status.anticogging_calibrated = true);
            }
            if let Some(tuning) = record.load_tuning()? {
                info!("PID parameters loaded");
                self.lock(|foc| foc.set_pid(tuning.speed.into(), tuning.angle.into()));
            }
            if let Some(limits) = record.load_limits()? {
                info!(
                    "Limits loaded: speed={} RPM, current={} A",
                    limits.speed,
                    limits.current
                );
                self.lock(|foc| foc.set_limits(Some(limits.speed), Some(limits.current)));
            }
            Ok(())
        })
    }

    /// 現在のPIDゲインを永続化
    pub fn store_pid(&self) -> Result<(), StorageError> {
        let tuning = self.lock(|foc| foc.tuning());
        self.with_record(|record| record.store_tuning(&tuning))
            .inspect_err(|e| {
                error!("Failed to store PID parameters: {:?}", e);
            })
    }

    /// 現在の出力制限を永続化
    pub fn store_limits(&self) -> Result<(), StorageError> {
        let limits = self.lock(|foc| foc.limits());
        self.with_record(|record| record.store_limits(&limits))
            .inspect_err(|e| {
                error!("Failed to store limits: {:?}", e);
            })
    }

    /// 現在の補正テーブルを区間ごとにコピーしながら永続化
    pub(super) fn store_cogging_table(&self) -> Result<(), StorageError> {
        self.with_record(|record| {
            record.store_cogging_table_with(TABLE_LEN, |start, chunk| {
                self.lock(|foc| {
                    chunk.copy_from_slice(&foc.cogging.values()[start..start + chunk.len()])
                });
            })
        })
    }
}
