//! 割り込み間で共有する制御エンジンのセル
//!
//! 制御エンジンへの可変アクセスはクリティカルセクション内でのみ許可します。
//! 高速・低速の2つの割り込みは `current_loop_isr()` / `cascade_isr()` から入り、
//! 校正手順はスレッドモードから短いロックと待ち時間を交互に繰り返して進みます。
//!
//! 校正レコード（フラッシュ）は制御エンジンとは別のミューテックスで保護します。
//! フラッシュの消去・書き込みはクリティカルセクションの外で行い、
//! その間も制御割り込みは止まりません。

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::mutex::Mutex as RecordMutex;

use crate::config::RecordStore;
use crate::foc::Foc;
use crate::hardware::{CurrentSensor, Driver, Encoder, Filter, StorageError};

/// クリティカルセクションで保護された共有セルと、その校正レコード
pub struct ControllerCell<T, S> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<T>>,
    record: RecordMutex<CriticalSectionRawMutex, RecordStore<S>>,
}

impl<T, S> ControllerCell<T, S> {
    pub const fn new(value: T, storage: S) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
            record: RecordMutex::new(RecordStore::new(storage)),
        }
    }

    /// 排他アクセス。クロージャ内で同じセルを再ロックしてはならない
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// 校正レコードへの排他アクセス。割り込みは禁止しない
    ///
    /// クロージャ内で `lock()` を呼んで制御エンジンの値を短時間だけ読み書きできる。
    /// 他の処理がレコードを使用中なら `StorageError::Busy` を返す。
    pub fn with_record<R>(
        &self,
        f: impl FnOnce(&mut RecordStore<S>) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut record = self.record.try_lock().map_err(|_| StorageError::Busy)?;
        f(&mut record)
    }

    pub fn into_parts(self) -> (T, RecordStore<S>) {
        (
            self.inner.into_inner().into_inner(),
            self.record.into_inner(),
        )
    }
}

impl<D, E, C, F, S> ControllerCell<Foc<D, E, C, F>, S>
where
    D: Driver,
    E: Encoder,
    C: CurrentSensor,
    F: Filter,
{
    /// 電流ループ割り込みのエントリ
    #[inline]
    pub fn current_loop_isr(&self) {
        self.lock(|foc| foc.current_loop_tick());
    }

    /// カスケード割り込みのエントリ
    #[inline]
    pub fn cascade_isr(&self) {
        self.lock(|foc| foc.cascade_tick());
    }
}
