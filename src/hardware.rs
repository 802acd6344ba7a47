//! ハードウェア抽象化モジュール
//!
//! インバータ、角度センサ、電流センサ、不揮発ストレージをトレイトとして定義します。
//! 初期化・有効化の状態はコラボレータ側が持ち、制御エンジンは参照するだけです。

/// 初期化・有効化のライフサイクルを持つデバイス
pub trait Device {
    fn init(&mut self);
    fn enable(&mut self);
    fn disable(&mut self);
    fn is_initialized(&self) -> bool;
    fn is_enabled(&self) -> bool;
}

/// 3相インバータ
pub trait Driver: Device {
    /// 各相の正規化デューティ（0.0〜1.0）を設定
    fn set_duty(&mut self, u: f32, v: f32, w: f32);
}

/// 機械角センサ
pub trait Encoder: Device {
    /// 機械角 [rad]、範囲 [0, 2π)
    fn angle(&mut self) -> f32;
}

/// 相電流センサ
pub trait CurrentSensor: Device {
    /// 最新の相電流 (iu, iv, iw) [A]
    fn phase_currents(&mut self) -> (f32, f32, f32);
}

/// ストレージ操作のエラー型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// 領域外アクセス
    OutOfRange,
    /// 読み込みエラー
    Read,
    /// 書き込み（消去・プログラム）エラー
    Write,
    /// 別の処理がレコードを使用中
    Busy,
}

/// バイトアドレスの固定サイズ不揮発領域
pub trait Storage {
    fn init(&mut self) -> Result<(), StorageError>;
    fn is_initialized(&self) -> bool;
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError>;
    /// バッファ済みの書き込みを確定する
    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// 状態を持つ1入力1出力フィルタ
pub trait Filter {
    fn sample(&mut self, x: f32) -> f32;
}

impl<T: Device + ?Sized> Device for &mut T {
    fn init(&mut self) {
        (**self).init()
    }
    fn enable(&mut self) {
        (**self).enable()
    }
    fn disable(&mut self) {
        (**self).disable()
    }
    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }
    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }
}

impl<T: Driver + ?Sized> Driver for &mut T {
    fn set_duty(&mut self, u: f32, v: f32, w: f32) {
        (**self).set_duty(u, v, w)
    }
}

impl<T: Encoder + ?Sized> Encoder for &mut T {
    fn angle(&mut self) -> f32 {
        (**self).angle()
    }
}

impl<T: CurrentSensor + ?Sized> CurrentSensor for &mut T {
    fn phase_currents(&mut self) -> (f32, f32, f32) {
        (**self).phase_currents()
    }
}

impl<T: Storage + ?Sized> Storage for &mut T {
    fn init(&mut self) -> Result<(), StorageError> {
        (**self).init()
    }
    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(address, buf)
    }
    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(address, data)
    }
    fn flush(&mut self) -> Result<(), StorageError> {
        (**self).flush()
    }
}

impl<T: Filter + ?Sized> Filter for &mut T {
    fn sample(&mut self, x: f32) -> f32 {
        (**self).sample(x)
    }
}
