//! タスクモジュール
//!
//! 各タスクの実装を分離して管理します。

pub mod can;
pub mod voltage_monitor;

// タスク関数を再エクスポート
pub use can::can_task;
pub use voltage_monitor::voltage_monitor_task;
