//! CAN通信タスク
//!
//! 自デバイス宛てのコマンドフレームを解釈・実行し、フィードバックを返します。

use embassy_stm32::can;
use embassy_time::Delay;
use embedded_can::{Id, StandardId};
use foc_engine::can_protocol::{can_ids, parse_command};
use foc_engine::Servo;

use crate::current_sensor::AdcCurrentSensor;
use crate::encoder::Mt6825Encoder;
use crate::flash_storage::FlashStorage;
use crate::fmt::*;
use crate::motor_driver::PwmDriver;

pub type BoardServo = Servo<'static, PwmDriver, Mt6825Encoder, AdcCurrentSensor, FlashStorage>;

/// CAN通信タスク - コマンド処理とフィードバック送信
#[embassy_executor::task]
pub async fn can_task(can: can::Can<'static>, mut servo: BoardServo) {
    let (mut tx, mut rx, _properties) = can.split();

    info!(
        "CAN servo task started: command id 0x{:03X}",
        can_ids::command_id(servo.device_id())
    );

    loop {
        let envelope = match rx.read().await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("CAN receive error: {:?}", e);
                continue;
            }
        };
        let frame = envelope.frame;

        let Id::Standard(std_id) = frame.header().id() else {
            continue;
        };
        if can_ids::device_of_command(std_id.as_raw()) != Some(servo.device_id()) {
            continue;
        }
        let Some(command) = parse_command(frame.data()) else {
            continue;
        };

        // 校正中はエグゼキュータを占有する（制御割り込みは継続）
        if let Err(e) = servo.execute(command, &mut Delay) {
            warn!("Command failed: {:?}", e);
        }

        // ID変更後は新しいIDで応答する
        let data = servo.feedback();
        if let Some(id) = StandardId::new(can_ids::feedback_id(servo.device_id())) {
            if let Ok(frame) = can::frame::Frame::new_data(id, &data) {
                let _ = tx.write(&frame).await;
            }
        }
    }
}
