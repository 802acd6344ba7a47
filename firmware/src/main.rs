#![no_std]
#![no_main]

mod current_sensor;
mod encoder;
mod flash_storage;
mod fmt;
mod hardware;
mod motor_driver;
mod state;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel, SampleTime},
    can,
    flash::Flash,
    gpio::{Level, Output, OutputType, Speed},
    spi::{self, Spi},
    time::{khz, mhz},
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
    },
};
use embassy_time::{Duration, Timer};
use foc_engine::foc::{Filters, Hardware};
use foc_engine::{ControllerCell, Foc, FocConfig, Servo};

use current_sensor::AdcCurrentSensor;
use encoder::Mt6825Encoder;
use flash_storage::FlashStorage;
use fmt::*;
use hardware::Irqs;
use motor_driver::PwmDriver;
use state::MOTOR;
use tasks::{can_task, voltage_monitor_task};

/// CANビットレート
const CAN_BITRATE: u32 = 1_000_000;
/// PWM周波数（センターアライン、電流ループ周期と同じ）
const PWM_FREQUENCY_KHZ: u32 = 20;
/// デッドタイム [カウント]
const PWM_DEAD_TIME: u16 = 100;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("═══════════════════════════════════════════════════════════════════");
    info!("");
    info!("    ███████╗ ██████╗  ██████╗    ███████╗███████╗██████╗ ██╗   ██╗ ██████╗ ");
    info!("    ██╔════╝██╔═══██╗██╔════╝    ██╔════╝██╔════╝██╔══██╗██║   ██║██╔═══██╗");
    info!("    █████╗  ██║   ██║██║         ███████╗█████╗  ██████╔╝██║   ██║██║   ██║");
    info!("    ██╔══╝  ██║   ██║██║         ╚════██║██╔══╝  ██╔══██╗╚██╗ ██╔╝██║   ██║");
    info!("    ██║     ╚██████╔╝╚██████╗    ███████║███████╗██║  ██║ ╚████╔╝ ╚██████╔╝");
    info!("    ╚═╝      ╚═════╝  ╚═════╝    ╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝   ╚═════╝ ");
    info!("");
    info!("        FOC Servo Controller • STM32G431VB @ 170MHz");
    info!("");
    info!("═══════════════════════════════════════════════════════════════════");

    // PWM初期化（TIM1、3相相補PWM）
    let mut uvw_pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(p.PE9, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE8, OutputType::PushPull)),
        Some(PwmPin::new(p.PE11, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE10, OutputType::PushPull)),
        Some(PwmPin::new(p.PE13, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE12, OutputType::PushPull)),
        None,
        None,
        khz(PWM_FREQUENCY_KHZ),
        CountingMode::CenterAlignedBothInterrupts,
    );
    uvw_pwm.set_dead_time(PWM_DEAD_TIME);

    // エンコーダ（SPI1、モード3）
    let mut spi_config = spi::Config::default();
    spi_config.frequency = mhz(8);
    spi_config.mode = spi::MODE_3;
    let spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config);
    let cs = Output::new(p.PA4, Level::High, Speed::VeryHigh);

    // ADC初期化（注入変換は電流センサ側で設定する）
    let mut adc1 = Adc::new(p.ADC1);
    adc1.set_sample_time(SampleTime::CYCLES24_5);
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(SampleTime::CYCLES640_5);

    // 制御エンジン
    let foc_config = FocConfig::default();
    let hardware = Hardware {
        driver: PwmDriver::new(uvw_pwm),
        encoder: Mt6825Encoder::new(spi, cs),
        current_sensor: AdcCurrentSensor::new(),
    };
    let foc = Foc::new(foc_config, hardware, Filters::low_pass(&foc_config));
    let storage = FlashStorage::new(Flash::new_blocking(p.FLASH));
    if MOTOR.init(ControllerCell::new(foc, storage)).is_err() {
        error!("Motor already initialized");
    }
    let Some(motor) = MOTOR.try_get() else {
        error!("Motor cell unavailable");
        return;
    };

    // 起動時にレコードを読み込み、ドライバを有効化
    let mut servo = Servo::new(motor);
    servo.init();
    motor.lock(|foc| foc.enable());
    let status = motor.lock(|foc| foc.status());
    info!(
        "Servo ready: id={}, calibrated={}, anticogging={}",
        servo.device_id(),
        status.calibrated,
        status.anticogging_calibrated
    );

    unsafe {
        hardware::init_control_interrupts();
    }
    info!("Control interrupts running (current 20kHz, cascade 1kHz)");

    // 電圧監視タスク起動（PC1 = ADC2_IN7）
    let voltage_pin = p.PC1.degrade_adc();
    if spawner
        .spawn(voltage_monitor_task(adc2, voltage_pin))
        .is_err()
    {
        error!("Failed to spawn voltage monitor task");
    }
    // 電流サンプリングはADC1も注入変換で使うため保持しておく
    let _adc1 = adc1;

    // CAN初期化＆タスク起動
    let mut can_configurator = can::CanConfigurator::new(p.FDCAN1, p.PA11, p.PA12, Irqs);
    can_configurator.properties().set_standard_filter(
        can::filter::StandardFilterSlot::_0,
        can::filter::StandardFilter::accept_all_into_fifo0(),
    );
    can_configurator.set_bitrate(CAN_BITRATE);
    let can = can_configurator.start(can::OperatingMode::NormalOperationMode);
    if spawner.spawn(can_task(can, servo)).is_err() {
        error!("Failed to spawn CAN task");
    }

    loop {
        Timer::after(Duration::from_millis(100)).await;
    }
}
