//! FOC制御エンジン本体
//!
//! 2つの割り込みレートで動作します。
//! - 高速（電流）割り込み: 電流変換、角度・速度の更新、d/q電流ループ、相電圧合成
//! - 低速（カスケード）割り込み: 制御モードに応じた角度→速度→電流の目標更新

use core::f32::consts::{PI, TAU};

use super::anticogging::CoggingTable;
use super::filters::LowPass;
use super::pid::{Pid, PidLaw};
use super::transforms::{self, clarke, cossin, park, shortest_delta, wrap_angle};
use super::ControlMode;
use crate::config::{self, BaseCalibration, FocConfig, GainsUpdate, Limits, PidGains, Tuning};
use crate::hardware::{CurrentSensor, Driver, Encoder, Filter};

/// コントローラの状態フラグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub initialized: bool,
    pub enabled: bool,
    pub started: bool,
    pub calibrated: bool,
    /// アンチコギング校正中（`started` なしで閉ループ制御を許可）
    pub anticogging_calibrating: bool,
    pub anticogging_calibrated: bool,
    pub anticogging_enabled: bool,
}

/// 制御エンジンが借用するハードウェア一式
pub struct Hardware<D, E, C> {
    pub driver: D,
    pub encoder: E,
    pub current_sensor: C,
}

/// 測定経路のフィルタ一式
pub struct Filters<F> {
    pub current_q: F,
    pub current_d: F,
    pub speed: F,
}

impl Filters<LowPass> {
    /// 既定のカットオフで一次LPFを構成
    pub fn low_pass(config: &FocConfig) -> Self {
        let ts = 1.0 / config.current_ctrl_frequency;
        Self {
            current_q: LowPass::new(ts, config::current::FILTER_CUTOFF),
            current_d: LowPass::new(ts, config::current::FILTER_CUTOFF),
            speed: LowPass::new(ts, config::speed::FILTER_CUTOFF),
        }
    }
}

/// FOC制御エンジン
pub struct Foc<D, E, C, F = LowPass> {
    pub(super) config: FocConfig,
    pub(super) driver: D,
    pub(super) encoder: E,
    pub(super) sensor: C,
    pub(super) filter_q: F,
    pub(super) filter_d: F,
    pub(super) filter_speed: F,

    pub(super) pid_q: Pid,
    pub(super) pid_d: Pid,
    pub(super) pid_speed: Pid,
    pub(super) pid_angle: Pid,

    pub(super) calibration: BaseCalibration,
    pub(super) cogging: CoggingTable,
    pub(super) status: Status,
    pub(super) mode: ControlMode,
    /// DCバス電圧 [V]
    pub(super) bus_voltage: f32,

    // === 測定値（毎割り込み上書き） ===
    /// 機械角 [rad]
    pub(super) angle: f32,
    pub(super) prev_angle: f32,
    pub(super) electrical_angle: f32,
    /// 回転数 [RPM]
    pub(super) speed: f32,
    pub(super) i_uvw: (f32, f32, f32),
    pub(super) i_alpha_beta: (f32, f32),
    pub(super) iq: f32,
    pub(super) id: f32,
    pub(super) u_dq: (f32, f32),
    pub(super) u_alpha_beta: (f32, f32),
    pub(super) u_uvw: (f32, f32, f32),

    // === 目標値 ===
    pub(super) target_iq: f32,
    /// 低速モードの仮想角度 [rad]
    pub(super) virtual_angle: f32,
    /// 低速モードの指令回転数 [RPM]
    pub(super) low_speed_rpm: f32,
}

impl<D, E, C, F> Foc<D, E, C, F>
where
    D: Driver,
    E: Encoder,
    C: CurrentSensor,
    F: Filter,
{
    /// 新しい制御エンジンを作成
    ///
    /// PIDは既定値で構成され、セルの `init()` で永続化レコードの値に置き換わる。
    pub fn new(config: FocConfig, hardware: Hardware<D, E, C>, filters: Filters<F>) -> Self {
        use crate::config::{angle, current, speed};

        let current_pid = Pid::new(PidLaw::Delta, current::KP, current::KI, current::KD)
            .with_output_limits(current::OUTPUT_LIMIT, -current::OUTPUT_LIMIT);

        Self {
            config,
            driver: hardware.driver,
            encoder: hardware.encoder,
            sensor: hardware.current_sensor,
            filter_q: filters.current_q,
            filter_d: filters.current_d,
            filter_speed: filters.speed,
            pid_q: current_pid.clone(),
            pid_d: current_pid,
            pid_speed: Pid::new(PidLaw::Position, speed::KP, speed::KI, speed::KD)
                .with_integral_limits(speed::INTEGRAL_LIMIT, -speed::INTEGRAL_LIMIT)
                .with_output_limits(speed::OUTPUT_LIMIT, -speed::OUTPUT_LIMIT),
            pid_angle: Pid::new(PidLaw::Delta, angle::KP, angle::KI, angle::KD)
                .with_output_limits(angle::OUTPUT_LIMIT, -angle::OUTPUT_LIMIT),
            calibration: BaseCalibration::new(),
            cogging: CoggingTable::new(),
            status: Status::default(),
            mode: ControlMode::Current,
            bus_voltage: config.bus_voltage,
            angle: 0.0,
            prev_angle: 0.0,
            electrical_angle: 0.0,
            speed: 0.0,
            i_uvw: (0.0, 0.0, 0.0),
            i_alpha_beta: (0.0, 0.0),
            iq: 0.0,
            id: 0.0,
            u_dq: (0.0, 0.0),
            u_alpha_beta: (0.0, 0.0),
            u_uvw: (0.5, 0.5, 0.5),
            target_iq: 0.0,
            virtual_angle: 0.0,
            low_speed_rpm: 0.0,
        }
    }

    /// ハードウェアを初期化する
    pub(super) fn init_hardware(&mut self) {
        if !self.driver.is_initialized() {
            self.driver.init();
        }
        if !self.encoder.is_initialized() {
            self.encoder.init();
        }
        if !self.sensor.is_initialized() {
            self.sensor.init();
        }
        self.status.initialized = true;
    }

    /// 読み込んだ基本校正を適用する
    pub(super) fn apply_base(&mut self, base: BaseCalibration) {
        self.calibration = base;
        self.status.calibrated = true;
    }

    /// 出力段を有効化（初期化済みのときのみ）
    pub fn enable(&mut self) {
        if !self.status.initialized {
            warn!("Enable refused: not initialized");
            return;
        }
        if !self.driver.is_enabled() {
            self.driver.enable();
            self.driver.set_duty(0.0, 0.0, 0.0);
        }
        if !self.encoder.is_enabled() {
            self.encoder.enable();
        }
        if !self.sensor.is_enabled() {
            self.sensor.enable();
        }
        self.status.enabled = true;
        info!("FOC enabled");
    }

    /// 出力段を無効化
    pub fn disable(&mut self) {
        if self.driver.is_enabled() {
            self.driver.set_duty(0.0, 0.0, 0.0);
            self.driver.disable();
        }
        if self.encoder.is_enabled() {
            self.encoder.disable();
        }
        if self.sensor.is_enabled() {
            self.sensor.disable();
        }
        self.status.enabled = false;
        self.status.started = false;
        info!("FOC disabled");
    }

    /// 閉ループ制御を開始（有効化かつ校正済みのときのみ）
    pub fn start(&mut self) {
        if !(self.status.enabled && self.status.calibrated) {
            warn!(
                "Start refused: enabled={}, calibrated={}",
                self.status.enabled,
                self.status.calibrated
            );
            return;
        }
        self.reset_pids();
        self.status.started = true;
        info!("FOC started");
    }

    /// 全ループの積分・前回値を捨てる
    pub(super) fn reset_pids(&mut self) {
        self.pid_q.reset();
        self.pid_d.reset();
        self.pid_speed.reset();
        self.pid_angle.reset();
    }

    pub fn stop(&mut self) {
        self.status.started = false;
        info!("FOC stopped");
    }

    /// 制御モードと目標値を設定
    ///
    /// 速度目標は角度ループの出力制限で、電流目標は速度ループの出力制限で
    /// クランプされる。
    pub fn ctrl(&mut self, mode: ControlMode, value: f32) {
        match mode {
            ControlMode::Angle => self.pid_angle.set_target(value),
            ControlMode::StepAngle => {
                let base = if self.mode.uses_angle_loop() {
                    self.pid_angle.target()
                } else {
                    self.angle
                };
                self.pid_angle.set_target(base + value);
            }
            ControlMode::LowSpeed => {
                if self.mode != ControlMode::LowSpeed {
                    self.virtual_angle = self.angle;
                    self.pid_angle.set_target(self.virtual_angle);
                }
                self.low_speed_rpm = self.pid_angle.clamp_output(value);
            }
            ControlMode::Speed => {
                let value = self.pid_angle.clamp_output(value);
                self.pid_speed.set_target(value);
            }
            ControlMode::Current => {
                self.target_iq = self.pid_speed.clamp_output(value);
            }
        }
        self.mode = mode;
    }

    /// 高速（電流ループ）割り込み処理
    pub fn current_loop_tick(&mut self) {
        if !self.status.enabled || !self.status.calibrated {
            return;
        }

        // 1. 電流変換（オフセット補正）
        let (iu, iv, iw) = self.sensor.phase_currents();
        let cal = self.calibration;
        self.update_current(
            iu - cal.iu_offset,
            iv - cal.iv_offset,
            iw + cal.iu_offset + cal.iv_offset,
        );

        // 2. 角度
        let raw = self.encoder.angle();
        self.angle = self.mechanical_angle(raw);
        self.electrical_angle = wrap_angle(self.angle * self.config.pole_pairs as f32);

        // 3. 回転数 [RPM]
        let delta = shortest_delta(self.angle, self.prev_angle);
        self.speed = self
            .filter_speed
            .sample(delta * 60.0 * self.config.current_ctrl_frequency / TAU);
        self.prev_angle = self.angle;

        // 4. 電流ループ
        let (ud, uq) = if self.status.started || self.status.anticogging_calibrating {
            (self.pid_d.compute(self.id), self.pid_q.compute(self.iq))
        } else {
            (0.0, 0.0)
        };
        self.set_phase_voltage(ud, uq, self.electrical_angle);
    }

    /// 低速（カスケード）割り込み処理
    pub fn cascade_tick(&mut self) {
        if !self.status.started && !self.status.anticogging_calibrating {
            return;
        }

        if self.mode == ControlMode::LowSpeed {
            let step = self.low_speed_rpm * TAU / 60.0 / self.config.ctrl_frequency;
            self.virtual_angle = wrap_angle(self.virtual_angle + step);
            self.pid_angle.set_target(self.virtual_angle);
        }

        if self.mode.uses_angle_loop() {
            // 目標が現在角から半周以上離れたら1周ずらして近い向きに回す
            let target = self.pid_angle.target();
            if target - self.angle > PI {
                self.pid_angle.set_target(target - TAU);
            } else if target - self.angle < -PI {
                self.pid_angle.set_target(target + TAU);
            }
            let speed_target = self.pid_angle.compute(self.angle);
            self.pid_speed.set_target(speed_target);
        }

        if self.mode.uses_speed_loop() {
            self.target_iq = self.pid_speed.compute(self.speed);
        }

        let compensation = if self.status.anticogging_enabled && self.status.anticogging_calibrated
        {
            self.cogging.nearest(self.angle)
        } else {
            0.0
        };
        self.pid_q.set_target(self.target_iq + compensation);
    }

    /// 相電流からd/q電流を更新
    pub(super) fn update_current(&mut self, iu: f32, iv: f32, iw: f32) {
        self.i_uvw = (iu, iv, iw);
        let (i_alpha, i_beta) = clarke(iu, iv);
        self.i_alpha_beta = (i_alpha, i_beta);

        let (cos_theta, sin_theta) = cossin(self.electrical_angle);
        let (id, iq) = park(i_alpha, i_beta, cos_theta, sin_theta);
        self.iq = self.filter_q.sample(iq);
        self.id = self.filter_d.sample(id);
    }

    /// 正規化d/q電圧を相デューティとしてインバータへ出力
    pub(super) fn set_phase_voltage(&mut self, ud: f32, uq: f32, electrical_angle: f32) {
        let (u_dq, u_alpha_beta, (u, v, w)) = transforms::synthesize(ud, uq, electrical_angle);
        self.u_dq = u_dq;
        self.u_alpha_beta = u_alpha_beta;
        self.u_uvw = (u, v, w);
        self.driver.set_duty(u, v, w);
    }

    /// センサ生値を向き・ゼロ点補正済みの機械角に変換
    pub(super) fn mechanical_angle(&self, raw: f32) -> f32 {
        let angle = if self.calibration.encoder_direction {
            raw + self.calibration.zero_electrical_angle
        } else {
            TAU - raw + self.calibration.zero_electrical_angle
        };
        wrap_angle(angle)
    }

    /// バス電圧の変化に合わせて電流ループのゲインを補正
    pub fn update_bus_voltage(&mut self, voltage: f32) {
        if voltage == 0.0 || !voltage.is_finite() {
            return;
        }
        let ratio = self.bus_voltage / voltage;
        for pid in [&mut self.pid_q, &mut self.pid_d] {
            pid.set_kp(pid.kp() * ratio);
            pid.set_ki(pid.ki() * ratio);
        }
        self.bus_voltage = voltage;
    }

    /// 速度・角度ループのゲインを部分更新
    pub fn set_pid(&mut self, speed: GainsUpdate, angle: GainsUpdate) {
        apply_gains(&mut self.pid_speed, speed);
        apply_gains(&mut self.pid_angle, angle);
    }

    /// 対称出力制限を部分更新
    ///
    /// # Arguments
    /// * `speed_limit` - 角度ループの出力制限 [RPM]
    /// * `current_limit` - 速度ループの出力制限 [A]
    pub fn set_limits(&mut self, speed_limit: Option<f32>, current_limit: Option<f32>) {
        if let Some(limit) = speed_limit {
            self.pid_angle.set_output_limits(limit, -limit);
        }
        if let Some(limit) = current_limit {
            self.pid_speed.set_output_limits(limit, -limit);
        }
    }

    /// 電流ループのゲイン（バス電圧補正後）
    pub fn current_gains(&self) -> PidGains {
        gains_of(&self.pid_q)
    }

    pub fn tuning(&self) -> Tuning {
        Tuning {
            speed: gains_of(&self.pid_speed),
            angle: gains_of(&self.pid_angle),
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            speed: self.pid_angle.output_limits().0,
            current: self.pid_speed.output_limits().0,
        }
    }

    pub fn set_anticogging_enabled(&mut self, enabled: bool) {
        self.status.anticogging_enabled = enabled;
    }

    /// Q軸電流（フィルタ後）[A]
    pub fn current(&self) -> f32 {
        self.iq
    }

    /// D軸電流（フィルタ後）[A]
    pub fn id(&self) -> f32 {
        self.id
    }

    /// 回転数 [RPM]
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// 機械角 [rad]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn electrical_angle(&self) -> f32 {
        self.electrical_angle
    }

    pub fn bus_voltage(&self) -> f32 {
        self.bus_voltage
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// カスケードが電流ループへ渡す目標（補正前）[A]
    pub fn target_current(&self) -> f32 {
        self.target_iq
    }

    /// 電流ループのq軸目標（コギング補正込み）[A]
    pub fn current_setpoint(&self) -> f32 {
        self.pid_q.target()
    }

    pub fn angle_target(&self) -> f32 {
        self.pid_angle.target()
    }

    pub fn speed_target(&self) -> f32 {
        self.pid_speed.target()
    }

    pub fn phase_currents(&self) -> (f32, f32, f32) {
        self.i_uvw
    }

    /// 直近の相デューティ
    pub fn phase_voltages(&self) -> (f32, f32, f32) {
        self.u_uvw
    }

    /// 直近のd/q電圧（ヘッドルーム適用後）
    pub fn dq_voltages(&self) -> (f32, f32) {
        self.u_dq
    }

    pub fn calibration(&self) -> &BaseCalibration {
        &self.calibration
    }

    pub fn cogging_table(&self) -> &CoggingTable {
        &self.cogging
    }

    pub fn config(&self) -> &FocConfig {
        &self.config
    }
}

fn apply_gains(pid: &mut Pid, update: GainsUpdate) {
    if let Some(kp) = update.kp {
        pid.set_kp(kp);
    }
    if let Some(ki) = update.ki {
        pid.set_ki(ki);
    }
    if let Some(kd) = update.kd {
        pid.set_kd(kd);
    }
}

fn gains_of(pid: &Pid) -> PidGains {
    PidGains::new(pid.kp(), pid.ki(), pid.kd())
}
