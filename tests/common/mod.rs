//! Simulated motor for driving the controller end to end on the host.
//!
//! The plant is a star-connected winding with resistance and inductance, an
//! overdamped rotor (speed proportional to net torque) and an optional
//! sinusoidal cogging torque. The encoder reports the mechanical angle with a
//! configurable sign and offset, and the current sensor adds fixed offsets.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::f64::consts::TAU;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use foc_engine::config::storage::REGION_SIZE;
use foc_engine::config::{BaseCalibration, RecordStore};
use foc_engine::foc::{Filters, Hardware};
use foc_engine::hardware::Device;
use foc_engine::{
    ControllerCell, CurrentSensor, Driver, Encoder, Foc, FocConfig, Storage, StorageError,
};

pub const CURRENT_TICK_NS: u32 = 50_000;
pub const TICKS_PER_CASCADE: u32 = 20;

#[derive(Debug, Clone)]
pub struct Plant {
    pub resistance: f64,
    pub inductance: f64,
    pub bus_voltage: f64,
    /// rotor speed per unit of net q-axis current [rad/s/A]
    pub torque_gain: f64,
    pub pole_pairs: u8,
    /// electrical angle at mechanical angle zero [rad]
    pub electrical_offset: f64,
    /// +1.0 or -1.0
    pub encoder_sign: f64,
    pub encoder_offset: f64,
    pub iu_offset: f64,
    pub iv_offset: f64,
    /// cogging torque expressed as an equivalent q-axis current [A]
    pub cogging_amplitude: f64,
    pub cogging_periods: f64,

    /// mechanical angle, not wrapped [rad]
    pub theta: f64,
    i_alpha: f64,
    i_beta: f64,
    duty: (f32, f32, f32),
}

impl Plant {
    pub fn new(pole_pairs: u8) -> Self {
        Self {
            resistance: 5.0,
            inductance: 2e-3,
            bus_voltage: 24.0,
            torque_gain: 31.4,
            pole_pairs,
            electrical_offset: 1.1,
            encoder_sign: 1.0,
            encoder_offset: 2.3,
            iu_offset: 0.05,
            iv_offset: -0.03,
            cogging_amplitude: 0.0,
            cogging_periods: 12.0,
            theta: 0.4,
            i_alpha: 0.0,
            i_beta: 0.0,
            duty: (0.5, 0.5, 0.5),
        }
    }

    pub fn electrical_angle(&self) -> f64 {
        (self.theta * self.pole_pairs as f64 + self.electrical_offset).rem_euclid(TAU)
    }

    pub fn encoder_angle(&self) -> f64 {
        (self.encoder_sign * self.theta + self.encoder_offset).rem_euclid(TAU)
    }

    /// true phase currents (iu, iv, iw)
    pub fn currents(&self) -> (f64, f64, f64) {
        let iu = self.i_alpha;
        let iv = (-self.i_alpha + 3f64.sqrt() * self.i_beta) / 2.0;
        (iu, iv, -iu - iv)
    }

    pub fn q_current(&self) -> f64 {
        let theta_e = self.electrical_angle();
        self.i_beta * theta_e.cos() - self.i_alpha * theta_e.sin()
    }

    pub fn step(&mut self, dt: f64) {
        let (u, v, w) = (self.duty.0 as f64, self.duty.1 as f64, self.duty.2 as f64);
        let mean = (u + v + w) / 3.0;
        let vu = (u - mean) * self.bus_voltage;
        let vv = (v - mean) * self.bus_voltage;
        let v_alpha = vu;
        let v_beta = (vu + 2.0 * vv) / 3f64.sqrt();

        let decay = (-self.resistance * dt / self.inductance).exp();
        let target_alpha = v_alpha / self.resistance;
        let target_beta = v_beta / self.resistance;
        self.i_alpha = target_alpha + (self.i_alpha - target_alpha) * decay;
        self.i_beta = target_beta + (self.i_beta - target_beta) * decay;

        let cogging = self.cogging_amplitude * (self.cogging_periods * self.theta).sin();
        self.theta += self.torque_gain * (self.q_current() - cogging) * dt;
    }
}

pub type SharedPlant = Rc<RefCell<Plant>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct Lifecycle {
    pub initialized: bool,
    pub enabled: bool,
}

macro_rules! impl_device {
    ($t:ty) => {
        impl Device for $t {
            fn init(&mut self) {
                self.state.initialized = true;
            }
            fn enable(&mut self) {
                self.state.enabled = true;
            }
            fn disable(&mut self) {
                self.state.enabled = false;
            }
            fn is_initialized(&self) -> bool {
                self.state.initialized
            }
            fn is_enabled(&self) -> bool {
                self.state.enabled
            }
        }
    };
}

pub struct SimDriver {
    plant: SharedPlant,
    state: Lifecycle,
}

impl_device!(SimDriver);

impl Driver for SimDriver {
    fn set_duty(&mut self, u: f32, v: f32, w: f32) {
        // a disabled bridge floats the windings
        let duty = if self.state.enabled { (u, v, w) } else { (0.5, 0.5, 0.5) };
        self.plant.borrow_mut().duty = duty;
    }
}

pub struct SimEncoder {
    plant: SharedPlant,
    state: Lifecycle,
}

impl_device!(SimEncoder);

impl Encoder for SimEncoder {
    fn angle(&mut self) -> f32 {
        self.plant.borrow().encoder_angle() as f32
    }
}

pub struct SimCurrentSensor {
    plant: SharedPlant,
    state: Lifecycle,
}

impl_device!(SimCurrentSensor);

impl CurrentSensor for SimCurrentSensor {
    fn phase_currents(&mut self) -> (f32, f32, f32) {
        let plant = self.plant.borrow();
        let (iu, iv, _) = plant.currents();
        let iu = (iu + plant.iu_offset) as f32;
        let iv = (iv + plant.iv_offset) as f32;
        (iu, iv, -iu - iv)
    }
}

pub type WriteHook = Rc<RefCell<Option<Box<dyn FnMut()>>>>;

/// Erased flash is 0xFF; the backing bytes outlive the controller.
#[derive(Clone)]
pub struct RamStorage {
    pub data: Rc<RefCell<Vec<u8>>>,
    pub fail_writes: Rc<RefCell<bool>>,
    /// called at the start of every write
    pub on_write: WriteHook,
    initialized: bool,
}

impl RamStorage {
    pub fn new() -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0xFF; REGION_SIZE])),
            fail_writes: Rc::new(RefCell::new(false)),
            on_write: Rc::new(RefCell::new(None)),
            initialized: false,
        }
    }

    /// Another handle on the same bytes, as seen after a reset
    pub fn reopen(&self) -> Self {
        Self {
            data: self.data.clone(),
            fail_writes: self.fail_writes.clone(),
            on_write: Rc::new(RefCell::new(None)),
            initialized: false,
        }
    }
}

impl Storage for RamStorage {
    fn init(&mut self) -> Result<(), StorageError> {
        self.initialized = true;
        Ok(())
    }
    fn is_initialized(&self) -> bool {
        self.initialized
    }
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let data = self.data.borrow();
        let src = data
            .get(address..address + buf.len())
            .ok_or(StorageError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }
    fn write(&mut self, address: usize, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(hook) = self.on_write.borrow_mut().as_mut() {
            hook();
        }
        if *self.fail_writes.borrow() {
            return Err(StorageError::Write);
        }
        let mut data = self.data.borrow_mut();
        let dst = data
            .get_mut(address..address + bytes.len())
            .ok_or(StorageError::OutOfRange)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }
}

pub type SimFoc = Foc<SimDriver, SimEncoder, SimCurrentSensor>;
pub type SimCell = ControllerCell<SimFoc, RamStorage>;

pub fn sim_config(pole_pairs: u8) -> FocConfig {
    FocConfig {
        pole_pairs,
        ..FocConfig::default()
    }
}

pub fn new_foc(config: FocConfig, plant: &SharedPlant) -> SimFoc {
    let hardware = Hardware {
        driver: SimDriver {
            plant: plant.clone(),
            state: Lifecycle::default(),
        },
        encoder: SimEncoder {
            plant: plant.clone(),
            state: Lifecycle::default(),
        },
        current_sensor: SimCurrentSensor {
            plant: plant.clone(),
            state: Lifecycle::default(),
        },
    };
    Foc::new(config, hardware, Filters::low_pass(&config))
}

/// Controller, plant and storage wired together
pub struct Rig {
    pub plant: SharedPlant,
    pub storage: RamStorage,
    pub cell: Rc<SimCell>,
}

impl Rig {
    pub fn new(config: FocConfig, plant: Plant) -> Self {
        Self::with_storage(config, plant, RamStorage::new())
    }

    /// A fresh controller and plant over this rig's storage, as after a reset
    pub fn restart(&self, config: FocConfig, plant: Plant) -> Self {
        Self::with_storage(config, plant, self.storage.reopen())
    }

    fn with_storage(config: FocConfig, plant: Plant, storage: RamStorage) -> Self {
        let plant = Rc::new(RefCell::new(plant));
        let cell = Rc::new(ControllerCell::new(
            new_foc(config, &plant),
            storage.clone(),
        ));
        Self {
            plant,
            storage,
            cell,
        }
    }

    /// Initialised and enabled, as after power-up
    pub fn powered(config: FocConfig, plant: Plant) -> Self {
        let rig = Self::new(config, plant);
        rig.cell.init();
        rig.cell.lock(|foc| foc.enable());
        rig
    }

    /// Powered up over a record that already matches the plant
    pub fn precalibrated(config: FocConfig, plant: Plant) -> Self {
        let rig = Self::new(config, plant);
        let base = expected_calibration(&rig.plant.borrow());
        let mut store = RecordStore::new(rig.storage.reopen());
        store.store_base(&base).expect("RAM storage write");
        rig.cell.init();
        rig.cell.lock(|foc| foc.enable());
        rig
    }

    pub fn record(&self) -> RecordStore<RamStorage> {
        RecordStore::new(self.storage.reopen())
    }

    pub fn delay(&self) -> SimDelay<'_> {
        SimDelay {
            cell: &self.cell,
            plant: self.plant.clone(),
            pending_ns: 0,
            ticks: 0,
        }
    }

    pub fn run_ms(&self, ms: u32) {
        self.delay().delay_ms(ms);
    }

    /// Fire the current-loop interrupt from inside every storage write.
    ///
    /// Panics on a write made while the controller is locked. Returns the
    /// number of interrupts taken that way.
    pub fn interrupt_during_writes(&self) -> Rc<Cell<u32>> {
        let taken = Rc::new(Cell::new(0));
        let counter = taken.clone();
        let cell = Rc::downgrade(&self.cell);
        *self.storage.on_write.borrow_mut() = Some(Box::new(move || {
            if let Some(cell) = cell.upgrade() {
                cell.current_loop_isr();
                counter.set(counter.get() + 1);
            }
        }));
        taken
    }
}

/// Delay that advances simulated time and fires both interrupt entry points
pub struct SimDelay<'a> {
    cell: &'a SimCell,
    plant: SharedPlant,
    pending_ns: u64,
    ticks: u64,
}

impl DelayNs for SimDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.pending_ns += ns as u64;
        while self.pending_ns >= CURRENT_TICK_NS as u64 {
            self.pending_ns -= CURRENT_TICK_NS as u64;
            self.plant
                .borrow_mut()
                .step(CURRENT_TICK_NS as f64 * 1e-9);
            self.cell.current_loop_isr();
            self.ticks += 1;
            if self.ticks % TICKS_PER_CASCADE as u64 == 0 {
                self.cell.cascade_isr();
            }
        }
    }
}

/// Base record that maps the encoder onto the plant's electrical angle
pub fn expected_calibration(plant: &Plant) -> BaseCalibration {
    let pp = plant.pole_pairs as f64;
    let forward = plant.encoder_sign > 0.0;
    let zero = if forward {
        plant.electrical_offset / pp - plant.encoder_offset
    } else {
        plant.electrical_offset / pp + plant.encoder_offset
    };
    BaseCalibration {
        encoder_direction: forward,
        zero_electrical_angle: zero.rem_euclid(TAU) as f32,
        iu_offset: plant.iu_offset as f32,
        iv_offset: plant.iv_offset as f32,
        phase_resistance: plant.resistance as f32,
        phase_inductance: 0.0,
    }
}

/// Smallest absolute difference between two angles [rad]
pub fn angle_error(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    d.min(TAU - d)
}
