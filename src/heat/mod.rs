//! The boundary to the heater manager.
//!
//! The interpreter only sets targets, switches heaters between active and
//! standby and asks whether setpoints have been reached; the PID loop
//! itself runs elsewhere. A simulated implementation with first-order
//! thermal dynamics backs the hosted build and the tests.

use crate::HEATERS;

/// A heater is considered at temperature within this band (degC).
pub const TEMPERATURE_CLOSE_ENOUGH: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidParameters {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub pid_max: f64,
    pub full_band: f64,
}

impl Default for PidParameters {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.1,
            kd: 100.0,
            pid_max: 255.0,
            full_band: 150.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermistorParameters {
    pub r25: f64,
    pub beta: f64,
    pub series_r: f64,
    pub adc_low_offset: f64,
    pub adc_high_offset: f64,
    /// Resistance at infinite temperature, derived from r25 and beta.
    r_inf: f64,
}

impl ThermistorParameters {
    pub fn new(r25: f64, beta: f64, series_r: f64) -> Self {
        let mut params = Self {
            r25,
            beta,
            series_r,
            adc_low_offset: 0.0,
            adc_high_offset: 0.0,
            r_inf: 0.0,
        };
        params.set_r25_and_beta(r25, beta);
        params
    }

    /// R25 and beta must change together so r_inf stays consistent.
    pub fn set_r25_and_beta(&mut self, r25: f64, beta: f64) {
        self.r25 = r25;
        self.beta = beta;
        self.r_inf = r25 * (-beta / 298.15).exp();
    }

    pub fn r_inf(&self) -> f64 {
        self.r_inf
    }
}

impl Default for ThermistorParameters {
    fn default() -> Self {
        Self::new(100_000.0, 3988.0, 4700.0)
    }
}

pub trait Heat {
    fn set_active_temperature(&mut self, heater: usize, t: f64);
    fn active_temperature(&self, heater: usize) -> f64;
    fn set_standby_temperature(&mut self, heater: usize, t: f64);
    fn standby_temperature(&self, heater: usize) -> f64;

    /// Drive the heater toward its active setpoint.
    fn activate(&mut self, heater: usize);
    /// Drop the heater to its standby setpoint.
    fn standby(&mut self, heater: usize);
    /// Turn every heater off. Emergency stop path.
    fn switch_off_all(&mut self);

    fn temperature(&self, heater: usize) -> f64;
    fn heater_at_target(&self, heater: usize) -> bool;

    /// Are all running heaters at their setpoints? When
    /// `wait_when_cooling` is false, heaters above target count as ready.
    fn all_at_targets(&self, wait_when_cooling: bool) -> bool;

    /// Heater has never been brought up (neither active nor standby).
    fn switched_off(&self, heater: usize) -> bool;
    fn reset_fault(&mut self, heater: usize);

    fn pid_parameters(&self, heater: usize) -> PidParameters;
    fn set_pid_parameters(&mut self, heater: usize, params: PidParameters);
    fn thermistor_parameters(&self, heater: usize) -> ThermistorParameters;
    fn set_thermistor_parameters(&mut self, heater: usize, params: ThermistorParameters);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaterState {
    Off,
    Standby,
    Active,
}

struct SimHeater {
    current: f64,
    active_target: f64,
    standby_target: f64,
    state: HeaterState,
    fault: bool,
    pid: PidParameters,
    thermistor: ThermistorParameters,
}

impl SimHeater {
    fn new() -> Self {
        Self {
            current: AMBIENT,
            active_target: 0.0,
            standby_target: 0.0,
            state: HeaterState::Off,
            fault: false,
            pid: PidParameters::default(),
            thermistor: ThermistorParameters::default(),
        }
    }

    fn target(&self) -> f64 {
        match self.state {
            HeaterState::Off => AMBIENT,
            HeaterState::Standby => self.standby_target.max(AMBIENT),
            HeaterState::Active => self.active_target.max(AMBIENT),
        }
    }
}

const AMBIENT: f64 = 20.0;
/// Fraction of the remaining temperature error closed per spin.
const APPROACH_RATE: f64 = 0.25;

/// Simulated heater bank.
pub struct SimHeat {
    heaters: [SimHeater; HEATERS],
}

impl SimHeat {
    pub fn new() -> Self {
        Self {
            heaters: std::array::from_fn(|_| SimHeater::new()),
        }
    }

    /// Advance the thermal simulation one step.
    pub fn spin(&mut self) {
        for heater in &mut self.heaters {
            if heater.fault {
                continue;
            }
            let target = heater.target();
            heater.current += (target - heater.current) * APPROACH_RATE;
        }
    }

    /// Jump a heater straight to a temperature. Test hook.
    pub fn force_temperature(&mut self, heater: usize, t: f64) {
        self.heaters[heater].current = t;
    }

    pub fn set_fault(&mut self, heater: usize) {
        self.heaters[heater].fault = true;
    }

    pub fn has_fault(&self, heater: usize) -> bool {
        self.heaters[heater].fault
    }
}

impl Default for SimHeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heat for SimHeat {
    fn set_active_temperature(&mut self, heater: usize, t: f64) {
        self.heaters[heater].active_target = t;
    }

    fn active_temperature(&self, heater: usize) -> f64 {
        self.heaters[heater].active_target
    }

    fn set_standby_temperature(&mut self, heater: usize, t: f64) {
        self.heaters[heater].standby_target = t;
    }

    fn standby_temperature(&self, heater: usize) -> f64 {
        self.heaters[heater].standby_target
    }

    fn activate(&mut self, heater: usize) {
        self.heaters[heater].state = HeaterState::Active;
    }

    fn standby(&mut self, heater: usize) {
        self.heaters[heater].state = HeaterState::Standby;
    }

    fn switch_off_all(&mut self) {
        for heater in &mut self.heaters {
            heater.state = HeaterState::Off;
            heater.active_target = 0.0;
            heater.standby_target = 0.0;
        }
    }

    fn temperature(&self, heater: usize) -> f64 {
        self.heaters[heater].current
    }

    fn heater_at_target(&self, heater: usize) -> bool {
        let h = &self.heaters[heater];
        (h.current - h.target()).abs() <= TEMPERATURE_CLOSE_ENOUGH
    }

    fn all_at_targets(&self, wait_when_cooling: bool) -> bool {
        for (index, h) in self.heaters.iter().enumerate() {
            if self.switched_off(index) {
                continue;
            }
            let target = h.target();
            if (h.current - target).abs() <= TEMPERATURE_CLOSE_ENOUGH {
                continue;
            }
            if h.current < target || wait_when_cooling {
                return false;
            }
        }
        true
    }

    fn switched_off(&self, heater: usize) -> bool {
        self.heaters[heater].state == HeaterState::Off
    }

    fn reset_fault(&mut self, heater: usize) {
        if self.heaters[heater].fault {
            tracing::warn!("heater {} fault cleared by operator", heater);
        }
        self.heaters[heater].fault = false;
    }

    fn pid_parameters(&self, heater: usize) -> PidParameters {
        self.heaters[heater].pid
    }

    fn set_pid_parameters(&mut self, heater: usize, params: PidParameters) {
        self.heaters[heater].pid = params;
    }

    fn thermistor_parameters(&self, heater: usize) -> ThermistorParameters {
        self.heaters[heater].thermistor
    }

    fn set_thermistor_parameters(&mut self, heater: usize, params: ThermistorParameters) {
        self.heaters[heater].thermistor = params;
    }
}
