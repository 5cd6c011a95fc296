//! Machine parameter state and small host services.
//!
//! Everything the interpreter may read or reconfigure about the machine
//! lives here: axis geometry, kinematic limits, drive power state, the
//! Z probe, network identity and the reply dialect. The step generators,
//! ADCs and pins behind these numbers are the host's concern.

use crate::config::Config;
use crate::{AXES, DRIVES};

pub const FIRMWARE_NAME: &str = "Kiln-RS";
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ELECTRONICS: &str = "hosted";

/// Reply dialect emulated on the serial channel, selected by M555.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Me,
    ReprapFirmware,
    Marlin,
    Teacup,
    Sprinter,
    Repetier,
}

impl Compatibility {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Compatibility::ReprapFirmware,
            2 => Compatibility::Marlin,
            3 => Compatibility::Teacup,
            4 => Compatibility::Sprinter,
            5 => Compatibility::Repetier,
            _ => Compatibility::Me,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "marlin" => Compatibility::Marlin,
            "teacup" => Compatibility::Teacup,
            "sprinter" => Compatibility::Sprinter,
            "repetier" => Compatibility::Repetier,
            "reprapfirmware" => Compatibility::ReprapFirmware,
            _ => Compatibility::Me,
        }
    }

    /// Both native variants format replies identically.
    pub fn is_native(self) -> bool {
        matches!(self, Compatibility::Me | Compatibility::ReprapFirmware)
    }
}

/// Monotonic time source, in seconds. A seam so tests can drive dwells
/// without sleeping.
pub trait Clock: Send {
    fn now(&self) -> f64;
}

pub struct MonotonicClock {
    start: std::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZProbeParameters {
    pub height: f64,
    pub adc_value: i32,
    pub calib_temperature: f64,
    pub temperature_coefficient: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkSettings {
    pub ip_address: [u8; 4],
    pub net_mask: [u8; 4],
    pub gateway: [u8; 4],
    pub mac_address: [u8; 6],
    pub machine_name: String,
    pub password: String,
}

pub struct Platform {
    axis_minima: [f64; AXES],
    axis_maxima: [f64; AXES],
    home_feedrates: [f64; AXES],
    max_feedrates: [f64; DRIVES],
    accelerations: [f64; DRIVES],
    instant_dv: [f64; DRIVES],
    steps_per_unit: [f64; DRIVES],
    motor_currents: [f64; DRIVES],
    drive_enabled: [bool; DRIVES],
    must_home_xy_before_z: bool,
    atx_power: bool,
    fan_speed: f64,
    z_probe: ZProbeParameters,
    z_probe_type: i32,
    z_probe_reading: i32,
    pub network: NetworkSettings,
    emulating: Compatibility,
    debug_level: i64,
    message_indent: usize,
    reset_requested: bool,
    clock: Box<dyn Clock>,
}

impl Platform {
    pub fn new(config: &Config, clock: Box<dyn Clock>) -> Self {
        Self {
            axis_minima: config.axes.minima,
            axis_maxima: config.axes.maxima,
            home_feedrates: config.axes.home_feedrates,
            max_feedrates: config.drives.max_feedrates,
            accelerations: config.drives.accelerations,
            instant_dv: config.drives.instant_dv,
            steps_per_unit: config.drives.steps_per_mm,
            motor_currents: config.drives.motor_currents,
            drive_enabled: [false; DRIVES],
            must_home_xy_before_z: config.machine.must_home_xy_before_z,
            atx_power: false,
            fan_speed: 0.0,
            z_probe: ZProbeParameters {
                height: config.z_probe.height,
                adc_value: config.z_probe.adc_value,
                calib_temperature: 0.0,
                temperature_coefficient: 0.0,
            },
            z_probe_type: config.z_probe.probe_type,
            z_probe_reading: 0,
            network: NetworkSettings {
                machine_name: config.machine.name.clone(),
                ..NetworkSettings::default()
            },
            emulating: Compatibility::from_name(&config.console.dialect),
            debug_level: 0,
            message_indent: 0,
            reset_requested: false,
            clock,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock.now()
    }

    pub fn axis_minimum(&self, axis: usize) -> f64 {
        self.axis_minima[axis]
    }

    pub fn set_axis_minimum(&mut self, axis: usize, value: f64) {
        self.axis_minima[axis] = value;
    }

    pub fn axis_maximum(&self, axis: usize) -> f64 {
        self.axis_maxima[axis]
    }

    pub fn set_axis_maximum(&mut self, axis: usize, value: f64) {
        self.axis_maxima[axis] = value;
    }

    pub fn axis_total_length(&self, axis: usize) -> f64 {
        self.axis_maxima[axis] - self.axis_minima[axis]
    }

    pub fn home_feedrate(&self, axis: usize) -> f64 {
        self.home_feedrates[axis]
    }

    pub fn set_home_feedrate(&mut self, axis: usize, value: f64) {
        self.home_feedrates[axis] = value;
    }

    pub fn max_feedrate(&self, drive: usize) -> f64 {
        self.max_feedrates[drive]
    }

    pub fn set_max_feedrate(&mut self, drive: usize, value: f64) {
        self.max_feedrates[drive] = value;
    }

    pub fn acceleration(&self, drive: usize) -> f64 {
        self.accelerations[drive]
    }

    pub fn set_acceleration(&mut self, drive: usize, value: f64) {
        self.accelerations[drive] = value;
    }

    pub fn instant_dv(&self, drive: usize) -> f64 {
        self.instant_dv[drive]
    }

    pub fn set_instant_dv(&mut self, drive: usize, value: f64) {
        self.instant_dv[drive] = value;
    }

    /// Drive with the smallest instantaneous speed change; a null move at
    /// this rate is effectively stationary.
    pub fn slowest_drive(&self) -> usize {
        let mut slowest = 0;
        for drive in 1..DRIVES {
            if self.instant_dv[drive] < self.instant_dv[slowest] {
                slowest = drive;
            }
        }
        slowest
    }

    pub fn drive_steps_per_unit(&self, drive: usize) -> f64 {
        self.steps_per_unit[drive]
    }

    pub fn set_drive_steps_per_unit(&mut self, drive: usize, value: f64) {
        self.steps_per_unit[drive] = value;
    }

    pub fn motor_current(&self, drive: usize) -> f64 {
        self.motor_currents[drive]
    }

    pub fn set_motor_current(&mut self, drive: usize, value: f64) {
        tracing::debug!("drive {} motor current set to {} mA", drive, value);
        self.motor_currents[drive] = value;
    }

    pub fn enable_drive(&mut self, drive: usize) {
        self.drive_enabled[drive] = true;
    }

    pub fn disable_drive(&mut self, drive: usize) {
        self.drive_enabled[drive] = false;
    }

    pub fn drive_enabled(&self, drive: usize) -> bool {
        self.drive_enabled[drive]
    }

    pub fn must_home_xy_before_z(&self) -> bool {
        self.must_home_xy_before_z
    }

    pub fn set_atx_power(&mut self, on: bool) {
        tracing::info!("ATX power {}", if on { "on" } else { "off" });
        self.atx_power = on;
    }

    pub fn atx_power(&self) -> bool {
        self.atx_power
    }

    /// Cooling fan power on the 0..255 scale G-code uses.
    pub fn set_fan_speed(&mut self, value: f64) {
        self.fan_speed = value.clamp(0.0, 255.0);
    }

    pub fn fan_speed(&self) -> f64 {
        self.fan_speed
    }

    pub fn z_probe_parameters(&self) -> ZProbeParameters {
        self.z_probe
    }

    pub fn set_z_probe_parameters(&mut self, params: ZProbeParameters) {
        self.z_probe = params;
    }

    pub fn z_probe_type(&self) -> i32 {
        self.z_probe_type
    }

    pub fn set_z_probe_type(&mut self, probe_type: i32) {
        self.z_probe_type = probe_type;
    }

    /// Current probe reading. On real hardware this is a filtered ADC
    /// value; the host feeds it in.
    pub fn z_probe(&self) -> i32 {
        self.z_probe_reading
    }

    pub fn set_z_probe_reading(&mut self, value: i32) {
        self.z_probe_reading = value;
    }

    pub fn emulating(&self) -> Compatibility {
        self.emulating
    }

    pub fn set_emulating(&mut self, c: Compatibility) {
        self.emulating = c;
    }

    pub fn debug_level(&self) -> i64 {
        self.debug_level
    }

    pub fn set_debug(&mut self, level: i64) {
        tracing::info!("debug level set to {}", level);
        self.debug_level = level;
    }

    /// Macro nesting depth, mirrored into log output so nested macro
    /// chatter reads indented.
    pub fn push_message_indent(&mut self) {
        self.message_indent += 1;
    }

    pub fn pop_message_indent(&mut self) {
        self.message_indent = self.message_indent.saturating_sub(1);
    }

    pub fn message_indent(&self) -> usize {
        self.message_indent
    }

    /// Request a firmware restart. The hosted build cannot reboot a
    /// board, so the main loop observes the flag and exits.
    pub fn software_reset(&mut self) {
        tracing::warn!("software reset requested");
        self.reset_requested = true;
    }

    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "{} {} ({}), dialect {:?}, debug {}",
            FIRMWARE_NAME, FIRMWARE_VERSION, ELECTRONICS, self.emulating, self.debug_level
        )
    }

    pub fn diagnostic_test(&mut self, test: i64) {
        tracing::info!("diagnostic test {} requested", test);
    }
}

/// Manually advanced clock for deterministic dwell tests.
#[derive(Clone, Default)]
pub struct TestClock {
    now: std::sync::Arc<std::sync::Mutex<f64>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now += seconds;
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> f64 {
        self.now.lock().map(|now| *now).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn platform() -> Platform {
        Platform::new(&Config::default(), Box::new(MonotonicClock::new()))
    }

    #[test]
    fn slowest_drive_is_z_by_default() {
        let p = platform();
        assert_eq!(p.slowest_drive(), crate::Z_AXIS);
    }

    #[test]
    fn compatibility_codes() {
        assert_eq!(Compatibility::from_code(2), Compatibility::Marlin);
        assert_eq!(Compatibility::from_code(0), Compatibility::Me);
        assert_eq!(Compatibility::from_code(42), Compatibility::Me);
        assert!(Compatibility::ReprapFirmware.is_native());
        assert!(!Compatibility::Marlin.is_native());
    }

    #[test]
    fn message_indent_never_underflows() {
        let mut p = platform();
        p.pop_message_indent();
        assert_eq!(p.message_indent(), 0);
        p.push_message_indent();
        assert_eq!(p.message_indent(), 1);
    }
}
