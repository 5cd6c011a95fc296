//! The G, M and T command tables.

use super::moves::MoveSetup;
use super::{GCodeError, GCodes, SourceId};
use crate::heat::Heat;
use crate::motion::Planner;
use crate::platform::{Compatibility, ELECTRONICS, FIRMWARE_NAME, FIRMWARE_VERSION};
use crate::storage::FileDirectory;
use crate::{
    AXES, AXIS_LETTERS, DRIVES, EXTRUDERS, EXTRUDE_LETTER, HEATERS, HOT_BED, INCH_TO_MM, X_AXIS,
    Y_AXIS,
};

use super::files::{CONFIG_FILE, INDEX_PAGE};

const MINUTES_TO_SECONDS: f64 = 1.0 / 60.0;

impl GCodes {
    pub(crate) fn handle_gcode(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
        heat: &mut dyn Heat,
    ) -> bool {
        let mut reply = String::new();
        let mut error = false;
        let resend = false;
        let mut result = true;

        let code = self.buffer_mut(src).get_ivalue();
        match code {
            // There are no rapid moves; G0 is an ordinary move too.
            0 | 1 => {
                if self.waiting_for_move_to_complete {
                    // The previous setup checks endstops; it must finish
                    // before another move is planned, or a relative move
                    // would start from the wrong place.
                    result = self.all_moves_finished_and_buffer_loaded(mv);
                    if result {
                        self.waiting_for_move_to_complete = false;
                    }
                } else {
                    match self.set_up_move(src, mv) {
                        Ok(MoveSetup::NotReady) => result = false,
                        Ok(MoveSetup::Queued) => result = true,
                        Ok(MoveSetup::QueuedAndWait) => {
                            self.waiting_for_move_to_complete = true;
                            result = false;
                        }
                        Err(e) => {
                            error = true;
                            reply = e.to_string();
                        }
                    }
                }
            }

            4 => result = self.do_dwell(src, mv),

            10 => self.set_offsets(src, &mut reply),

            20 => self.distance_scale = INCH_TO_MM,
            21 => self.distance_scale = 1.0,

            28 => {
                if self.no_home_pending() {
                    self.home_x = self.buffer_mut(src).seen(AXIS_LETTERS[0]);
                    self.home_y = self.buffer_mut(src).seen(AXIS_LETTERS[1]);
                    self.home_z = self.buffer_mut(src).seen(AXIS_LETTERS[2]);
                    if self.no_home_pending() {
                        self.home_x = true;
                        self.home_y = true;
                        self.home_z = true;
                    }
                }
                match self.do_home(src, mv, heat) {
                    Ok(done) => result = done,
                    Err(e) => {
                        error = true;
                        reply = e.to_string();
                    }
                }
            }

            30 => match self.set_single_z_probe_at_a_position(src, mv) {
                Ok(done) => result = done,
                Err(e) => {
                    error = true;
                    reply = e.to_string();
                }
            },

            31 => result = self.set_print_z_probe(src, mv, heat, &mut reply),

            32 => {
                if !(self.axis_is_homed[X_AXIS] && self.axis_is_homed[Y_AXIS]) {
                    reply.push_str("Must home X and Y before bed probing");
                    error = true;
                } else {
                    match self.do_multiple_z_probe(mv) {
                        Ok(done) => result = done,
                        Err(e) => {
                            error = true;
                            reply = e.to_string();
                        }
                    }
                }
            }

            90 => {
                self.drives_relative = false;
                self.axes_relative = false;
            }
            91 => {
                self.drives_relative = true;
                self.axes_relative = true;
            }

            92 => match self.set_positions(src, mv) {
                Ok(done) => result = done,
                Err(e) => {
                    error = true;
                    reply = e.to_string();
                }
            },

            _ => {
                error = true;
                reply = format!("invalid G Code: {}", self.buffer(src).content());
            }
        }

        if result {
            self.handle_reply(src, error, &reply, b'G', code, resend);
        }
        result
    }

    pub(crate) fn handle_mcode(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
        heat: &mut dyn Heat,
    ) -> bool {
        let mut reply = String::new();
        let mut error = false;
        let mut resend = false;
        let mut result = true;

        let code = self.buffer_mut(src).get_ivalue();
        match code {
            // Stop and sleep: park the print, drives off, heaters to standby.
            0 | 1 => {
                if self.file_being_printed.is_some() {
                    self.file_to_print = self.file_being_printed.take();
                }
                if !self.disable_drives(mv) {
                    return false;
                }
                if !self.standby_heaters(mv, heat) {
                    return false;
                }
            }

            18 | 84 => result = self.disable_drives(mv),

            20 => {
                let encapsulate = !self.platform.emulating().is_native();
                match self.storage.list(FileDirectory::GCodes) {
                    Ok(mut names) => {
                        names.sort();
                        if !encapsulate {
                            reply.push_str("GCode files:\n");
                        }
                        if names.is_empty() {
                            reply.push_str("NONE");
                        } else if encapsulate {
                            let quoted: Vec<String> =
                                names.iter().map(|n| format!("\"{}\"", n)).collect();
                            reply.push_str(&quoted.join(","));
                        } else {
                            reply.push_str(&names.join("\n"));
                        }
                    }
                    Err(e) => {
                        error = true;
                        reply = e.to_string();
                    }
                }
            }

            21 => {} // Storage needs no initialisation here.

            23 => {
                let name = self.buffer_mut(src).get_unprecedented_string();
                match self.queue_file_to_print(&name) {
                    Ok(()) => {
                        if self.platform.emulating() == Compatibility::Marlin {
                            reply.push_str("File opened\nFile selected");
                        }
                    }
                    Err(e) => {
                        error = true;
                        reply = e.to_string();
                    }
                }
            }

            24 => {
                if self.file_being_printed.is_none() {
                    self.file_being_printed = self.file_to_print.take();
                    self.buffer_mut(SourceId::File).cancel_pause();
                }
            }

            25 => {
                if self.file_being_printed.is_some() {
                    self.file_to_print = self.file_being_printed.take();
                }
            }

            27 => {
                if self.file_being_printed.is_some() {
                    reply.push_str("SD printing.");
                } else {
                    reply.push_str("Not SD printing.");
                }
            }

            28 => {
                let name = self.buffer_mut(src).get_unprecedented_string();
                match self.open_file_to_write(FileDirectory::GCodes, &name, src) {
                    Ok(()) => reply.push_str(&format!("Writing to file: {}", name)),
                    Err(e) => {
                        error = true;
                        reply = e.to_string();
                    }
                }
            }

            29 => {
                // Normally intercepted by the capture path.
                tracing::warn!("M29 outside a file upload");
            }

            30 => {
                let name = self.buffer_mut(src).get_unprecedented_string();
                if let Err(e) = self.delete_file(&name) {
                    error = true;
                    reply = e.to_string();
                }
            }

            80 | 81 => self.platform.set_atx_power(code == 80),

            82 => {
                self.last_extruder_pos = [0.0; EXTRUDERS];
                self.drives_relative = false;
            }
            83 => {
                self.last_extruder_pos = [0.0; EXTRUDERS];
                self.drives_relative = true;
            }

            85 => {} // Inactivity timer: accepted, nothing to do.

            92 => {
                let mut seen = false;
                for axis in 0..AXES {
                    if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                        let value = self.buffer_mut(src).get_fvalue();
                        self.platform.set_drive_steps_per_unit(axis, value);
                        seen = true;
                    }
                }
                if self.buffer_mut(src).seen(EXTRUDE_LETTER) {
                    seen = true;
                    let mut values = [0.0f64; EXTRUDERS];
                    let count = self.buffer_mut(src).get_float_array(&mut values);
                    if count != EXTRUDERS {
                        tracing::error!(
                            "setting steps/mm - wrong number of E drives: {}",
                            self.buffer(src).content()
                        );
                    } else {
                        for (e, &value) in values.iter().enumerate() {
                            self.platform.set_drive_steps_per_unit(AXES + e, value);
                        }
                    }
                }
                if seen {
                    mv.set_step_hypotenuse();
                } else {
                    reply = self.drive_values_report("Steps/mm", 1.0, |p, d| {
                        p.drive_steps_per_unit(d)
                    });
                }
            }

            98 => {
                if src == SourceId::Macro {
                    error = true;
                    reply = GCodeError::NestedMacro.to_string();
                } else if self.buffer_mut(src).seen(b'P') {
                    let name = self.buffer_mut(src).get_string();
                    match self.do_file_macro(src, &name, mv, heat) {
                        Ok(done) => result = done,
                        Err(e) => {
                            error = true;
                            reply = e.to_string();
                        }
                    }
                }
            }

            99 => result = self.file_macro_return(mv),

            // Set the active temperature of every heater of the current tool.
            104 => {
                if self.buffer_mut(src).seen(b'S') {
                    let temperature = self.buffer_mut(src).get_fvalue();
                    self.set_tool_heaters(heat, temperature);
                }
            }

            105 => {
                reply.push_str("T:");
                for heater in 1..HEATERS {
                    if !heat.switched_off(heater) {
                        reply.push_str(&format!("{:.1} ", heat.temperature(heater)));
                    }
                }
                reply.push_str(&format!("B: {:.1} ", heat.temperature(HOT_BED)));
            }

            106 => {
                if self.buffer_mut(src).seen(b'I') {
                    self.cooling_inverted = self.buffer_mut(src).get_ivalue() > 0;
                }
                if self.buffer_mut(src).seen(b'S') {
                    let f = self.buffer_mut(src).get_fvalue().clamp(0.0, 255.0);
                    if self.cooling_inverted {
                        // Inverted fans may be driven 0..1 or 0..255.
                        let full_scale = if f <= 1.0 { 1.0 } else { 255.0 };
                        self.platform.set_fan_speed(full_scale - f);
                    } else {
                        self.platform.set_fan_speed(f);
                    }
                }
            }

            107 => {
                self.platform
                    .set_fan_speed(if self.cooling_inverted { 255.0 } else { 0.0 });
            }

            109 => {
                if self.buffer_mut(src).seen(b'S') {
                    let temperature = self.buffer_mut(src).get_fvalue();
                    self.set_tool_heaters(heat, temperature);
                }
                result = heat.all_at_targets(false);
            }

            110 => {} // Line numbers are handled by the command buffer.

            111 => {
                if self.buffer_mut(src).seen(b'S') {
                    let level = self.buffer_mut(src).get_ivalue();
                    self.platform.set_debug(level);
                }
            }

            112 => self.emergency_stop(heat),

            114 => reply = self.current_coordinates(mv),

            115 => {
                reply = format!(
                    "FIRMWARE_NAME:{} FIRMWARE_VERSION:{} ELECTRONICS:{}",
                    FIRMWARE_NAME, FIRMWARE_VERSION, ELECTRONICS
                );
            }

            116 => {
                if !self.all_moves_finished_and_buffer_loaded(mv) {
                    return false;
                }
                result = heat.all_at_targets(true);
            }

            119 => reply.push_str("M119 - endstop status not yet implemented"),

            120 => match self.push(mv) {
                Ok(done) => result = done,
                Err(e) => {
                    error = true;
                    reply = e.to_string();
                }
            },

            121 => match self.pop(mv) {
                Ok(done) => result = done,
                Err(e) => {
                    error = true;
                    reply = e.to_string();
                }
            },

            122 => {
                if self.buffer_mut(src).seen(b'P') {
                    let test = self.buffer_mut(src).get_ivalue();
                    self.platform.diagnostic_test(test);
                } else {
                    reply = self.platform.diagnostics();
                }
            }

            126 => reply.push_str("M126 - valves not yet implemented"),
            127 => reply.push_str("M127 - valves not yet implemented"),

            135 => {} // PID sample interval is fixed here.

            140 => {
                if self.buffer_mut(src).seen(b'S') {
                    let temperature = self.buffer_mut(src).get_fvalue();
                    heat.set_active_temperature(HOT_BED, temperature);
                    heat.activate(HOT_BED);
                }
                if self.buffer_mut(src).seen(b'R') {
                    let temperature = self.buffer_mut(src).get_fvalue();
                    heat.set_standby_temperature(HOT_BED, temperature);
                }
            }

            141 => reply.push_str("M141 - heated chamber not yet implemented"),

            190 => {
                if self.buffer_mut(src).seen(b'S') {
                    let temperature = self.buffer_mut(src).get_fvalue();
                    heat.set_active_temperature(HOT_BED, temperature);
                    heat.activate(HOT_BED);
                    result = heat.heater_at_target(HOT_BED);
                }
            }

            201 => {
                let mut seen = false;
                for axis in 0..AXES {
                    if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                        let value = self.buffer_mut(src).get_fvalue() * self.distance_scale;
                        self.platform.set_acceleration(axis, value);
                        seen = true;
                    }
                }
                if self.buffer_mut(src).seen(EXTRUDE_LETTER) {
                    seen = true;
                    let mut values = [0.0f64; EXTRUDERS];
                    let count = self.buffer_mut(src).get_float_array(&mut values);
                    if count != EXTRUDERS {
                        tracing::error!(
                            "setting accelerations - wrong number of E drives: {}",
                            self.buffer(src).content()
                        );
                    } else {
                        for (e, &value) in values.iter().enumerate() {
                            self.platform
                                .set_acceleration(AXES + e, value * self.distance_scale);
                        }
                    }
                }
                if !seen {
                    let scale = self.distance_scale;
                    reply = self
                        .drive_values_report("Accelerations", scale, |p, d| p.acceleration(d));
                }
            }

            203 => {
                let wire_scale = self.distance_scale * MINUTES_TO_SECONDS;
                let mut seen = false;
                for axis in 0..AXES {
                    if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                        let value = self.buffer_mut(src).get_fvalue() * wire_scale;
                        self.platform.set_max_feedrate(axis, value);
                        seen = true;
                    }
                }
                if self.buffer_mut(src).seen(EXTRUDE_LETTER) {
                    seen = true;
                    let mut values = [0.0f64; EXTRUDERS];
                    let count = self.buffer_mut(src).get_float_array(&mut values);
                    if count != EXTRUDERS {
                        tracing::error!(
                            "setting feedrates - wrong number of E drives: {}",
                            self.buffer(src).content()
                        );
                    } else {
                        for (e, &value) in values.iter().enumerate() {
                            self.platform.set_max_feedrate(AXES + e, value * wire_scale);
                        }
                    }
                }
                if !seen {
                    reply = self
                        .drive_values_report("Maximum feedrates", wire_scale, |p, d| {
                            p.max_feedrate(d)
                        });
                }
            }

            205 => {} // Advanced jerk settings live in M566.

            206 => match self.offset_axes(src, mv) {
                Ok(done) => result = done,
                Err(e) => {
                    error = true;
                    reply = e.to_string();
                }
            },

            208 => {
                let set_min = self.buffer_mut(src).seen(b'S')
                    && self.buffer_mut(src).get_ivalue() == 1;
                let mut seen = false;
                for axis in 0..AXES {
                    if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                        let value = self.buffer_mut(src).get_fvalue() * self.distance_scale;
                        if set_min {
                            self.platform.set_axis_minimum(axis, value);
                        } else {
                            self.platform.set_axis_maximum(axis, value);
                        }
                        seen = true;
                    }
                }
                if !seen {
                    let pick = |p: &crate::platform::Platform, axis: usize| {
                        if set_min {
                            p.axis_minimum(axis)
                        } else {
                            p.axis_maximum(axis)
                        }
                    };
                    reply = format!(
                        "X:{:.1} Y:{:.1} Z:{:.1}",
                        pick(&self.platform, 0),
                        pick(&self.platform, 1),
                        pick(&self.platform, 2)
                    );
                }
            }

            210 => {
                for axis in 0..AXES {
                    if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                        let value = self.buffer_mut(src).get_fvalue()
                            * self.distance_scale
                            * MINUTES_TO_SECONDS;
                        self.platform.set_home_feedrate(axis, value);
                    }
                }
            }

            220 => {
                if self.buffer_mut(src).seen(b'S') {
                    // Percentage, and the mm/min to mm/s conversion rides along.
                    let new_speed_factor =
                        self.buffer_mut(src).get_fvalue() / (60.0 * 100.0);
                    if new_speed_factor > 0.0 {
                        self.speed_factor_change *= new_speed_factor / self.speed_factor;
                        self.speed_factor = new_speed_factor;
                    }
                }
            }

            221 => {
                if self.buffer_mut(src).seen(b'S') {
                    let factor = self.buffer_mut(src).get_fvalue() / 100.0;
                    let drive = if self.buffer_mut(src).seen(b'D') {
                        self.buffer_mut(src).get_ivalue()
                    } else {
                        0
                    };
                    if (0..EXTRUDERS as i64).contains(&drive) && factor >= 0.0 {
                        self.extrusion_factors[drive as usize] = factor;
                    }
                }
            }

            301 => self.set_pid_parameters(src, heat, 1, &mut reply),

            302 => {} // Cold extrusion is always allowed here.

            304 => self.set_pid_parameters(src, heat, HOT_BED as i64, &mut reply),

            305 => self.set_heater_parameters(src, heat, &mut reply),

            503 => result = self.send_config_to_line(),

            540 => {
                if self.buffer_mut(src).seen(b'P') {
                    if !self.set_mac_address(src) {
                        error = true;
                        reply = format!("Dud MAC address: {}", self.buffer(src).content());
                    }
                }
            }

            550 => {
                if self.buffer_mut(src).seen(b'P') {
                    self.platform.network.machine_name = self.buffer_mut(src).get_string();
                }
            }

            551 => {
                if self.buffer_mut(src).seen(b'P') {
                    self.platform.network.password = self.buffer_mut(src).get_string();
                }
            }

            552 | 553 | 554 => {
                if self.buffer_mut(src).seen(b'P') {
                    if !self.set_ethernet_address(src, code) {
                        error = true;
                        reply = format!("Dud IP address: {}", self.buffer(src).content());
                    }
                } else {
                    let (label, address) = match code {
                        552 => ("IP address", self.platform.network.ip_address),
                        553 => ("Net mask", self.platform.network.net_mask),
                        _ => ("Gateway", self.platform.network.gateway),
                    };
                    reply = format!(
                        "{}: {}.{}.{}.{}",
                        label, address[0], address[1], address[2], address[3]
                    );
                }
            }

            555 => {
                if self.buffer_mut(src).seen(b'P') {
                    let value = self.buffer_mut(src).get_ivalue();
                    self.platform.set_emulating(Compatibility::from_code(value));
                }
            }

            556 => {
                if self.buffer_mut(src).seen(b'S') {
                    let value = self.buffer_mut(src).get_fvalue();
                    if value != 0.0 {
                        for axis in 0..AXES {
                            if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                                let amount = self.buffer_mut(src).get_fvalue();
                                mv.set_axis_compensation(axis, amount / value);
                            }
                        }
                    }
                }
            }

            557 => {
                if self.buffer_mut(src).seen(b'P') {
                    let index = self.buffer_mut(src).get_ivalue().max(0) as usize;
                    if self.buffer_mut(src).seen(AXIS_LETTERS[X_AXIS]) {
                        let x = self.buffer_mut(src).get_fvalue();
                        mv.set_x_bed_probe_point(index, x);
                    }
                    if self.buffer_mut(src).seen(AXIS_LETTERS[Y_AXIS]) {
                        let y = self.buffer_mut(src).get_fvalue();
                        mv.set_y_bed_probe_point(index, y);
                    }
                }
            }

            558 => {
                if self.buffer_mut(src).seen(b'P') {
                    let probe_type = self.buffer_mut(src).get_ivalue() as i32;
                    self.platform.set_z_probe_type(probe_type);
                } else {
                    reply = format!("Z Probe: {}", self.platform.z_probe_type());
                }
            }

            559 => {
                let name = if self.buffer_mut(src).seen(b'P') {
                    self.buffer_mut(src).get_string()
                } else {
                    CONFIG_FILE.to_string()
                };
                match self.open_file_to_write(FileDirectory::Sys, &name, src) {
                    Ok(()) => reply.push_str(&format!("Writing to file: {}", name)),
                    Err(e) => {
                        error = true;
                        reply = e.to_string();
                    }
                }
            }

            560 => {
                let name = if self.buffer_mut(src).seen(b'P') {
                    self.buffer_mut(src).get_string()
                } else {
                    INDEX_PAGE.to_string()
                };
                match self.open_file_to_write(FileDirectory::Web, &name, src) {
                    Ok(()) => reply.push_str(&format!("Writing to file: {}", name)),
                    Err(e) => {
                        error = true;
                        reply = e.to_string();
                    }
                }
            }

            561 => mv.set_identity_transform(),

            // Reset a heater fault: use with great caution.
            562 => {
                if self.buffer_mut(src).seen(b'P') {
                    let heater = self.buffer_mut(src).get_ivalue();
                    if (0..HEATERS as i64).contains(&heater) {
                        heat.reset_fault(heater as usize);
                    }
                }
            }

            563 => self.add_new_tool(src, &mut reply, &mut error),

            564 => {
                if self.buffer_mut(src).seen(b'S') {
                    self.limit_axes = self.buffer_mut(src).get_ivalue() != 0;
                }
            }

            566 => {
                let wire_scale = self.distance_scale * MINUTES_TO_SECONDS;
                let mut seen = false;
                for axis in 0..AXES {
                    if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                        let value = self.buffer_mut(src).get_fvalue() * wire_scale;
                        self.platform.set_instant_dv(axis, value);
                        seen = true;
                    }
                }
                if self.buffer_mut(src).seen(EXTRUDE_LETTER) {
                    seen = true;
                    let mut values = [0.0f64; EXTRUDERS];
                    let count = self.buffer_mut(src).get_float_array(&mut values);
                    if count != EXTRUDERS {
                        tracing::error!(
                            "setting jerk - wrong number of E drives: {}",
                            self.buffer(src).content()
                        );
                    } else {
                        for (e, &value) in values.iter().enumerate() {
                            self.platform.set_instant_dv(AXES + e, value * wire_scale);
                        }
                    }
                }
                if !seen {
                    reply = self
                        .drive_values_report("Minimum feedrates", wire_scale, |p, d| {
                            p.instant_dv(d)
                        });
                }
            }

            906 => {
                for axis in 0..AXES {
                    if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                        let value = self.buffer_mut(src).get_fvalue();
                        self.platform.set_motor_current(axis, value);
                    }
                }
                if self.buffer_mut(src).seen(EXTRUDE_LETTER) {
                    let mut values = [0.0f64; EXTRUDERS];
                    let count = self.buffer_mut(src).get_float_array(&mut values);
                    if count != EXTRUDERS {
                        tracing::error!(
                            "setting motor currents - wrong number of E drives: {}",
                            self.buffer(src).content()
                        );
                    } else {
                        for (e, &value) in values.iter().enumerate() {
                            self.platform.set_motor_current(AXES + e, value);
                        }
                    }
                }
            }

            998 => {
                if self.buffer_mut(src).seen(b'P') {
                    let line_number = self.buffer_mut(src).get_ivalue();
                    reply = line_number.to_string();
                    resend = true;
                }
            }

            999 => {
                // Give the reply time to get out before restarting.
                result = self.do_dwell_time(Self::reset_delay_seconds(), mv);
                if result {
                    self.platform.software_reset();
                }
            }

            _ => {
                error = true;
                reply = format!("invalid M Code: {}", self.buffer(src).content());
            }
        }

        if result {
            self.handle_reply(src, error, &reply, b'M', code, resend);
        }
        result
    }

    pub(crate) fn handle_tcode(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
        heat: &mut dyn Heat,
    ) -> bool {
        let code = self.buffer_mut(src).get_ivalue();
        match self.change_tool(src, code as i32, mv, heat) {
            Ok(done) => {
                if done {
                    self.handle_reply(src, false, "", b'T', code, false);
                }
                done
            }
            Err(e) => {
                self.tool_change_sequence = 0;
                self.handle_reply(src, true, &e.to_string(), b'T', code, false);
                true
            }
        }
    }

    /// Wait for the machine to drain, then cut power to every drive.
    fn disable_drives(&mut self, mv: &mut dyn Planner) -> bool {
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return false;
        }
        for drive in 0..DRIVES {
            self.platform.disable_drive(drive);
        }
        true
    }

    /// Wait for the machine to drain, then put the bed and the current
    /// tool's heaters on standby.
    fn standby_heaters(&mut self, mv: &mut dyn Planner, heat: &mut dyn Heat) -> bool {
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return false;
        }
        heat.standby(HOT_BED);
        if let Some(number) = self.tools.current_number() {
            self.standby_tool(number, heat);
        }
        true
    }

    /// Set the active temperature of every heater of the current tool
    /// and start them heating.
    fn set_tool_heaters(&mut self, heat: &mut dyn Heat, temperature: f64) {
        let heaters: Vec<usize> = match self.tools.current() {
            Some(tool) => (0..tool.heater_count()).map(|i| tool.heater(i)).collect(),
            None => {
                tracing::warn!("setting temperature: no tool selected");
                return;
            }
        };
        if let Some(number) = self.tools.current_number() {
            if let Some(tool) = self.tools.get_mut(number) {
                let standby: Vec<f64> = (0..tool.heater_count())
                    .map(|i| tool.standby_temperature(i))
                    .collect();
                let active = vec![temperature; tool.heater_count()];
                tool.set_variables(&standby, &active);
            }
        }
        for heater in heaters {
            heat.set_active_temperature(heater, temperature);
            heat.activate(heater);
        }
    }

    /// Set a tool's temperatures: G10 P<tool> R<standby...> S<active...>.
    fn set_offsets(&mut self, src: SourceId, reply: &mut String) {
        if !self.buffer_mut(src).seen(b'P') {
            return;
        }
        let tool_number = self.buffer_mut(src).get_ivalue() as i32;
        let heater_count = match self.tools.get(tool_number) {
            Some(tool) => tool.heater_count(),
            None => {
                reply.push_str(&format!(
                    "Attempt to set temperatures for non-existent tool: {}",
                    tool_number
                ));
                return;
            }
        };

        let mut standby: Vec<f64> = (0..heater_count)
            .map(|i| {
                self.tools
                    .get(tool_number)
                    .map(|t| t.standby_temperature(i))
                    .unwrap_or(0.0)
            })
            .collect();
        let mut active: Vec<f64> = (0..heater_count)
            .map(|i| {
                self.tools
                    .get(tool_number)
                    .map(|t| t.active_temperature(i))
                    .unwrap_or(0.0)
            })
            .collect();

        if self.buffer_mut(src).seen(b'R') {
            self.buffer_mut(src).get_float_array(&mut standby);
        }
        if self.buffer_mut(src).seen(b'S') {
            self.buffer_mut(src).get_float_array(&mut active);
        }
        if let Some(tool) = self.tools.get_mut(tool_number) {
            tool.set_variables(&standby, &active);
        }
    }

    /// Define a tool: M563 P<number> D<drives> H<heaters>.
    fn add_new_tool(&mut self, src: SourceId, reply: &mut String, error: &mut bool) {
        if !self.buffer_mut(src).seen(b'P') {
            return;
        }
        let tool_number = self.buffer_mut(src).get_ivalue() as i32;

        let mut drives = [0i64; EXTRUDERS];
        let mut drive_count = 0;
        if self.buffer_mut(src).seen(b'D') {
            drive_count = self.buffer_mut(src).get_long_array(&mut drives);
        }

        let mut heaters = [0i64; HEATERS];
        let mut heater_count = 0;
        if self.buffer_mut(src).seen(b'H') {
            heater_count = self.buffer_mut(src).get_long_array(&mut heaters);
        }

        let drives: Vec<usize> = drives[..drive_count]
            .iter()
            .filter(|&&d| d >= 0)
            .map(|&d| d as usize)
            .collect();
        let heaters: Vec<usize> = heaters[..heater_count]
            .iter()
            .filter(|&&h| h >= 0)
            .map(|&h| h as usize)
            .collect();

        if let Err(e) = self.tools.add(tool_number, &drives, &heaters) {
            *error = true;
            reply.push_str(&e.to_string());
        }
    }

    /// Set or report PID parameters: M301/M304.
    fn set_pid_parameters(
        &mut self,
        src: SourceId,
        heat: &mut dyn Heat,
        default_heater: i64,
        reply: &mut String,
    ) {
        let heater = if self.buffer_mut(src).seen(b'H') {
            self.buffer_mut(src).get_ivalue()
        } else {
            default_heater
        };
        if !(0..HEATERS as i64).contains(&heater) {
            return;
        }
        let heater = heater as usize;

        let mut pid = heat.pid_parameters(heater);
        let mut seen = false;
        if self.buffer_mut(src).seen(b'P') {
            pid.kp = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if self.buffer_mut(src).seen(b'I') {
            pid.ki = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if self.buffer_mut(src).seen(b'D') {
            pid.kd = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if self.buffer_mut(src).seen(b'W') {
            pid.pid_max = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if self.buffer_mut(src).seen(b'B') {
            pid.full_band = self.buffer_mut(src).get_fvalue();
            seen = true;
        }

        if seen {
            heat.set_pid_parameters(heater, pid);
        } else {
            reply.push_str(&format!(
                "P:{:.2} I:{:.3} D:{:.2} W:{:.1} B:{:.1}",
                pid.kp, pid.ki, pid.kd, pid.pid_max, pid.full_band
            ));
        }
    }

    /// Set or report thermistor parameters: M305 P<heater>.
    fn set_heater_parameters(&mut self, src: SourceId, heat: &mut dyn Heat, reply: &mut String) {
        if !self.buffer_mut(src).seen(b'P') {
            return;
        }
        let heater = self.buffer_mut(src).get_ivalue();
        if !(0..HEATERS as i64).contains(&heater) {
            return;
        }
        let heater = heater as usize;

        let mut params = heat.thermistor_parameters(heater);
        let mut seen = false;

        // R25 and beta feed a derived constant, so collect both before
        // applying either.
        let mut r25 = params.r25;
        let mut beta = params.beta;
        if self.buffer_mut(src).seen(b'T') {
            r25 = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if self.buffer_mut(src).seen(b'B') {
            beta = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if seen {
            params.set_r25_and_beta(r25, beta);
        }

        if self.buffer_mut(src).seen(b'R') {
            params.series_r = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if self.buffer_mut(src).seen(b'L') {
            params.adc_low_offset = self.buffer_mut(src).get_fvalue();
            seen = true;
        }
        if self.buffer_mut(src).seen(b'H') {
            params.adc_high_offset = self.buffer_mut(src).get_fvalue();
            seen = true;
        }

        if seen {
            heat.set_thermistor_parameters(heater, params);
        } else {
            reply.push_str(&format!(
                "T:{:.1} B:{:.1} R:{:.1} L:{:.1} H:{:.1}",
                params.r25, params.beta, params.series_r, params.adc_low_offset,
                params.adc_high_offset
            ));
        }
    }

    /// Parse and store an IP-style address for M552/M553/M554.
    fn set_ethernet_address(&mut self, src: SourceId, code: i64) -> bool {
        let text = self.buffer_mut(src).get_string();
        let mut octets = [0u8; 4];
        let mut count = 0;
        for part in text.trim().split('.') {
            if count >= 4 {
                return false;
            }
            match part.trim().parse::<u8>() {
                Ok(value) => octets[count] = value,
                Err(_) => return false,
            }
            count += 1;
        }
        if count != 4 {
            return false;
        }
        match code {
            552 => self.platform.network.ip_address = octets,
            553 => self.platform.network.net_mask = octets,
            _ => self.platform.network.gateway = octets,
        }
        true
    }

    /// Parse and store a MAC address for M540. Segments may be decimal
    /// or 0x-prefixed hex.
    fn set_mac_address(&mut self, src: SourceId) -> bool {
        let text = self.buffer_mut(src).get_string();
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in text.trim().split(':') {
            if count >= 6 {
                return false;
            }
            let part = part.trim();
            let value = if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
                u8::from_str_radix(hex, 16).ok()
            } else {
                part.parse::<u8>().ok()
            };
            match value {
                Some(v) => bytes[count] = v,
                None => return false,
            }
            count += 1;
        }
        if count != 6 {
            return false;
        }
        self.platform.network.mac_address = bytes;
        true
    }

    /// "X: a, Y: b, Z: c, E: d:e" report used by the motion-config codes.
    /// Values are divided by `scale` to convert back to wire units.
    fn drive_values_report(
        &self,
        title: &str,
        scale: f64,
        get: impl Fn(&crate::platform::Platform, usize) -> f64,
    ) -> String {
        let mut s = format!(
            "{}: X: {:.1}, Y: {:.1}, Z: {:.1}, E: ",
            title,
            get(&self.platform, 0) / scale,
            get(&self.platform, 1) / scale,
            get(&self.platform, 2) / scale
        );
        for drive in AXES..DRIVES {
            s.push_str(&format!("{:.1}", get(&self.platform, drive) / scale));
            if drive < DRIVES - 1 {
                s.push(':');
            }
        }
        s
    }
}
