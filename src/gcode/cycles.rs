//! Canned cycles: macro file execution, homing, Z probing and tool
//! changes. Each is a small step-indexed state machine that hands moves
//! to the slot one at a time and advances only when they complete.

use super::{GCodeError, GCodes, SourceId};
use crate::heat::Heat;
use crate::motion::Planner;
use crate::storage::FileDirectory;
use crate::{AXES, DRIVES, X_AXIS, Y_AXIS, Z_AXIS};

/// Height the head is lifted to around a probing descent.
const Z_DIVE: f64 = 5.0;

/// A Z argument below this is "not a real height, go and probe".
pub(crate) const SILLY_Z_VALUE: f64 = -9999.0;

const HOME_ALL_G: &str = "homeall.g";
const HOME_X_G: &str = "homex.g";
const HOME_Y_G: &str = "homey.g";
const HOME_Z_G: &str = "homez.g";

impl GCodes {
    /// Execute one canned-cycle move. The first call saves the machine
    /// state and queues the move; subsequent calls wait for the planner
    /// to finish it and the state to be restored. Returns true exactly
    /// once per move.
    pub(crate) fn do_canned_cycle_move(
        &mut self,
        mv: &mut dyn Planner,
        check_endstops: bool,
    ) -> Result<bool, GCodeError> {
        if self.cycle_move_queued {
            // Wait for the move to finish, then restore the state.
            if !self.pop(mv)? {
                return Ok(false);
            }
            self.cycle_move_queued = false;
            return Ok(true);
        }

        // Wait for the machine to go idle, save its state and stage the
        // requested coordinates over the current position.
        if !self.push(mv)? {
            return Ok(false);
        }
        // The loaded snapshot holds cumulative extruder totals; the wire
        // format is deltas, and canned cycles never extrude.
        for drive in AXES..DRIVES {
            self.slot.buffer[drive] = 0.0;
        }
        for drive in 0..=DRIVES {
            if self.active_drives[drive] {
                self.slot.buffer[drive] = self.move_to_do[drive];
            }
        }
        self.slot.publish(check_endstops);
        self.cycle_move_queued = true;
        Ok(false)
    }

    /// Run a macro file from the system directory. Multi-call: the first
    /// call pushes state and opens the file, later calls feed it through
    /// the macro buffer until end of file, then pop. A missing file is
    /// reported and skipped without error.
    pub(crate) fn do_file_macro(
        &mut self,
        src: SourceId,
        file_name: &str,
        mv: &mut dyn Planner,
        heat: &mut dyn Heat,
    ) -> Result<bool, GCodeError> {
        if !self.doing_macro_file {
            if !self.push(mv)? {
                return Ok(false);
            }
            match self.storage.open(FileDirectory::Sys, file_name, false) {
                Ok(file) => {
                    self.file_being_printed = Some(file);
                    self.doing_macro_file = true;
                    self.macro_owner = Some(src);
                    self.macro_buffer.reset();
                    Ok(false)
                }
                Err(_) => {
                    tracing::warn!("macro file {} not found", file_name);
                    if !self.pop(mv)? {
                        tracing::error!("cannot pop the stack after a missing macro");
                    }
                    Ok(true)
                }
            }
        } else {
            // Another source's macro is in flight; wait our turn.
            if self.macro_owner != Some(src) {
                return Ok(false);
            }

            if self.file_being_printed.is_none() {
                // End of macro: restore the outer state.
                if !self.pop(mv)? {
                    return Ok(false);
                }
                self.doing_macro_file = false;
                self.macro_owner = None;
                self.macro_buffer.reset();
                return Ok(true);
            }

            if self.macro_buffer.active() {
                let finished = self.act_on_code(SourceId::Macro, mv, heat);
                self.buffer_mut(SourceId::Macro).set_finished(finished);
                return Ok(false);
            }

            self.do_file_print(SourceId::Macro, mv, heat);
            Ok(false)
        }
    }

    /// Explicit macro return (M99): close the file and let the
    /// surrounding macro call observe end-of-file and pop.
    pub(crate) fn file_macro_return(&mut self, mv: &mut dyn Planner) -> bool {
        if !self.doing_macro_file {
            return true;
        }
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return false;
        }
        self.file_being_printed = None;
        self.macro_buffer.reset();
        true
    }

    pub(crate) fn no_home_pending(&self) -> bool {
        !(self.home_x || self.home_y || self.home_z)
    }

    /// Home the axes flagged in home_x/home_y/home_z by running their
    /// macro files. Returns true when done; errors report and abandon the
    /// remaining axes.
    pub(crate) fn do_home(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
        heat: &mut dyn Heat,
    ) -> Result<bool, GCodeError> {
        if self.home_x && self.home_y && self.home_z {
            if self.do_file_macro(src, HOME_ALL_G, mv, heat)? {
                self.home_x = false;
                self.home_y = false;
                self.home_z = false;
                return Ok(true);
            }
            return Ok(false);
        }

        if self.home_x {
            if self.do_file_macro(src, HOME_X_G, mv, heat)? {
                self.home_x = false;
                return Ok(self.no_home_pending());
            }
            return Ok(false);
        }

        if self.home_y {
            if self.do_file_macro(src, HOME_Y_G, mv, heat)? {
                self.home_y = false;
                return Ok(self.no_home_pending());
            }
            return Ok(false);
        }

        if self.home_z {
            if self.platform.must_home_xy_before_z()
                && !(self.axis_is_homed[X_AXIS] && self.axis_is_homed[Y_AXIS])
            {
                self.home_z = false;
                return Err(GCodeError::HomeZWithoutXY);
            }
            if self.do_file_macro(src, HOME_Z_G, mv, heat)? {
                self.home_z = false;
                return Ok(self.no_home_pending());
            }
            return Ok(false);
        }

        // Nothing left to home.
        self.slot.clear();
        Ok(true)
    }

    /// Probe the bed at the XY of probe point `probe_count` and record
    /// the height found there: lift, travel, descend until the probe
    /// triggers, lift again, store.
    pub(crate) fn do_single_z_probe_at_point(
        &mut self,
        mv: &mut dyn Planner,
    ) -> Result<bool, GCodeError> {
        mv.set_identity_transform();

        for drive in 0..=DRIVES {
            self.active_drives[drive] = false;
        }

        match self.cycle_move_count {
            0 => {
                // Raise Z to the dive height. Only the first point
                // actually moves; afterwards Z is already there.
                self.move_to_do[Z_AXIS] = Z_DIVE;
                self.active_drives[Z_AXIS] = true;
                self.move_to_do[DRIVES] = self.platform.max_feedrate(Z_AXIS);
                self.active_drives[DRIVES] = true;
                mv.set_z_probing(false);
                if self.do_canned_cycle_move(mv, false)? {
                    self.cycle_move_count += 1;
                }
                Ok(false)
            }
            1 => {
                // Travel to the probe point.
                self.move_to_do[X_AXIS] = mv.x_bed_probe_point(self.probe_count);
                self.move_to_do[Y_AXIS] = mv.y_bed_probe_point(self.probe_count);
                self.active_drives[X_AXIS] = true;
                self.active_drives[Y_AXIS] = true;
                self.move_to_do[DRIVES] = self.platform.max_feedrate(X_AXIS);
                self.active_drives[DRIVES] = true;
                mv.set_z_probing(false);
                if self.do_canned_cycle_move(mv, false)? {
                    self.cycle_move_count += 1;
                }
                Ok(false)
            }
            2 => {
                // Descend until the probe triggers.
                self.move_to_do[Z_AXIS] = -2.0 * self.platform.axis_maximum(Z_AXIS);
                self.active_drives[Z_AXIS] = true;
                self.move_to_do[DRIVES] = self.platform.home_feedrate(Z_AXIS);
                self.active_drives[DRIVES] = true;
                mv.set_z_probing(true);
                if self.do_canned_cycle_move(mv, true)? {
                    self.cycle_move_count += 1;
                    mv.set_z_probing(false);
                }
                Ok(false)
            }
            3 => {
                // Lift clear of the bed again.
                self.move_to_do[Z_AXIS] = Z_DIVE;
                self.active_drives[Z_AXIS] = true;
                self.move_to_do[DRIVES] = self.platform.max_feedrate(Z_AXIS);
                self.active_drives[DRIVES] = true;
                mv.set_z_probing(false);
                if self.do_canned_cycle_move(mv, false)? {
                    self.cycle_move_count += 1;
                }
                Ok(false)
            }
            _ => {
                self.cycle_move_count = 0;
                let z = mv.last_probed_z();
                mv.set_z_bed_probe_point(self.probe_count, z);
                Ok(true)
            }
        }
    }

    /// Plain probe: descend from wherever we are until the switch or
    /// probe triggers.
    pub(crate) fn do_single_z_probe(&mut self, mv: &mut dyn Planner) -> Result<bool, GCodeError> {
        for drive in 0..=DRIVES {
            self.active_drives[drive] = false;
        }

        match self.cycle_move_count {
            0 => {
                mv.set_z_probing(true);
                self.cycle_move_count += 1;
                Ok(false)
            }
            1 => {
                self.move_to_do[Z_AXIS] = -1.1 * self.platform.axis_total_length(Z_AXIS);
                self.active_drives[Z_AXIS] = true;
                self.move_to_do[DRIVES] = self.platform.home_feedrate(Z_AXIS);
                self.active_drives[DRIVES] = true;
                if self.do_canned_cycle_move(mv, true)? {
                    self.cycle_move_count += 1;
                    self.probe_count = 0;
                    mv.set_z_probing(false);
                }
                Ok(false)
            }
            _ => {
                self.cycle_move_count = 0;
                Ok(true)
            }
        }
    }

    /// G30: record the current position as probe point P, or probe for
    /// it. X/Y/Z arguments override the machine's coordinates; a real Z
    /// (above the sentinel) is stored directly, otherwise the bed is
    /// probed. An S field closes the set and computes the bed plane.
    pub(crate) fn set_single_z_probe_at_a_position(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
    ) -> Result<bool, GCodeError> {
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return Ok(false);
        }

        if !self.buffer_mut(src).seen(b'P') {
            return self.do_single_z_probe(mv);
        }
        let probe_point_index = self.buffer_mut(src).get_ivalue().max(0) as usize;

        let x = if self.buffer_mut(src).seen(crate::AXIS_LETTERS[X_AXIS]) {
            self.buffer_mut(src).get_fvalue()
        } else {
            self.slot.buffer[X_AXIS]
        };
        let y = if self.buffer_mut(src).seen(crate::AXIS_LETTERS[Y_AXIS]) {
            self.buffer_mut(src).get_fvalue()
        } else {
            self.slot.buffer[Y_AXIS]
        };
        let z = if self.buffer_mut(src).seen(crate::AXIS_LETTERS[Z_AXIS]) {
            self.buffer_mut(src).get_fvalue()
        } else {
            self.slot.buffer[Z_AXIS]
        };

        self.probe_count = probe_point_index;
        mv.set_x_bed_probe_point(self.probe_count, x);
        mv.set_y_bed_probe_point(self.probe_count, y);

        if z > SILLY_Z_VALUE {
            // The operator supplied the height; no probing needed.
            mv.set_z_bed_probe_point(self.probe_count, z);
            mv.set_z_probing(false);
            self.probe_count = 0;
            if self.buffer_mut(src).seen(b'S') {
                self.z_probes_set = true;
                mv.set_probed_bed_equation();
            }
            return Ok(true);
        }

        if self.do_single_z_probe_at_point(mv)? {
            self.probe_count = 0;
            mv.set_z_probing(false);
            if self.buffer_mut(src).seen(b'S') {
                self.z_probes_set = true;
                mv.set_probed_bed_equation();
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// G32: probe every configured point and fit the bed plane.
    pub(crate) fn do_multiple_z_probe(&mut self, mv: &mut dyn Planner) -> Result<bool, GCodeError> {
        if mv.number_of_probe_points() < 3 {
            return Err(GCodeError::TooFewProbePoints);
        }

        if self.do_single_z_probe_at_point(mv)? {
            self.probe_count += 1;
        }
        if self.probe_count >= mv.number_of_probe_points() {
            self.probe_count = 0;
            self.z_probes_set = true;
            mv.set_z_probing(false);
            mv.set_probed_bed_equation();
            return Ok(true);
        }
        Ok(false)
    }

    /// G31: set the probe parameters, or report the probe reading.
    pub(crate) fn set_print_z_probe(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
        heat: &dyn Heat,
        reply: &mut String,
    ) -> bool {
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return false;
        }

        if self.buffer_mut(src).seen(crate::AXIS_LETTERS[Z_AXIS]) {
            let mut params = self.platform.z_probe_parameters();
            params.height = self.buffer_mut(src).get_fvalue();
            if self.buffer_mut(src).seen(b'P') {
                params.adc_value = self.buffer_mut(src).get_ivalue() as i32;
            }
            if self.buffer_mut(src).seen(b'S') {
                params.calib_temperature = self.buffer_mut(src).get_fvalue();
            } else {
                // Assume calibration at the current bed temperature.
                params.calib_temperature = heat.temperature(crate::HOT_BED);
            }
            if self.buffer_mut(src).seen(b'C') {
                params.temperature_coefficient = self.buffer_mut(src).get_fvalue();
            } else {
                params.temperature_coefficient = 0.0;
            }
            self.platform.set_z_probe_parameters(params);
        } else {
            reply.push_str(&format!("{}", self.platform.z_probe()));
        }
        true
    }

    /// Change to the given tool, running the tfree/tpre/tpost macros of
    /// the outgoing and incoming tools around the heater switch. The
    /// sequence runs even when old and new are the same tool.
    pub(crate) fn change_tool(
        &mut self,
        src: SourceId,
        new_tool_number: i32,
        mv: &mut dyn Planner,
        heat: &mut dyn Heat,
    ) -> Result<bool, GCodeError> {
        let old_tool = self.tools.current_number();
        let new_exists = self.tools.get(new_tool_number).is_some();

        match self.tool_change_sequence {
            0 => {
                // Pre-release sequence for the old tool, if any.
                if let Some(old) = old_tool {
                    let file_name = format!("tfree{}.g", old);
                    if self.do_file_macro(src, &file_name, mv, heat)? {
                        self.tool_change_sequence += 1;
                    }
                } else {
                    self.tool_change_sequence += 1;
                }
                Ok(false)
            }
            1 => {
                // Release the old tool.
                if let Some(old) = old_tool {
                    self.standby_tool(old, heat);
                }
                self.tool_change_sequence += 1;
                Ok(false)
            }
            2 => {
                if new_exists {
                    let file_name = format!("tpre{}.g", new_tool_number);
                    if self.do_file_macro(src, &file_name, mv, heat)? {
                        self.tool_change_sequence += 1;
                    }
                } else {
                    self.tool_change_sequence += 1;
                }
                Ok(false)
            }
            3 => {
                // Select the new tool, even if it doesn't exist; that
                // just deselects all tools.
                self.select_tool(new_tool_number, heat);
                self.tool_change_sequence += 1;
                Ok(false)
            }
            4 => {
                if new_exists {
                    let file_name = format!("tpost{}.g", new_tool_number);
                    if self.do_file_macro(src, &file_name, mv, heat)? {
                        self.tool_change_sequence += 1;
                    }
                } else {
                    self.tool_change_sequence += 1;
                }
                Ok(false)
            }
            _ => {
                self.tool_change_sequence = 0;
                Ok(true)
            }
        }
    }

    /// Put a tool's heaters on their standby setpoints.
    pub(crate) fn standby_tool(&mut self, tool_number: i32, heat: &mut dyn Heat) {
        let heaters: Vec<(usize, f64)> = match self.tools.get(tool_number) {
            Some(tool) => (0..tool.heater_count())
                .map(|i| (tool.heater(i), tool.standby_temperature(i)))
                .collect(),
            None => return,
        };
        for (heater, temperature) in heaters {
            heat.set_standby_temperature(heater, temperature);
            heat.standby(heater);
        }
    }

    /// Make a tool current and bring its heaters to their active
    /// setpoints. An unknown number deselects all tools.
    pub(crate) fn select_tool(&mut self, tool_number: i32, heat: &mut dyn Heat) {
        self.tools.select(tool_number);
        let heaters: Vec<(usize, f64)> = match self.tools.current() {
            Some(tool) => (0..tool.heater_count())
                .map(|i| (tool.heater(i), tool.active_temperature(i)))
                .collect(),
            None => return,
        };
        for (heater, temperature) in heaters {
            heat.set_active_temperature(heater, temperature);
            heat.activate(heater);
        }
    }
}
