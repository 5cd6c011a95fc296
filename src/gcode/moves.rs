//! Loading the move slot from a command: G0/G1, G92 and M206.

use super::{GCodeError, GCodes, SourceId};
use crate::motion::Planner;
use crate::{AXES, AXIS_LETTERS, DRIVES, EXTRUDERS, EXTRUDE_LETTER, FEEDRATE_LETTER};

/// What became of a G0/G1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MoveSetup {
    /// Planner or slot busy; try again next spin.
    NotReady,
    Queued,
    /// Queued with endstop checking: the caller must wait for completion
    /// before accepting another move.
    QueuedAndWait,
}

impl GCodes {
    /// Fill the slot buffer from the command's axis, extruder and
    /// feedrate fields. The planner expects absolute axis targets and
    /// relative extruder displacements, whatever mode the command stream
    /// is in; the extruder accumulators are the sole authority for that
    /// conversion.
    pub(crate) fn load_move_buffer(
        &mut self,
        src: SourceId,
        doing_g92: bool,
        apply_limits: bool,
    ) -> Result<(), GCodeError> {
        // Extrusion first, and only with a tool to extrude with.
        if self.buffer_mut(src).seen(EXTRUDE_LETTER) {
            let tool_drives: Vec<usize> = match self.tools.current() {
                Some(tool) => (0..tool.drive_count()).map(|i| tool.drive(i)).collect(),
                None => return Err(GCodeError::NoToolSelected),
            };
            let mut e_movement = [0.0f64; EXTRUDERS];
            let requested = tool_drives.len().min(EXTRUDERS);
            let count = self
                .buffer_mut(src)
                .get_float_array(&mut e_movement[..requested]);
            if count != tool_drives.len() {
                return Err(GCodeError::WrongDriveCount(
                    self.buffer(src).content().to_string(),
                ));
            }

            // Zero every extruder slot; unnamed drives must not move.
            for drive in AXES..DRIVES {
                self.slot.buffer[drive] = 0.0;
            }

            for (e, &drive) in tool_drives.iter().enumerate() {
                let move_arg = e_movement[e] * self.distance_scale;
                if doing_g92 {
                    // Assigning a position extrudes nothing.
                    self.slot.buffer[AXES + drive] = 0.0;
                    self.last_extruder_pos[drive] = move_arg;
                } else if self.drives_relative {
                    self.slot.buffer[AXES + drive] = move_arg * self.extrusion_factors[drive];
                    self.last_extruder_pos[drive] += move_arg;
                } else {
                    self.slot.buffer[AXES + drive] =
                        (move_arg - self.last_extruder_pos[drive]) * self.extrusion_factors[drive];
                    self.last_extruder_pos[drive] = move_arg;
                }
            }
        }

        for axis in 0..AXES {
            if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                let mut move_arg = self.buffer_mut(src).get_fvalue() * self.distance_scale;
                if self.axes_relative && !doing_g92 {
                    move_arg += self.slot.buffer[axis];
                }
                // Keep X and Y on the bed once homed. Z stays free: the
                // head often has to go below 0 to set the origin.
                if apply_limits && axis < 2 && self.axis_is_homed[axis] && !doing_g92 {
                    move_arg = move_arg.clamp(
                        self.platform.axis_minimum(axis),
                        self.platform.axis_maximum(axis),
                    );
                }
                self.slot.buffer[axis] = move_arg;
                if doing_g92 {
                    // Assigning an axis position defines it as known.
                    self.axis_is_homed[axis] = true;
                }
            }
        }

        if self.buffer_mut(src).seen(FEEDRATE_LETTER) {
            // Feedrates arrive in mm/minute.
            self.slot.buffer[DRIVES] =
                self.buffer_mut(src).get_fvalue() * self.distance_scale * self.speed_factor;
        }

        Ok(())
    }

    /// Set up the move commanded by a G0/G1.
    pub(crate) fn set_up_move(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
    ) -> Result<MoveSetup, GCodeError> {
        // Last one gone yet?
        if self.slot.pending() {
            return Ok(MoveSetup::NotReady);
        }
        if !mv.current_user_position(&mut self.slot.buffer) {
            return Ok(MoveSetup::NotReady);
        }

        // The snapshot carries cumulative extruder totals; on the wire
        // extruder slots are deltas, so a move without E fields must not
        // extrude.
        for drive in AXES..DRIVES {
            self.slot.buffer[drive] = 0.0;
        }

        // Apply any speed-factor change made since the previous move.
        self.slot.buffer[DRIVES] *= self.speed_factor_change;
        self.speed_factor_change = 1.0;

        let mut check_endstops = false;
        if self.buffer_mut(src).seen(b'S') && self.buffer_mut(src).get_ivalue() == 1 {
            check_endstops = true;
        }

        let apply_limits = !check_endstops && self.limit_axes;
        self.load_move_buffer(src, false, apply_limits)?;
        self.slot.publish(check_endstops);
        Ok(if check_endstops {
            MoveSetup::QueuedAndWait
        } else {
            MoveSetup::Queued
        })
    }

    /// Assign the current logical position without moving: G92.
    /// Call until it returns Ok(true).
    pub(crate) fn set_positions(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
    ) -> Result<bool, GCodeError> {
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return Ok(false);
        }
        self.load_move_buffer(src, true, false)?;
        // Transform before informing the planner so that after G92 Z0 the
        // reported (inverse-transformed) position really is zero.
        mv.transform(&mut self.slot.buffer);
        mv.set_live_coordinates(&self.slot.buffer);
        mv.set_positions(&self.slot.buffer);
        // After an assignment we must effectively be stationary.
        mv.set_feedrate(self.platform.instant_dv(self.platform.slowest_drive()));
        Ok(true)
    }

    /// Offset the axes (M206): physically move by the given amounts, then
    /// declare the previous coordinates to be current again.
    pub(crate) fn offset_axes(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
    ) -> Result<bool, GCodeError> {
        if !self.offset_set {
            if !self.all_moves_finished_and_buffer_loaded(mv) {
                return Ok(false);
            }
            for drive in 0..=DRIVES {
                if drive < AXES || drive == DRIVES {
                    self.record[drive] = self.slot.buffer[drive];
                    self.move_to_do[drive] = self.slot.buffer[drive];
                } else {
                    self.record[drive] = 0.0;
                    self.move_to_do[drive] = 0.0;
                }
                self.active_drives[drive] = false;
            }

            for axis in 0..AXES {
                if self.buffer_mut(src).seen(AXIS_LETTERS[axis]) {
                    self.move_to_do[axis] += self.buffer_mut(src).get_fvalue();
                    self.active_drives[axis] = true;
                }
            }
            if self.buffer_mut(src).seen(FEEDRATE_LETTER) {
                self.move_to_do[DRIVES] = self.buffer_mut(src).get_fvalue();
                self.active_drives[DRIVES] = true;
            }
            self.offset_set = true;
        }

        if self.do_canned_cycle_move(mv, false)? {
            self.slot.buffer = self.record;
            mv.set_live_coordinates(&self.record);
            mv.set_positions(&self.record);
            self.offset_set = false;
            return Ok(true);
        }
        Ok(false)
    }
}
