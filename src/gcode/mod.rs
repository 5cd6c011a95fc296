//! The G-code interpreter: sources, spin loop, state stack and the
//! machinery shared by all command handlers.
//!
//! The interpreter reads bytes from the network console, the serial line
//! and the file being printed, each into its own command buffer, and acts
//! on one completed command at a time. Handlers never block: anything
//! that must wait for the planner, a heater or the wall clock reports
//! "not finished" and is re-entered on the next spin.

pub mod buffer;
mod cycles;
mod dispatch;
mod files;
mod moves;
mod reply;

use thiserror::Error;

use crate::heat::Heat;
use crate::motion::{MoveRecord, MoveSlot, Planner};
use crate::platform::Platform;
use crate::storage::{FileDirectory, FileHandle, MassStorage};
use crate::tools::ToolRack;
use crate::transport::Transport;
use crate::{AXES, DRIVES, EXTRUDERS};

use buffer::CommandBuffer;

/// Depth of the push/pop state stack.
pub const STACK_DEPTH: usize = 5;

/// Bytes drained from an interactive source in one spin.
const MAX_BYTES_PER_SPIN: usize = 16;

/// Delay between M999 and the actual restart, so the reply gets out.
const RESET_DELAY_SECONDS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceId {
    Web,
    Serial,
    File,
    Macro,
}

#[derive(Debug, Error)]
pub enum GCodeError {
    #[error("Attempting to extrude with no tool selected")]
    NoToolSelected,
    #[error("Wrong number of extruder drives for the selected tool: {0}")]
    WrongDriveCount(String),
    #[error("Push(): stack overflow")]
    StackOverflow,
    #[error("Pop(): stack underflow")]
    StackUnderflow,
    #[error("Must home X and Y before homing Z")]
    HomeZWithoutXY,
    #[error("Bed probing: there needs to be 3 or more points set")]
    TooFewProbePoints,
    #[error("Macro calls cannot be nested")]
    NestedMacro,
    #[error("GCode file not found")]
    PrintFileNotFound,
    #[error("Unsuccessful attempt to delete: {0}")]
    DeleteFailed(String),
    #[error("Can't open file {0} for writing")]
    OpenForWriteFailed(String),
}

/// Saved machine state for macro entry and canned-cycle moves. Moving the
/// open print file into the frame parks its read position; moving it back
/// resumes the stream exactly where it was interrupted.
struct StackFrame {
    drives_relative: bool,
    axes_relative: bool,
    feedrate: f64,
    file: Option<FileHandle>,
}

pub struct GCodes {
    active: bool,
    pub platform: Platform,
    pub storage: MassStorage,
    pub tools: ToolRack,

    web_buffer: CommandBuffer,
    serial_buffer: CommandBuffer,
    file_buffer: CommandBuffer,
    macro_buffer: CommandBuffer,

    web: Box<dyn Transport>,
    serial: Box<dyn Transport>,

    pub(crate) slot: MoveSlot,

    // Coordinate model.
    pub(crate) drives_relative: bool,
    pub(crate) axes_relative: bool,
    pub(crate) distance_scale: f64,
    pub(crate) last_extruder_pos: [f64; EXTRUDERS],
    pub(crate) extrusion_factors: [f64; EXTRUDERS],
    pub(crate) speed_factor: f64,
    pub(crate) speed_factor_change: f64,
    pub(crate) axis_is_homed: [bool; AXES],
    pub(crate) limit_axes: bool,

    stack: Vec<StackFrame>,

    // Files.
    pub(crate) file_being_printed: Option<FileHandle>,
    pub(crate) file_to_print: Option<FileHandle>,
    pub(crate) file_being_written: Option<FileHandle>,
    pub(crate) config_file_being_sent: Option<FileHandle>,
    pub(crate) eof_counter: usize,

    // Dwell.
    dwell_waiting: bool,
    dwell_end: f64,

    // Canned-cycle state.
    pub(crate) doing_macro_file: bool,
    pub(crate) macro_owner: Option<SourceId>,
    pub(crate) cycle_move_count: u8,
    pub(crate) cycle_move_queued: bool,
    pub(crate) probe_count: usize,
    pub(crate) z_probes_set: bool,
    pub(crate) tool_change_sequence: u8,
    pub(crate) home_x: bool,
    pub(crate) home_y: bool,
    pub(crate) home_z: bool,
    pub(crate) offset_set: bool,
    pub(crate) record: [f64; DRIVES + 1],
    pub(crate) move_to_do: [f64; DRIVES + 1],
    pub(crate) active_drives: [bool; DRIVES + 1],
    pub(crate) waiting_for_move_to_complete: bool,
    pub(crate) cooling_inverted: bool,
}

impl GCodes {
    pub fn new(
        platform: Platform,
        storage: MassStorage,
        web: Box<dyn Transport>,
        serial: Box<dyn Transport>,
    ) -> Self {
        let mut gcodes = Self {
            active: false,
            platform,
            storage,
            tools: ToolRack::new(),
            web_buffer: CommandBuffer::new("web"),
            serial_buffer: CommandBuffer::new("serial"),
            file_buffer: CommandBuffer::new("file"),
            macro_buffer: CommandBuffer::new("macro"),
            web,
            serial,
            slot: MoveSlot::new(),
            drives_relative: true,
            axes_relative: false,
            distance_scale: 1.0,
            last_extruder_pos: [0.0; EXTRUDERS],
            extrusion_factors: [1.0; EXTRUDERS],
            speed_factor: 1.0 / 60.0,
            speed_factor_change: 1.0,
            axis_is_homed: [false; AXES],
            limit_axes: true,
            stack: Vec::with_capacity(STACK_DEPTH),
            file_being_printed: None,
            file_to_print: None,
            file_being_written: None,
            config_file_being_sent: None,
            eof_counter: 0,
            dwell_waiting: false,
            dwell_end: 0.0,
            doing_macro_file: false,
            macro_owner: None,
            cycle_move_count: 0,
            cycle_move_queued: false,
            probe_count: 0,
            z_probes_set: false,
            tool_change_sequence: 0,
            home_x: false,
            home_y: false,
            home_z: false,
            offset_set: false,
            record: [0.0; DRIVES + 1],
            move_to_do: [0.0; DRIVES + 1],
            active_drives: [false; DRIVES + 1],
            waiting_for_move_to_complete: false,
            cooling_inverted: false,
        };
        gcodes.init();
        gcodes
    }

    /// Full initialisation, also run after an emergency stop.
    pub fn init(&mut self) {
        self.reset();
        self.drives_relative = true;
        self.axes_relative = false;
        self.distance_scale = 1.0;
        self.last_extruder_pos = [0.0; EXTRUDERS];
        self.home_x = false;
        self.home_y = false;
        self.home_z = false;
        self.offset_set = false;
        self.z_probes_set = false;
        self.limit_axes = true;
        self.axis_is_homed = [false; AXES];
        self.tool_change_sequence = 0;
        self.cooling_inverted = false;
        self.active = true;
    }

    /// Drop everything in flight: buffers, pending move, open files,
    /// canned-cycle progress, the stack.
    pub fn reset(&mut self) {
        self.web_buffer.reset();
        self.serial_buffer.reset();
        self.file_buffer.reset();
        self.macro_buffer.reset();
        self.slot.clear();
        self.file_being_printed = None;
        self.file_to_print = None;
        self.file_being_written = None;
        self.config_file_being_sent = None;
        self.doing_macro_file = false;
        self.macro_owner = None;
        self.dwell_waiting = false;
        self.stack.clear();
        self.waiting_for_move_to_complete = false;
        self.probe_count = 0;
        self.cycle_move_count = 0;
        self.cycle_move_queued = false;
        self.speed_factor = 1.0 / 60.0; // mm/minute on the wire, mm/second inside
        self.speed_factor_change = 1.0;
        self.extrusion_factors = [1.0; EXTRUDERS];
    }

    pub(crate) fn buffer(&self, src: SourceId) -> &CommandBuffer {
        match src {
            SourceId::Web => &self.web_buffer,
            SourceId::Serial => &self.serial_buffer,
            SourceId::File => &self.file_buffer,
            SourceId::Macro => &self.macro_buffer,
        }
    }

    pub(crate) fn buffer_mut(&mut self, src: SourceId) -> &mut CommandBuffer {
        match src {
            SourceId::Web => &mut self.web_buffer,
            SourceId::Serial => &mut self.serial_buffer,
            SourceId::File => &mut self.file_buffer,
            SourceId::Macro => &mut self.macro_buffer,
        }
    }

    /// One unit of cooperative progress.
    ///
    /// The order establishes a priority: web first, then serial, then the
    /// file being printed. Interactive sources must preempt the print or
    /// the machine would ignore the operator for the whole job.
    pub fn spin(&mut self, mv: &mut dyn Planner, heat: &mut dyn Heat) {
        if !self.active {
            return;
        }

        // Commands already started get finished before new bytes are read.
        for src in [SourceId::Web, SourceId::Serial, SourceId::File] {
            if self.buffer(src).active() {
                let finished = self.act_on_code(src, mv, heat);
                self.buffer_mut(src).set_finished(finished);
                return;
            }
        }

        if self.web.available() {
            self.drain_source(SourceId::Web, mv, heat);
            return;
        }

        // The serial line may be in the middle of a binary web-asset
        // upload, which bypasses G-code parsing entirely.
        if self.serial_buffer.writing_directory() == Some(FileDirectory::Web) {
            if let Some(b) = self.serial.read() {
                self.write_html_to_file(SourceId::Serial, b);
            }
            return;
        }
        if self.serial.available() {
            self.drain_source(SourceId::Serial, mv, heat);
            return;
        }

        self.do_file_print(SourceId::File, mv, heat);
    }

    /// Read up to a handful of bytes from an interactive source, stopping
    /// early once a complete command arrives in case it does not finish
    /// this tick.
    fn drain_source(&mut self, src: SourceId, mv: &mut dyn Planner, heat: &mut dyn Heat) {
        for _ in 0..MAX_BYTES_PER_SPIN {
            let byte = match src {
                SourceId::Web => self.web.read(),
                SourceId::Serial => self.serial.read(),
                _ => None,
            };
            let Some(b) = byte else {
                break;
            };
            if self.buffer_mut(src).put(b) {
                if self.buffer(src).writing_directory().is_some() {
                    self.write_gcode_to_file(src, mv, heat);
                } else {
                    let finished = self.act_on_code(src, mv, heat);
                    self.buffer_mut(src).set_finished(finished);
                }
                break;
            }
        }
    }

    /// Feed one byte of the current print or macro file into its buffer,
    /// synthesizing a newline at end of file.
    pub(crate) fn do_file_print(&mut self, src: SourceId, mv: &mut dyn Planner, heat: &mut dyn Heat) {
        let byte = match self.file_being_printed.as_mut() {
            Some(file) => Some(file.read_byte()),
            None => None,
        };
        match byte {
            Some(Some(b)) => {
                if self.buffer_mut(src).put(b) {
                    let finished = self.act_on_code(src, mv, heat);
                    self.buffer_mut(src).set_finished(finished);
                }
            }
            Some(None) => {
                // File exhausted; make sure the last line is terminated.
                if self.buffer_mut(src).put(b'\n') {
                    let finished = self.act_on_code(src, mv, heat);
                    self.buffer_mut(src).set_finished(finished);
                }
                self.file_being_printed = None;
            }
            None => {}
        }
    }

    /// Dispatch one armed command. M is tested first because M-command
    /// parameters may embed the letters T and G (filenames); G and T
    /// parameters never contain M.
    pub(crate) fn act_on_code(
        &mut self,
        src: SourceId,
        mv: &mut dyn Planner,
        heat: &mut dyn Heat,
    ) -> bool {
        if self.buffer_mut(src).seen(b'M') {
            return self.handle_mcode(src, mv, heat);
        }
        if self.buffer_mut(src).seen(b'G') {
            return self.handle_gcode(src, mv, heat);
        }
        if self.buffer_mut(src).seen(b'T') {
            return self.handle_tcode(src, mv, heat);
        }
        // A line with no command at all is acknowledged and dropped.
        self.handle_reply(src, false, "", b'X', 0, false);
        true
    }

    /// Wait for the machine to go idle, then load the slot buffer with
    /// the settled position and feedrate. Call until it returns true.
    pub(crate) fn all_moves_finished_and_buffer_loaded(&mut self, mv: &mut dyn Planner) -> bool {
        if self.slot.pending() {
            return false;
        }
        if !mv.all_moves_finished() {
            return false;
        }
        mv.resume_moving();
        mv.current_user_position(&mut self.slot.buffer)
    }

    /// Hand the pending move to the planner, if there is one.
    pub fn read_move(&mut self) -> Option<MoveRecord> {
        self.slot.take()
    }

    /// Save the relative modes, feedrate and the open print file.
    /// Call until it returns Ok(true).
    pub(crate) fn push(&mut self, mv: &mut dyn Planner) -> Result<bool, GCodeError> {
        if self.stack.len() >= STACK_DEPTH {
            return Err(GCodeError::StackOverflow);
        }
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return Ok(false);
        }
        self.stack.push(StackFrame {
            drives_relative: self.drives_relative,
            axes_relative: self.axes_relative,
            feedrate: self.slot.buffer[DRIVES],
            file: self.file_being_printed.take(),
        });
        self.platform.push_message_indent();
        Ok(true)
    }

    /// Restore the state captured by the matching push. Installs a
    /// zero-length move at the restored feedrate so the planner really
    /// reapplies it. Call until it returns Ok(true).
    pub(crate) fn pop(&mut self, mv: &mut dyn Planner) -> Result<bool, GCodeError> {
        if self.stack.is_empty() {
            return Err(GCodeError::StackUnderflow);
        }
        if !self.all_moves_finished_and_buffer_loaded(mv) {
            return Ok(false);
        }
        let frame = match self.stack.pop() {
            Some(frame) => frame,
            None => return Err(GCodeError::StackUnderflow),
        };
        self.drives_relative = frame.drives_relative;
        self.axes_relative = frame.axes_relative;
        self.file_being_printed = frame.file;
        self.platform.pop_message_indent();

        // The extruder accumulators pick up whatever was actually
        // extruded while the state was saved.
        for drive in AXES..DRIVES {
            self.last_extruder_pos[drive - AXES] = self.slot.buffer[drive];
        }

        // Null move at the restored feedrate. Extruder slots are deltas
        // on the wire to the planner, so they must go out as zero.
        for drive in AXES..DRIVES {
            self.slot.buffer[drive] = 0.0;
        }
        self.slot.buffer[DRIVES] = frame.feedrate;
        self.slot.publish(false);
        Ok(true)
    }

    /// Handle a dwell (G4). Waits for the planner to drain, then for the
    /// wall clock.
    pub(crate) fn do_dwell(&mut self, src: SourceId, mv: &mut dyn Planner) -> bool {
        if !self.buffer_mut(src).seen(b'P') {
            return true; // No time given: nothing to wait for.
        }
        let dwell = 0.001 * self.buffer_mut(src).get_ivalue() as f64;
        if !mv.all_moves_finished() {
            return false;
        }
        self.do_dwell_time(dwell, mv)
    }

    pub(crate) fn do_dwell_time(&mut self, dwell: f64, mv: &mut dyn Planner) -> bool {
        if self.dwell_waiting {
            if self.platform.time() >= self.dwell_end {
                self.dwell_waiting = false;
                mv.resume_moving();
                return true;
            }
            return false;
        }
        self.dwell_waiting = true;
        self.dwell_end = self.platform.time() + dwell;
        false
    }

    pub(crate) fn reset_delay_seconds() -> f64 {
        RESET_DELAY_SECONDS
    }

    /// Emergency stop: safe every output and forget everything in flight.
    pub(crate) fn emergency_stop(&mut self, heat: &mut dyn Heat) {
        tracing::error!("emergency stop");
        heat.switch_off_all();
        for drive in 0..DRIVES {
            self.platform.disable_drive(drive);
        }
        self.reset();
    }

    /// Pause the print from the outside (web interface). Any wait-type
    /// command in progress on the file source is suspended too.
    pub fn pause_file_print(&mut self) {
        if self.file_being_printed.is_some() {
            self.file_to_print = self.file_being_printed.take();
            self.file_buffer.pause();
        }
    }

    /// Cumulative commanded extrusion for one extruder drive.
    pub fn extruder_position(&self, extruder: usize) -> f64 {
        if extruder < EXTRUDERS {
            self.last_extruder_pos[extruder]
        } else {
            0.0
        }
    }

    pub fn axis_homed(&self, axis: usize) -> bool {
        self.axis_is_homed[axis]
    }

    pub fn printing_from_file(&self) -> bool {
        self.file_being_printed.is_some()
    }

    pub fn axes_relative(&self) -> bool {
        self.axes_relative
    }

    pub fn drives_relative(&self) -> bool {
        self.drives_relative
    }

    pub fn current_distance_scale(&self) -> f64 {
        self.distance_scale
    }
}
