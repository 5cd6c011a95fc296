//! Kiln-RS: the command interpreter and motion coordinator of a hosted
//! 3D printer firmware.
//!
//! The interpreter reads G-code bytes from several concurrent sources,
//! parses them into typed commands and sequences the resulting motion,
//! thermal and tool actions against a downstream motion planner that
//! accepts at most one pending move at a time. Most operations are
//! designed not to wait: a handler that cannot make progress yet reports
//! `Step::Retry` and the spin loop calls it again on the next tick.

pub mod config;
pub mod gcode;
pub mod heat;
pub mod motion;
pub mod platform;
pub mod storage;
pub mod tools;
pub mod transport;

/// Number of motion axes (X, Y, Z).
pub const AXES: usize = 3;
/// Total drives: motion axes followed by extruder drives.
pub const DRIVES: usize = 5;
/// Extruder drive count.
pub const EXTRUDERS: usize = DRIVES - AXES;
/// Heater count. The bed is always heater 0.
pub const HEATERS: usize = 3;
/// Heater index of the heated bed.
pub const HOT_BED: usize = 0;

/// Tag letters of the motion axes, indexed by axis number.
pub const AXIS_LETTERS: [u8; AXES] = *b"XYZ";
/// Tag letter introducing the extruder drive list.
pub const EXTRUDE_LETTER: u8 = b'E';
/// Tag letter carrying the feedrate.
pub const FEEDRATE_LETTER: u8 = b'F';

pub const INCH_TO_MM: f64 = 25.4;

pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;
