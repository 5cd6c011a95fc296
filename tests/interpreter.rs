//! End-to-end interpreter behavior: units, modes, the state stack,
//! speed factors, dwells and source priority.

mod common;

use common::Machine;
use kiln_rs::{AXES, DRIVES, X_AXIS, Y_AXIS, Z_AXIS};

#[test]
fn inch_mode_scales_targets_and_feedrate() {
    let mut m = Machine::new();
    m.run_line("G20");
    m.run_line("G1 X1 F60");

    let mv = m
        .moves
        .iter()
        .find(|mv| mv.coords[X_AXIS] != 0.0)
        .expect("no move queued");
    assert!((mv.coords[X_AXIS] - 25.4).abs() < 1e-9);
    // F60 in inches/min is 25.4 mm/s.
    assert!((mv.coords[DRIVES] - 25.4).abs() < 1e-9);
}

#[test]
fn relative_extrusion_accumulates() {
    let mut m = Machine::new();
    m.with_tool();
    m.run_line("M83");
    m.run_line("G1 E5 F300");
    m.run_line("G1 E3 F300");

    let extrusions = m.extrusions();
    assert_eq!(extrusions.len(), 2);
    assert!((extrusions[0][0] - 5.0).abs() < 1e-9);
    assert!((extrusions[1][0] - 3.0).abs() < 1e-9);
    assert!((m.gcodes.extruder_position(0) - 8.0).abs() < 1e-9);
}

#[test]
fn absolute_extrusion_sends_deltas() {
    let mut m = Machine::new();
    m.with_tool();
    m.run_line("M82");
    m.run_line("G1 E5 F300");
    m.run_line("G1 E8 F300");

    let extrusions = m.extrusions();
    assert_eq!(extrusions.len(), 2);
    assert!((extrusions[0][0] - 5.0).abs() < 1e-9);
    assert!((extrusions[1][0] - 3.0).abs() < 1e-9);
    assert!((m.gcodes.extruder_position(0) - 8.0).abs() < 1e-9);

    // Switching to relative resets the accumulators.
    m.run_line("M83");
    assert_eq!(m.gcodes.extruder_position(0), 0.0);
}

#[test]
fn extrusion_factor_scales_wire_values_only() {
    let mut m = Machine::new();
    m.with_tool();
    m.run_line("M83");
    m.run_line("M221 S50");
    m.run_line("G1 E10 F300");

    let extrusions = m.extrusions();
    assert_eq!(extrusions.len(), 1);
    assert!((extrusions[0][0] - 5.0).abs() < 1e-9);
    // The accumulator tracks what was commanded, not what was scaled.
    assert!((m.gcodes.extruder_position(0) - 10.0).abs() < 1e-9);
}

#[test]
fn extrude_without_tool_is_an_error() {
    let mut m = Machine::new();
    m.run_line("G1 E5 F300");
    let out = m.serial_text();
    assert!(out.contains("no tool selected"), "got: {}", out);
    assert!(m.extrusions().is_empty());
}

#[test]
fn bad_checksum_requests_resend_and_queues_nothing() {
    let mut m = Machine::new();
    m.run_line("N10 G1 X1*99");
    let out = m.serial_text();
    assert!(out.contains("10"), "got: {}", out);
    assert!(out.contains("rs"), "got: {}", out);
    assert!(m.moves.is_empty());
}

#[test]
fn good_checksum_executes_the_bare_command() {
    let mut m = Machine::new();
    let line = "N4 G1 X7 F600";
    let cs = line.bytes().fold(0u8, |a, b| a ^ b);
    m.run_line(&format!("{}*{}", line, cs));
    assert_eq!(m.user_pos()[X_AXIS], 7.0);
}

#[test]
fn push_pop_restores_modes_and_feedrate() {
    let mut m = Machine::new();
    m.run_line("G1 X1 F1000");
    m.run_line("M120");
    m.run_line("G91");
    m.run_line("G1 X1 F500");
    m.run_line("M121");

    assert!(!m.gcodes.axes_relative());
    assert!(m.gcodes.drives_relative());

    m.run_line("G1 X2");
    let pos = m.user_pos();
    assert_eq!(pos[X_AXIS], 2.0);
    assert!((pos[DRIVES] - 1000.0 / 60.0).abs() < 1e-9);
}

#[test]
fn push_pop_without_changes_is_identity() {
    let mut m = Machine::new();
    m.with_tool();
    m.run_line("M83");
    m.run_line("G1 X3 Y4 E2 F900");
    let before_pos = m.user_pos();
    let before_accum = m.gcodes.extruder_position(0);
    let before_modes = (m.gcodes.axes_relative(), m.gcodes.drives_relative());

    m.run_line("M120");
    m.run_line("M121");

    assert_eq!(m.user_pos(), before_pos);
    assert_eq!(m.gcodes.extruder_position(0), before_accum);
    assert_eq!(
        (m.gcodes.axes_relative(), m.gcodes.drives_relative()),
        before_modes
    );
}

#[test]
fn pop_underflow_and_push_overflow_report_errors() {
    let mut m = Machine::new();
    m.run_line("M121");
    let out = m.serial_text();
    assert!(out.contains("stack underflow"), "got: {}", out);

    for _ in 0..5 {
        m.run_line("M120");
    }
    m.serial_text();
    m.run_line("M120");
    let out = m.serial_text();
    assert!(out.contains("stack overflow"), "got: {}", out);
}

#[test]
fn g92_sets_position_and_homed_flags_without_motion() {
    let mut m = Machine::new();
    let moves_before = m.moves.len();
    m.run_line("G92 X10 Y20");
    assert_eq!(m.moves.len(), moves_before);
    assert!(m.gcodes.axis_homed(X_AXIS));
    assert!(m.gcodes.axis_homed(Y_AXIS));
    assert!(!m.gcodes.axis_homed(Z_AXIS));

    let pos = m.user_pos();
    assert_eq!(pos[X_AXIS], 10.0);
    assert_eq!(pos[Y_AXIS], 20.0);
}

#[test]
fn g92_on_extruder_resets_accumulator_without_motion() {
    let mut m = Machine::new();
    m.with_tool();
    m.run_line("M83");
    m.run_line("G1 E5 F300");
    let moves_before = m.moves.len();

    m.run_line("G92 E0");
    assert_eq!(m.moves.len(), moves_before);
    assert_eq!(m.gcodes.extruder_position(0), 0.0);

    m.run_line("G92 E7");
    assert_eq!(m.moves.len(), moves_before);
    assert_eq!(m.gcodes.extruder_position(0), 7.0);
}

#[test]
fn homed_axes_are_clamped_to_the_bed() {
    let mut m = Machine::new();
    m.run_line("G92 X0 Y0 Z0");
    m.run_line("G1 X-50 F600");
    assert_eq!(m.user_pos()[X_AXIS], 0.0);

    m.run_line("G1 X500 F600");
    assert_eq!(m.user_pos()[X_AXIS], 210.0);

    // M564 S0 lifts the limits.
    m.run_line("M564 S0");
    m.run_line("G1 X-50 F600");
    assert_eq!(m.user_pos()[X_AXIS], -50.0);
}

#[test]
fn z_is_never_clamped() {
    let mut m = Machine::new();
    m.run_line("G92 X0 Y0 Z0");
    m.run_line("G1 Z-3 F60");
    assert_eq!(m.user_pos()[Z_AXIS], -3.0);
}

#[test]
fn speed_factor_applies_to_queued_and_future_moves() {
    let mut m = Machine::new();
    m.run_line("G1 X1 F600");
    assert!((m.user_pos()[DRIVES] - 10.0).abs() < 1e-9);

    m.run_line("M220 S50");
    // The inherited feedrate is scaled once on the next move.
    m.run_line("G1 X2");
    assert!((m.user_pos()[DRIVES] - 5.0).abs() < 1e-9);

    // Fresh F fields use the new factor directly.
    m.run_line("G1 X3 F600");
    assert!((m.user_pos()[DRIVES] - 5.0).abs() < 1e-9);
}

#[test]
fn endstop_moves_serialize() {
    let mut m = Machine::new();
    m.planner.move_ticks = 40;
    m.run_line("G92 X0 Y0 Z0");
    m.send_serial("G1 X50 F600 S1\nG1 X10 F600\n");
    m.run(10);
    // The endstop move is in flight; the follow-up must not be queued.
    assert_eq!(m.moves.len(), 1);
    assert!(m.moves[0].check_endstops);
    m.run(2000);
    assert_eq!(m.moves.len(), 2);
    assert!(!m.moves[1].check_endstops);
}

#[test]
fn web_bytes_preempt_the_file_source() {
    let mut m = Machine::new();
    let job: String = (1..=30).map(|i| format!("G1 X{} F6000\n", i)).collect();
    m.write_print_file("job.g", &job);
    m.run_line("M23 job.g");
    m.send_serial("M24\n");
    m.run(20);
    assert!(m.gcodes.printing_from_file());

    // With web traffic pending, the tick serves the web source and the
    // file does not advance.
    let queued_before = m.moves.len();
    m.send_web("M114\n");
    m.step();
    assert_eq!(m.moves.len(), queued_before);
    assert!(m.web_text().contains("X:"));

    // Once the web source is quiet the print proceeds to the end.
    m.run(20000);
    assert_eq!(m.user_pos()[X_AXIS], 30.0);
    assert!(!m.gcodes.printing_from_file());
}

#[test]
fn dwell_waits_for_the_clock() {
    let mut m = Machine::new();
    m.run_line("G4 P500");
    m.serial_text();
    m.send_serial("M114\n");
    m.run(50);
    // The dwell blocks the serial source, so M114 cannot run yet.
    assert!(!m.serial_text().contains("X:"));

    m.clock.advance(0.6);
    m.run(100);
    assert!(m.serial_text().contains("X:"));
}

#[test]
fn m999_waits_then_requests_reset() {
    let mut m = Machine::new();
    m.run_line("M999");
    assert!(!m.gcodes.platform.reset_requested());
    m.clock.advance(0.6);
    m.run(50);
    assert!(m.gcodes.platform.reset_requested());
}

#[test]
fn emergency_stop_clears_everything() {
    use kiln_rs::heat::Heat;
    use kiln_rs::HOT_BED;

    let mut m = Machine::new();
    m.run_line("M140 S60");
    assert!(!m.heat.switched_off(HOT_BED));

    // A long print with plenty of lines left.
    let job: String = std::iter::repeat("G1 X10 F6000\nG1 X0 F6000\n")
        .take(50)
        .collect();
    m.write_print_file("job.g", &job);
    m.run_line("M23 job.g");
    m.run_line("M24");
    m.run(100);
    assert!(m.gcodes.printing_from_file());

    m.run_line("M112");
    assert!(!m.gcodes.printing_from_file());
    assert!(m.gcodes.read_move().is_none());
    assert!(m.heat.switched_off(HOT_BED));
    assert!(m.heat.all_at_targets(true));
}

#[test]
fn unknown_codes_report_errors() {
    let mut m = Machine::new();
    m.run_line("G57");
    let out = m.serial_text();
    assert!(out.contains("invalid G Code"), "got: {}", out);

    m.run_line("M777");
    let out = m.serial_text();
    assert!(out.contains("invalid M Code"), "got: {}", out);
}

#[test]
fn native_dialect_suppresses_ok_and_prefixes_errors() {
    let mut m = Machine::with_dialect("native");
    m.run_line("G21");
    assert_eq!(m.serial_text(), "");

    m.run_line("G57");
    let out = m.serial_text();
    assert!(out.starts_with("Error: invalid G Code"), "got: {}", out);
}

#[test]
fn replies_for_web_commands_go_to_the_web_channel() {
    let mut m = Machine::new();
    m.send_web("M114\n");
    m.run(100);
    let web = m.web_text();
    assert!(web.contains("X:"), "got: {}", web);
    // No ok suffix on the web channel, and nothing on serial.
    assert!(!web.contains("ok"));
    assert_eq!(m.serial_text(), "");
}

#[test]
fn m114_reports_all_drives() {
    let mut m = Machine::new();
    m.run_line("G1 X1.5 Y2 F600");
    m.run_line("M114");
    let out = m.serial_text();
    assert!(out.contains("X:1.500"), "got: {}", out);
    assert!(out.contains("E0:"), "got: {}", out);
    assert!(out.contains("E1:"), "got: {}", out);
}

#[test]
fn m220_and_m221_reject_nonsense() {
    let mut m = Machine::new();
    m.run_line("M220 S0");
    m.run_line("G1 X1 F600");
    // A zero speed factor was ignored; the default 1/60 still applies.
    assert!((m.user_pos()[DRIVES] - 10.0).abs() < 1e-9);

    m.with_tool();
    m.run_line("M221 S-40");
    m.run_line("M83");
    m.run_line("G1 E2 F300");
    let extrusions = m.extrusions();
    // The negative factor was ignored.
    assert!((extrusions[0][0] - 2.0).abs() < 1e-9);
}

#[test]
fn e_argument_count_must_match_tool_drives() {
    let mut m = Machine::new();
    m.run_line("M563 P2 D0:1 H1");
    m.run_line("T2");
    m.serial_text();
    m.run_line("M83");
    m.run_line("G1 E1:2:3 F300");
    let out = m.serial_text();
    assert!(
        out.contains("Wrong number of extruder drives"),
        "got: {}",
        out
    );

    // Two values for two drives works, scaled independently.
    m.run_line("G1 E1:2 F300");
    let extrusions = m.extrusions();
    assert_eq!(extrusions.len(), 1);
    assert!((extrusions[0][0] - 1.0).abs() < 1e-9);
    assert!((extrusions[0][1] - 2.0).abs() < 1e-9);
}

#[test]
fn axes_and_extruder_counts_are_consistent() {
    assert_eq!(AXES + kiln_rs::EXTRUDERS, DRIVES);
}
