//! Storage-facing commands: printing from file, uploads, listings,
//! temperature reporting and machine configuration reports.

mod common;

use common::Machine;
use kiln_rs::heat::Heat;
use kiln_rs::{X_AXIS, HOT_BED};

#[test]
fn m20_lists_files_in_both_dialects() {
    let mut m = Machine::new();
    m.write_print_file("a.g", "G21\n");
    m.write_print_file("b.g", "G21\n");

    m.run_line("M20");
    let out = m.serial_text();
    assert!(out.contains("Begin file list"), "got: {}", out);
    assert!(out.contains("\"a.g\",\"b.g\""), "got: {}", out);
    assert!(out.contains("End file list"), "got: {}", out);

    let mut m = Machine::with_dialect("native");
    m.write_print_file("a.g", "G21\n");
    m.run_line("M20");
    let out = m.serial_text();
    assert!(out.contains("GCode files:"), "got: {}", out);
    assert!(out.contains("a.g"), "got: {}", out);
}

#[test]
fn m20_with_no_files_says_none() {
    let mut m = Machine::new();
    m.run_line("M20");
    let out = m.serial_text();
    assert!(out.contains("NONE"), "got: {}", out);
}

#[test]
fn print_flow_select_start_and_finish() {
    let mut m = Machine::new();
    m.write_print_file("job.g", "G1 X5 F600\nG1 X9 F600\n");

    m.run_line("M27");
    assert!(m.serial_text().contains("Not SD printing."));

    m.run_line("M23 job.g");
    let out = m.serial_text();
    assert!(out.contains("File opened"), "got: {}", out);
    assert!(!m.gcodes.printing_from_file());

    m.send_serial("M24\nM27\n");
    m.run(20);
    assert!(m.serial_text().contains("SD printing."));

    m.run(4000);
    assert_eq!(m.user_pos()[X_AXIS], 9.0);
    assert!(!m.gcodes.printing_from_file());
}

#[test]
fn m23_with_unknown_file_is_an_error() {
    let mut m = Machine::new();
    m.run_line("M23 missing.g");
    let out = m.serial_text();
    assert!(out.contains("GCode file not found"), "got: {}", out);
}

#[test]
fn m25_pauses_and_m24_resumes() {
    let mut m = Machine::new();
    let job: String = (0..40).map(|i| format!("G1 X{} F6000\n", i)).collect();
    m.write_print_file("job.g", &job);
    m.run_line("M23 job.g");
    m.send_serial("M24\n");
    m.run(50);
    assert!(m.gcodes.printing_from_file());

    m.send_serial("M25\n");
    m.run(100);
    assert!(!m.gcodes.printing_from_file());
    let paused_at = m.user_pos()[X_AXIS];

    m.run(500);
    // Nothing moves while paused.
    assert_eq!(m.user_pos()[X_AXIS], paused_at);

    m.send_serial("M24\n");
    m.run(20000);
    assert_eq!(m.user_pos()[X_AXIS], 39.0);
    assert!(!m.gcodes.printing_from_file());
}

#[test]
fn m28_m29_capture_a_file_verbatim() {
    let mut m = Machine::new();
    m.run_line("M28 cap.g");
    let out = m.serial_text();
    assert!(out.contains("Writing to file: cap.g"), "got: {}", out);

    m.run_line("G1 X1 ; keep this comment");
    m.run_line("G1 X2");
    m.run_line("M29");
    let out = m.serial_text();
    assert!(out.contains("Done saving file."), "got: {}", out);

    let written = m.read_gcodes_file("cap.g");
    assert_eq!(written, "G1 X1 ; keep this comment\nG1 X2\n");

    // Nothing was executed while capturing.
    assert!(m.moves.is_empty());
}

#[test]
fn m30_deletes_a_file() {
    let mut m = Machine::new();
    m.write_print_file("old.g", "G21\n");
    m.run_line("M30 old.g");
    assert!(!m.root.join("gcodes").join("old.g").exists());

    m.serial_text();
    m.run_line("M30 old.g");
    let out = m.serial_text();
    assert!(out.contains("Unsuccessful attempt to delete"), "got: {}", out);
}

#[test]
fn m559_writes_into_the_system_directory() {
    let mut m = Machine::new();
    m.run_line("M559 Pstartup.g");
    m.run_line("M82");
    m.run_line("M29");
    let content = std::fs::read_to_string(m.root.join("sys").join("startup.g")).unwrap();
    assert_eq!(content, "M82\n");
    // The captured M82 must not have touched the live state.
    assert!(m.gcodes.drives_relative());
}

#[test]
fn m503_streams_the_config_file() {
    let mut m = Machine::new();
    m.write_sys_file("config.g", "M208 X300\nM92 E400\n");
    m.run_line("M503");
    let out = m.serial_text();
    assert!(out.contains("M208 X300"), "got: {}", out);
    assert!(out.contains("M92 E400"), "got: {}", out);
}

#[test]
fn m560_captures_a_web_asset_until_the_sentinel() {
    let mut m = Machine::new();
    m.run_line("M560 Ppage.htm");
    m.send_serial("<h1>hello</h1>\n<!-- **EoF** -->");
    m.run(2000);

    let out = m.serial_text();
    assert!(out.contains("Done saving file."), "got: {}", out);
    assert_eq!(m.read_web_file("page.htm"), "<h1>hello</h1>\n");

    // The serial line is parsing G-code again.
    m.run_line("G1 X3 F600");
    assert_eq!(m.user_pos()[X_AXIS], 3.0);
}

#[test]
fn m104_and_m105_report_tool_temperatures() {
    let mut m = Machine::new();
    m.with_tool();
    m.run_line("M104 S200");
    m.run(200);
    m.serial_text();

    m.run_line("M105");
    let out = m.serial_text();
    assert!(out.contains("T:"), "got: {}", out);
    assert!(out.contains("B:"), "got: {}", out);
}

#[test]
fn m109_blocks_until_the_hotend_is_hot() {
    let mut m = Machine::new();
    m.with_tool();
    m.serial_text();
    m.run_line("M109 S150");
    let out = m.serial_text();
    assert!(out.contains("ok"), "got: {}", out);
    assert!((m.heat.temperature(1) - 150.0).abs() < 3.0);
}

#[test]
fn m190_blocks_until_the_bed_is_hot() {
    let mut m = Machine::new();
    m.serial_text();
    m.run_line("M190 S60");
    let out = m.serial_text();
    assert!(out.contains("ok"), "got: {}", out);
    assert!((m.heat.temperature(HOT_BED) - 60.0).abs() < 3.0);
}

#[test]
fn m115_and_m122_identify_the_firmware() {
    let mut m = Machine::new();
    m.run_line("M115");
    let out = m.serial_text();
    assert!(out.contains("FIRMWARE_NAME:Kiln-RS"), "got: {}", out);

    m.run_line("M122");
    let out = m.serial_text();
    assert!(out.contains("Kiln-RS"), "got: {}", out);
}

#[test]
fn network_settings_round_trip() {
    let mut m = Machine::new();
    m.run_line("M552 P192.168.1.5");
    m.serial_text();
    m.run_line("M552");
    let out = m.serial_text();
    assert!(out.contains("IP address: 192.168.1.5"), "got: {}", out);

    m.run_line("M540 P0xDE:0xAD:0xBE:0xEF:0x00:0x01");
    assert_eq!(
        m.gcodes.platform.network.mac_address,
        [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]
    );

    m.serial_text();
    m.run_line("M552 P1.2.3");
    let out = m.serial_text();
    assert!(out.contains("Dud IP address"), "got: {}", out);
}

#[test]
fn m92_sets_and_reports_steps_per_mm() {
    let mut m = Machine::new();
    m.run_line("M92 X100 E500");
    assert_eq!(m.gcodes.platform.drive_steps_per_unit(0), 100.0);
    // One E value is broadcast to every extruder drive.
    assert_eq!(m.gcodes.platform.drive_steps_per_unit(3), 500.0);
    assert_eq!(m.gcodes.platform.drive_steps_per_unit(4), 500.0);

    m.serial_text();
    m.run_line("M92");
    let out = m.serial_text();
    assert!(out.contains("Steps/mm"), "got: {}", out);
    assert!(out.contains("100.0"), "got: {}", out);
}

#[test]
fn m208_sets_axis_limits() {
    let mut m = Machine::new();
    m.run_line("M208 X300 Y310 Z320");
    assert_eq!(m.gcodes.platform.axis_maximum(0), 300.0);
    m.run_line("M208 S1 X-5");
    assert_eq!(m.gcodes.platform.axis_minimum(0), -5.0);

    m.serial_text();
    m.run_line("M208");
    let out = m.serial_text();
    assert!(out.contains("X:300.0"), "got: {}", out);
}

#[test]
fn m301_and_m305_set_and_report_heater_parameters() {
    let mut m = Machine::new();
    m.run_line("M301 H1 P12 I0.5 D40");
    let pid = m.heat.pid_parameters(1);
    assert_eq!(pid.kp, 12.0);
    assert_eq!(pid.ki, 0.5);
    assert_eq!(pid.kd, 40.0);

    m.serial_text();
    m.run_line("M301 H1");
    let out = m.serial_text();
    assert!(out.contains("P:12.00"), "got: {}", out);

    m.run_line("M305 P1 T10000 B3950");
    let t = m.heat.thermistor_parameters(1);
    assert_eq!(t.r25, 10_000.0);
    assert_eq!(t.beta, 3950.0);

    m.serial_text();
    m.run_line("M305 P1");
    let out = m.serial_text();
    assert!(out.contains("T:10000.0"), "got: {}", out);
}

#[test]
fn m106_fan_control_with_inversion() {
    let mut m = Machine::new();
    m.run_line("M106 S128");
    assert_eq!(m.gcodes.platform.fan_speed(), 128.0);
    m.run_line("M107");
    assert_eq!(m.gcodes.platform.fan_speed(), 0.0);

    m.run_line("M106 I1 S255");
    assert_eq!(m.gcodes.platform.fan_speed(), 0.0);
    m.run_line("M107");
    assert_eq!(m.gcodes.platform.fan_speed(), 255.0);
}

#[test]
fn m80_and_m81_switch_atx_power() {
    let mut m = Machine::new();
    m.run_line("M80");
    assert!(m.gcodes.platform.atx_power());
    m.run_line("M81");
    assert!(!m.gcodes.platform.atx_power());
}

#[test]
fn m562_clears_a_heater_fault() {
    let mut m = Machine::new();
    m.heat.set_fault(1);
    m.run_line("M562 P1");
    assert!(!m.heat.has_fault(1));
}

#[test]
fn m563_rejects_duplicate_tools() {
    let mut m = Machine::new();
    m.run_line("M563 P0 D0 H1");
    m.serial_text();
    m.run_line("M563 P0 D1 H2");
    let out = m.serial_text();
    assert!(out.contains("already defined"), "got: {}", out);
}
