//! Shared harness: a complete simulated machine driven tick by tick.

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};

use tempfile::TempDir;

use kiln_rs::config::Config;
use kiln_rs::gcode::GCodes;
use kiln_rs::heat::SimHeat;
use kiln_rs::motion::{MoveRecord, Planner, SimPlanner};
use kiln_rs::platform::{Platform, TestClock};
use kiln_rs::storage::MassStorage;
use kiln_rs::transport::ChannelTransport;
use kiln_rs::DRIVES;

pub struct Machine {
    pub gcodes: GCodes,
    pub planner: SimPlanner,
    pub heat: SimHeat,
    pub clock: TestClock,
    /// Every move the slot handed to the planner, in order.
    pub moves: Vec<MoveRecord>,
    pub serial_tx: Sender<u8>,
    pub serial_rx: Receiver<String>,
    pub web_tx: Sender<u8>,
    pub web_rx: Receiver<String>,
    pub root: PathBuf,
    _dir: TempDir,
}

impl Machine {
    pub fn new() -> Self {
        // Marlin acknowledgements make command completion observable.
        Self::with_dialect("marlin")
    }

    pub fn with_dialect(dialect: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.console.dialect = dialect.to_string();
        config.storage.root = dir.path().to_path_buf();

        let storage = MassStorage::new(dir.path()).unwrap();
        let clock = TestClock::new();
        let platform = Platform::new(&config, Box::new(clock.clone()));

        let (serial_tx, serial_byte_rx) = mpsc::channel();
        let (serial_reply_tx, serial_rx) = mpsc::channel();
        let (web_tx, web_byte_rx) = mpsc::channel();
        let (web_reply_tx, web_rx) = mpsc::channel();

        let serial = ChannelTransport::new(serial_byte_rx, Some(serial_reply_tx));
        let web = ChannelTransport::new(web_byte_rx, Some(web_reply_tx));

        let gcodes = GCodes::new(platform, storage, Box::new(web), Box::new(serial));
        let planner = SimPlanner::new(&config);

        Machine {
            gcodes,
            planner,
            heat: SimHeat::new(),
            clock,
            moves: Vec::new(),
            serial_tx,
            serial_rx,
            web_tx,
            web_rx,
            root: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    pub fn send_serial(&self, text: &str) {
        for b in text.bytes() {
            self.serial_tx.send(b).unwrap();
        }
    }

    pub fn send_web(&self, text: &str) {
        for b in text.bytes() {
            self.web_tx.send(b).unwrap();
        }
    }

    /// One machine tick: interpreter, move hand-off, planner, heaters.
    pub fn step(&mut self) {
        self.gcodes.spin(&mut self.planner, &mut self.heat);
        if let Some(record) = self.gcodes.read_move() {
            self.moves.push(record);
            self.planner.begin_move(record);
        }
        self.planner.tick();
        self.heat.spin();
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Feed a line on the serial source and give it time to complete.
    pub fn run_line(&mut self, line: &str) {
        self.send_serial(line);
        self.send_serial("\n");
        self.run(600);
    }

    pub fn serial_text(&mut self) -> String {
        let mut out = String::new();
        while let Ok(chunk) = self.serial_rx.try_recv() {
            out.push_str(&chunk);
        }
        out
    }

    pub fn web_text(&mut self) -> String {
        let mut out = String::new();
        while let Ok(chunk) = self.web_rx.try_recv() {
            out.push_str(&chunk);
        }
        out
    }

    pub fn user_pos(&self) -> [f64; DRIVES + 1] {
        let mut pos = [0.0; DRIVES + 1];
        assert!(
            self.planner.current_user_position(&mut pos),
            "planner still busy"
        );
        pos
    }

    /// Moves that extrude, with their per-drive deltas. Null moves from
    /// push/pop carry zero extruder slots and are skipped.
    pub fn extrusions(&self) -> Vec<[f64; kiln_rs::EXTRUDERS]> {
        self.moves
            .iter()
            .filter(|m| m.coords[kiln_rs::AXES..DRIVES].iter().any(|&e| e != 0.0))
            .map(|m| {
                let mut e = [0.0; kiln_rs::EXTRUDERS];
                e.copy_from_slice(&m.coords[kiln_rs::AXES..DRIVES]);
                e
            })
            .collect()
    }

    pub fn write_sys_file(&self, name: &str, content: &str) {
        fs::write(self.root.join("sys").join(name), content).unwrap();
    }

    pub fn write_print_file(&self, name: &str, content: &str) {
        fs::write(self.root.join("gcodes").join(name), content).unwrap();
    }

    pub fn read_gcodes_file(&self, name: &str) -> String {
        fs::read_to_string(self.root.join("gcodes").join(name)).unwrap()
    }

    pub fn read_web_file(&self, name: &str) -> String {
        fs::read_to_string(self.root.join("www").join(name)).unwrap()
    }

    /// Define tool 0 (drive 0, heater 1) and select it.
    pub fn with_tool(&mut self) {
        self.run_line("M563 P0 D0 H1");
        self.run_line("T0");
        assert_eq!(self.gcodes.tools.current_number(), Some(0));
    }
}
