//! Reply formatting and host-dialect emulation.
//!
//! Replies from commands that arrived on the serial line are formatted in
//! the dialect selected by M555, so hosts written for other firmwares get
//! the acknowledgements they expect. Replies to the other sources always
//! use the native format, on that source's own back-channel, without the
//! `ok` suffix.

use super::{GCodes, SourceId};
use crate::motion::Planner;
use crate::platform::Compatibility;
use crate::{AXES, DRIVES, X_AXIS, Y_AXIS, Z_AXIS};

impl GCodes {
    /// Emit exactly one reply for a completed command.
    pub(crate) fn handle_reply(
        &mut self,
        src: SourceId,
        error: bool,
        reply: &str,
        gmort: u8,
        code: i64,
        resend: bool,
    ) {
        if src != SourceId::Serial {
            if reply.is_empty() && !error {
                return;
            }
            let indent = "  ".repeat(self.platform.message_indent());
            let text = if error {
                format!("{}Error: {}\n", indent, reply)
            } else {
                format!("{}{}\n", indent, reply)
            };
            self.web_write(&text);
            return;
        }

        let compatibility = self.platform.emulating();
        let response = if resend { "rs" } else { "ok" };

        if compatibility.is_native() {
            if reply.is_empty() {
                return;
            }
            let text = if error {
                format!("Error: {}\n", reply)
            } else {
                format!("{}\n", reply)
            };
            self.serial_write(&text);
            return;
        }

        match compatibility {
            Compatibility::Marlin => {
                if gmort == b'M' && code == 20 {
                    let text = format!("Begin file list\n{}\nEnd file list\n{}\n", reply, response);
                    self.serial_write(&text);
                    return;
                }
                if gmort == b'M' && code == 28 {
                    let text = format!("{}\n{}\n", response, reply);
                    self.serial_write(&text);
                    return;
                }
                if (gmort == b'M' && code == 105) || (gmort == b'G' && code == 998) {
                    let text = format!("{} {}\n", response, reply);
                    self.serial_write(&text);
                    return;
                }
                let mut text = String::new();
                if !reply.is_empty() {
                    text.push_str(reply);
                    text.push('\n');
                }
                text.push_str(response);
                text.push('\n');
                self.serial_write(&text);
            }
            Compatibility::Teacup | Compatibility::Sprinter | Compatibility::Repetier => {
                let name = match compatibility {
                    Compatibility::Teacup => "teacup",
                    Compatibility::Sprinter => "sprinter",
                    _ => "repetier",
                };
                let text = format!("Emulation of {} is not yet supported.\n", name);
                self.serial_write(&text);
            }
            // Native cases returned above.
            Compatibility::Me | Compatibility::ReprapFirmware => {}
        }
    }

    /// The current position as a printable string (M114). Positions are
    /// updated when a move completes, so this does not report
    /// mid-movement coordinates.
    pub(crate) fn current_coordinates(&self, mv: &dyn Planner) -> String {
        let mut live = [0.0f64; DRIVES + 1];
        mv.live_coordinates(&mut live);
        let mut s = format!(
            "X:{:.3} Y:{:.3} Z:{:.3} ",
            live[X_AXIS], live[Y_AXIS], live[Z_AXIS]
        );
        for drive in AXES..DRIVES {
            s.push_str(&format!("E{}:{:.3} ", drive - AXES, live[drive]));
        }
        s
    }
}
