//! File operations driven from the command stream: queueing prints,
//! capturing uploads (M28/M29, M559, M560) and streaming the config file.

use super::{GCodeError, GCodes, SourceId};
use crate::heat::Heat;
use crate::motion::Planner;
use crate::platform::Compatibility;
use crate::storage::FileDirectory;

/// Marker ending a web-asset upload captured byte-by-byte.
pub(crate) const EOF_MARKER: &[u8] = b"<!-- **EoF** -->";

/// Name of the machine configuration file in the system directory.
pub(crate) const CONFIG_FILE: &str = "config.g";

/// Default target of a web interface upload.
pub(crate) const INDEX_PAGE: &str = "reprap.htm";

impl GCodes {
    /// Select a file from the G-code directory for a later M24. Cancels
    /// any pause left behind by an earlier stop.
    pub(crate) fn queue_file_to_print(&mut self, file_name: &str) -> Result<(), GCodeError> {
        self.file_to_print = None;
        self.buffer_mut(SourceId::File).cancel_pause();
        match self.storage.open(FileDirectory::GCodes, file_name, false) {
            Ok(file) => {
                self.file_to_print = Some(file);
                Ok(())
            }
            Err(_) => Err(GCodeError::PrintFileNotFound),
        }
    }

    pub(crate) fn delete_file(&mut self, file_name: &str) -> Result<(), GCodeError> {
        self.storage
            .delete(FileDirectory::GCodes, file_name)
            .map_err(|_| GCodeError::DeleteFailed(file_name.to_string()))
    }

    /// Open a capture target and put the initiating buffer into
    /// file-writing mode.
    pub(crate) fn open_file_to_write(
        &mut self,
        dir: FileDirectory,
        file_name: &str,
        src: SourceId,
    ) -> Result<(), GCodeError> {
        self.eof_counter = 0;
        match self.storage.open(dir, file_name, true) {
            Ok(file) => {
                self.file_being_written = Some(file);
                self.buffer_mut(src).set_writing_directory(Some(dir));
                Ok(())
            }
            Err(_) => Err(GCodeError::OpenForWriteFailed(file_name.to_string())),
        }
    }

    /// Capture one byte of a binary web-asset upload, watching for the
    /// end-of-file marker. Bytes that start matching the marker are held
    /// back and flushed if the match falls through.
    pub(crate) fn write_html_to_file(&mut self, src: SourceId, b: u8) {
        if self.file_being_written.is_none() {
            tracing::error!("attempt to write to a file that is not open");
            return;
        }

        if self.eof_counter != 0 && b != EOF_MARKER[self.eof_counter] {
            let held = self.eof_counter;
            if let Some(file) = self.file_being_written.as_mut() {
                for &m in &EOF_MARKER[..held] {
                    file.write_byte(m);
                }
            }
            self.eof_counter = 0;
        }

        if b == EOF_MARKER[self.eof_counter] {
            self.eof_counter += 1;
            if self.eof_counter >= EOF_MARKER.len() {
                self.file_being_written = None;
                self.buffer_mut(src).set_writing_directory(None);
                let reply = if self.platform.emulating() == Compatibility::Marlin {
                    "Done saving file."
                } else {
                    ""
                };
                self.handle_reply(src, false, reply, b'M', 560, false);
            }
        } else if let Some(file) = self.file_being_written.as_mut() {
            file.write_byte(b);
        }
    }

    /// Capture one complete line of an upload. M29 ends the capture; a
    /// resend request passes straight back to the uploader.
    pub(crate) fn write_gcode_to_file(
        &mut self,
        src: SourceId,
        _mv: &mut dyn Planner,
        _heat: &mut dyn Heat,
    ) {
        if self.file_being_written.is_none() {
            tracing::error!("attempt to write to a file that is not open");
            self.buffer_mut(src).set_finished(true);
            return;
        }

        // End of upload?
        if self.buffer_mut(src).seen(b'M') && self.buffer_mut(src).get_ivalue() == 29 {
            self.file_being_written = None;
            self.buffer_mut(src).set_writing_directory(None);
            let reply = if self.platform.emulating() == Compatibility::Marlin {
                "Done saving file."
            } else {
                ""
            };
            self.handle_reply(src, false, reply, b'M', 29, false);
            self.buffer_mut(src).set_finished(true);
            return;
        }

        // A failed line arrives as its own resend request.
        if self.buffer_mut(src).seen(b'G') && self.buffer_mut(src).get_ivalue() == 998 {
            if self.buffer_mut(src).seen(b'P') {
                let line_number = self.buffer_mut(src).get_ivalue();
                self.handle_reply(src, false, &line_number.to_string(), b'G', 998, true);
                self.buffer_mut(src).set_finished(true);
                return;
            }
        }

        let line = self.buffer(src).content().to_string();
        if let Some(file) = self.file_being_written.as_mut() {
            file.write_str(&line);
            file.write_byte(b'\n');
        }
        self.handle_reply(src, false, "", b'G', 1, false);
        self.buffer_mut(src).set_finished(true);
    }

    /// Stream the configuration file to the serial line, one line per
    /// call (M503). Call until it returns true.
    pub(crate) fn send_config_to_line(&mut self) -> bool {
        if self.config_file_being_sent.is_none() {
            match self.storage.open(FileDirectory::Sys, CONFIG_FILE, false) {
                Ok(file) => {
                    self.config_file_being_sent = Some(file);
                    self.serial.write("\n");
                }
                Err(_) => {
                    tracing::warn!("configuration file not found");
                    return true;
                }
            }
        }

        let mut line = Vec::new();
        let mut eof = true;
        if let Some(file) = self.config_file_being_sent.as_mut() {
            while let Some(b) = file.read_byte() {
                line.push(b);
                if b == b'\n' {
                    eof = false;
                    break;
                }
            }
        }
        if !line.is_empty() {
            self.serial.write(&String::from_utf8_lossy(&line));
        }
        if eof {
            self.serial.write("\n");
            self.config_file_being_sent = None;
            return true;
        }
        false
    }

    /// Write a reply to the serial back-channel. Used by the formatter.
    pub(crate) fn serial_write(&mut self, text: &str) {
        self.serial.write(text);
    }

    /// Write a reply to the web back-channel.
    pub(crate) fn web_write(&mut self, text: &str) {
        self.web.write(text);
    }
}
