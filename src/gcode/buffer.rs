//! A single G-code line and its field accessors.
//!
//! Each input source owns one of these. Bytes go in one at a time via
//! `put`; when a full line has been assembled the buffer arms itself and
//! the field accessors (`seen`, `get_fvalue`, ...) read tokens out of it.
//! Checksummed lines are verified on arrival: a mismatch replaces the
//! line with a synthetic `M998 P<n>` resend request, a match strips the
//! line number and checksum so handlers only ever see the bare command.

use crate::storage::FileDirectory;

/// Capacity of a command line, including the terminator.
pub const COMMAND_LENGTH: usize = 512;

const LIST_SEPARATOR: u8 = b':';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Waiting for bytes.
    Idle,
    /// A complete line is ready to act on.
    Armed,
    /// A handler has started this line and asked to be re-entered.
    Executing,
    /// Execution suspended (print pause).
    Paused,
}

pub struct CommandBuffer {
    data: [u8; COMMAND_LENGTH],
    write_ptr: usize,
    read_ptr: Option<usize>,
    in_comment: bool,
    state: BufferState,
    identity: &'static str,
    writing_directory: Option<FileDirectory>,
}

impl CommandBuffer {
    pub fn new(identity: &'static str) -> Self {
        Self {
            data: [0; COMMAND_LENGTH],
            write_ptr: 0,
            read_ptr: None,
            in_comment: false,
            state: BufferState::Idle,
            identity,
            writing_directory: None,
        }
    }

    /// Drop any line in progress and return to idle. The buffer content
    /// itself survives until the next line overwrites it.
    pub fn reset(&mut self) {
        self.write_ptr = 0;
        self.read_ptr = None;
        self.in_comment = false;
        self.state = BufferState::Idle;
    }

    pub fn identity(&self) -> &'static str {
        self.identity
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// A handler has started this line and has not finished it.
    pub fn active(&self) -> bool {
        self.state == BufferState::Executing
    }

    pub fn set_finished(&mut self, finished: bool) {
        self.state = if finished {
            BufferState::Idle
        } else {
            BufferState::Executing
        };
    }

    pub fn pause(&mut self) {
        if self.state == BufferState::Executing {
            self.state = BufferState::Paused;
        }
    }

    pub fn cancel_pause(&mut self) {
        if self.state == BufferState::Paused {
            self.state = BufferState::Executing;
        }
    }

    pub fn writing_directory(&self) -> Option<FileDirectory> {
        self.writing_directory
    }

    pub fn set_writing_directory(&mut self, dir: Option<FileDirectory>) {
        self.writing_directory = dir;
    }

    /// The assembled line as text.
    pub fn content(&self) -> &str {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_LENGTH - 1);
        std::str::from_utf8(&self.data[..end]).unwrap_or("")
    }

    /// Add one byte. Returns true when the line is complete and armed.
    pub fn put(&mut self, c: u8) -> bool {
        self.data[self.write_ptr] = c;

        if c == b';' {
            self.in_comment = true;
        }

        if c == b'\n' || c == 0 {
            self.data[self.write_ptr] = 0;
            self.write_ptr = 0;
            self.read_ptr = None;
            self.in_comment = false;
            if self.data[0] != 0 && self.writing_directory.is_none() {
                tracing::debug!("{}: {}", self.identity, self.content());
            }

            if self.seen(b'*') {
                let sent = self.get_ivalue();
                let computed = i64::from(self.checksum());
                self.seen(b'N');
                if sent != computed {
                    let line_number = self.get_ivalue();
                    self.load(&format!("M998 P{}", line_number));
                    self.state = BufferState::Armed;
                    return true;
                }
                self.strip_frame();
                self.read_ptr = None;
            }

            self.state = BufferState::Armed;
            return true;
        }

        if !self.in_comment || self.writing_directory.is_some() {
            self.write_ptr += 1;
        }

        if self.write_ptr >= COMMAND_LENGTH - 1 {
            tracing::error!("{}: command line overflow, discarded", self.identity);
            self.write_ptr = 0;
            self.data[0] = 0;
        }

        false
    }

    /// XOR of the bytes before the `*` checksum marker.
    fn checksum(&self) -> u8 {
        let mut cs = 0u8;
        for &b in self.data.iter() {
            if b == b'*' || b == 0 {
                break;
            }
            cs ^= b;
        }
        cs
    }

    /// Replace the buffer content with a synthetic command.
    fn load(&mut self, line: &str) {
        let bytes = line.as_bytes();
        let n = bytes.len().min(COMMAND_LENGTH - 1);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.data[n] = 0;
        self.write_ptr = 0;
        self.read_ptr = None;
    }

    /// Remove the leading `N<line>` word and the trailing `*<checksum>`,
    /// leaving the bare command in place.
    fn strip_frame(&mut self) {
        let mut i = 0;
        while self.data[i] != 0 && self.data[i] != b' ' {
            i += 1;
        }
        if self.data[i] == 0 {
            // Nothing after the line number.
            self.data[0] = 0;
            return;
        }
        i += 1;
        let mut out = 0;
        while self.data[i] != 0 && self.data[i] != b'*' {
            self.data[out] = self.data[i];
            out += 1;
            i += 1;
        }
        self.data[out] = 0;
    }

    /// Is the tag letter present? Leaves the read cursor on it for a
    /// subsequent get.
    pub fn seen(&mut self, letter: u8) -> bool {
        let mut p = 0;
        loop {
            let b = self.data[p];
            if b == 0 || b == b';' {
                break;
            }
            if b == letter {
                self.read_ptr = Some(p);
                return true;
            }
            p += 1;
        }
        self.read_ptr = None;
        false
    }

    /// Float value after the last-seen tag letter.
    pub fn get_fvalue(&mut self) -> f64 {
        let Some(p) = self.read_ptr.take() else {
            tracing::error!("{}: float read attempted before a search", self.identity);
            return 0.0;
        };
        self.parse_f64_at(p + 1)
    }

    /// Integer value after the last-seen tag letter. Accepts a `0x`
    /// prefix, which MAC addresses use.
    pub fn get_ivalue(&mut self) -> i64 {
        let Some(p) = self.read_ptr.take() else {
            tracing::error!("{}: int read attempted before a search", self.identity);
            return 0;
        };
        self.parse_i64_at(p + 1)
    }

    /// Colon-separated floats after the last-seen tag. The slice length
    /// is the requested count; a single supplied value is broadcast
    /// across all requested slots. Returns the resulting count, or 0 if
    /// the list was longer than the slice.
    pub fn get_float_array(&mut self, a: &mut [f64]) -> usize {
        let Some(start) = self.read_ptr.take() else {
            tracing::error!("{}: float list read attempted before a search", self.identity);
            return 0;
        };
        let mut p = start;
        let mut length = 0;
        loop {
            if length >= a.len() {
                tracing::error!(
                    "{}: float list too long: {}",
                    self.identity,
                    self.content()
                );
                return 0;
            }
            a[length] = self.parse_f64_at(p + 1);
            length += 1;
            p += 1;
            while self.data[p] != 0 && self.data[p] != b' ' && self.data[p] != LIST_SEPARATOR {
                p += 1;
            }
            if self.data[p] != LIST_SEPARATOR {
                break;
            }
        }
        if length == 1 && a.len() > 1 {
            // One value given where several were expected: use it for all.
            let value = a[0];
            for slot in a.iter_mut() {
                *slot = value;
            }
            a.len()
        } else {
            length
        }
    }

    /// Colon-separated integers after the last-seen tag.
    pub fn get_long_array(&mut self, a: &mut [i64]) -> usize {
        let Some(start) = self.read_ptr.take() else {
            tracing::error!("{}: int list read attempted before a search", self.identity);
            return 0;
        };
        let mut p = start;
        let mut length = 0;
        loop {
            if length >= a.len() {
                tracing::error!("{}: int list too long: {}", self.identity, self.content());
                return 0;
            }
            a[length] = self.parse_i64_at(p + 1);
            length += 1;
            p += 1;
            while self.data[p] != 0 && self.data[p] != b' ' && self.data[p] != LIST_SEPARATOR {
                p += 1;
            }
            if self.data[p] != LIST_SEPARATOR {
                break;
            }
        }
        length
    }

    /// The rest of the line after the last-seen tag. Strings should
    /// always be the last field on a line.
    pub fn get_string(&mut self) -> String {
        let Some(p) = self.read_ptr.take() else {
            tracing::error!("{}: string read attempted before a search", self.identity);
            return String::new();
        };
        self.content()
            .get(p + 1..)
            .unwrap_or_default()
            .to_string()
    }

    /// The token after the leading command word. Used for filenames that
    /// follow the code directly, e.g. `M23 part.g`.
    pub fn get_unprecedented_string(&mut self) -> String {
        self.read_ptr = None;
        let content = self.content();
        match content.split_once(' ') {
            Some((_, rest)) => rest.to_string(),
            None => {
                tracing::warn!("{}: string expected but not seen", self.identity);
                String::new()
            }
        }
    }

    fn parse_f64_at(&self, start: usize) -> f64 {
        let bytes = &self.data[start..];
        let mut end = 0;
        while end < bytes.len() {
            let b = bytes[end];
            let numeric = b.is_ascii_digit() || b == b'.' || ((b == b'-' || b == b'+') && end == 0);
            if !numeric {
                break;
            }
            end += 1;
        }
        std::str::from_utf8(&bytes[..end])
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0)
    }

    fn parse_i64_at(&self, start: usize) -> i64 {
        let bytes = &self.data[start..];
        let mut i = 0;
        let mut negative = false;
        if i < bytes.len() && (bytes[i] == b'-' || bytes[i] == b'+') {
            negative = bytes[i] == b'-';
            i += 1;
        }
        let mut radix = 10u32;
        if i + 1 < bytes.len() && bytes[i] == b'0' && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X')
        {
            radix = 16;
            i += 2;
        }
        let mut value: i64 = 0;
        let mut any = false;
        while i < bytes.len() {
            let digit = match (bytes[i] as char).to_digit(radix) {
                Some(d) => d,
                None => break,
            };
            value = value.wrapping_mul(radix as i64).wrapping_add(digit as i64);
            any = true;
            i += 1;
        }
        if !any {
            return 0;
        }
        if negative {
            -value
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buffer: &mut CommandBuffer, line: &str) -> bool {
        let mut armed = false;
        for &b in line.as_bytes() {
            armed = buffer.put(b);
        }
        armed
    }

    fn buf() -> CommandBuffer {
        CommandBuffer::new("test")
    }

    #[test]
    fn assembles_a_line_and_reads_fields() {
        let mut b = buf();
        assert!(!feed(&mut b, "G1 X10 Y20.5 F3000"));
        assert!(b.put(b'\n'));
        assert_eq!(b.state(), BufferState::Armed);

        assert!(b.seen(b'G'));
        assert_eq!(b.get_ivalue(), 1);
        assert!(b.seen(b'X'));
        assert_eq!(b.get_fvalue(), 10.0);
        assert!(b.seen(b'Y'));
        assert_eq!(b.get_fvalue(), 20.5);
        assert!(b.seen(b'F'));
        assert_eq!(b.get_fvalue(), 3000.0);
        assert!(!b.seen(b'Z'));
    }

    #[test]
    fn comments_are_suppressed() {
        let mut b = buf();
        feed(&mut b, "G1 X1 ; move a bit Y9");
        assert!(b.put(b'\n'));
        assert_eq!(b.content(), "G1 X1 ");
        assert!(!b.seen(b'Y'));
    }

    #[test]
    fn negative_and_signed_numbers() {
        let mut b = buf();
        feed(&mut b, "G1 X-5.5 Y+2");
        b.put(b'\n');
        assert!(b.seen(b'X'));
        assert_eq!(b.get_fvalue(), -5.5);
        assert!(b.seen(b'Y'));
        assert_eq!(b.get_fvalue(), 2.0);
    }

    #[test]
    fn hex_integers_parse() {
        let mut b = buf();
        feed(&mut b, "M540 P0xBE");
        b.put(b'\n');
        assert!(b.seen(b'P'));
        assert_eq!(b.get_ivalue(), 0xBE);
    }

    #[test]
    fn valid_checksum_strips_line_number_and_checksum() {
        let line = "N10 G1 X5";
        let cs = line.bytes().fold(0u8, |a, b| a ^ b);
        let mut b = buf();
        feed(&mut b, &format!("{}*{}", line, cs));
        assert!(b.put(b'\n'));
        assert_eq!(b.content(), "G1 X5");
        assert!(b.seen(b'X'));
        assert_eq!(b.get_fvalue(), 5.0);
    }

    #[test]
    fn bad_checksum_becomes_resend_request() {
        let mut b = buf();
        feed(&mut b, "N10 G1 X1*99");
        assert!(b.put(b'\n'));
        assert_eq!(b.content(), "M998 P10");
        assert!(b.seen(b'M'));
        assert_eq!(b.get_ivalue(), 998);
        assert!(b.seen(b'P'));
        assert_eq!(b.get_ivalue(), 10);
    }

    #[test]
    fn overflow_discards_line_without_writing_past_capacity() {
        let mut b = buf();
        for _ in 0..(COMMAND_LENGTH * 2) {
            assert!(!b.put(b'X'));
        }
        // The line was discarded but the buffer still accepts a fresh one.
        assert!(b.put(b'\n'));
        b.reset();
        feed(&mut b, "G28");
        b.put(b'\n');
        assert!(b.seen(b'G'));
        assert_eq!(b.get_ivalue(), 28);
    }

    #[test]
    fn float_array_parses_and_broadcasts() {
        let mut b = buf();
        feed(&mut b, "G1 E1.5:2.5");
        b.put(b'\n');
        assert!(b.seen(b'E'));
        let mut values = [0.0; 2];
        assert_eq!(b.get_float_array(&mut values), 2);
        assert_eq!(values, [1.5, 2.5]);

        feed(&mut b, "M92 E420");
        b.put(b'\n');
        assert!(b.seen(b'E'));
        let mut values = [0.0; 2];
        assert_eq!(b.get_float_array(&mut values), 2);
        assert_eq!(values, [420.0, 420.0]);
    }

    #[test]
    fn float_array_rejects_overlong_list() {
        let mut b = buf();
        feed(&mut b, "G1 E1:2:3");
        b.put(b'\n');
        assert!(b.seen(b'E'));
        let mut values = [0.0; 2];
        assert_eq!(b.get_float_array(&mut values), 0);
    }

    #[test]
    fn long_array_parses_drive_lists() {
        let mut b = buf();
        feed(&mut b, "M563 P1 D0:1 H1:2");
        b.put(b'\n');
        assert!(b.seen(b'D'));
        let mut drives = [0i64; 4];
        assert_eq!(b.get_long_array(&mut drives), 2);
        assert_eq!(&drives[..2], &[0, 1]);
    }

    #[test]
    fn unprecedented_string_returns_filename() {
        let mut b = buf();
        feed(&mut b, "M23 parts/frame.g");
        b.put(b'\n');
        assert_eq!(b.get_unprecedented_string(), "parts/frame.g");

        feed(&mut b, "M23");
        b.put(b'\n');
        assert_eq!(b.get_unprecedented_string(), "");
    }

    #[test]
    fn get_string_returns_remainder() {
        let mut b = buf();
        feed(&mut b, "M98 Phomex.g");
        b.put(b'\n');
        assert!(b.seen(b'P'));
        assert_eq!(b.get_string(), "homex.g");
    }

    #[test]
    fn read_before_seen_yields_zero() {
        let mut b = buf();
        feed(&mut b, "G1 X1");
        b.put(b'\n');
        assert_eq!(b.get_fvalue(), 0.0);
        assert_eq!(b.get_ivalue(), 0);
    }

    #[test]
    fn pause_and_resume() {
        let mut b = buf();
        feed(&mut b, "M109 S200");
        b.put(b'\n');
        b.set_finished(false);
        assert!(b.active());
        b.pause();
        assert!(!b.active());
        assert_eq!(b.state(), BufferState::Paused);
        b.cancel_pause();
        assert!(b.active());
    }
}
