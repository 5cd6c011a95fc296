//! Byte transports feeding the interpreter's command sources.
//!
//! Each interactive source (network console, serial line) is a pair of an
//! incoming byte stream and an outgoing reply channel. The interpreter
//! polls `available`/`read` from its spin loop and pushes replies through
//! `write`; how the bytes get to and from the outside world is the host's
//! business.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};

pub trait Transport: Send {
    /// Is at least one byte ready to read?
    fn available(&mut self) -> bool;

    /// Take the next byte, if any.
    fn read(&mut self) -> Option<u8>;

    /// Send a reply on the back-channel.
    fn write(&mut self, text: &str);
}

/// Transport bridged over std mpsc channels. The host side feeds bytes
/// into the sender half and drains replies from the receiver half.
pub struct ChannelTransport {
    input: Receiver<u8>,
    pending: VecDeque<u8>,
    output: Option<Sender<String>>,
}

impl ChannelTransport {
    pub fn new(input: Receiver<u8>, output: Option<Sender<String>>) -> Self {
        Self {
            input,
            pending: VecDeque::new(),
            output,
        }
    }

    fn pump(&mut self) {
        loop {
            match self.input.try_recv() {
                Ok(b) => self.pending.push_back(b),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl Transport for ChannelTransport {
    fn available(&mut self) -> bool {
        if self.pending.is_empty() {
            self.pump();
        }
        !self.pending.is_empty()
    }

    fn read(&mut self) -> Option<u8> {
        if self.pending.is_empty() {
            self.pump();
        }
        self.pending.pop_front()
    }

    fn write(&mut self, text: &str) {
        if let Some(out) = &self.output {
            // A closed reply channel just means nobody is listening.
            let _ = out.send(text.to_string());
        }
    }
}

/// Transport that never yields a byte and drops replies. Stands in for a
/// source that is not wired up on this host.
pub struct NullTransport;

impl Transport for NullTransport {
    fn available(&mut self) -> bool {
        false
    }

    fn read(&mut self) -> Option<u8> {
        None
    }

    fn write(&mut self, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn channel_transport_round_trip() {
        let (byte_tx, byte_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut t = ChannelTransport::new(byte_rx, Some(reply_tx));

        assert!(!t.available());
        byte_tx.send(b'G').unwrap();
        byte_tx.send(b'1').unwrap();
        assert!(t.available());
        assert_eq!(t.read(), Some(b'G'));
        assert_eq!(t.read(), Some(b'1'));
        assert_eq!(t.read(), None);

        t.write("ok\n");
        assert_eq!(reply_rx.try_recv().unwrap(), "ok\n");
    }

    #[test]
    fn available_does_not_consume() {
        let (byte_tx, byte_rx) = mpsc::channel();
        let mut t = ChannelTransport::new(byte_rx, None);
        byte_tx.send(b'X').unwrap();
        assert!(t.available());
        assert!(t.available());
        assert_eq!(t.read(), Some(b'X'));
    }
}
