use std::io::{self, Write};

use mia_stream::{AssembledMessage, StreamObserver};

/// Prints each snapshot's new text as it arrives.
///
/// Text only grows within a session, so the printed prefix is always a
/// valid char boundary of the next snapshot.
pub struct DeltaPrinter<W: Write> {
    out: W,
    printed: usize,
    error: Option<io::Error>,
}

impl<W: Write> DeltaPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            error: None,
        }
    }

    /// First write error seen, if any.
    pub fn finish(self) -> io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.out),
        }
    }
}

impl<W: Write> StreamObserver for DeltaPrinter<W> {
    fn on_update(&mut self, message: &AssembledMessage) {
        if self.error.is_some() {
            return;
        }
        let Some(fresh) = message.text.get(self.printed..) else {
            return;
        };
        if fresh.is_empty() {
            return;
        }
        let written = self
            .out
            .write_all(fresh.as_bytes())
            .and_then(|()| self.out.flush());
        match written {
            Ok(()) => self.printed = message.text.len(),
            Err(e) => self.error = Some(e),
        }
    }
}
