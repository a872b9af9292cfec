//! Purpose: Bridge blocking `Read`/`Write` code and async HTTP bodies.
//! Exports: `Chunk`, `ConduitWriter`, `ConduitReader`, `conduit`, `CONDUIT_DEPTH`.
//! Role: Carries frame records between a synchronous encoder/decoder and a tokio task.
//! Invariants: The channel is bounded; a full conduit blocks the writer (backpressure).
//! Invariants: Dropping the writer ends the stream; dropping the reader fails later writes.
//! Invariants: Blocking calls must run outside the async runtime (e.g. `spawn_blocking`).
use std::io::{self, Read, Write};

use bytes::{Buf, Bytes};
use tokio::sync::mpsc;

pub type Chunk = Result<Bytes, io::Error>;

pub const CONDUIT_DEPTH: usize = 16;

/// A bounded chunk channel; either end may be wrapped by the conduit types.
pub fn conduit() -> (mpsc::Sender<Chunk>, mpsc::Receiver<Chunk>) {
    mpsc::channel(CONDUIT_DEPTH)
}

/// `Write` half: each `write` call becomes one chunk.
pub struct ConduitWriter {
    sender: Option<mpsc::Sender<Chunk>>,
}

impl ConduitWriter {
    pub fn new(sender: mpsc::Sender<Chunk>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Sends a terminal error so the consuming body aborts instead of ending cleanly.
    pub fn fail(&mut self, err: io::Error) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.blocking_send(Err(err));
        }
    }

    /// Like `fail`, but never blocks; a full conduit just loses the sender.
    pub fn abandon(&mut self) {
        if let Some(sender) = self.sender.take() {
            let err = io::Error::new(io::ErrorKind::ConnectionAborted, "stream abandoned");
            let _ = sender.try_send(Err(err));
        }
    }

    /// Ends the stream; later writes fail with `BrokenPipe`.
    pub fn close(&mut self) {
        self.sender = None;
    }
}

impl Write for ConduitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(sender) = self.sender.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "conduit closed"));
        };
        sender
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "conduit receiver dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `Read` half: yields chunk bytes in order, then end of stream once all senders drop.
pub struct ConduitReader {
    receiver: mpsc::Receiver<Chunk>,
    current: Bytes,
}

impl ConduitReader {
    pub fn new(receiver: mpsc::Receiver<Chunk>) -> Self {
        Self {
            receiver,
            current: Bytes::new(),
        }
    }
}

impl Read for ConduitReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.receiver.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(err)) => return Err(err),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}
