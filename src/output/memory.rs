//! In-memory packet sink

use super::PacketSink;
use crate::error::{Error, Result};

/// Collects packets in memory instead of muxing them
#[derive(Debug, Default)]
pub struct MemorySink {
    packets: Vec<Vec<u8>>,
    bytes: u64,
    flushes: usize,
    finishes: usize,
    fail_after: Option<usize>,
    fail_finish: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write once `writes` packets have been accepted
    pub fn failing_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(writes);
        self
    }

    /// Report a muxer failure from `finish`
    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    /// Packets in write order
    pub fn packets(&self) -> &[Vec<u8>] {
        &self.packets
    }

    /// The whole stream as one buffer
    pub fn stream(&self) -> Vec<u8> {
        self.packets.concat()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Number of `finish` calls
    pub fn finishes(&self) -> usize {
        self.finishes
    }

    pub fn is_finished(&self) -> bool {
        self.finishes > 0
    }
}

impl PacketSink for MemorySink {
    fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        if self.is_finished() {
            return Err(Error::Sink("write after finish".into()));
        }
        if self.fail_after.is_some_and(|n| self.packets.len() >= n) {
            return Err(Error::Sink("memory sink refused write".into()));
        }
        self.packets.push(data.to_vec());
        self.bytes += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finishes += 1;
        tracing::debug!(
            "Memory sink finished: {} packets, {} bytes",
            self.packets.len(),
            self.bytes
        );
        if self.fail_finish {
            return Err(Error::Muxer("memory sink refused to finish".into()));
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}
