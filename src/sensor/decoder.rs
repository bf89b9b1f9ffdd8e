//! The FIND_HEADER / RECV_HEADER / RECV_BODY byte-stream state machine.

use crate::hosts::HostTable;
use crate::reactor::io_object::IoObjectBase;

use super::frame::{self, PayloadOutcome, DELIMITER, MAX_FRAME_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    FindHeader,
    RecvHeader,
    RecvBody,
}

/// A `(host, metric, value)` extracted from a decoded I/O sample frame,
/// ready for [`crate::store::MetricStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub host: String,
    pub metric: &'static str,
    pub value: i64,
}

/// Owns decode state across calls; the read buffer itself lives on the
/// [`IoObjectBase`] passed in each time.
pub struct Decoder {
    state: State,
    frame_size: u16,
    skipped_bytes: u64,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            state: State::FindHeader,
            frame_size: 0,
            skipped_bytes: 0,
        }
    }

    /// The current state, exposed for diagnostics and tests.
    pub fn state(&self) -> State {
        self.state
    }

    /// Drive the state machine as far as the currently (and newly) readable
    /// bytes allow, returning every reading extracted along the way. Stops
    /// as soon as a read would block, leaving partial state for the next
    /// call.
    pub fn ingest(&mut self, base: &mut IoObjectBase, hosts: &HostTable) -> crate::error::Result<Vec<Reading>> {
        let mut readings = Vec::new();

        loop {
            match self.state {
                State::FindHeader => {
                    if !base.try_read(1)? {
                        break;
                    }
                    let byte = base.read_buf()[0];
                    base.drain_read_prefix(1);
                    if byte == DELIMITER {
                        if self.skipped_bytes > 0 {
                            tracing::warn!(
                                object = base.name(),
                                skipped = self.skipped_bytes,
                                "resynchronised after skipping stray bytes"
                            );
                            self.skipped_bytes = 0;
                        }
                        self.state = State::RecvHeader;
                    } else {
                        self.skipped_bytes += 1;
                    }
                }

                State::RecvHeader => {
                    if !base.try_read(3)? {
                        break;
                    }
                    let buf = base.read_buf();
                    let delimiter = buf[0];
                    let length = u16::from_be_bytes([buf[1], buf[2]]);
                    if delimiter != DELIMITER || length > MAX_FRAME_SIZE {
                        tracing::warn!(object = base.name(), length, "invalid frame header");
                        self.resync(base);
                        continue;
                    }
                    self.frame_size = length;
                    self.state = State::RecvBody;
                }

                State::RecvBody => {
                    let total = 3 + self.frame_size as usize + 1;
                    if !base.try_read(total)? {
                        break;
                    }
                    let buf = base.read_buf();
                    let payload = &buf[3..3 + self.frame_size as usize];
                    let checksum = buf[total - 1];
                    let expected = frame::checksum(payload);

                    if checksum != expected {
                        tracing::warn!(object = base.name(), "checksum mismatch, resynchronising");
                        self.resync(base);
                        continue;
                    }

                    match frame::parse_payload(payload) {
                        Some(PayloadOutcome::IoSample(sample)) => {
                            self.emit(base.name(), &sample, hosts, &mut readings);
                            base.clear_read_buffer();
                            self.state = State::RecvHeader;
                        }
                        Some(PayloadOutcome::UnsupportedFrameType(frame_type)) => {
                            tracing::warn!(
                                object = base.name(),
                                frame_type,
                                "unsupported XBee frame type, discarding frame"
                            );
                            base.clear_read_buffer();
                            self.state = State::RecvHeader;
                        }
                        None => {
                            tracing::warn!(object = base.name(), "malformed payload, resynchronising");
                            self.resync(base);
                        }
                    }
                }
            }
        }

        Ok(readings)
    }

    fn emit(
        &self,
        object_name: &str,
        sample: &frame::IoSampleFrame,
        hosts: &HostTable,
        out: &mut Vec<Reading>,
    ) {
        let Some(host) = hosts.lookup(sample.source_address) else {
            tracing::warn!(
                object = object_name,
                address = format!("{:016X}", sample.source_address),
                "sample from an address with no configured host"
            );
            return;
        };

        let Some(raw) = sample.temperature_raw() else {
            return;
        };

        match frame::temperature_degrees(raw) {
            Some(value) => out.push(Reading {
                host: host.to_string(),
                metric: "temperature",
                value,
            }),
            None => tracing::warn!(host, "temperature channel reports no sensor connected"),
        }
    }

    /// Scan for the next delimiter strictly after the first buffered byte
    /// (the one already known not to be a valid header start). Discard
    /// everything before it and resume framing there; if none exists,
    /// discard the whole buffer and fall back to byte-at-a-time scanning.
    fn resync(&mut self, base: &mut IoObjectBase) {
        let buf = base.read_buf();
        let found = buf
            .iter()
            .enumerate()
            .skip(1)
            .find(|&(_, &b)| b == DELIMITER)
            .map(|(i, _)| i);

        match found {
            Some(index) => {
                base.drain_read_prefix(index);
                self.state = State::RecvHeader;
            }
            None => {
                self.skipped_bytes += buf.len() as u64;
                base.clear_read_buffer();
                self.state = State::FindHeader;
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
