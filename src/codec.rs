//! Wire codec for the device link
//!
//! The device speaks newline-delimited UTF-8 JSON objects:
//!
//! - `{"ks": 4, "kd": 2}` / `{"ks": 0, "ku": 2}` / `{"ks": 4}` - key reports
//! - `{"p": 57}` - analog (knob) position
//!
//! Inbound, [`LineFramer`] splits the raw byte stream into records and
//! [`decode_line`] turns each record into an [`Event`]. Decoding is total: any
//! byte sequence yields an event, malformed input becomes
//! [`Event::Unrecognized`]. Outbound, [`encode_status`] renders the status
//! line pushed to the device after (re)connect.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::action::HostStatus;
use crate::error::DecodeError;
use crate::event::{AnalogSample, Event, KeyEvent};

/// Longest record accepted before the framer starts discarding
pub const MAX_LINE_LEN: usize = 4096;

/// Splits a byte stream into newline-terminated records
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Dropping an oversized record until the next newline
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every record completed by them
    ///
    /// Trailing `\r` is stripped and blank records are skipped. Bytes after
    /// the last newline stay buffered for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    self.buf.clear();
                    continue;
                }

                let mut line = std::mem::take(&mut self.buf);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if !line.iter().all(u8::is_ascii_whitespace) {
                    lines.push(line);
                }
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buf.len() >= MAX_LINE_LEN {
                warn!(
                    "Discarding oversized record (> {} bytes without newline)",
                    MAX_LINE_LEN
                );
                self.buf.clear();
                self.discarding = true;
                continue;
            }

            self.buf.push(byte);
        }

        lines
    }

    /// Number of bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Decode one record into an event
///
/// Never fails: malformed JSON is logged and returned as
/// [`Event::Unrecognized`] carrying the raw text.
pub fn decode_line(line: &[u8]) -> Event {
    let raw = String::from_utf8_lossy(line).trim().to_string();

    match try_decode(&raw) {
        Ok(event) => event,
        Err(e) => {
            warn!("{}", e);
            Event::Unrecognized { raw }
        }
    }
}

/// Parse a record, reporting malformed JSON as a [`DecodeError`]
///
/// Classification order: `ks` → key, then `p` → analog, otherwise
/// unrecognized.
pub fn try_decode(raw: &str) -> Result<Event, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodeError {
        raw: raw.to_string(),
        reason: e.to_string(),
    })?;

    let Value::Object(map) = value else {
        return Ok(Event::Unrecognized {
            raw: raw.to_string(),
        });
    };

    if let Some(ks) = map.get("ks") {
        return Ok(decode_key(raw, ks, &map));
    }

    if let Some(p) = map.get("p") {
        return Ok(match p.as_i64() {
            Some(value) => Event::Analog(AnalogSample { value }),
            None => {
                debug!("Non-integer analog value in {}", raw);
                Event::Unrecognized {
                    raw: raw.to_string(),
                }
            }
        });
    }

    Ok(Event::Unrecognized {
        raw: raw.to_string(),
    })
}

fn decode_key(raw: &str, ks: &Value, map: &Map<String, Value>) -> Event {
    let Some(state) = ks.as_i64().filter(|s| *s >= 0) else {
        debug!("Key state is not a non-negative integer in {}", raw);
        return Event::Unrecognized {
            raw: raw.to_string(),
        };
    };

    let down_index = map.get("kd").and_then(Value::as_i64);
    let mut up_index = map.get("ku").and_then(Value::as_i64);

    if down_index.is_some() && up_index.is_some() {
        debug!("Record carries both kd and ku, keeping kd: {}", raw);
        up_index = None;
    }

    Event::Key(KeyEvent {
        state,
        down_index,
        up_index,
    })
}

/// Render the status line sent to the device after connect
pub fn encode_status(status: &HostStatus) -> serde_json::Result<String> {
    serde_json::to_string(status)
}
