use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::stream::events::StreamEvent;

const DATA_MARKER: &[u8] = b"data:";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Record framing
// ============================================================================

/// Splits a chunked byte stream into blank-line delimited records.
///
/// Only `data:` lines contribute to a record's payload; multiple data lines
/// are joined with `\n`. Partial lines are carried over between chunks so the
/// output does not depend on where the transport cut the stream.
#[derive(Debug, Default)]
pub struct SseFramer {
    carry: BytesMut,
    data_lines: Vec<Vec<u8>>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every record it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.carry.extend_from_slice(chunk);
        let mut records = Vec::new();

        while let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
            let mut line = self.carry.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if let Some(record) = self.take_line(&line) {
                records.push(record);
            }
        }

        records
    }

    /// Flushes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if !self.carry.is_empty() {
            let mut line = std::mem::take(&mut self.carry);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if let Some(record) = self.take_line(&line) {
                return Some(record);
            }
        }
        self.flush_record()
    }

    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty() || !self.data_lines.is_empty()
    }

    fn take_line(&mut self, line: &[u8]) -> Option<Vec<u8>> {
        if line.is_empty() {
            return self.flush_record();
        }
        if let Some(rest) = line.strip_prefix(DATA_MARKER) {
            let mut payload = rest;
            if payload.first() == Some(&b' ') {
                payload.advance(1);
            }
            self.data_lines.push(payload.to_vec());
        }
        // `event:`, `id:`, `retry:` and `:` comment lines carry nothing we use
        None
    }

    fn flush_record(&mut self) -> Option<Vec<u8>> {
        if self.data_lines.is_empty() {
            return None;
        }
        let lines = std::mem::take(&mut self.data_lines);
        Some(lines.join(&b'\n'))
    }
}

// ============================================================================
// Chunk decoder
// ============================================================================

/// Framer plus payload decoding. Malformed records are logged and skipped.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    framer: SseFramer,
    skipped: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let records = self.framer.push(chunk);
        records
            .iter()
            .filter_map(|record| self.decode(record))
            .collect()
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.framer
            .finish()
            .and_then(|record| self.decode(&record))
            .into_iter()
            .collect()
    }

    /// Number of records dropped because their payload did not decode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode(&mut self, record: &[u8]) -> Option<StreamEvent> {
        match decode_record(record) {
            Ok(event) => Some(event),
            Err(e) => {
                self.skipped += 1;
                log::warn!("Skipping stream record: {}", e);
                None
            }
        }
    }
}

pub fn decode_record(record: &[u8]) -> Result<StreamEvent, DecodeError> {
    let text = std::str::from_utf8(record)?;
    Ok(serde_json::from_str(text.trim())?)
}
