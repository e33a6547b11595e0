//! Server-Sent Events decoding for streamed chat completions.
//!
//! Bytes from the HTTP body are split into `data:` payloads, parsed into
//! [`ChatCompletionChunk`]s, cut into windows by [`ChunkWindower`] and
//! forwarded to the consumer. The `[DONE]` sentinel ends the stream and never
//! reaches the merger.

use anyhow::Result;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::api::ChatCompletionChunk;
use crate::error::ProviderError;
use crate::window::ChunkWindower;

/// Terminal frame payload sent by the vendor.
pub const DONE_SENTINEL: &str = "[DONE]";

// ─────────────────────────────────────────────────────────────────────────────
// UTF-8 Streaming
// ─────────────────────────────────────────────────────────────────────────────

/// Try to decode bytes as UTF-8, handling incomplete sequences at the end.
/// Returns the decoded string and leaves any incomplete bytes in the buffer.
pub fn decode_utf8_streaming(byte_buffer: &mut Vec<u8>) -> Option<String> {
    let valid_up_to = match std::str::from_utf8(byte_buffer) {
        Ok(_) => byte_buffer.len(),
        Err(e) if e.valid_up_to() == 0 => {
            // Garbage rather than a truncated sequence: skip it so the buffer can't stall.
            if let Some(invalid_len) = e.error_len() {
                byte_buffer.drain(..invalid_len);
            }
            return None;
        }
        Err(e) => e.valid_up_to(),
    };

    if valid_up_to == 0 {
        return None;
    }
    let valid_bytes: Vec<u8> = byte_buffer.drain(..valid_up_to).collect();
    String::from_utf8(valid_bytes).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE frames
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    Done,
}

/// Incremental line decoder; bytes may be split anywhere, even mid-character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    byte_buffer: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes and return the frames completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.byte_buffer.extend_from_slice(bytes);
        loop {
            let remaining = self.byte_buffer.len();
            if let Some(text) = decode_utf8_streaming(&mut self.byte_buffer) {
                self.buffer.push_str(&text);
            }
            if self.byte_buffer.len() == remaining {
                break;
            }
        }

        let mut frames = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            frames.extend(parse_line(&line));
        }
        frames
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let line = std::mem::take(&mut self.buffer);
        self.byte_buffer.clear();
        parse_line(&line).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseFrame> {
    let line = line.trim();
    // Blank lines separate events; `:` lines are comments; other fields carry nothing we use.
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(data.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk windows
// ─────────────────────────────────────────────────────────────────────────────

enum Flow {
    Continue,
    Stop,
}

/// Drive one streamed response: decode frames, window the chunks and forward
/// each finished window to `tx`.
///
/// Returns the number of windows forwarded. Once the receiver is dropped no
/// further upstream frames are read and an open window is discarded.
pub async fn forward_chunk_windows<S>(mut stream: S, tx: mpsc::Sender<Result<ChatCompletionChunk>>) -> usize
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let mut decoder = SseDecoder::new();
    let mut windower = ChunkWindower::new();
    let mut forwarded = 0;

    loop {
        let chunk_result = tokio::select! {
            biased;
            _ = tx.closed() => {
                cancel(&mut windower);
                return forwarded;
            }
            next = stream.next() => match next {
                Some(chunk_result) => chunk_result,
                None => break,
            },
        };
        let bytes = match chunk_result {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Stream error: {}", e);
                let _ = tx.send(Err(ProviderError::Stream(e.to_string()).into())).await;
                return forwarded;
            }
        };

        for frame in decoder.feed(&bytes) {
            if tx.is_closed() {
                cancel(&mut windower);
                return forwarded;
            }
            match handle_frame(frame, &mut windower, &tx, &mut forwarded).await {
                Flow::Continue => {}
                Flow::Stop => return forwarded,
            }
        }
    }

    for frame in decoder.finish() {
        if let Flow::Stop = handle_frame(frame, &mut windower, &tx, &mut forwarded).await {
            return forwarded;
        }
    }

    discard_open_window(&mut windower);
    forwarded
}

async fn handle_frame(
    frame: SseFrame,
    windower: &mut ChunkWindower,
    tx: &mpsc::Sender<Result<ChatCompletionChunk>>,
    forwarded: &mut usize,
) -> Flow {
    let data = match frame {
        SseFrame::Done => {
            debug!("Received stream completion marker");
            discard_open_window(windower);
            return Flow::Stop;
        }
        SseFrame::Data(data) => data,
    };

    let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Failed to parse stream chunk: {} - Data: {}", e, data);
            return Flow::Continue;
        }
    };

    match windower.push(chunk) {
        Ok(Some(window)) => {
            if tx.send(Ok(window)).await.is_err() {
                debug!("Receiver dropped, stopping stream");
                return Flow::Stop;
            }
            *forwarded += 1;
            Flow::Continue
        }
        Ok(None) => Flow::Continue,
        Err(e) => {
            error!("Aborting stream: {}", e);
            let _ = tx.send(Err(e.into())).await;
            Flow::Stop
        }
    }
}

fn cancel(windower: &mut ChunkWindower) {
    let discarded = windower.reset();
    debug!("Receiver dropped, stopping stream ({} buffered chunks discarded)", discarded);
}

fn discard_open_window(windower: &mut ChunkWindower) {
    if windower.is_inside_tool() {
        let discarded = windower.reset();
        warn!(
            "Stream ended inside a tool call; discarding {} unfinished chunks",
            discarded
        );
    }
}
