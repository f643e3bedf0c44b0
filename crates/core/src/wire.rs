//! Newline-delimited relay framing shared by the relay and its clients.
//!
//! Wire format, version 1:
//!
//! ```text
//! <chunk json>\n
//! <chunk json>\n
//! [STREAM_END]\n      success
//! [STREAM_ERROR]\n    failure, mutually exclusive with [STREAM_END]
//! ```
//!
//! A chunk line is a JSON object carrying at least `{"message":{"content":..}}`.
//! JSON string escaping keeps raw newlines out of a chunk line. Blank lines
//! are ignored; lines that do not parse are dropped and counted, never fatal.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use tracing::debug;

use crate::llm::{ChatError, StreamChunk};

pub const WIRE_VERSION: u32 = 1;
pub const STREAM_END: &str = "[STREAM_END]";
pub const STREAM_ERROR: &str = "[STREAM_ERROR]";

/// Bytes the relay appends on clean completion. The leading newline closes a
/// final backend line that arrived without one.
pub const STREAM_END_MARKER: &[u8] = b"\n[STREAM_END]\n";
pub const STREAM_ERROR_MARKER: &[u8] = b"\n[STREAM_ERROR]\n";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Chunk(StreamChunk),
    End,
    Error,
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::End | Frame::Error)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Not UTF-8 or not JSON: typically a garbled or partial transport line.
    Malformed,
    /// Valid JSON without a `message.content` string.
    Unrecognized,
}

/// Hook invoked for every dropped line.
pub trait DropObserver: Send + Sync {
    fn on_drop(&self, reason: DropReason, line: &str);
}

impl<F> DropObserver for F
where
    F: Fn(DropReason, &str) + Send + Sync,
{
    fn on_drop(&self, reason: DropReason, line: &str) {
        self(reason, line)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramingStats {
    pub chunks: u64,
    pub malformed: u64,
    pub unrecognized: u64,
    pub saw_final_chunk: bool,
}

impl FramingStats {
    pub fn dropped(&self) -> u64 {
        self.malformed + self.unrecognized
    }
}

#[derive(Deserialize)]
struct WireChunk {
    message: WireMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

/// Incremental line framer.
///
/// Feed raw fragments with [`FrameDecoder::extend`] and drain complete frames
/// with [`FrameDecoder::next_frame`]. Bytes after the last newline stay in the
/// residual buffer until more input or [`FrameDecoder::finish`] arrives.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    terminated: bool,
    closed: bool,
    stats: FramingStats,
    observer: Option<Arc<dyn DropObserver>>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn DropObserver>) -> Self {
        Self {
            observer: Some(observer),
            ..Self::default()
        }
    }

    pub fn extend(&mut self, fragment: &[u8]) {
        if self.terminated || self.closed {
            return;
        }
        self.buf.extend_from_slice(fragment);
    }

    /// Marks the source as ended; a non-empty residual becomes a last line.
    pub fn finish(&mut self) {
        if self.closed {
            return;
        }
        if !self.terminated && !self.buf.is_empty() {
            self.buf.extend_from_slice(b"\n");
        }
        self.closed = true;
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        while !self.terminated {
            let pos = twoway::find_bytes(&self.buf, b"\n")?;
            let line = self.buf.split_to(pos).freeze();
            self.buf.advance(1);
            if let Some(frame) = self.classify(&line) {
                if frame.is_terminal() {
                    self.terminated = true;
                    self.buf.clear();
                }
                return Some(frame);
            }
        }
        None
    }

    /// Convenience for callers holding a whole fragment at once.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<Frame> {
        self.extend(fragment);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn residual_len(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> FramingStats {
        self.stats
    }

    fn classify(&mut self, line: &[u8]) -> Option<Frame> {
        let Ok(text) = std::str::from_utf8(line) else {
            self.record_drop(DropReason::Malformed, &String::from_utf8_lossy(line));
            return None;
        };
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text == STREAM_END {
            return Some(Frame::End);
        }
        if text == STREAM_ERROR {
            return Some(Frame::Error);
        }
        match serde_json::from_str::<WireChunk>(text) {
            Ok(c) => {
                self.stats.chunks += 1;
                self.stats.saw_final_chunk |= c.done;
                Some(Frame::Chunk(StreamChunk {
                    delta_content: c.message.content,
                    is_final: c.done,
                }))
            }
            Err(e) if e.is_data() => {
                self.record_drop(DropReason::Unrecognized, text);
                None
            }
            Err(_) => {
                self.record_drop(DropReason::Malformed, text);
                None
            }
        }
    }

    fn record_drop(&mut self, reason: DropReason, line: &str) {
        match reason {
            DropReason::Malformed => self.stats.malformed += 1,
            DropReason::Unrecognized => self.stats.unrecognized += 1,
        }
        debug!(target: "wire", ?reason, len = line.len(), "dropped line");
        if let Some(obs) = &self.observer {
            obs.on_drop(reason, line);
        }
    }
}

pin_project! {
    /// Adapts a raw byte stream into frames.
    ///
    /// Ends after the first terminal frame. If the source ends without one,
    /// yields `ChatError::AbnormalTermination` (with an empty partial) last.
    pub struct FrameStream<S> {
        #[pin]
        inner: S,
        decoder: FrameDecoder,
        eof: bool,
        done: bool,
    }
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_decoder(inner, FrameDecoder::new())
    }

    pub fn with_decoder(inner: S, decoder: FrameDecoder) -> Self {
        Self {
            inner,
            decoder,
            eof: false,
            done: false,
        }
    }

    pub fn stats(&self) -> FramingStats {
        self.decoder.stats()
    }
}

impl<S> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes, ChatError>>,
{
    type Item = Result<Frame, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if *this.done {
                return Poll::Ready(None);
            }
            if let Some(frame) = this.decoder.next_frame() {
                if frame.is_terminal() {
                    *this.done = true;
                }
                return Poll::Ready(Some(Ok(frame)));
            }
            if *this.eof {
                *this.done = true;
                return Poll::Ready(Some(Err(ChatError::AbnormalTermination {
                    partial: String::new(),
                })));
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.decoder.extend(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.decoder.finish();
                    *this.eof = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
