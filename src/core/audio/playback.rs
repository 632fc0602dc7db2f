//! Bounded playback buffer between downstream audio arrival and the output
//! device.
//!
//! Downstream frames arrive at whatever rate the service produces them; the
//! device drains at a fixed block rate. The buffer absorbs the imbalance up
//! to a hard cap of 100 seconds of output audio, discarding the oldest
//! samples beyond it. A parallel byte sequence retains every buffered
//! payload verbatim so a raw PCM dump can be written at shutdown.
//!
//! While a chat-TTS injection is in flight (`sending_chat_tts` set), pushes
//! are dropped entirely: the model's own audio for that stretch is neither
//! played nor dumped.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::device::OUTPUT_SAMPLE_RATE;

/// Hard cap on buffered samples: 100 seconds at the output rate.
pub const MAX_BUFFERED_SAMPLES: usize = OUTPUT_SAMPLE_RATE as usize * 100;

struct BufferInner {
    samples: VecDeque<f32>,
    /// Raw payload bytes, kept for the diagnostic dump.
    diagnostic: Vec<u8>,
    /// Bytes of a sample split across two payloads.
    carry: Vec<u8>,
    dropped_samples: u64,
}

/// FIFO of f32 samples with drop-oldest overflow and a suppression gate.
///
/// All operations take the single internal mutex, so any worker may push,
/// drain, or flush concurrently.
pub struct PlaybackBuffer {
    inner: Mutex<BufferInner>,
    suppressed: Arc<AtomicBool>,
    capacity: usize,
}

impl PlaybackBuffer {
    /// A buffer with the standard 100-second cap. `suppressed` is the shared
    /// `sending_chat_tts` flag; while it reads true, pushes are no-ops.
    pub fn new(suppressed: Arc<AtomicBool>) -> Self {
        Self::with_capacity(MAX_BUFFERED_SAMPLES, suppressed)
    }

    pub fn with_capacity(capacity: usize, suppressed: Arc<AtomicBool>) -> Self {
        PlaybackBuffer {
            inner: Mutex::new(BufferInner {
                samples: VecDeque::new(),
                diagnostic: Vec::new(),
                carry: Vec::new(),
                dropped_samples: 0,
            }),
            suppressed,
            capacity,
        }
    }

    /// Append a downstream payload, interpreted as little-endian f32
    /// samples. A trailing partial sample is carried into the next push.
    /// Dropped entirely while suppression is active.
    pub fn push_bytes(&self, bytes: &[u8]) {
        if self.suppressed.load(Ordering::Acquire) {
            debug!(
                "dropping {} audio bytes during chat TTS injection",
                bytes.len()
            );
            return;
        }
        let mut inner = self.inner.lock();
        inner.diagnostic.extend_from_slice(bytes);

        let mut data = std::mem::take(&mut inner.carry);
        data.extend_from_slice(bytes);
        let whole = data.len() - data.len() % 4;
        for chunk in data[..whole].chunks_exact(4) {
            let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            inner.samples.push_back(sample);
        }
        inner.carry = data[whole..].to_vec();

        while inner.samples.len() > self.capacity {
            inner.samples.pop_front();
            inner.dropped_samples += 1;
        }
    }

    /// Copy up to `out.len()` samples in FIFO order and zero-fill the rest.
    /// Returns the number of real samples copied.
    pub fn drain_into(&self, out: &mut [f32]) -> usize {
        let mut inner = self.inner.lock();
        let available = inner.samples.len().min(out.len());
        for slot in out.iter_mut().take(available) {
            // The length check above guarantees a sample is present.
            *slot = inner.samples.pop_front().unwrap_or(0.0);
        }
        for slot in out.iter_mut().skip(available) {
            *slot = 0.0;
        }
        available
    }

    /// Discard all buffered samples and the diagnostic bytes.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.samples.clear();
        inner.diagnostic.clear();
        inner.carry.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples discarded so far to honor the cap.
    pub fn dropped_samples(&self) -> u64 {
        self.inner.lock().dropped_samples
    }

    /// Write the accumulated diagnostic bytes to `path` as headerless PCM
    /// (f32 LE, 24 kHz, mono). Writes a temporary file and renames it into
    /// place. No-op when nothing was accumulated; returns the byte count
    /// written, zero when skipped.
    pub fn dump_diagnostic(&self, path: &Path) -> std::io::Result<u64> {
        let bytes = {
            let inner = self.inner.lock();
            if inner.diagnostic.is_empty() {
                return Ok(0);
            }
            inner.diagnostic.clone()
        };
        let tmp = path.with_extension("pcm.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(bytes.len() as u64)
    }
}
