//! Microphone capture and speaker playback via CPAL.
//!
//! The dialog service consumes 16 kHz mono s16 PCM in 160-frame (10 ms)
//! blocks and produces 24 kHz mono f32 PCM that we play in 512-frame
//! blocks. CPAL streams are not `Send`, so each direction runs on its own
//! dedicated thread: the capture callback converts the device format and
//! regroups samples into exact blocks pushed through a bounded channel, and
//! the playback callback drains the shared [`PlaybackBuffer`] directly,
//! acting as the playback worker itself.
//!
//! Device failures surface as [`AudioError`]; nothing here retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::playback::PlaybackBuffer;

/// Capture format: signed 16-bit, 16 kHz, mono.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// One capture block is 10 ms.
pub const INPUT_BLOCK_FRAMES: usize = 160;
/// Playback format: 32-bit float, 24 kHz, mono.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// One playback block is ~21 ms.
pub const OUTPUT_BLOCK_FRAMES: usize = 512;

/// Capture blocks buffered between the device callback and the upstream
/// pump before the callback starts dropping.
const CAPTURE_CHANNEL_BLOCKS: usize = 32;

/// Device-layer failure modes.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no default {0} device available")]
    NoDevice(&'static str),
    #[error("unsupported {direction} sample format: {format}")]
    UnsupportedFormat {
        direction: &'static str,
        format: String,
    },
    #[error("failed to query device configuration: {0}")]
    DeviceConfig(String),
    #[error("failed to build audio stream: {0}")]
    StreamBuild(String),
    #[error("failed to start audio stream: {0}")]
    StreamStart(String),
}

/// Regroups arbitrarily sized callback deliveries into exact fixed-size
/// blocks. CPAL makes no promise that callbacks match the requested buffer
/// size, so the seam between deliveries has to carry.
pub(crate) struct BlockChunker {
    block: Vec<i16>,
    size: usize,
}

impl BlockChunker {
    pub(crate) fn new(size: usize) -> Self {
        BlockChunker {
            block: Vec::with_capacity(size),
            size,
        }
    }

    pub(crate) fn push(
        &mut self,
        samples: impl IntoIterator<Item = i16>,
        mut emit: impl FnMut(Vec<i16>),
    ) {
        for sample in samples {
            self.block.push(sample);
            if self.block.len() == self.size {
                emit(std::mem::replace(
                    &mut self.block,
                    Vec::with_capacity(self.size),
                ));
            }
        }
    }
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Handle to a running capture stream. Dropping or [`close`](Self::close)-ing
/// it stops the device thread.
pub struct CaptureStream {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureStream {
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a running playback stream.
pub struct PlaybackStream {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PlaybackStream {
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open the default input device at 16 kHz mono and start capturing.
///
/// Returns the stream handle and a channel of exact 160-sample blocks.
/// When the upstream pump falls behind, whole blocks are dropped at the
/// callback rather than blocking the audio thread.
pub fn start_capture() -> Result<(CaptureStream, mpsc::Receiver<Vec<i16>>), AudioError> {
    let (block_tx, block_rx) = mpsc::channel::<Vec<i16>>(CAPTURE_CHANNEL_BLOCKS);
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();

    let thread = thread::Builder::new()
        .name("voicelink-capture".into())
        .spawn(move || {
            let stream = match build_capture_stream(block_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Park until the handle is closed; the callback does the work.
            run_until_stopped(stop_rx);
            drop(stream);
            debug!("capture stream stopped");
        })
        .map_err(|e| AudioError::StreamStart(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => return Err(AudioError::StreamStart("capture thread died".into())),
    }

    info!(
        "capture started: {} Hz mono s16, {}-frame blocks",
        INPUT_SAMPLE_RATE, INPUT_BLOCK_FRAMES
    );
    Ok((
        CaptureStream {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        },
        block_rx,
    ))
}

fn build_capture_stream(block_tx: mpsc::Sender<Vec<i16>>) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoDevice("input"))?;
    let format = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?
        .sample_format();
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(INPUT_SAMPLE_RATE),
        buffer_size: BufferSize::Fixed(INPUT_BLOCK_FRAMES as u32),
    };

    let err_fn = |err| error!("capture stream error: {err}");

    // Normalize the device format to i16 in the callback so everything past
    // this point is format-agnostic.
    let stream = match format {
        SampleFormat::I16 => {
            let mut chunker = BlockChunker::new(INPUT_BLOCK_FRAMES);
            let dropped = AtomicUsize::new(0);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    chunker.push(data.iter().copied(), |block| {
                        deliver_block(&block_tx, block, &dropped);
                    });
                },
                err_fn,
                None,
            )
        }
        SampleFormat::F32 => {
            let mut chunker = BlockChunker::new(INPUT_BLOCK_FRAMES);
            let dropped = AtomicUsize::new(0);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    chunker.push(data.iter().copied().map(f32_to_i16), |block| {
                        deliver_block(&block_tx, block, &dropped);
                    });
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::UnsupportedFormat {
                direction: "input",
                format: format!("{other:?}"),
            });
        }
    }
    .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamStart(e.to_string()))?;
    Ok(stream)
}

fn deliver_block(tx: &mpsc::Sender<Vec<i16>>, block: Vec<i16>, dropped: &AtomicUsize) {
    if tx.try_send(block).is_err() {
        let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 100 == 1 {
            warn!("capture channel full, {total} blocks dropped so far");
        }
    }
}

/// Open the default output device at 24 kHz mono f32 and start draining the
/// playback buffer from the device callback.
pub fn start_playback(buffer: Arc<PlaybackBuffer>) -> Result<PlaybackStream, AudioError> {
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();

    let thread = thread::Builder::new()
        .name("voicelink-playback".into())
        .spawn(move || {
            let stream = match build_playback_stream(buffer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            run_until_stopped(stop_rx);
            drop(stream);
            debug!("playback stream stopped");
        })
        .map_err(|e| AudioError::StreamStart(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => return Err(AudioError::StreamStart("playback thread died".into())),
    }

    info!(
        "playback started: {} Hz mono f32, {}-frame blocks",
        OUTPUT_SAMPLE_RATE, OUTPUT_BLOCK_FRAMES
    );
    Ok(PlaybackStream {
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

fn build_playback_stream(buffer: Arc<PlaybackBuffer>) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoDevice("output"))?;
    let format = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?
        .sample_format();
    if format != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat {
            direction: "output",
            format: format!("{format:?}"),
        });
    }
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(OUTPUT_SAMPLE_RATE),
        buffer_size: BufferSize::Fixed(OUTPUT_BLOCK_FRAMES as u32),
    };

    let err_fn = |err| error!("playback stream error: {err}");
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                buffer.drain_into(data);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamStart(e.to_string()))?;
    Ok(stream)
}

fn run_until_stopped(stop_rx: std_mpsc::Receiver<()>) {
    loop {
        match stop_rx.recv_timeout(Duration::from_millis(100)) {
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }
}
