//! Local audio: device capture/playback and the playback jitter buffer.

mod device;
mod playback;

pub use device::{
    AudioError, CaptureStream, INPUT_BLOCK_FRAMES, INPUT_SAMPLE_RATE, OUTPUT_BLOCK_FRAMES,
    OUTPUT_SAMPLE_RATE, PlaybackStream, start_capture, start_playback,
};
pub use playback::{MAX_BUFFERED_SAMPLES, PlaybackBuffer};
