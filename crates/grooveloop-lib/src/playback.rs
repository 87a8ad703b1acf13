//! Playback bridge — decoded chunks out through the host's audio output.
//!
//! Opens the default output at the device's native format (44.1 kHz,
//! stereo, 32-bit integer, 256-frame buffers) and exposes a *blocking*
//! push: when the bounded sample queue is full the pusher waits, which is
//! what paces the USB streaming loop against real playback speed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::protocol::{BYTES_PER_SECOND, CHUNK_SIZE, SAMPLE_RATE};

/// Volume ceiling; values are whole percent in `0..=100`.
pub const MAX_VOLUME: i32 = 100;

/// Frames per hardware buffer.
const BUFFER_FRAMES: u32 = 256;

/// Queue high-water mark in samples. Roughly a third of a second of
/// stereo audio; beyond it `push` blocks.
const QUEUE_LIMIT: usize = 32 * 1024;

/// How long a blocked `push`/`drain` sleeps between stop-flag checks.
const WAIT_SLICE: Duration = Duration::from_millis(50);

// ── Error type ──

#[derive(Debug)]
pub enum PlaybackError {
    OpenFailed(String),
    StreamFailed(String),
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackError::OpenFailed(e) => write!(f, "Audio output failed to open: {e}"),
            PlaybackError::StreamFailed(e) => write!(f, "Audio output failed: {e}"),
        }
    }
}

impl std::error::Error for PlaybackError {}

pub type Result<T> = std::result::Result<T, PlaybackError>;

// ── Seek math ──

/// Map a start offset in seconds to the first data chunk to request.
///
/// Chunk 0 is the header probe, so the audio starts at chunk 1; seeking
/// has chunk granularity (about 3.9 ms of stereo 24-bit audio).
pub fn start_chunk_for_offset(seconds: f64) -> u16 {
    let chunk =
        (seconds.max(0.0) * f64::from(BYTES_PER_SECOND) / CHUNK_SIZE as f64).floor() as u32 + 1;
    chunk.min(u32::from(u16::MAX)) as u16
}

// ── Sample queue ──

#[derive(Default)]
struct SampleQueue {
    samples: Mutex<VecDeque<i32>>,
    space: Condvar,
}

impl SampleQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<i32>> {
        match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Move queued samples into the hardware buffer, zero-filling any shortfall.
fn drain_into(pending: &mut VecDeque<i32>, data: &mut [i32]) {
    for slot in data.iter_mut() {
        *slot = pending.pop_front().unwrap_or(0);
    }
}

/// Scale one sample by `volume` percent in floating point, clamped to the
/// 32-bit range.
fn scaled(sample: i32, volume: i32) -> i32 {
    let v = f64::from(sample) * f64::from(volume) / f64::from(MAX_VOLUME);
    v.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

// ── Bridge ──

/// A running output stream fed by [`push`](PlaybackBridge::push).
///
/// The volume atomic may be updated from any thread at any time; it is read
/// once per pushed block. The stop flag unblocks a waiting `push`/`drain`
/// so cancellation is never stuck behind a stalled output.
pub struct PlaybackBridge {
    // Held only to keep the output running; dropping it stops playback.
    _stream: cpal::Stream,
    queue: Arc<SampleQueue>,
    volume: Arc<AtomicI32>,
    stop: Arc<AtomicBool>,
}

impl PlaybackBridge {
    /// Open the default host output at 44.1 kHz stereo i32.
    pub fn open(volume: Arc<AtomicI32>, stop: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::OpenFailed("no default output device".into()))?;
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(BUFFER_FRAMES),
        };

        let queue = Arc::new(SampleQueue::default());
        let callback_queue = Arc::clone(&queue);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i32], _: &cpal::OutputCallbackInfo| {
                    let mut pending = callback_queue.lock();
                    drain_into(&mut pending, data);
                    drop(pending);
                    callback_queue.space.notify_one();
                },
                |e| log::warn!("audio output error: {e}"),
                None,
            )
            .map_err(|e| PlaybackError::OpenFailed(e.to_string()))?;
        stream
            .play()
            .map_err(|e| PlaybackError::StreamFailed(e.to_string()))?;

        Ok(PlaybackBridge {
            _stream: stream,
            queue,
            volume,
            stop,
        })
    }

    /// Enqueue one decoded block, scaled by the current volume.
    ///
    /// Blocks while the queue is above its high-water mark; returns early
    /// (dropping the block) once the stop flag is raised.
    pub fn push(&self, samples: &[i32]) {
        let volume = self.volume.load(Ordering::Relaxed).clamp(0, MAX_VOLUME);

        let mut pending = self.queue.lock();
        while pending.len() >= QUEUE_LIMIT {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            pending = match self.queue.space.wait_timeout(pending, WAIT_SLICE) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        if volume >= MAX_VOLUME {
            pending.extend(samples.iter().copied());
        } else {
            pending.extend(samples.iter().map(|&s| scaled(s, volume)));
        }
    }

    /// Block until everything queued has been handed to the hardware (or
    /// the stop flag is raised). Used at end-of-track so the tail plays out.
    pub fn drain(&self) {
        let mut pending = self.queue.lock();
        while !pending.is_empty() {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            pending = match self.queue.space.wait_timeout(pending, WAIT_SLICE) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Seek math ──

    #[test]
    fn offset_zero_starts_at_chunk_one() {
        assert_eq!(start_chunk_for_offset(0.0), 1);
    }

    #[test]
    fn offset_four_seconds() {
        // floor(4.0 * 44100 * 6 / 1024) + 1 = 1034
        assert_eq!(start_chunk_for_offset(4.0), 1034);
    }

    #[test]
    fn negative_offset_clamps_to_start() {
        assert_eq!(start_chunk_for_offset(-3.0), 1);
    }

    #[test]
    fn huge_offset_saturates() {
        assert_eq!(start_chunk_for_offset(1e9), u16::MAX);
    }

    // ── Volume scaling ──

    #[test]
    fn scaled_half_volume_halves() {
        assert_eq!(scaled(1000, 50), 500);
        assert_eq!(scaled(-1000, 50), -500);
    }

    #[test]
    fn scaled_zero_volume_is_silence() {
        assert_eq!(scaled(i32::MAX, 0), 0);
        assert_eq!(scaled(i32::MIN, 0), 0);
    }

    #[test]
    fn scaled_extremes_stay_in_range() {
        assert_eq!(scaled(i32::MAX, 100), i32::MAX);
        assert_eq!(scaled(i32::MIN, 100), i32::MIN);
        assert_eq!(scaled(i32::MIN, 99), (f64::from(i32::MIN) * 99.0 / 100.0) as i32);
    }

    // ── Queue fill ──

    #[test]
    fn drain_into_pops_in_order() {
        let mut pending: VecDeque<i32> = (1..=6).collect();
        let mut buf = [0i32; 4];
        drain_into(&mut pending, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn drain_into_zero_fills_underrun() {
        let mut pending: VecDeque<i32> = VecDeque::from(vec![7]);
        let mut buf = [99i32; 4];
        drain_into(&mut pending, &mut buf);
        assert_eq!(buf, [7, 0, 0, 0]);
        assert!(pending.is_empty());
    }
}
