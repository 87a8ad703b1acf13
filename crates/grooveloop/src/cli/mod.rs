//! CLI subcommands — device discovery, slot listing, transfers, playback.

mod delete;
mod devices;
mod download;
mod play;
mod tracks;
mod upload;

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Subcommand;
use serde::Serialize;

use grooveloop_lib::models::{DeviceDescriptor, TrackInfo};
use grooveloop_lib::runner::{Job, JobObserver, JobRunner};
use grooveloop_lib::session::DeviceSession;
use grooveloop_lib::transport::{self, DeviceError, UsbTransport};

pub(super) use crate::RUNNING;

pub(super) type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub devices: Vec<DeviceDescriptor>,
}

#[derive(Serialize)]
pub(super) struct TracksOutput {
    pub used: usize,
    pub total: usize,
    pub tracks: Vec<TrackInfo>,
}

// ── Commands ──

#[derive(Subcommand)]
pub enum Command {
    /// List connected Groove Loop devices
    Devices,

    /// List occupied slots on the pedal
    Tracks,

    /// Download a slot to a WAV file
    Download {
        /// Slot index (0-99)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=99))]
        slot: u8,
        /// Destination WAV file
        file: PathBuf,
    },

    /// Upload a 44.1 kHz WAV file into a slot
    Upload {
        /// Slot index (0-99)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=99))]
        slot: u8,
        /// Source WAV file (16/24/32-bit int or 32-bit float, mono or stereo)
        file: PathBuf,
    },

    /// Delete the track in a slot
    Delete {
        /// Slot index (0-99)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=99))]
        slot: u8,
    },

    /// Stream a slot through the default audio output
    Play {
        /// Slot index (0-99)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=99))]
        slot: u8,
        /// Start offset in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Playback volume in percent
        #[arg(long, value_parser = clap::value_parser!(i32).range(0..=100), default_value_t = 100)]
        volume: i32,
    },
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool) -> Result<()> {
    match cmd {
        Command::Devices => devices::cmd_devices(json),
        Command::Tracks => tracks::cmd_tracks(json),
        Command::Download { slot, file } => {
            if json {
                warn_json_unsupported("download");
            }
            download::cmd_download(slot, file)
        }
        Command::Upload { slot, file } => {
            if json {
                warn_json_unsupported("upload");
            }
            upload::cmd_upload(slot, file)
        }
        Command::Delete { slot } => {
            if json {
                warn_json_unsupported("delete");
            }
            delete::cmd_delete(slot)
        }
        Command::Play {
            slot,
            start,
            volume,
        } => {
            if json {
                warn_json_unsupported("play");
            }
            play::cmd_play(slot, start, volume)
        }
    }
}

// ── Session / job plumbing ──

/// Open the first attached pedal and wrap it in a session.
pub(super) fn connect() -> Result<DeviceSession<UsbTransport>> {
    match UsbTransport::connect_first() {
        Ok(t) => Ok(DeviceSession::new(t)),
        Err(e) => {
            if matches!(e, DeviceError::PermissionDenied) && transport::udev_rule_needed() {
                eprintln!(
                    "Hint: missing udev rule {}, run `grooveloop devices` for details.",
                    transport::UDEV_RULE_PATH
                );
            }
            Err(Box::new(e))
        }
    }
}

/// Run one job to completion, stopping it when Ctrl+C flips [`RUNNING`].
pub(super) fn drive(
    runner: &mut JobRunner<UsbTransport>,
    job: Job,
    observer: Arc<ConsoleObserver>,
) -> Result<()> {
    runner.submit(job, observer.clone());
    while runner.is_busy() {
        if !RUNNING.load(Ordering::SeqCst) {
            runner.stop();
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    runner.wait();
    observer.result()
}

/// Observer that renders progress as a single rewritten stderr line and
/// captures the job outcome for the foreground thread.
pub(super) struct ConsoleObserver {
    label: &'static str,
    last_percent: AtomicU64,
    printed: AtomicBool,
    error: Mutex<Option<String>>,
    tracks: Mutex<Option<Vec<TrackInfo>>>,
}

impl ConsoleObserver {
    pub(super) fn new(label: &'static str) -> Arc<Self> {
        Arc::new(ConsoleObserver {
            label,
            last_percent: AtomicU64::new(u64::MAX),
            printed: AtomicBool::new(false),
            error: Mutex::new(None),
            tracks: Mutex::new(None),
        })
    }

    /// The track list a `List` job delivered, if any.
    pub(super) fn take_tracks(&self) -> Option<Vec<TrackInfo>> {
        self.tracks.lock().unwrap().take()
    }

    /// The job outcome: `Err` with the reported message on failure.
    pub(super) fn result(&self) -> Result<()> {
        match self.error.lock().unwrap().take() {
            Some(message) => Err(message.into()),
            None => Ok(()),
        }
    }

    fn end_line(&self) {
        if self.printed.swap(false, Ordering::Relaxed) {
            eprintln!();
        }
    }
}

impl JobObserver for ConsoleObserver {
    fn progress(&self, current: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = current * 100 / total;
        if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
            eprint!("\r{} {percent:>3}%", self.label);
            let _ = std::io::stderr().flush();
            self.printed.store(true, Ordering::Relaxed);
        }
    }

    fn tracks_loaded(&self, tracks: &[TrackInfo]) {
        *self.tracks.lock().unwrap() = Some(tracks.to_vec());
    }

    fn finished(&self) {
        self.end_line();
    }

    fn error(&self, message: &str) {
        self.end_line();
        *self.error.lock().unwrap() = Some(message.into());
    }
}

// ── Formatting helpers ──

/// Render a byte count with a binary unit, one decimal place.
pub(super) fn format_size(bytes: u32) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let b = f64::from(bytes);
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// Render a duration as `m:ss.t`.
pub(super) fn format_duration(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor() as u64;
    let rest = seconds - minutes as f64 * 60.0;
    format!("{minutes}:{rest:04.1}")
}
