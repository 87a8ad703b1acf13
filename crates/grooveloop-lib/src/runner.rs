//! Job runner — a single-slot background executor for device operations.
//!
//! At most one job runs at a time; submitting while busy first requests a
//! stop on the running job and joins it. Jobs report through a
//! [`JobObserver`] whose callbacks arrive on the worker thread; observers
//! must not block. `finished` and `error` are mutually exclusive per job,
//! and a cooperative cancellation counts as `finished`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::models::TrackInfo;
use crate::playback::{self, MAX_VOLUME, PlaybackBridge};
use crate::session::DeviceSession;
use crate::transport::LooperBus;
use crate::wav;

/// The operation kinds a runner executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOp {
    List,
    Download,
    Upload,
    Delete,
    Play,
}

/// A fully-specified unit of work.
#[derive(Debug, Clone)]
pub enum Job {
    /// Probe all slots and report the snapshots via `tracks_loaded`.
    List,
    /// Download a slot into a WAV file.
    Download { slot: u8, dest: PathBuf },
    /// Upload a WAV file into a slot.
    Upload { slot: u8, source: PathBuf },
    /// Delete a slot.
    Delete { slot: u8 },
    /// Stream a slot through the host audio output, starting `start_offset`
    /// seconds in.
    Play { slot: u8, start_offset: f64 },
}

impl Job {
    pub fn op(&self) -> JobOp {
        match self {
            Job::List => JobOp::List,
            Job::Download { .. } => JobOp::Download,
            Job::Upload { .. } => JobOp::Upload,
            Job::Delete { .. } => JobOp::Delete,
            Job::Play { .. } => JobOp::Play,
        }
    }

    fn playing_slot(&self) -> Option<u8> {
        match self {
            Job::Play { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

/// Receives job lifecycle callbacks, delivered from the worker thread.
pub trait JobObserver: Send + Sync {
    fn progress(&self, _current: u64, _total: u64) {}
    fn tracks_loaded(&self, _tracks: &[TrackInfo]) {}
    fn finished(&self);
    fn error(&self, message: &str);
}

struct ActiveJob {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    op: JobOp,
    play_slot: Option<u8>,
}

/// Owns the device session and runs one job at a time against it.
pub struct JobRunner<B: LooperBus + Send + 'static> {
    session: Arc<Mutex<DeviceSession<B>>>,
    volume: Arc<AtomicI32>,
    active: Option<ActiveJob>,
}

fn lock_session<B: LooperBus>(
    session: &Arc<Mutex<DeviceSession<B>>>,
) -> MutexGuard<'_, DeviceSession<B>> {
    match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<B: LooperBus + Send + 'static> JobRunner<B> {
    pub fn new(session: DeviceSession<B>) -> Self {
        JobRunner {
            session: Arc::new(Mutex::new(session)),
            volume: Arc::new(AtomicI32::new(MAX_VOLUME)),
            active: None,
        }
    }

    /// Shared playback volume in percent; writable from any thread.
    pub fn volume(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.volume)
    }

    /// The operation currently executing, if any.
    pub fn current_op(&self) -> Option<JobOp> {
        self.active
            .as_ref()
            .filter(|a| !a.handle.is_finished())
            .map(|a| a.op)
    }

    pub fn is_busy(&self) -> bool {
        self.current_op().is_some()
    }

    /// Start `job`, first stopping and joining any job still running.
    pub fn submit(&mut self, job: Job, observer: Arc<dyn JobObserver>) {
        self.finish_active(true);

        let stop = Arc::new(AtomicBool::new(false));
        let op = job.op();
        let play_slot = job.playing_slot();
        let session = Arc::clone(&self.session);
        let volume = Arc::clone(&self.volume);
        let worker_stop = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            match run_job(&session, job, &worker_stop, &volume, observer.as_ref()) {
                Ok(()) => observer.finished(),
                Err(e) if e.is_cancelled() => observer.finished(),
                Err(e) => observer.error(&e.to_string()),
            }
        });
        self.active = Some(ActiveJob {
            handle,
            stop,
            op,
            play_slot,
        });
    }

    /// Request a cooperative stop and wait for the worker to exit. For a
    /// playback job this also tells the device to abort its play state.
    pub fn stop(&mut self) {
        self.finish_active(true);
    }

    /// Wait for the current job to finish naturally.
    pub fn wait(&mut self) {
        self.finish_active(false);
    }

    fn finish_active(&mut self, request_stop: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        if request_stop {
            active.stop.store(true, Ordering::Relaxed);
        }
        if active.handle.join().is_err() {
            log::warn!("job worker panicked");
        }
        if request_stop && let Some(slot) = active.play_slot {
            if let Err(e) = lock_session(&self.session).stop_playback(slot) {
                log::warn!("stop playback for slot {slot}: {e}");
            }
        }
    }
}

impl<B: LooperBus + Send + 'static> Drop for JobRunner<B> {
    fn drop(&mut self) {
        self.finish_active(true);
    }
}

fn run_job<B: LooperBus>(
    session: &Arc<Mutex<DeviceSession<B>>>,
    job: Job,
    stop: &Arc<AtomicBool>,
    volume: &Arc<AtomicI32>,
    observer: &dyn JobObserver,
) -> Result<()> {
    let mut session = lock_session(session);
    match job {
        Job::List => {
            let tracks = session.list_tracks()?;
            observer.tracks_loaded(&tracks);
        }
        Job::Download { slot, dest } => {
            let samples =
                session.download_track(slot, stop, &mut |c, t| observer.progress(c, t))?;
            wav::write_wav(&dest, &samples)?;
        }
        Job::Upload { slot, source } => {
            let samples = wav::read_wav(&source)?;
            session.upload_track(slot, &samples, stop, &mut |c, t| observer.progress(c, t))?;
        }
        Job::Delete { slot } => {
            session.delete_track(slot)?;
        }
        Job::Play { slot, start_offset } => {
            let bridge = PlaybackBridge::open(Arc::clone(volume), Arc::clone(stop))?;
            let start = playback::start_chunk_for_offset(start_offset);
            session.stream_track(
                slot,
                start,
                &mut |samples| {
                    bridge.push(samples);
                    Ok(())
                },
                stop,
                &mut |c, t| observer.progress(c, t),
            )?;
            // Natural end of track: let the queued tail play out.
            if !stop.load(Ordering::Relaxed) {
                bridge.drain();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CHUNK_SIZE, EP_IN_DATA, TRACK_HEADER_SIZE};
    use crate::transport::mock::MockBus;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Progress(u64, u64),
        Tracks(usize),
        Finished,
        Error(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn terminal(&self) -> Option<Event> {
            self.events()
                .into_iter()
                .find(|e| matches!(e, Event::Finished | Event::Error(_)))
        }
    }

    impl JobObserver for Recorder {
        fn progress(&self, current: u64, total: u64) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Progress(current, total));
        }
        fn tracks_loaded(&self, tracks: &[TrackInfo]) {
            self.events.lock().unwrap().push(Event::Tracks(tracks.len()));
        }
        fn finished(&self) {
            self.events.lock().unwrap().push(Event::Finished);
        }
        fn error(&self, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Error(message.into()));
        }
    }

    fn header_chunk(size: u32) -> Vec<u8> {
        let mut chunk = vec![0u8; TRACK_HEADER_SIZE];
        chunk[0] = 0x01;
        chunk[4..8].copy_from_slice(&size.to_le_bytes());
        chunk
    }

    fn runner_with(bus: MockBus) -> JobRunner<MockBus> {
        JobRunner::new(DeviceSession::new(bus))
    }

    #[test]
    fn list_job_reports_tracks_then_finishes() {
        let bus = MockBus::new();
        for _ in 0..100 {
            bus.queue_read(EP_IN_DATA, vec![0u8; TRACK_HEADER_SIZE]);
        }
        let mut runner = runner_with(bus);
        let rec = Arc::new(Recorder::default());
        runner.submit(Job::List, rec.clone());
        runner.wait();

        let events = rec.events();
        assert_eq!(events, vec![Event::Tracks(100), Event::Finished]);
    }

    #[test]
    fn failing_job_reports_error_not_finished() {
        let bus = MockBus::new();
        bus.queue_read(EP_IN_DATA, vec![0u8; TRACK_HEADER_SIZE]); // empty slot
        let mut runner = runner_with(bus);
        let rec = Arc::new(Recorder::default());
        runner.submit(
            Job::Download {
                slot: 3,
                dest: std::env::temp_dir().join("grooveloop-nonexistent.wav"),
            },
            rec.clone(),
        );
        runner.wait();

        let events = rec.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Error(msg) if msg.contains("Slot 3")));
    }

    #[test]
    fn download_job_writes_wav_file() {
        let size = 2 * CHUNK_SIZE as u32;
        let bus = MockBus::new();
        bus.queue_read(EP_IN_DATA, header_chunk(size));
        for _ in 0..2 {
            bus.queue_read(EP_IN_DATA, vec![0u8; CHUNK_SIZE]);
        }
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slot0.wav");

        let mut runner = runner_with(bus);
        let rec = Arc::new(Recorder::default());
        runner.submit(
            Job::Download {
                slot: 0,
                dest: dest.clone(),
            },
            rec.clone(),
        );
        runner.wait();

        assert_eq!(rec.terminal(), Some(Event::Finished));
        let samples = crate::wav::read_wav(&dest).unwrap();
        assert_eq!(samples.len(), size as usize / 3);
    }

    #[test]
    fn progress_events_are_monotonic() {
        let size = 25 * CHUNK_SIZE as u32;
        let bus = MockBus::new();
        bus.queue_read(EP_IN_DATA, header_chunk(size));
        for _ in 0..25 {
            bus.queue_read(EP_IN_DATA, vec![0u8; CHUNK_SIZE]);
        }
        let dir = tempfile::tempdir().unwrap();

        let mut runner = runner_with(bus);
        let rec = Arc::new(Recorder::default());
        runner.submit(
            Job::Download {
                slot: 1,
                dest: dir.path().join("slot1.wav"),
            },
            rec.clone(),
        );
        runner.wait();

        let progress: Vec<(u64, u64)> = rec
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Progress(c, t) => Some((*c, *t)),
                _ => None,
            })
            .collect();
        assert!(progress.len() >= 3);
        assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(progress.last().unwrap(), &(u64::from(size), u64::from(size)));
    }

    #[test]
    fn second_submission_waits_for_the_first() {
        let bus = MockBus::new();
        bus.set_read_delay(Duration::from_millis(2));
        for _ in 0..100 {
            bus.queue_read(EP_IN_DATA, vec![0u8; TRACK_HEADER_SIZE]);
        }
        let mut runner = runner_with(bus);
        let rec1 = Arc::new(Recorder::default());
        let rec2 = Arc::new(Recorder::default());

        runner.submit(Job::List, rec1.clone());
        runner.submit(Job::Delete { slot: 0 }, rec2.clone());
        // The second submit must have joined job 1 before starting job 2.
        assert!(rec1.terminal().is_some(), "job 1 not terminated");
        runner.wait();
        assert_eq!(rec2.terminal(), Some(Event::Finished));
    }

    #[test]
    fn stop_cancels_download_cleanly() {
        let size = 200 * CHUNK_SIZE as u32;
        let bus = MockBus::new();
        bus.set_read_delay(Duration::from_millis(5));
        bus.queue_read(EP_IN_DATA, header_chunk(size));
        for _ in 0..200 {
            bus.queue_read(EP_IN_DATA, vec![0u8; CHUNK_SIZE]);
        }
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cancelled.wav");

        let mut runner = runner_with(bus);
        let rec = Arc::new(Recorder::default());
        runner.submit(
            Job::Download {
                slot: 0,
                dest: dest.clone(),
            },
            rec.clone(),
        );
        assert_eq!(runner.current_op(), Some(JobOp::Download));
        std::thread::sleep(Duration::from_millis(30));
        runner.stop();

        // Cancellation is a clean exit, and no half-file is left behind.
        assert_eq!(rec.terminal(), Some(Event::Finished));
        assert!(!dest.exists());
        assert_eq!(runner.current_op(), None);
    }

    #[test]
    fn runner_is_idle_after_completion() {
        let bus = MockBus::new();
        let mut runner = runner_with(bus);
        let rec = Arc::new(Recorder::default());
        runner.submit(Job::Delete { slot: 9 }, rec.clone());
        runner.wait();
        assert!(!runner.is_busy());
        assert_eq!(rec.terminal(), Some(Event::Finished));
    }
}
