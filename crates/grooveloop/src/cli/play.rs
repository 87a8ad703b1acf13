//! `play` subcommand — stream a slot through the host audio output.

use std::sync::atomic::Ordering;

use super::{ConsoleObserver, Job, JobRunner, Result, drive};

pub(super) fn cmd_play(slot: u8, start: f64, volume: i32) -> Result<()> {
    let session = super::connect()?;
    let mut runner = JobRunner::new(session);
    runner.volume().store(volume, Ordering::Relaxed);

    if start > 0.0 {
        println!("Playing slot {slot} from {start:.1} s (Ctrl+C to stop)");
    } else {
        println!("Playing slot {slot} (Ctrl+C to stop)");
    }
    let observer = ConsoleObserver::new("Playing");
    drive(
        &mut runner,
        Job::Play {
            slot,
            start_offset: start,
        },
        observer,
    )
}
