//! `tracks` subcommand — list occupied slots.

use super::{ConsoleObserver, Job, JobRunner, Result, TracksOutput, drive};

pub(super) fn cmd_tracks(json: bool) -> Result<()> {
    let session = super::connect()?;
    let mut runner = JobRunner::new(session);
    let observer = ConsoleObserver::new("Listing");
    drive(&mut runner, Job::List, observer.clone())?;

    let tracks = observer.take_tracks().unwrap_or_default();

    if json {
        let output = TracksOutput {
            used: tracks.iter().filter(|t| t.present).count(),
            total: tracks.len(),
            tracks,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let used: Vec<_> = tracks.iter().filter(|t| t.present).collect();
    if used.is_empty() {
        println!("No tracks on the device.");
    } else {
        println!("{:>4}  {:>10}  {:>9}", "Slot", "Size", "Duration");
        for track in &used {
            println!(
                "{:>4}  {:>10}  {:>9}",
                track.slot,
                super::format_size(track.size_bytes),
                super::format_duration(track.duration_seconds)
            );
        }
    }
    println!();
    println!("{} of {} slots used", used.len(), tracks.len());
    Ok(())
}
