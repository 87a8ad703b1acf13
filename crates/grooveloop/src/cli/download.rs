//! `download` subcommand — save a slot to a WAV file.

use std::path::PathBuf;

use super::{ConsoleObserver, Job, JobRunner, Result, drive};

pub(super) fn cmd_download(slot: u8, file: PathBuf) -> Result<()> {
    let session = super::connect()?;
    let mut runner = JobRunner::new(session);
    let observer = ConsoleObserver::new("Downloading");
    drive(
        &mut runner,
        Job::Download {
            slot,
            dest: file.clone(),
        },
        observer,
    )?;
    println!("Saved slot {slot} to {}", file.display());
    Ok(())
}
