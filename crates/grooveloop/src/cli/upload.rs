//! `upload` subcommand — store a WAV file into a slot.

use std::path::PathBuf;

use super::{ConsoleObserver, Job, JobRunner, Result, drive};

pub(super) fn cmd_upload(slot: u8, file: PathBuf) -> Result<()> {
    let session = super::connect()?;
    let mut runner = JobRunner::new(session);
    let observer = ConsoleObserver::new("Uploading");
    drive(
        &mut runner,
        Job::Upload {
            slot,
            source: file.clone(),
        },
        observer,
    )?;
    println!("Uploaded {} to slot {slot}", file.display());
    Ok(())
}
