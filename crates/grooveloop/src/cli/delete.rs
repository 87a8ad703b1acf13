//! `delete` subcommand — remove the track in a slot.

use super::{ConsoleObserver, Job, JobRunner, Result, drive};

pub(super) fn cmd_delete(slot: u8) -> Result<()> {
    let session = super::connect()?;
    let mut runner = JobRunner::new(session);
    let observer = ConsoleObserver::new("Deleting");
    drive(&mut runner, Job::Delete { slot }, observer)?;
    println!("Deleted slot {slot}");
    Ok(())
}
