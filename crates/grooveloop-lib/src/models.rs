//! Caller-visible data models — track snapshots and enumerated devices.

use serde::Serialize;

use crate::protocol::BYTES_PER_SECOND;

/// Snapshot of one storage slot, produced by a list probe.
///
/// Snapshots go stale after any write operation (upload, delete) and must
/// be refreshed with a new list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    /// Slot index, 0..=99.
    pub slot: u8,
    /// Whether the slot holds a track.
    pub present: bool,
    /// On-device track size in bytes. Zero when the slot is empty.
    pub size_bytes: u32,
    /// Track length in seconds: `size_bytes / (6 * 44100)`. Zero when empty.
    pub duration_seconds: f64,
}

impl TrackInfo {
    /// Build a snapshot from a probe result (presence flag and byte size).
    pub fn from_probe(slot: u8, present: bool, size_bytes: u32) -> Self {
        let (size_bytes, duration_seconds) = if present {
            (size_bytes, f64::from(size_bytes) / f64::from(BYTES_PER_SECOND))
        } else {
            (0, 0.0)
        };
        TrackInfo {
            slot,
            present,
            size_bytes,
            duration_seconds,
        }
    }
}

/// A Groove Loop device seen during enumeration, opened or not.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    pub vid: u16,
    pub pid: u16,
    /// USB bus number; with `address` this identifies the physical device
    /// until it is re-plugged.
    pub bus: u8,
    pub address: u8,
    /// Product string, or `"Mooer Device"` when the descriptor is
    /// unreadable.
    pub name: String,
    /// Serial number string, if the device exposes one and we may read it.
    pub serial: Option<String>,
    /// False when the descriptor enumerated but opening failed (usually a
    /// missing udev rule on Linux).
    pub accessible: bool,
}
