//! Device session — the protocol state machine on top of a [`LooperBus`].
//!
//! Every operation is a strict sequence of command/response pairs: at most
//! one command is on the wire at any moment, and each is followed by its
//! expected read before the next command goes out. Chunked transfers feed
//! a [`ChunkDecoder`] so stereo pairing survives the 1024-byte chunk
//! boundary (1024 is not a multiple of the 6-byte wire frame).

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::models::TrackInfo;
use crate::protocol::{
    self, CHUNK_SIZE, ChunkDecoder, EP_IN_DATA, EP_IN_STATUS, EP_OUT, EP_OUT_DATA, MAX_TRACKS,
    STATUS_SIZE,
};
use crate::transport::{DeviceError, LooperBus};

/// Bulk transfers report progress every this many chunks (plus a final
/// `(total, total)` report).
const PROGRESS_INTERVAL: u16 = 10;

/// Device settle time after upload init and before the finalize probe.
const UPLOAD_SETTLE: Duration = Duration::from_secs(1);

/// Progress callback: `(current, total)`, both in the operation's unit
/// (bytes for transfers, chunks for streaming).
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

/// Consumer for decoded 32-bit interleaved stereo blocks during streaming.
pub type AudioSink<'a> = &'a mut dyn FnMut(&[i32]) -> Result<()>;

/// An exclusive session with an opened pedal.
pub struct DeviceSession<B: LooperBus> {
    bus: B,
}

impl<B: LooperBus> DeviceSession<B> {
    pub fn new(bus: B) -> Self {
        DeviceSession { bus }
    }

    /// `(bus, address)` of the bound device, for hotplug identity checks.
    pub fn identity(&self) -> (u8, u8) {
        self.bus.identity()
    }

    /// The underlying bus (used by tests to inspect the wire log).
    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn check_slot(slot: u8) -> Result<()> {
        if slot >= MAX_TRACKS {
            return Err(DeviceError::InvalidSlot(slot).into());
        }
        Ok(())
    }

    /// Read one status acknowledgement. The status endpoint staying silent
    /// is tolerated; any other failure propagates.
    fn read_status(&mut self) -> Result<()> {
        match self.bus.read(EP_IN_STATUS, STATUS_SIZE) {
            Ok(_) => Ok(()),
            Err(DeviceError::Timeout) => {
                log::debug!("no status acknowledgement within timeout");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Chunk-0 probe: ask for chunk 0 of `slot` and parse the track-info
    /// header out of the response.
    fn probe(&mut self, slot: u8) -> Result<(bool, u32)> {
        self.bus.write(EP_OUT, &protocol::download_frame(slot, 0))?;
        let resp = self.bus.read(EP_IN_DATA, CHUNK_SIZE)?;
        Ok(protocol::parse_track_header(&resp))
    }

    fn chunk_count(size: u32) -> u16 {
        size.div_ceil(CHUNK_SIZE as u32) as u16
    }

    /// Probe all 100 slots and return their snapshots in slot order.
    ///
    /// 100 sequential round-trips; the firmware has no bulk list form (see
    /// `protocol::parse_track_list` for the defensive parser).
    pub fn list_tracks(&mut self) -> Result<Vec<TrackInfo>> {
        let mut tracks = Vec::with_capacity(usize::from(MAX_TRACKS));
        for slot in 0..MAX_TRACKS {
            let (present, size) = self.probe(slot)?;
            tracks.push(TrackInfo::from_probe(slot, present, size));
        }
        Ok(tracks)
    }

    /// Delete the track in `slot` and consume the acknowledgement.
    pub fn delete_track(&mut self, slot: u8) -> Result<()> {
        Self::check_slot(slot)?;
        self.bus.write(EP_OUT, &protocol::delete_frame(slot))?;
        self.read_status()
    }

    /// Download the track in `slot` as 32-bit interleaved stereo samples.
    ///
    /// `progress` receives `(bytes_emitted, size_bytes)` every ten chunks
    /// and a final `(size, size)`. The stop flag is polled at each chunk
    /// boundary and aborts with `Cancelled`.
    pub fn download_track(
        &mut self,
        slot: u8,
        stop: &AtomicBool,
        progress: ProgressFn,
    ) -> Result<Vec<i32>> {
        Self::check_slot(slot)?;
        let (present, size) = self.probe(slot)?;
        if !present {
            return Err(DeviceError::NoSuchTrack(slot).into());
        }

        let chunks = Self::chunk_count(size);
        let mut decoder = ChunkDecoder::new();
        let mut samples: Vec<i32> = Vec::with_capacity(size as usize / 3);

        for chunk in 1..=chunks {
            if stop.load(Ordering::Relaxed) {
                return Err(DeviceError::Cancelled.into());
            }
            self.bus
                .write(EP_OUT, &protocol::download_frame(slot, chunk))?;
            let data = self.bus.read(EP_IN_DATA, CHUNK_SIZE)?;
            if data.is_empty() {
                break;
            }
            samples.extend(decoder.push(&data));

            if chunk % PROGRESS_INTERVAL == 0 {
                // The zero-padded final chunk can decode past the track
                // size; progress never exceeds the total.
                progress((samples.len() as u64 * 3).min(u64::from(size)), u64::from(size));
            }
        }
        progress(u64::from(size), u64::from(size));

        // Surplus samples come from the zero padding of the last chunk.
        let expected = size as usize / 3;
        if samples.len() > expected {
            samples.truncate(expected);
        }
        Ok(samples)
    }

    /// Upload 32-bit interleaved stereo samples into `slot`.
    ///
    /// Sequence: init (+1 s settle), a meta chunk carrying the encoded byte
    /// count, one command/ack + data/ack pair per 1024-byte chunk, then a
    /// settle and a chunk-0 verify probe. The device has no transactional
    /// semantics; a failed upload leaves the slot in an undefined state.
    pub fn upload_track(
        &mut self,
        slot: u8,
        samples: &[i32],
        stop: &AtomicBool,
        progress: ProgressFn,
    ) -> Result<()> {
        Self::check_slot(slot)?;

        self.bus.write(EP_OUT, &protocol::upload_init_frame())?;
        self.read_status()?;
        thread::sleep(UPLOAD_SETTLE);

        let data = protocol::encode_samples(samples);
        let size = data.len() as u32;

        let mut meta = vec![0u8; CHUNK_SIZE];
        meta[..4].copy_from_slice(&size.to_le_bytes());
        self.bus.write(EP_OUT, &protocol::upload_frame(slot, 0))?;
        self.read_status()?;
        self.bus.write(EP_OUT_DATA, &meta)?;
        self.read_status()?;

        let chunks = Self::chunk_count(size);
        for index in 0..chunks {
            if stop.load(Ordering::Relaxed) {
                return Err(DeviceError::Cancelled.into());
            }
            let offset = usize::from(index) * CHUNK_SIZE;
            let end = (offset + CHUNK_SIZE).min(data.len());
            let mut chunk = data[offset..end].to_vec();
            chunk.resize(CHUNK_SIZE, 0);

            self.bus
                .write(EP_OUT, &protocol::upload_frame(slot, index + 1))?;
            self.read_status()?;
            self.bus.write(EP_OUT_DATA, &chunk)?;
            self.read_status()?;

            if index % PROGRESS_INTERVAL == 0 {
                progress(offset as u64, u64::from(size));
            }
        }
        progress(u64::from(size), u64::from(size));

        thread::sleep(UPLOAD_SETTLE);
        let (present, reported) = self.probe(slot)?;
        if !present || reported != size {
            return Err(DeviceError::TransferFailed(format!(
                "upload verify: slot {slot} reports present={present}, \
                 {reported} bytes (sent {size})"
            ))
            .into());
        }
        Ok(())
    }

    /// Stream the track in `slot` through `sink`, chunk by chunk, starting
    /// at `start_chunk` (1 = the beginning; chunk 0 is the header probe).
    ///
    /// An empty slot returns without error. `progress` receives
    /// `(chunk, total_chunks)` every iteration; the front-end maps that
    /// ratio linearly onto elapsed time for its seek UI. When the stop flag
    /// is raised the loop exits cleanly without sending further commands;
    /// issuing `stop_playback` is the caller's job.
    pub fn stream_track(
        &mut self,
        slot: u8,
        start_chunk: u16,
        sink: AudioSink,
        stop: &AtomicBool,
        progress: ProgressFn,
    ) -> Result<()> {
        Self::check_slot(slot)?;
        let (present, size) = self.probe(slot)?;
        if !present {
            return Ok(());
        }

        let chunks = Self::chunk_count(size);
        let mut decoder = ChunkDecoder::new();

        for chunk in start_chunk.max(1)..=chunks {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            self.bus
                .write(EP_OUT, &protocol::download_frame(slot, chunk))?;
            let data = self.bus.read(EP_IN_DATA, CHUNK_SIZE)?;
            if data.is_empty() {
                break;
            }
            let samples = decoder.push(&data);
            if !samples.is_empty() {
                sink(&samples)?;
            }
            progress(u64::from(chunk), u64::from(chunks));
        }
        Ok(())
    }

    /// Tell the device to stop its internal playback of `slot`.
    ///
    /// Fire-and-forget: the status response (if any) is read and discarded,
    /// and silence is tolerated.
    pub fn stop_playback(&mut self, slot: u8) -> Result<()> {
        Self::check_slot(slot)?;
        self.bus.write(EP_OUT, &protocol::play_frame(slot, 0))?;
        self.read_status()
    }
}
