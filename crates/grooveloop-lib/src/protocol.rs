//! Wire protocol for the Mooer Groove Loop pedal.
//!
//! All values decoded from USB captures of the vendor editor. The device
//! speaks a fixed 64-byte command frame on the OUT endpoint and answers on
//! two IN endpoints: short status acknowledgements (64 bytes) and audio
//! data chunks (1024 bytes). Outgoing frames carry a CRC-16 computed with
//! the device's own table; incoming frames carry no checksum the firmware
//! expects us to verify.

use crate::models::TrackInfo;

// ── USB identity ──

/// Mooer vendor ID.
pub const VENDOR_ID: u16 = 0x34DB;

/// Groove Loop product ID (GL100 and GL200 share it).
pub const PRODUCT_ID: u16 = 0x0008;

// ── Endpoints ──

/// OUT endpoint for command frames.
pub const EP_OUT: u8 = 0x02;

/// OUT endpoint for upload data chunks.
pub const EP_OUT_DATA: u8 = 0x03;

/// IN endpoint for 64-byte status acknowledgements.
pub const EP_IN_STATUS: u8 = 0x81;

/// IN endpoint for 1024-byte audio data chunks.
pub const EP_IN_DATA: u8 = 0x83;

// ── Sizes and limits ──

/// Number of storage slots on the device.
pub const MAX_TRACKS: u8 = 100;

/// Every OUT command frame is exactly this long, zero-padded.
pub const FRAME_SIZE: usize = 64;

/// Size of a status-endpoint acknowledgement.
pub const STATUS_SIZE: usize = 64;

/// Size of a data-endpoint transfer.
pub const CHUNK_SIZE: usize = 1024;

/// Length of the track-info header at the start of a chunk-0 response.
pub const TRACK_HEADER_SIZE: usize = 18;

/// One stereo pair on the wire: 2 channels x 3 packed bytes.
pub const WIRE_FRAME_BYTES: usize = 6;

/// Track sample rate. The device stores nothing else.
pub const SAMPLE_RATE: u32 = 44_100;

/// On-device bytes consumed per second of audio (6 bytes per stereo frame).
pub const BYTES_PER_SECOND: u32 = WIRE_FRAME_BYTES as u32 * SAMPLE_RATE;

// ── Sub-commands ──

/// Delete a slot. Args: slot as u16 LE at offset 6.
pub const SUBCMD_DELETE: u8 = 0x88;

/// Download a chunk. Args: slot u8 at 6, chunk u16 LE at 8.
/// Chunk 0 doubles as the occupancy query for a slot.
pub const SUBCMD_DOWNLOAD: u8 = 0x82;

/// Announce an upload data chunk. Args: slot u8 at 6, chunk u16 LE at 8.
pub const SUBCMD_UPLOAD: u8 = 0x84;

/// Begin an upload transaction. No args.
pub const SUBCMD_UPLOAD_INIT: u8 = 0x86;

/// Start or stop on-device playback. Args: action u8 at 6 (1=play, 0=stop),
/// slot u16 LE at 8.
pub const SUBCMD_PLAY: u8 = 0x8A;

/// Frame magic, bytes 0..3 of every OUT command.
pub const FRAME_MAGIC: [u8; 3] = [0x3F, 0xAA, 0x55];

// ── CRC-16 ──

/// The device's CRC table (0x1021 family). The firmware's verifier is
/// bit-exact against this table; do not regenerate it from a polynomial.
const CRC_TABLE: [u16; 256] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50A5, 0x60C6, 0x70E7,
    0x8108, 0x9129, 0xA14A, 0xB16B, 0xC18C, 0xD1AD, 0xE1CE, 0xF1EF,
    0x1231, 0x0210, 0x3273, 0x2252, 0x52B5, 0x4294, 0x72F7, 0x62D6,
    0x9339, 0x8318, 0xB37B, 0xA35A, 0xD3BD, 0xC39C, 0xF3FF, 0xE3DE,
    0x2462, 0x3443, 0x0420, 0x1401, 0x64E6, 0x74C7, 0x44A4, 0x5485,
    0xA56A, 0xB54B, 0x8528, 0x9509, 0xE5EE, 0xF5CF, 0xC5AC, 0xD58D,
    0x3653, 0x2672, 0x1611, 0x0630, 0x76D7, 0x66F6, 0x5695, 0x46B4,
    0xB75B, 0xA77A, 0x9719, 0x8738, 0xF7DF, 0xE7FE, 0xD79D, 0xC7BC,
    0x48C4, 0x58E5, 0x6886, 0x78A7, 0x0840, 0x1861, 0x2802, 0x3823,
    0xC9CC, 0xD9ED, 0xE98E, 0xF9AF, 0x8948, 0x9969, 0xA90A, 0xB92B,
    0x5AF5, 0x4AD4, 0x7AB7, 0x6A96, 0x1A71, 0x0A50, 0x3A33, 0x2A12,
    0xDBFD, 0xCBDC, 0xFBBF, 0xEB9E, 0x9B79, 0x8B58, 0xBB3B, 0xAB1A,
    0x6CA6, 0x7C87, 0x4CE4, 0x5CC5, 0x2C22, 0x3C03, 0x0C60, 0x1C41,
    0xEDAE, 0xFD8F, 0xCDEC, 0xDDCD, 0xAD2A, 0xBD0B, 0x8D68, 0x9D49,
    0x7E97, 0x6EB6, 0x5ED5, 0x4EF4, 0x3E13, 0x2E32, 0x1E51, 0x0E70,
    0xFF9F, 0xEFBE, 0xDFDD, 0xCFFC, 0xBF1B, 0xAF3A, 0x9F59, 0x8F78,
    0x9188, 0x81A9, 0xB1CA, 0xA1EB, 0xD10C, 0xC12D, 0xF14E, 0xE16F,
    0x1080, 0x00A1, 0x30C2, 0x20E3, 0x5004, 0x4025, 0x7046, 0x6067,
    0x83B9, 0x9398, 0xA3FB, 0xB3DA, 0xC33D, 0xD31C, 0xE37F, 0xF35E,
    0x02B1, 0x1290, 0x22F3, 0x32D2, 0x4235, 0x5214, 0x6277, 0x7256,
    0xB5EA, 0xA5CB, 0x95A8, 0x8589, 0xF56E, 0xE54F, 0xD52C, 0xC50D,
    0x34E2, 0x24C3, 0x14A0, 0x0481, 0x7466, 0x6447, 0x5424, 0x4405,
    0xA7DB, 0xB7FA, 0x8799, 0x97B8, 0xE75F, 0xF77E, 0xC71D, 0xD73C,
    0x26D3, 0x36F2, 0x0691, 0x16B0, 0x6657, 0x7676, 0x4615, 0x5634,
    0xD94C, 0xC96D, 0xF90E, 0xE92F, 0x99C8, 0x89E9, 0xB98A, 0xA9AB,
    0x5844, 0x4865, 0x7806, 0x6827, 0x18C0, 0x08E1, 0x3882, 0x28A3,
    0xCB7D, 0xDB5C, 0xEB3F, 0xFB1E, 0x8BF9, 0x9BD8, 0xABBB, 0xBB9A,
    0x4A75, 0x5A54, 0x6A37, 0x7A16, 0x0AF1, 0x1AD0, 0x2AB3, 0x3A92,
    0xFD2E, 0xED0F, 0xDD6C, 0xCD4D, 0xBDAA, 0xAD8B, 0x9DE8, 0x8DC9,
    0x7C26, 0x6C07, 0x5C64, 0x4C45, 0x3CA2, 0x2C83, 0x1CE0, 0x0CC1,
    0xEF1F, 0xFF3E, 0xCF5D, 0xDF7C, 0xAF9B, 0xBFBA, 0x8FD9, 0x9FF8,
    0x6E17, 0x7E36, 0x4E55, 0x5E74, 0x2E93, 0x3EB2, 0x0ED1, 0x1EF0,
];

/// Table-driven CRC-16 as the firmware computes it: state starts at 0,
/// `state = TABLE[(state >> 8) ^ byte] ^ (state << 8)`, final value is the
/// bitwise NOT of the state.
pub fn crc16(data: &[u8]) -> u16 {
    let mut chk: u16 = 0;
    for &byte in data {
        chk = CRC_TABLE[usize::from((chk >> 8) as u8 ^ byte)] ^ (chk << 8);
    }
    !chk
}

// ── Command frames ──

/// Build a 64-byte command frame around `subcmd` and its argument bytes.
///
/// Layout: magic at 0..3, payload length at 3 (sub-command byte plus args),
/// reserved zero at 4, sub-command at 5, args from 6, then the CRC-16 of
/// bytes `[3 .. 6 + args.len()]` stored big-endian. The remainder is zero.
fn build_frame(subcmd: u8, args: &[u8]) -> [u8; FRAME_SIZE] {
    debug_assert!(args.len() <= FRAME_SIZE - 8);
    let mut frame = [0u8; FRAME_SIZE];
    frame[..3].copy_from_slice(&FRAME_MAGIC);
    frame[3] = (1 + args.len()) as u8;
    frame[5] = subcmd;
    frame[6..6 + args.len()].copy_from_slice(args);

    let crc_end = 6 + args.len();
    let crc = crc16(&frame[3..crc_end]);
    frame[crc_end] = (crc >> 8) as u8;
    frame[crc_end + 1] = (crc & 0xFF) as u8;
    frame
}

/// Delete the track in `slot`.
pub fn delete_frame(slot: u8) -> [u8; FRAME_SIZE] {
    build_frame(SUBCMD_DELETE, &u16::from(slot).to_le_bytes())
}

/// Request `chunk` of the track in `slot`. Chunk 0 is the occupancy query.
pub fn download_frame(slot: u8, chunk: u16) -> [u8; FRAME_SIZE] {
    let mut args = [0u8; 6];
    args[0] = slot;
    args[2..4].copy_from_slice(&chunk.to_le_bytes());
    build_frame(SUBCMD_DOWNLOAD, &args)
}

/// Announce upload `chunk` for `slot`; the chunk payload follows on the
/// data OUT endpoint.
pub fn upload_frame(slot: u8, chunk: u16) -> [u8; FRAME_SIZE] {
    let mut args = [0u8; 6];
    args[0] = slot;
    args[2..4].copy_from_slice(&chunk.to_le_bytes());
    build_frame(SUBCMD_UPLOAD, &args)
}

/// Begin an upload transaction. The device needs about a second to settle
/// after acknowledging this.
pub fn upload_init_frame() -> [u8; FRAME_SIZE] {
    build_frame(SUBCMD_UPLOAD_INIT, &[])
}

/// Start (`action` 1) or stop (`action` 0) on-device playback of `slot`.
pub fn play_frame(slot: u8, action: u8) -> [u8; FRAME_SIZE] {
    let mut args = [0u8; 6];
    args[0] = action;
    args[2..4].copy_from_slice(&u16::from(slot).to_le_bytes());
    build_frame(SUBCMD_PLAY, &args)
}

// ── Response parsing ──

/// Parse the track-info header at the start of a chunk-0 response.
///
/// Byte 0 is the presence flag (0x01 when the slot holds a track), bytes
/// 4..8 are the track size in bytes, little-endian. The remaining header
/// bytes are reserved. Short responses (fewer than 12 bytes, including an
/// empty read) report an absent slot.
pub fn parse_track_header(data: &[u8]) -> (bool, u32) {
    if data.len() < 12 {
        return (false, 0);
    }
    let present = data[0] == 0x01;
    let size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if present { (present, size) } else { (false, 0) }
}

/// Parse a bulk track-list response: 100 records of 8 bytes starting at
/// offset 16, each with a presence flag at 0 and an LE u32 size at 4.
///
/// The shipped firmware answers per-slot chunk-0 probes instead (see
/// `DeviceSession::list_tracks`); this parser handles the bulk form should
/// a device ever produce one.
pub fn parse_track_list(data: &[u8]) -> Vec<TrackInfo> {
    let mut tracks = Vec::with_capacity(usize::from(MAX_TRACKS));
    let mut offset = 16usize;
    for slot in 0..MAX_TRACKS {
        if offset + 8 > data.len() {
            break;
        }
        let present = data[offset] != 0;
        let size = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);
        tracks.push(TrackInfo::from_probe(slot, present, size));
        offset += 8;
    }
    tracks
}

// ── Audio payload codec ──

/// Decode packed 24-bit little-endian samples into the internal 32-bit
/// representation. Every complete 3-byte group becomes one sample:
/// sign-extend from 24 bits, then shift left by 8. Trailing bytes that do
/// not form a whole sample are ignored.
pub fn decode_samples(data: &[u8]) -> Vec<i32> {
    let mut samples = Vec::with_capacity(data.len() / 3);
    for group in data.chunks_exact(3) {
        let v = i32::from(group[0]) | (i32::from(group[1]) << 8) | (i32::from(group[2]) << 16);
        let v = (v << 8) >> 8;
        samples.push(v << 8);
    }
    samples
}

/// Encode internal 32-bit samples into the device's packed 24-bit form:
/// arithmetic shift right by 8, emit the low three bytes little-endian.
pub fn encode_samples(samples: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 3);
    for &sample in samples {
        let v = sample >> 8;
        out.push((v & 0xFF) as u8);
        out.push(((v >> 8) & 0xFF) as u8);
        out.push(((v >> 16) & 0xFF) as u8);
    }
    out
}

/// Reassembles whole stereo wire frames across chunk boundaries.
///
/// 1024 is not a multiple of 6, so a data chunk usually ends mid-frame.
/// Feeding chunks through this keeps left/right pairing intact: only
/// complete 6-byte frames are decoded, the 0..5 leftover bytes wait for
/// the next chunk.
#[derive(Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and decode every complete stereo frame buffered so far.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<i32> {
        self.pending.extend_from_slice(chunk);
        let whole = self.pending.len() - self.pending.len() % WIRE_FRAME_BYTES;
        if whole == 0 {
            return Vec::new();
        }
        let samples = decode_samples(&self.pending[..whole]);
        self.pending.drain(..whole);
        samples
    }

    /// Bytes currently held back waiting for the rest of a frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── CRC ──

    #[test]
    fn crc_of_empty_input_is_not_state_zero() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn crc_matches_delete_fixture() {
        // The payload of delete(slot=5): 03 00 88 05 00
        let crc = crc16(&[0x03, 0x00, 0x88, 0x05, 0x00]);
        let frame = delete_frame(5);
        assert_eq!(frame[8], (crc >> 8) as u8);
        assert_eq!(frame[9], (crc & 0xFF) as u8);
    }

    /// Recomputing the CRC over the covered range of any frame must match
    /// the stored big-endian value.
    fn assert_crc_consistent(frame: &[u8; FRAME_SIZE]) {
        let len = usize::from(frame[3]);
        let crc = crc16(&frame[3..5 + len]);
        assert_eq!(frame[5 + len], (crc >> 8) as u8, "CRC high byte");
        assert_eq!(frame[6 + len], (crc & 0xFF) as u8, "CRC low byte");
    }

    #[test]
    fn all_frame_kinds_carry_valid_crc() {
        assert_crc_consistent(&delete_frame(0));
        assert_crc_consistent(&delete_frame(99));
        assert_crc_consistent(&download_frame(2, 7));
        assert_crc_consistent(&download_frame(99, 65535));
        assert_crc_consistent(&upload_frame(3, 1));
        assert_crc_consistent(&upload_init_frame());
        assert_crc_consistent(&play_frame(12, 1));
        assert_crc_consistent(&play_frame(12, 0));
    }

    // ── Frame layout ──

    #[test]
    fn delete_frame_layout() {
        let frame = delete_frame(5);
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(&frame[..3], &FRAME_MAGIC);
        assert_eq!(frame[3], 0x03);
        assert_eq!(frame[4], 0x00);
        assert_eq!(frame[5], SUBCMD_DELETE);
        assert_eq!(frame[6], 5);
        assert_eq!(frame[7], 0);
        // Everything after the CRC is zero padding.
        assert!(frame[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn download_frame_layout() {
        let frame = download_frame(2, 7);
        assert_eq!(&frame[..3], &FRAME_MAGIC);
        assert_eq!(frame[3], 0x07);
        assert_eq!(frame[5], SUBCMD_DOWNLOAD);
        assert_eq!(frame[6], 2);
        assert_eq!(frame[7], 0);
        assert_eq!(u16::from_le_bytes([frame[8], frame[9]]), 7);
        assert_eq!(frame[10], 0);
        assert_eq!(frame[11], 0);
        assert!(frame[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn upload_init_frame_layout() {
        let frame = upload_init_frame();
        assert_eq!(&frame[..3], &FRAME_MAGIC);
        assert_eq!(frame[3], 0x01);
        assert_eq!(frame[5], SUBCMD_UPLOAD_INIT);
        assert!(frame[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn play_frame_encodes_action_and_slot() {
        let frame = play_frame(42, 1);
        assert_eq!(frame[5], SUBCMD_PLAY);
        assert_eq!(frame[6], 1);
        assert_eq!(u16::from_le_bytes([frame[8], frame[9]]), 42);

        let stop = play_frame(42, 0);
        assert_eq!(stop[6], 0);
        assert_eq!(u16::from_le_bytes([stop[8], stop[9]]), 42);
    }

    #[test]
    fn upload_frame_chunk_is_little_endian() {
        let frame = upload_frame(1, 0x0201);
        assert_eq!(frame[5], SUBCMD_UPLOAD);
        assert_eq!(frame[8], 0x01);
        assert_eq!(frame[9], 0x02);
    }

    #[test]
    fn subcommands_distinct() {
        let cmds = [
            SUBCMD_DELETE,
            SUBCMD_DOWNLOAD,
            SUBCMD_UPLOAD,
            SUBCMD_UPLOAD_INIT,
            SUBCMD_PLAY,
        ];
        for i in 0..cmds.len() {
            for j in (i + 1)..cmds.len() {
                assert_ne!(cmds[i], cmds[j], "sub-commands at {i} and {j} collide");
            }
        }
    }

    // ── Track header parsing ──

    #[test]
    fn parse_header_present() {
        let mut header = [0u8; TRACK_HEADER_SIZE];
        header[0] = 0x01;
        header[4..8].copy_from_slice(&264_600u32.to_le_bytes());
        assert_eq!(parse_track_header(&header), (true, 264_600));
    }

    #[test]
    fn parse_header_empty_slot() {
        let header = [0u8; TRACK_HEADER_SIZE];
        assert_eq!(parse_track_header(&header), (false, 0));
    }

    #[test]
    fn parse_header_absent_slot_ignores_stale_size() {
        // A zero presence flag wins over whatever the size field holds.
        let mut header = [0u8; TRACK_HEADER_SIZE];
        header[4..8].copy_from_slice(&1_000_000u32.to_le_bytes());
        assert_eq!(parse_track_header(&header), (false, 0));
    }

    #[test]
    fn parse_header_short_response_is_absent() {
        assert_eq!(parse_track_header(&[]), (false, 0));
        assert_eq!(parse_track_header(&[0x01; 11]), (false, 0));
    }

    // ── Bulk track list parsing ──

    #[test]
    fn parse_track_list_reads_all_records() {
        let mut data = vec![0u8; 16 + 100 * 8];
        // Slot 3 occupied, 529200 bytes (2 seconds).
        let off = 16 + 3 * 8;
        data[off] = 1;
        data[off + 4..off + 8].copy_from_slice(&529_200u32.to_le_bytes());

        let tracks = parse_track_list(&data);
        assert_eq!(tracks.len(), 100);
        assert!(tracks[3].present);
        assert_eq!(tracks[3].size_bytes, 529_200);
        assert!((tracks[3].duration_seconds - 2.0).abs() < 1e-9);
        assert!(!tracks[0].present);
        assert_eq!(tracks[0].size_bytes, 0);
    }

    #[test]
    fn parse_track_list_truncated_input() {
        // Room for only two records after the 16-byte preamble.
        let data = vec![0u8; 16 + 2 * 8];
        let tracks = parse_track_list(&data);
        assert_eq!(tracks.len(), 2);
    }

    // ── Audio codec ──

    #[test]
    fn decode_min_sample() {
        // 00 00 80 is 24-bit minimum; scaled up it is exactly i32::MIN.
        assert_eq!(decode_samples(&[0x00, 0x00, 0x80]), vec![i32::MIN]);
    }

    #[test]
    fn decode_max_sample() {
        assert_eq!(decode_samples(&[0xFF, 0xFF, 0x7F]), vec![0x7FFF_FF00]);
    }

    #[test]
    fn decode_zero_and_one() {
        assert_eq!(
            decode_samples(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x00]),
            vec![0, 0x100]
        );
    }

    #[test]
    fn decode_ignores_trailing_partial_sample() {
        assert_eq!(decode_samples(&[0x01, 0x00, 0x00, 0xFF]), vec![0x100]);
    }

    #[test]
    fn encode_matches_wire_form() {
        assert_eq!(encode_samples(&[i32::MIN]), vec![0x00, 0x00, 0x80]);
        assert_eq!(encode_samples(&[0x7FFF_FF00]), vec![0xFF, 0xFF, 0x7F]);
        assert_eq!(encode_samples(&[0x100]), vec![0x01, 0x00, 0x00]);
    }

    #[test]
    fn packed_samples_round_trip() {
        // encode(decode(B)) == B for any B with length a multiple of 3.
        let mut wire = Vec::new();
        for i in 0u32..300 {
            wire.push((i * 7 % 256) as u8);
            wire.push((i * 13 % 256) as u8);
            wire.push((i * 101 % 256) as u8);
        }
        assert_eq!(encode_samples(&decode_samples(&wire)), wire);
    }

    // ── ChunkDecoder ──

    #[test]
    fn chunk_decoder_holds_back_partial_frames() {
        let mut dec = ChunkDecoder::new();
        // 1024 % 6 == 4: a full chunk leaves 4 bytes pending.
        let chunk = vec![0u8; CHUNK_SIZE];
        let samples = dec.push(&chunk);
        assert_eq!(samples.len(), (CHUNK_SIZE / 6) * 2);
        assert_eq!(dec.pending_len(), CHUNK_SIZE % 6);
    }

    #[test]
    fn chunk_decoder_preserves_stereo_pairing() {
        // Left samples decode to 1, right samples to 2; feed the stream in
        // awkward 7-byte slices and the pairing must survive.
        let left = [0x01, 0x00, 0x00];
        let right = [0x02, 0x00, 0x00];
        let mut wire = Vec::new();
        for _ in 0..20 {
            wire.extend_from_slice(&left);
            wire.extend_from_slice(&right);
        }

        let mut dec = ChunkDecoder::new();
        let mut samples = Vec::new();
        for piece in wire.chunks(7) {
            samples.extend(dec.push(piece));
        }
        assert_eq!(dec.pending_len(), 0);
        assert_eq!(samples.len(), 40);
        for pair in samples.chunks_exact(2) {
            assert_eq!(pair[0], 0x100, "left channel");
            assert_eq!(pair[1], 0x200, "right channel");
        }
    }

    #[test]
    fn chunk_decoder_sample_count_is_even() {
        let mut dec = ChunkDecoder::new();
        let mut total = 0usize;
        for _ in 0..5 {
            total += dec.push(&[0u8; CHUNK_SIZE]).len();
        }
        total += dec.push(&[0u8; 100]).len();
        assert_eq!(total % 2, 0, "whole-frame decoding emits sample pairs");
    }
}
