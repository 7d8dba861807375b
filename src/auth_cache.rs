//! A cache of 802.1X authentication frames.
//!
//! Decrypting a capture requires the 4-way handshake of each station. Since the host may
//! connect long after a station associated, all EAPOL frames ever seen are kept here and
//! replayed at the start of every session, placed a minute before its first frame.
//!
//! The cache is an append only arena. Once it is full, new frames are silently discarded;
//! nothing is ever evicted.

use alloc::{boxed::Box, vec::Vec};
use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;

use crate::{
    frame::is_eapol,
    pcap::{PcapPacketHeader, PcapTimestamp},
    record::RecordHeader,
    stats::CaptureStats,
    DefaultRawMutex,
};

/// How far before the session start replayed frames are placed.
pub const REPLAY_OFFSET_SECONDS: u32 = 60;

struct Arena {
    buffer: Box<[u8]>,
    write_cursor: usize,
    records: usize,
}
impl Arena {
    fn append(&mut self, header: RecordHeader, payload: &[u8]) -> bool {
        let end = self.write_cursor + RecordHeader::LENGTH + payload.len();
        let Some(slot) = self.buffer.get_mut(self.write_cursor..end) else {
            return false;
        };
        let (header_bytes, payload_bytes) = slot.split_at_mut(RecordHeader::LENGTH);
        header_bytes.copy_from_slice(&header.to_bytes());
        payload_bytes.copy_from_slice(payload);
        self.write_cursor = end;
        self.records += 1;
        true
    }
    /// Copy the record at `read_cursor` into `payload`, returning its header and the cursor of
    /// the next record.
    fn read(&self, read_cursor: usize, payload: &mut Vec<u8>) -> Option<(RecordHeader, usize)> {
        if read_cursor >= self.write_cursor {
            return None;
        }
        let header = RecordHeader::from_bytes(self.buffer.get(read_cursor..)?)?;
        let start = read_cursor + RecordHeader::LENGTH;
        let end = start + header.capture_length as usize;
        let bytes = self.buffer.get(start..end)?;
        payload.clear();
        payload.try_reserve(bytes.len()).ok()?;
        payload.extend_from_slice(bytes);
        Some((header, end))
    }
}

/// The authentication frame cache.
///
/// The producer appends, while the consumer replays. Both only hold the lock for a single
/// copy.
pub struct AuthCache {
    arena: Mutex<DefaultRawMutex, RefCell<Arena>>,
}
impl AuthCache {
    /// Allocate a cache with `capacity` bytes of storage.
    ///
    /// Returns [None], if `capacity` is zero or the allocation failed.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(capacity).ok()?;
        buffer.resize(capacity, 0);
        Some(Self {
            arena: Mutex::new(RefCell::new(Arena {
                buffer: buffer.into_boxed_slice(),
                write_cursor: 0,
                records: 0,
            })),
        })
    }
    /// Store the frame, if it carries 802.1X.
    ///
    /// Returns `true`, if the frame was stored.
    pub fn record(
        &self,
        capture_timestamp_raw: u32,
        original_length: u32,
        payload: &[u8],
        stats: &CaptureStats,
    ) -> bool {
        if !is_eapol(payload) {
            return false;
        }
        let header = RecordHeader {
            capture_timestamp_raw,
            capture_length: payload.len() as u32,
            original_length,
        };
        let stored = self
            .arena
            .lock(|arena| arena.borrow_mut().append(header, payload));
        if stored {
            stats.count_cached();
        } else {
            stats.count_cache_full();
        }
        stored
    }
    /// The amount of cached frames.
    pub fn len(&self) -> usize {
        self.arena.lock(|arena| arena.borrow().records)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The amount of bytes used, including the record headers.
    pub fn used(&self) -> usize {
        self.arena.lock(|arena| arena.borrow().write_cursor)
    }
    pub fn capacity(&self) -> usize {
        self.arena.lock(|arena| arena.borrow().buffer.len())
    }
    /// Start replaying all frames cached so far.
    ///
    /// Frames cached after this call aren't part of the replay.
    pub fn replay(&self, session_start: PcapTimestamp) -> Replay<'_> {
        Replay {
            cache: self,
            read_cursor: 0,
            end: self.used(),
            timestamp: session_start.earlier_by_secs(REPLAY_OFFSET_SECONDS),
        }
    }
}

/// A read cursor over the [AuthCache].
pub struct Replay<'a> {
    cache: &'a AuthCache,
    read_cursor: usize,
    end: usize,
    timestamp: PcapTimestamp,
}
impl Replay<'_> {
    /// Copy the next frame into `payload` and return its PCAP header.
    ///
    /// Returns [None], once all frames were replayed.
    pub fn next_into(&mut self, payload: &mut Vec<u8>) -> Option<PcapPacketHeader> {
        if self.read_cursor >= self.end {
            return None;
        }
        let (header, next) = self
            .cache
            .arena
            .lock(|arena| arena.borrow().read(self.read_cursor, payload))?;
        self.read_cursor = next;
        Some(header.pcap_header(self.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::eapol_mpdu;

    #[test]
    fn replay_is_repeatable() {
        let cache = AuthCache::with_capacity(1024).unwrap();
        let stats = CaptureStats::new();
        let frames: std::vec::Vec<_> = (0..4u8).map(|i| eapol_mpdu(&[1, 3, 0, i])).collect();
        for (i, frame) in frames.iter().enumerate() {
            assert!(cache.record(i as u32 * 1000, frame.len() as u32 + 4, frame, &stats));
        }
        // Not authentication traffic.
        assert!(!cache.record(0, 30, &[0x80, 0x00, 0, 0], &stats));
        assert_eq!(cache.len(), 4);
        assert_eq!(stats.snapshot().cached, 4);

        let session_start = PcapTimestamp::new(1_700_000_000, 250);
        for _ in 0..2 {
            let mut replay = cache.replay(session_start);
            let mut payload = std::vec::Vec::new();
            let mut replayed = 0;
            while let Some(header) = replay.next_into(&mut payload) {
                let frame = &frames[replayed];
                assert_eq!(header.timestamp, PcapTimestamp::new(1_699_999_940, 250));
                assert_eq!(header.capture_length, frame.len() as u32);
                assert_eq!(header.original_length, frame.len() as u32 + 4);
                assert_eq!(&payload, frame);
                replayed += 1;
            }
            assert_eq!(replayed, frames.len());
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn full_cache_drops_silently() {
        let frame = eapol_mpdu(&[1, 3, 0, 0x5f]);
        let record_size = RecordHeader::LENGTH + frame.len();
        let cache = AuthCache::with_capacity(record_size * 2 + 1).unwrap();
        let stats = CaptureStats::new();
        assert!(cache.record(0, 0, &frame, &stats));
        assert!(cache.record(0, 0, &frame, &stats));
        assert!(!cache.record(0, 0, &frame, &stats));
        assert_eq!(cache.used(), record_size * 2);
        assert_eq!(stats.snapshot().cache_full, 1);
        assert!(AuthCache::with_capacity(0).is_none());
    }

    #[test]
    fn replay_ignores_later_frames() {
        let cache = AuthCache::with_capacity(1024).unwrap();
        let stats = CaptureStats::new();
        let frame = eapol_mpdu(&[2]);
        cache.record(0, 0, &frame, &stats);
        let mut replay = cache.replay(PcapTimestamp::new(100, 0));
        cache.record(0, 0, &frame, &stats);
        let mut payload = std::vec::Vec::new();
        assert!(replay.next_into(&mut payload).is_some());
        assert!(replay.next_into(&mut payload).is_none());
    }
}
