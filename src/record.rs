use alloc::vec::Vec;

use crate::pcap::{PcapPacketHeader, PcapTimestamp};

/// The fixed header of a [CaptureRecord].
///
/// The timestamp is left as the raw hardware counter, since the division and the correction
/// are too expensive for the receive path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordHeader {
    /// Free running microsecond counter at the time of capture.
    pub capture_timestamp_raw: u32,
    /// Number of payload bytes kept.
    pub capture_length: u32,
    /// Length of the frame before clipping.
    pub original_length: u32,
}
impl RecordHeader {
    pub const LENGTH: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut buf = [0u8; Self::LENGTH];
        buf[0..4].copy_from_slice(&self.capture_timestamp_raw.to_le_bytes());
        buf[4..8].copy_from_slice(&self.capture_length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.original_length.to_le_bytes());
        buf
    }
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let word = |i: usize| -> Option<u32> {
            Some(u32::from_le_bytes(buf.get(i..i + 4)?.try_into().ok()?))
        };
        Some(Self {
            capture_timestamp_raw: word(0)?,
            capture_length: word(4)?,
            original_length: word(8)?,
        })
    }
    /// The PCAP header for this record, once the timestamp has been reconciled.
    pub const fn pcap_header(&self, timestamp: PcapTimestamp) -> PcapPacketHeader {
        PcapPacketHeader {
            timestamp,
            capture_length: self.capture_length,
            original_length: self.original_length,
        }
    }
}

/// A captured frame on its way to the host.
///
/// The payload is allocated to exactly the clipped length. Since this is moved from the
/// producer, through the queue, to the consumer, there is only ever one owner.
#[derive(Debug, PartialEq, Eq)]
pub struct CaptureRecord {
    header: RecordHeader,
    payload: Vec<u8>,
}
impl CaptureRecord {
    /// Copy `payload` into a new record.
    ///
    /// Returns [None], if the allocation failed.
    pub fn try_new(capture_timestamp_raw: u32, original_length: u32, payload: &[u8]) -> Option<Self> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(payload.len()).ok()?;
        buffer.extend_from_slice(payload);
        Some(Self {
            header: RecordHeader {
                capture_timestamp_raw,
                capture_length: payload.len() as u32,
                original_length,
            },
            payload: buffer,
        })
    }
    pub const fn header(&self) -> &RecordHeader {
        &self.header
    }
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
    pub const fn capture_timestamp_raw(&self) -> u32 {
        self.header.capture_timestamp_raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_sized_to_payload() {
        let record = CaptureRecord::try_new(1234, 64, &[0xaa; 60]).unwrap();
        assert_eq!(record.header().capture_length, 60);
        assert_eq!(record.header().original_length, 64);
        assert_eq!(record.capture_timestamp_raw(), 1234);
        assert_eq!(record.payload(), &[0xaa; 60]);
    }

    #[test]
    fn header_bytes() {
        let header = RecordHeader {
            capture_timestamp_raw: 7,
            capture_length: 3,
            original_length: 9,
        };
        assert_eq!(RecordHeader::from_bytes(&header.to_bytes()), Some(header));
        assert_eq!(RecordHeader::from_bytes(&[0; 11]), None);
    }
}
