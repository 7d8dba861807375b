//! The PCAP wire format, as consumed by Wireshark on a pipe.
//!
//! Reading from stdin requires version 2.4 of the format. Everything is written in the
//! native byte order of the device (little endian); readers use the magic number to
//! detect this.

/// The magic number at the start of every PCAP stream.
pub const PCAP_MAGIC: u32 = 0xA1B2C3D4;
pub const PCAP_VERSION_MAJOR: u16 = 2;
pub const PCAP_VERSION_MINOR: u16 = 4;
/// Largest expected Wi-Fi MPDU.
pub const PCAP_MAX_CAPTURE_PACKET_SIZE: u32 = 2312;

/// Link layer type, used by the reader to decode the payload.
///
/// See <https://www.tcpdump.org/linktypes.html>.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum LinkType {
    /// Raw 802.11 frames, without any radio header.
    Ieee80211 = 105,
}
impl LinkType {
    pub const fn into_bits(self) -> u32 {
        self as u32
    }
}

/// The header at the start of a PCAP stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcapFileHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    /// GMT to local correction.
    pub gmt_offset: i32,
    /// Accuracy of the timestamps. Everybody sets this to zero.
    pub timestamp_accuracy: u32,
    /// Maximum length of a captured packet, in octets.
    pub snapshot_length: u32,
    pub link_type: LinkType,
}
impl PcapFileHeader {
    pub const LENGTH: usize = 24;

    /// A header for an 802.11 stream in GMT.
    pub const fn ieee80211(snapshot_length: u32) -> Self {
        Self {
            magic: PCAP_MAGIC,
            version_major: PCAP_VERSION_MAJOR,
            version_minor: PCAP_VERSION_MINOR,
            gmt_offset: 0,
            timestamp_accuracy: 0,
            snapshot_length,
            link_type: LinkType::Ieee80211,
        }
    }
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut buf = [0u8; Self::LENGTH];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version_major.to_le_bytes());
        buf[6..8].copy_from_slice(&self.version_minor.to_le_bytes());
        buf[8..12].copy_from_slice(&self.gmt_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.timestamp_accuracy.to_le_bytes());
        buf[16..20].copy_from_slice(&self.snapshot_length.to_le_bytes());
        buf[20..24].copy_from_slice(&self.link_type.into_bits().to_le_bytes());
        buf
    }
}

/// An absolute point in time, as used in the PCAP record header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PcapTimestamp {
    /// Seconds since the unix epoch.
    pub seconds: u32,
    /// Always in the range `0..1_000_000`.
    pub microseconds: u32,
}
impl PcapTimestamp {
    pub const fn new(seconds: u32, microseconds: u32) -> Self {
        Self {
            seconds,
            microseconds,
        }
    }
    /// The timestamp the given amount of whole seconds earlier.
    pub const fn earlier_by_secs(self, seconds: u32) -> Self {
        Self {
            seconds: self.seconds.wrapping_sub(seconds),
            microseconds: self.microseconds,
        }
    }
    /// Total microseconds, mostly useful for comparisons.
    pub const fn as_micros(&self) -> u64 {
        self.seconds as u64 * 1_000_000 + self.microseconds as u64
    }
}

/// The header in front of every captured packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PcapPacketHeader {
    pub timestamp: PcapTimestamp,
    /// Number of bytes following this header.
    pub capture_length: u32,
    /// Length of the packet on the air.
    pub original_length: u32,
}
impl PcapPacketHeader {
    pub const LENGTH: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut buf = [0u8; Self::LENGTH];
        buf[0..4].copy_from_slice(&self.timestamp.seconds.to_le_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.microseconds.to_le_bytes());
        buf[8..12].copy_from_slice(&self.capture_length.to_le_bytes());
        buf[12..16].copy_from_slice(&self.original_length.to_le_bytes());
        buf
    }
    pub fn from_bytes(buf: &[u8; Self::LENGTH]) -> Self {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            timestamp: PcapTimestamp::new(word(0), word(4)),
            capture_length: word(8),
            original_length: word(12),
        }
    }
}
