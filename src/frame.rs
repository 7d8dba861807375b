use bitfield_struct::bitfield;

/// The length of the FCS, which the radio counts in the signal length.
pub const FCS_LENGTH: usize = 4;
/// 802.1X authentication, as found in the LLC/SNAP header.
pub const ETHER_TYPE_802_1X: u16 = 0x888e;
const LLC_SNAP_HEADER: [u8; 6] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00];

pub const MGMT_SUBTYPE_PROBE_REQUEST: u8 = 4;
pub const MGMT_SUBTYPE_PROBE_RESPONSE: u8 = 5;
pub const MGMT_SUBTYPE_BEACON: u8 = 8;
/// Set in the subtype of all data frames without a payload.
pub const DATA_SUBTYPE_NULL_BIT: u8 = 0x4;
/// Set in the subtype of all QoS data frames.
pub const DATA_SUBTYPE_QOS_BIT: u8 = 0x8;

/// The type of packet, as reported by the radio driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketType {
    Management,
    Control,
    Data,
    /// Packets the driver couldn't classify.
    Misc,
}

/// The frame control field at the start of every MPDU.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct FrameControl {
    #[bits(2)]
    pub version: u8,
    #[bits(2)]
    pub frame_type: u8,
    #[bits(4)]
    pub subtype: u8,
    pub to_ds: bool,
    pub from_ds: bool,
    pub more_fragments: bool,
    pub retry: bool,
    pub power_management: bool,
    pub more_data: bool,
    pub protected: bool,
    pub order: bool,
}
impl FrameControl {
    pub const TYPE_MANAGEMENT: u8 = 0;
    pub const TYPE_CONTROL: u8 = 1;
    pub const TYPE_DATA: u8 = 2;
}

/// Metadata the radio attaches to a received frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxControl {
    /// Free running microsecond counter at the time of reception.
    pub timestamp: u32,
    /// Length of the frame on the air, including the FCS.
    pub signal_length: u16,
    /// Non-zero, if the hardware flagged the frame as errored.
    pub rx_state: u8,
}

/// A frame handed to us by the radio driver.
///
/// This borrows the driver's buffer, so it has to be copied, before the callback returns.
#[derive(Clone, Copy, Debug)]
pub struct RxFrame<'a> {
    pub packet_type: PacketType,
    pub rx_control: RxControl,
    /// The MPDU starting with the frame control field.
    pub payload: &'a [u8],
}
impl<'a> RxFrame<'a> {
    pub const fn new(packet_type: PacketType, rx_control: RxControl, payload: &'a [u8]) -> Self {
        Self {
            packet_type,
            rx_control,
            payload,
        }
    }
    /// Returns `true`, if the hardware flagged this frame.
    pub const fn is_errored(&self) -> bool {
        self.rx_control.rx_state != 0
    }
    pub fn frame_control(&self) -> FrameControl {
        frame_control(self.payload)
    }
    /// The receiver address.
    pub fn addr1(&self) -> Option<&'a [u8; 6]> {
        address(self.payload, 4)
    }
    /// The transmitter address.
    pub fn addr2(&self) -> Option<&'a [u8; 6]> {
        address(self.payload, 10)
    }
    pub fn addr3(&self) -> Option<&'a [u8; 6]> {
        address(self.payload, 16)
    }
    /// Only present in frames, where both to-DS and from-DS are set.
    pub fn addr4(&self) -> Option<&'a [u8; 6]> {
        address(self.payload, 24)
    }
}

/// Extract the frame control field from the start of an MPDU.
pub fn frame_control(mpdu: &[u8]) -> FrameControl {
    match mpdu {
        [low, high, ..] => FrameControl::from_bits(u16::from_le_bytes([*low, *high])),
        _ => FrameControl::new(),
    }
}

fn address(mpdu: &[u8], offset: usize) -> Option<&[u8; 6]> {
    mpdu.get(offset..offset + 6)?.try_into().ok()
}

/// Check if the MPDU is an unprotected data frame carrying 802.1X (EAPOL).
pub fn is_eapol(mpdu: &[u8]) -> bool {
    let fc = frame_control(mpdu);
    if fc.frame_type() != FrameControl::TYPE_DATA
        || fc.protected()
        || fc.subtype() & DATA_SUBTYPE_NULL_BIT != 0
    {
        return false;
    }
    let mut header_length = 24;
    if fc.to_ds() && fc.from_ds() {
        header_length += 6;
    }
    if fc.subtype() & DATA_SUBTYPE_QOS_BIT != 0 {
        header_length += 2;
        // HT control field
        if fc.order() {
            header_length += 4;
        }
    }
    let Some(llc) = mpdu.get(header_length..header_length + 8) else {
        return false;
    };
    llc[..6] == LLC_SNAP_HEADER && u16::from_be_bytes([llc[6], llc[7]]) == ETHER_TYPE_802_1X
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::vec::Vec;

    /// Build a minimal MPDU with the given addresses.
    pub(crate) fn mpdu(
        frame_type: u8,
        subtype: u8,
        to_ds: bool,
        from_ds: bool,
        addresses: [[u8; 6]; 4],
    ) -> Vec<u8> {
        let fc = FrameControl::new()
            .with_frame_type(frame_type)
            .with_subtype(subtype)
            .with_to_ds(to_ds)
            .with_from_ds(from_ds);
        let mut buf = Vec::new();
        buf.extend_from_slice(&fc.into_bits().to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&addresses[0]);
        buf.extend_from_slice(&addresses[1]);
        buf.extend_from_slice(&addresses[2]);
        buf.extend_from_slice(&[0, 0]);
        if to_ds && from_ds {
            buf.extend_from_slice(&addresses[3]);
        }
        buf
    }

    /// An EAPOL-Key frame from an AP to a station.
    pub(crate) fn eapol_mpdu(body: &[u8]) -> Vec<u8> {
        let mut buf = mpdu(
            FrameControl::TYPE_DATA,
            DATA_SUBTYPE_QOS_BIT,
            false,
            true,
            [[0x02; 6], [0x04; 6], [0x04; 6], [0; 6]],
        );
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&LLC_SNAP_HEADER);
        buf.extend_from_slice(&ETHER_TYPE_802_1X.to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn frame_control_bits() {
        let fc = frame_control(&[0x88, 0x02]);
        assert_eq!(fc.frame_type(), FrameControl::TYPE_DATA);
        assert_eq!(fc.subtype(), 8);
        assert!(!fc.to_ds());
        assert!(fc.from_ds());

        let beacon = frame_control(&[0x80, 0x00]);
        assert_eq!(beacon.frame_type(), FrameControl::TYPE_MANAGEMENT);
        assert_eq!(beacon.subtype(), MGMT_SUBTYPE_BEACON);
    }

    #[test]
    fn addresses_of_short_frames() {
        // An ACK only has a receiver address.
        let ack = [0xd4, 0x00, 0x00, 0x00, 1, 2, 3, 4, 5, 6];
        let frame = RxFrame::new(PacketType::Control, RxControl::default(), &ack);
        assert_eq!(frame.addr1(), Some(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(frame.addr2(), None);
        assert_eq!(frame.addr4(), None);
    }

    #[test]
    fn detects_eapol() {
        assert!(is_eapol(&eapol_mpdu(&[1, 3, 0, 0x5f])));

        let mut protected = eapol_mpdu(&[1, 3, 0, 0x5f]);
        protected[1] |= 0x40;
        assert!(!is_eapol(&protected));

        let mut ipv4 = eapol_mpdu(&[0x45]);
        let len = ipv4.len();
        ipv4[len - 3] = 0x08;
        ipv4[len - 2] = 0x00;
        assert!(!is_eapol(&ipv4));

        let beacon = mpdu(0, MGMT_SUBTYPE_BEACON, false, false, [[0xff; 6]; 4]);
        assert!(!is_eapol(&beacon));
    }
}
