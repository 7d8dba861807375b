//! The producer side: deciding which frames are captured and handing them to the queue.
//!
//! Everything here runs in the radio's receive path, so nothing may block for long or log
//! above `trace`. Failures are counted and the frame is dropped.

use bitfield_struct::bitfield;

use crate::{
    frame::{
        FrameControl, PacketType, RxFrame, DATA_SUBTYPE_NULL_BIT, FCS_LENGTH,
        MGMT_SUBTYPE_BEACON, MGMT_SUBTYPE_PROBE_REQUEST, MGMT_SUBTYPE_PROBE_RESPONSE,
    },
    record::CaptureRecord,
    session::CaptureSession,
};

/// The custom filter bits, which the host sends in the upper half of the filter mask.
///
/// These are never passed on to the radio.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct CustomFilterMask {
    #[bits(16)]
    __sdk: u16,
    /// Drop frames not belonging to an association.
    pub session: bool,
    /// Keep the FCS at the end of each frame.
    pub keep_fcs: bool,
    /// Keep frames, which the hardware flagged as errored.
    pub accept_bad: bool,
    #[bits(13)]
    __reserved: u16,
}

/// A pattern matching the first `length` bytes of a MAC address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressMatch {
    length: u8,
    address: [u8; 6],
}
impl AddressMatch {
    /// Create a new pattern. The length is clamped to six.
    pub const fn new(address: [u8; 6], length: u8) -> Self {
        Self {
            length: if length > 6 { 6 } else { length },
            address,
        }
    }
    /// A pattern for the three byte OUI.
    pub const fn oui(oui: [u8; 3]) -> Self {
        Self::new([oui[0], oui[1], oui[2], 0, 0, 0], 3)
    }
    /// A pattern for one specific address.
    pub const fn full(address: [u8; 6]) -> Self {
        Self::new(address, 6)
    }
    /// Multicast pattern, which matches any group address.
    pub const fn any_group() -> Self {
        Self::new([0x01, 0x00, 0x00, 0x00, 0x00, 0x00], 1)
    }
    pub const fn length(&self) -> usize {
        self.length as usize
    }
    /// The bytes, which are compared.
    pub fn as_slice(&self) -> &[u8] {
        &self.address[..self.length()]
    }
    /// Returns `true`, if this pattern matches any group address.
    pub const fn is_group_wildcard(&self) -> bool {
        self.length == 1
    }
    /// Check if the address starts with the configured bytes.
    pub fn matches(&self, address: &[u8; 6]) -> bool {
        address.starts_with(self.as_slice())
    }
}

/// What the producer filters on.
///
/// This is replaced as a whole, every time a handshake completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterConfig {
    pub accept_bad_frames: bool,
    pub keep_fcs_bytes: bool,
    /// Drop beacons, probes and null data frames.
    pub session_filter: bool,
    /// Only consulted, if a unicast match is configured.
    pub multicast_match: Option<AddressMatch>,
    pub unicast_match: Option<AddressMatch>,
}

/// Why a frame wasn't admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Rejection {
    Errored,
    Filtered,
}

impl FilterConfig {
    /// Capture everything.
    pub const fn new() -> Self {
        Self {
            accept_bad_frames: false,
            keep_fcs_bytes: false,
            session_filter: false,
            multicast_match: None,
            unicast_match: None,
        }
    }
    /// The custom filter bits, as exchanged with the host.
    pub const fn custom_mask(&self) -> CustomFilterMask {
        CustomFilterMask::new()
            .with_session(self.session_filter)
            .with_keep_fcs(self.keep_fcs_bytes)
            .with_accept_bad(self.accept_bad_frames)
    }
    /// Take the custom filter bits from the mask.
    pub fn apply_custom_mask(&mut self, mask: CustomFilterMask) {
        self.session_filter = mask.session();
        self.keep_fcs_bytes = mask.keep_fcs();
        self.accept_bad_frames = mask.accept_bad();
    }
    fn is_session_noise(frame: &RxFrame<'_>, fc: FrameControl) -> bool {
        match frame.packet_type {
            PacketType::Management => matches!(
                fc.subtype(),
                MGMT_SUBTYPE_BEACON | MGMT_SUBTYPE_PROBE_REQUEST | MGMT_SUBTYPE_PROBE_RESPONSE
            ),
            PacketType::Data => fc.subtype() & DATA_SUBTYPE_NULL_BIT != 0,
            _ => false,
        }
    }
    fn matches_address(&self, frame: &RxFrame<'_>, fc: FrameControl) -> bool {
        let Some(unicast) = self.unicast_match else {
            return true;
        };
        let (to_ds, from_ds) = (fc.to_ds(), fc.from_ds());
        if let Some(multicast) = self.multicast_match {
            let destination = if to_ds { frame.addr3() } else { frame.addr1() };
            if let Some(destination) = destination {
                let matched = if multicast.is_group_wildcard() {
                    destination[0] & 0x1 != 0
                } else {
                    multicast.matches(destination)
                };
                if matched {
                    return true;
                }
            }
        }
        [
            (!to_ds, frame.addr1()),
            (!from_ds, frame.addr2()),
            (to_ds || from_ds, frame.addr3()),
            (to_ds && from_ds, frame.addr4()),
        ]
        .into_iter()
        .any(|(relevant, address)| relevant && address.is_some_and(|address| unicast.matches(address)))
    }
    pub(crate) fn screen(&self, frame: &RxFrame<'_>) -> Result<(), Rejection> {
        if frame.is_errored() && !self.accept_bad_frames {
            return Err(Rejection::Errored);
        }
        let fc = frame.frame_control();
        if self.session_filter && Self::is_session_noise(frame, fc) {
            return Err(Rejection::Filtered);
        }
        if !self.matches_address(frame, fc) {
            return Err(Rejection::Filtered);
        }
        Ok(())
    }
    /// Check if a frame passes this filter.
    pub fn admits(&self, frame: &RxFrame<'_>) -> bool {
        self.screen(frame).is_ok()
    }
    /// The capture and original length of the frame.
    ///
    /// Returns [None], if there's nothing left to capture after removing the FCS.
    pub fn capture_lengths(&self, frame: &RxFrame<'_>, snap_len: u32) -> Option<(usize, u32)> {
        let mut length = frame.rx_control.signal_length as usize;
        if !self.keep_fcs_bytes {
            length = length.checked_sub(FCS_LENGTH)?;
        }
        if length == 0 {
            return None;
        }
        let capture_length = length.min(snap_len as usize).min(frame.payload.len());
        Some((capture_length, length as u32))
    }
}

/// The result of handing a frame to the filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterOutcome {
    /// The frame was queued, or there was nothing to capture.
    Accepted,
    /// The frame was errored or didn't match the filter.
    Dropped,
    /// The consumer isn't running.
    NotRunning,
    /// The queue stayed full, so the frame was dropped.
    QueueFull,
    /// No record could be allocated.
    NoMemory,
}

impl<const N: usize> CaptureSession<N> {
    fn admit(&self, frame: &RxFrame<'_>) -> Result<Option<CaptureRecord>, FilterOutcome> {
        if !self.state.load().running() {
            return Err(FilterOutcome::NotRunning);
        }
        let filter = self.filter_config();
        match filter.screen(frame) {
            Ok(()) => {}
            Err(Rejection::Errored) => {
                self.stats.count_bad_frame();
                return Err(FilterOutcome::Dropped);
            }
            Err(Rejection::Filtered) => {
                self.stats.count_filtered();
                return Err(FilterOutcome::Dropped);
            }
        }
        let Some((capture_length, original_length)) =
            filter.capture_lengths(frame, self.config.snap_len)
        else {
            return Ok(None);
        };
        let payload = &frame.payload[..capture_length];
        let timestamp = frame.rx_control.timestamp;
        if let Some(auth_cache) = &self.auth_cache {
            auth_cache.record(timestamp, original_length, payload, &self.stats);
        }
        match CaptureRecord::try_new(timestamp, original_length, payload) {
            Some(record) => Ok(Some(record)),
            None => {
                self.stats.count_no_memory();
                Err(FilterOutcome::NoMemory)
            }
        }
    }
    fn enqueued(&self, res: Result<(), CaptureRecord>) -> FilterOutcome {
        match res {
            Ok(()) => {
                self.stats.count_accepted();
                FilterOutcome::Accepted
            }
            Err(_dropped) => {
                self.stats.count_queue_full();
                trace!("Work queue full, dropping frame.");
                FilterOutcome::QueueFull
            }
        }
    }
    /// Filter a frame and queue it without waiting.
    ///
    /// This is the entry point for the radio's receive callback, or any other interrupt
    /// context.
    pub fn try_filter(&self, frame: &RxFrame<'_>) -> FilterOutcome {
        match self.admit(frame) {
            Ok(Some(record)) => self.enqueued(self.queue.try_push(record)),
            Ok(None) => FilterOutcome::Accepted,
            Err(outcome) => outcome,
        }
    }
    /// Filter a frame and queue it, waiting up to the push timeout for a free slot.
    pub async fn filter(&self, frame: &RxFrame<'_>) -> FilterOutcome {
        match self.admit(frame) {
            Ok(Some(record)) => {
                let res = self.queue.push(record, self.config.push_timeout).await;
                self.enqueued(res)
            }
            Ok(None) => FilterOutcome::Accepted,
            Err(outcome) => outcome,
        }
    }
}
