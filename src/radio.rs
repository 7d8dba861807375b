use crate::error::RadioError;

/// Bits of the driver's promiscuous filter mask.
pub mod filter_mask {
    pub const MGMT: u32 = 1 << 0;
    pub const CTRL: u32 = 1 << 1;
    pub const DATA: u32 = 1 << 2;
    pub const MISC: u32 = 1 << 3;
    pub const DATA_MPDU: u32 = 1 << 4;
    pub const DATA_AMPDU: u32 = 1 << 5;
    /// Frames with a bad FCS.
    pub const FCS_FAIL: u32 = 1 << 6;
    pub const ALL: u32 = 0xffff_ffff;
}

/// The radio driver, delivering frames in promiscuous mode.
///
/// Frames themselves are handed to [CaptureSession::try_filter](crate::CaptureSession::try_filter)
/// from the driver's receive callback.
pub trait Radio {
    /// (Re)start promiscuous capture on the channel, with the given filter masks.
    fn begin_promiscuous_capture(
        &mut self,
        channel: u8,
        filter_mask: u32,
        ctrl_filter_mask: u32,
    ) -> Result<(), RadioError>;
    /// The channel currently captured on.
    fn channel(&self) -> u8;
    /// The filter mask currently in effect.
    fn filter_mask(&self) -> u32;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Remembers, what it was told to do.
    pub(crate) struct MockRadio {
        pub channel: u8,
        pub filter_mask: u32,
        pub ctrl_filter_mask: u32,
        pub restarts: usize,
    }
    impl MockRadio {
        pub fn new(channel: u8, filter_mask: u32) -> Self {
            Self {
                channel,
                filter_mask,
                ctrl_filter_mask: 0,
                restarts: 0,
            }
        }
    }
    impl Radio for MockRadio {
        fn begin_promiscuous_capture(
            &mut self,
            channel: u8,
            filter_mask: u32,
            ctrl_filter_mask: u32,
        ) -> Result<(), RadioError> {
            if !(1..=14).contains(&channel) {
                return Err(RadioError::InvalidChannel);
            }
            self.channel = channel;
            self.filter_mask = filter_mask;
            self.ctrl_filter_mask = ctrl_filter_mask;
            self.restarts += 1;
            Ok(())
        }
        fn channel(&self) -> u8 {
            self.channel
        }
        fn filter_mask(&self) -> u32 {
            self.filter_mask
        }
    }
}
