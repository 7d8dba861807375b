//! Reconciliation of the radio's free running microsecond counter with the host's clock.
//!
//! The counter is only 32 bits wide and wraps roughly every 1.19 hours. Wrapping is
//! detected by a captured timestamp being lower than the previous one, which only works if
//! at least one frame arrives per wrap period. Longer gaps go unnoticed and produce wrong
//! timestamps.

use crate::pcap::PcapTimestamp;

const MICROS_PER_SECOND: u32 = 1_000_000;
/// 2^32 µs, split into whole seconds...
pub const ROLLOVER_SECONDS: u32 = 4294;
/// ...and the remaining microseconds.
pub const ROLLOVER_MICROSECONDS: u32 = 967_296;

/// The offset between the hardware counter and the host's wall clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeBase {
    accumulated_seconds: u32,
    accumulated_microseconds: u32,
    last_raw_microseconds: u32,
    needs_anchor: bool,
}
impl TimeBase {
    pub const fn new() -> Self {
        Self {
            accumulated_seconds: 0,
            accumulated_microseconds: 0,
            last_raw_microseconds: 0,
            needs_anchor: true,
        }
    }
    /// Start a new session at the given host time.
    ///
    /// The next reconciled timestamp will be exactly this time. Without a host time, pass
    /// zero and the session will count from its first frame.
    pub fn set_host_time(&mut self, seconds: u32, microseconds: u32) {
        self.accumulated_seconds = seconds;
        self.accumulated_microseconds = microseconds % MICROS_PER_SECOND;
        self.needs_anchor = true;
    }
    /// Returns `true`, if the next timestamp will anchor the session.
    pub const fn needs_anchor(&self) -> bool {
        self.needs_anchor
    }
    /// The offset currently added to raw timestamps.
    pub const fn offset(&self) -> PcapTimestamp {
        PcapTimestamp::new(self.accumulated_seconds, self.accumulated_microseconds)
    }
    fn anchor(&mut self, raw: u32) {
        let seconds = raw / MICROS_PER_SECOND;
        let microseconds = raw % MICROS_PER_SECOND;
        self.accumulated_seconds = self.accumulated_seconds.wrapping_sub(seconds);
        if microseconds > self.accumulated_microseconds {
            self.accumulated_seconds = self.accumulated_seconds.wrapping_sub(1);
            self.accumulated_microseconds += MICROS_PER_SECOND;
        }
        self.accumulated_microseconds -= microseconds;
        self.needs_anchor = false;
    }
    fn rollover(&mut self) {
        self.accumulated_seconds = self.accumulated_seconds.wrapping_add(ROLLOVER_SECONDS);
        self.accumulated_microseconds += ROLLOVER_MICROSECONDS;
        if self.accumulated_microseconds >= MICROS_PER_SECOND {
            self.accumulated_seconds = self.accumulated_seconds.wrapping_add(1);
            self.accumulated_microseconds -= MICROS_PER_SECOND;
        }
    }
    /// Convert a raw counter value into an absolute timestamp.
    ///
    /// Must be called for every record, in capture order. Returns the timestamp and whether
    /// this record anchored a new session.
    pub fn reconcile(&mut self, raw: u32) -> (PcapTimestamp, bool) {
        let anchored = self.needs_anchor;
        if anchored {
            self.anchor(raw);
        } else if raw < self.last_raw_microseconds {
            trace!("Microsecond counter rolled over.");
            self.rollover();
        }
        self.last_raw_microseconds = raw;

        let mut seconds = (raw / MICROS_PER_SECOND).wrapping_add(self.accumulated_seconds);
        let mut microseconds = raw % MICROS_PER_SECOND + self.accumulated_microseconds;
        if microseconds >= MICROS_PER_SECOND {
            seconds = seconds.wrapping_add(1);
            microseconds -= MICROS_PER_SECOND;
        }
        (PcapTimestamp::new(seconds, microseconds), anchored)
    }
}
impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_lands_on_host_time() {
        let mut time_base = TimeBase::new();
        time_base.set_host_time(1000, 500_000);
        let (ts, anchored) = time_base.reconcile(3_750_000);
        assert!(anchored);
        assert_eq!(ts, PcapTimestamp::new(1000, 500_000));

        let (ts, anchored) = time_base.reconcile(3_750_000 + 600_000);
        assert!(!anchored);
        assert_eq!(ts, PcapTimestamp::new(1001, 100_000));
    }

    #[test]
    fn without_host_time_counts_from_first_frame() {
        let mut time_base = TimeBase::new();
        time_base.set_host_time(0, 0);
        assert_eq!(time_base.reconcile(987_654_321).0, PcapTimestamp::new(0, 0));
        assert_eq!(
            time_base.reconcile(987_654_321 + 2_000_001).0,
            PcapTimestamp::new(2, 1)
        );
    }

    #[test]
    fn rollover_is_carried() {
        let mut time_base = TimeBase::new();
        time_base.set_host_time(1_700_000_000, 0);
        let raws = [4_000_000_000u32, 4_200_000_000, 100_000];
        let stamps: std::vec::Vec<u64> = raws
            .iter()
            .map(|raw| time_base.reconcile(*raw).0.as_micros())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(stamps[1] - stamps[0], 200_000_000);
        // The counter advanced by 2^32 - 4.2e9 + 1e5 µs across the wrap.
        let natural_delta = (1u64 << 32) - 4_200_000_000 + 100_000;
        assert_eq!(stamps[2] - stamps[1], natural_delta);
        assert_eq!(
            time_base.offset(),
            PcapTimestamp::new(1_700_000_000 - 4000 + ROLLOVER_SECONDS, ROLLOVER_MICROSECONDS)
        );
    }

    #[test]
    fn reanchoring_forgets_previous_rollovers() {
        let mut time_base = TimeBase::new();
        time_base.set_host_time(10, 0);
        time_base.reconcile(u32::MAX);
        time_base.reconcile(5);
        time_base.set_host_time(20, 999_999);
        let (ts, anchored) = time_base.reconcile(42);
        assert!(anchored);
        assert_eq!(ts, PcapTimestamp::new(20, 999_999));
    }
}
