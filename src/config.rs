use embassy_time::Duration;

use crate::{filter::FilterConfig, pcap::PCAP_MAX_CAPTURE_PACKET_SIZE};

/// The default size of the authentication cache arena.
pub const DEFAULT_AUTH_CACHE_CAPACITY: usize = 32 * 1024;

/// Static parameters of a capture session.
///
/// These are fixed, once the session was created. Everything the host can change during the
/// handshake lives in [FilterConfig] or the radio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureConfig {
    /// Frames are clipped to this length. Also reported as the snapshot length in the PCAP
    /// file header.
    pub snap_len: u32,
    /// The highest channel the host may select.
    pub max_channel: u8,
    /// The channel used when the host selects none, and the radio has no valid one yet.
    pub default_channel: u8,
    /// How long the consumer waits for a record, before checking the connection state again.
    pub pop_timeout: Duration,
    /// Use a ten times shorter pop timeout, so connection changes are noticed faster.
    pub high_priority: bool,
    /// How long a task context producer may wait for a free slot in the queue.
    pub push_timeout: Duration,
    /// How long the host has to start sending its configuration after the banner.
    pub handshake_timeout: Duration,
    /// The longest pause allowed between two bytes of the configuration line.
    pub command_timeout: Duration,
    /// The delay between two failed synchronization attempts.
    pub resync_retry_delay: Duration,
    /// The delay after a failed write, before anything else is attempted.
    pub write_failure_backoff: Duration,
    /// A write not making any progress for this long is considered hung.
    pub write_stall_timeout: Duration,
    /// Size of the authentication cache arena in bytes. Zero disables the cache.
    pub auth_cache_capacity: usize,
    /// The filter in effect, before the first handshake completes.
    pub default_filter: FilterConfig,
}
impl CaptureConfig {
    /// The pop timeout actually used by the consumer.
    pub const fn effective_pop_timeout(&self) -> Duration {
        if self.high_priority {
            Duration::from_ticks(self.pop_timeout.as_ticks() / 10)
        } else {
            self.pop_timeout
        }
    }
}
impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snap_len: PCAP_MAX_CAPTURE_PACKET_SIZE,
            max_channel: 14,
            default_channel: 6,
            pop_timeout: Duration::from_millis(100),
            high_priority: false,
            push_timeout: Duration::from_millis(10),
            handshake_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(1000),
            resync_retry_delay: Duration::from_millis(100),
            write_failure_backoff: Duration::from_millis(1000),
            write_stall_timeout: Duration::from_millis(1000),
            auth_cache_capacity: DEFAULT_AUTH_CACHE_CAPACITY,
            default_filter: FilterConfig {
                session_filter: true,
                ..FilterConfig::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_priority_shortens_pop_timeout() {
        let mut config = CaptureConfig::default();
        assert_eq!(config.effective_pop_timeout(), Duration::from_millis(100));
        config.high_priority = true;
        assert_eq!(config.effective_pop_timeout(), Duration::from_millis(10));
    }
}
