use portable_atomic::{AtomicU32, Ordering};

/// Counters for what happened to the frames handed to the filter.
///
/// These are reset on every successful handshake, so they always describe the current
/// session.
#[derive(Default)]
pub struct CaptureStats {
    accepted: AtomicU32,
    filtered: AtomicU32,
    bad_frames: AtomicU32,
    queue_full: AtomicU32,
    no_memory: AtomicU32,
    cached: AtomicU32,
    cache_full: AtomicU32,
}

/// A point in time copy of [CaptureStats].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    /// Frames queued for the consumer.
    pub accepted: u32,
    /// Frames dropped by the session or address filter.
    pub filtered: u32,
    /// Frames dropped, because the hardware flagged them.
    pub bad_frames: u32,
    /// Frames dropped, because the queue was full.
    pub queue_full: u32,
    /// Frames dropped, because no record could be allocated.
    pub no_memory: u32,
    /// Authentication frames stored in the cache.
    pub cached: u32,
    /// Authentication frames, which didn't fit into the cache anymore.
    pub cache_full: u32,
}
impl StatsSnapshot {
    /// All frames, which didn't make it to the host.
    pub const fn dropped(&self) -> u32 {
        self.filtered
            .wrapping_add(self.bad_frames)
            .wrapping_add(self.queue_full)
            .wrapping_add(self.no_memory)
    }
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl CaptureStats {
    pub const fn new() -> Self {
        Self {
            accepted: AtomicU32::new(0),
            filtered: AtomicU32::new(0),
            bad_frames: AtomicU32::new(0),
            queue_full: AtomicU32::new(0),
            no_memory: AtomicU32::new(0),
            cached: AtomicU32::new(0),
            cache_full: AtomicU32::new(0),
        }
    }
    counter! {
        count_accepted => accepted,
        count_filtered => filtered,
        count_bad_frame => bad_frames,
        count_queue_full => queue_full,
        count_no_memory => no_memory,
        count_cached => cached,
        count_cache_full => cache_full,
    }
    /// Read all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            bad_frames: self.bad_frames.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            no_memory: self.no_memory.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            cache_full: self.cache_full.load(Ordering::Relaxed),
        }
    }
    /// Zero all counters.
    pub fn reset(&self) {
        for counter in [
            &self.accepted,
            &self.filtered,
            &self.bad_frames,
            &self.queue_full,
            &self.no_memory,
            &self.cached,
            &self.cache_full,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_everything() {
        let stats = CaptureStats::new();
        stats.count_accepted();
        stats.count_filtered();
        stats.count_queue_full();
        stats.count_queue_full();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.dropped(), 3);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
