use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use static_cell::StaticCell;

use crate::{
    auth_cache::AuthCache,
    config::CaptureConfig,
    connection::{ConnectionFlags, ConnectionPhase, ConnectionState},
    filter::FilterConfig,
    queue::{WorkQueue, DEFAULT_QUEUE_LEN},
    stats::{CaptureStats, StatsSnapshot},
    DefaultRawMutex,
};

/// Everything shared between the producer, the consumer and the DTR/RTS notification.
///
/// There is exactly one of these per capture. It's usually placed in static memory with
/// [CaptureSession::init_static], so that references can be handed to the radio callback and
/// the consumer task.
pub struct CaptureSession<const N: usize = DEFAULT_QUEUE_LEN> {
    pub(crate) state: ConnectionState,
    pub(crate) queue: WorkQueue<N>,
    filter: Mutex<DefaultRawMutex, Cell<FilterConfig>>,
    pub(crate) stats: CaptureStats,
    pub(crate) auth_cache: Option<AuthCache>,
    pub(crate) config: CaptureConfig,
}
impl<const N: usize> CaptureSession<N> {
    /// Create a new session.
    ///
    /// This allocates the authentication cache. If that fails, the session continues
    /// without one.
    pub fn new(config: CaptureConfig) -> Self {
        let auth_cache = AuthCache::with_capacity(config.auth_cache_capacity);
        if auth_cache.is_none() && config.auth_cache_capacity != 0 {
            warn!(
                "Couldn't allocate {} bytes for the authentication cache.",
                config.auth_cache_capacity
            );
        }
        Self {
            state: ConnectionState::new(),
            queue: WorkQueue::new(),
            filter: Mutex::new(Cell::new(config.default_filter)),
            stats: CaptureStats::new(),
            auth_cache,
            config,
        }
    }
    /// Create the session in the provided [StaticCell].
    ///
    /// # Panics
    /// If the cell was already initialized.
    pub fn init_static(cell: &'static StaticCell<Self>, config: CaptureConfig) -> &'static Self {
        cell.init(Self::new(config))
    }
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }
    /// The filter currently applied to received frames.
    pub fn filter_config(&self) -> FilterConfig {
        self.filter.lock(Cell::get)
    }
    /// Replace the filter as a whole.
    pub fn set_filter_config(&self, filter: FilterConfig) {
        self.filter.lock(|cell| cell.set(filter));
    }
    /// The current connection flags.
    pub fn connection(&self) -> ConnectionFlags {
        self.state.load()
    }
    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase()
    }
    /// Report new DTR and RTS levels.
    ///
    /// This is usually called from the transport's line state event.
    pub fn notify_dtr_rts(&self, dtr: bool, rts: bool) {
        let flags = self.state.notify_dtr_rts(dtr, rts);
        debug!(
            "DTR: {}, RTS: {}, resync pending: {}",
            dtr,
            rts,
            flags.need_resync()
        );
    }
    /// Ask the consumer to stop.
    ///
    /// It'll notice within one pop timeout and exit.
    pub fn stop(&self) {
        info!("Stopping capture.");
        self.state.stop();
    }
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
    pub fn auth_cache(&self) -> Option<&AuthCache> {
        self.auth_cache.as_ref()
    }
    /// The amount of records waiting for the consumer.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn static_session_is_shared() {
        static SESSION: StaticCell<CaptureSession<4>> = StaticCell::new();
        let session = CaptureSession::init_static(&SESSION, CaptureConfig::default());
        assert!(session.filter_config().session_filter);
        assert!(session.auth_cache().is_some());

        session.state.start();
        thread::spawn(move || session.notify_dtr_rts(true, true))
            .join()
            .unwrap();
        assert_eq!(session.phase(), ConnectionPhase::Syncing);
        assert!(session.connection().need_reinit());

        session.stop();
        assert_eq!(session.phase(), ConnectionPhase::Idle);
    }

    #[test]
    fn filter_is_replaced_whole() {
        let session = CaptureSession::<4>::new(CaptureConfig {
            auth_cache_capacity: 0,
            ..Default::default()
        });
        assert!(session.auth_cache().is_none());
        let filter = FilterConfig {
            keep_fcs_bytes: true,
            ..FilterConfig::new()
        };
        session.set_filter_config(filter);
        assert_eq!(session.filter_config(), filter);
    }
}
