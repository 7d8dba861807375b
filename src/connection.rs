//! The connection state shared between the producer, the consumer task and the DTR/RTS
//! notification.
//!
//! All flags live in a single 32-bit word, which is only ever changed through a
//! compare-exchange loop, so concurrent writers of different flags never lose an update.

use bitfield_struct::bitfield;
use portable_atomic::{AtomicU32, Ordering};

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ConnectionFlags {
    /// The consumer task is active.
    pub running: bool,
    /// The host has to be resynchronized, before anything is streamed again.
    pub need_resync: bool,
    /// The transport has to be reinitialized, before the next handshake.
    pub need_reinit: bool,
    /// Data terminal ready, as last reported by the transport.
    pub dtr: bool,
    /// Request to send, as last reported by the transport.
    pub rts: bool,
    #[bits(27)]
    __: u32,
}
impl ConnectionFlags {
    /// The phase of the connection, these flags describe.
    pub const fn phase(&self) -> ConnectionPhase {
        if !self.running() {
            ConnectionPhase::Idle
        } else if !self.dtr() {
            ConnectionPhase::WaitConnect
        } else if self.need_resync() {
            ConnectionPhase::Syncing
        } else {
            ConnectionPhase::Streaming
        }
    }
}

/// The phases of the connection with the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionPhase {
    /// The consumer task isn't running.
    Idle,
    /// Running, but the host hasn't raised DTR yet.
    WaitConnect,
    /// The host is there, but the handshake hasn't completed yet.
    Syncing,
    /// PCAP records are being streamed to the host.
    Streaming,
}

/// Atomic storage for [ConnectionFlags].
pub struct ConnectionState {
    word: AtomicU32,
}
impl ConnectionState {
    /// Create a new state with all flags cleared.
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }
    /// Read the current flags.
    #[inline(always)]
    pub fn load(&self) -> ConnectionFlags {
        ConnectionFlags::from_bits(self.word.load(Ordering::Acquire))
    }
    /// Atomically apply `transform` to the flags.
    ///
    /// The transform is rerun, until the result could be committed without another writer
    /// intervening. Returns the flags before and after the update.
    pub fn update(
        &self,
        mut transform: impl FnMut(ConnectionFlags) -> ConnectionFlags,
    ) -> (ConnectionFlags, ConnectionFlags) {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let old = ConnectionFlags::from_bits(current);
            let new = transform(old);
            match self.word.compare_exchange_weak(
                current,
                new.into_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (old, new),
                Err(actual) => current = actual,
            }
        }
    }
    /// The phase the connection is currently in.
    pub fn phase(&self) -> ConnectionPhase {
        self.load().phase()
    }
    /// Mark the consumer as running.
    ///
    /// A freshly started consumer always has to reinitialize the transport and synchronize.
    /// Returns `false`, if it was already running.
    pub fn start(&self) -> bool {
        let (old, _) = self.update(|flags| {
            if flags.running() {
                flags
            } else {
                flags
                    .with_running(true)
                    .with_need_resync(true)
                    .with_need_reinit(true)
            }
        });
        !old.running()
    }
    /// Clear the running flag. The consumer notices this on its next iteration.
    pub fn stop(&self) {
        self.update(|flags| flags.with_running(false));
    }
    /// Put the state back into an idle stance, after the consumer exited.
    pub fn settle(&self) {
        self.update(|flags| flags.with_need_resync(false).with_need_reinit(false));
    }
    /// Request a resynchronization with reinitialization of the transport.
    pub fn request_resync(&self) -> ConnectionFlags {
        self.update(|flags| flags.with_need_resync(true).with_need_reinit(true))
            .1
    }
    /// Clear the reinitialization request.
    pub fn reinit_done(&self) {
        self.update(|flags| flags.with_need_reinit(false));
    }
    /// Called after a successful handshake.
    ///
    /// If the host dropped DTR in the meantime, we stay in resync.
    pub fn synchronized(&self) -> ConnectionFlags {
        self.update(|flags| flags.with_need_resync(!flags.dtr())).1
    }
    /// Record new DTR and RTS levels reported by the transport.
    ///
    /// A rising DTR edge while running means a (new) host has opened the port, so we resync
    /// and reinitialize. A falling edge means the host has gone away, so streaming stops
    /// until it returns.
    pub fn notify_dtr_rts(&self, dtr: bool, rts: bool) -> ConnectionFlags {
        self.update(|flags| {
            let mut new = flags.with_dtr(dtr).with_rts(rts);
            if flags.running() && flags.dtr() != dtr {
                new = new.with_need_resync(true);
                if dtr {
                    new = new.with_need_reinit(true);
                }
            }
            new
        })
        .1
    }
}
impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
