//! # `esp-wifi-pcap`
//! This crate streams frames captured by a Wi-Fi radio in promiscuous mode to a host, where they
//! are fed into Wireshark. The link to the host is a plain byte stream, usually USB CDC ACM, and
//! the data on it is a PCAP stream, so the host side only has to pass it on.
//! ## Overview
//! This chapter will give a short overview of how frames get from the radio to the host.
//!
//! ### Producer
//! The radio driver hands every received frame to [CaptureSession::try_filter] (or
//! [CaptureSession::filter] from a task). The frame is checked against the [FilterConfig], which
//! the host negotiated. Frames passing the filter are copied into a [CaptureRecord], that is
//! sized to the clipped frame and stamped with the raw hardware timestamp, since converting it
//! is too expensive for the receive path. The record is then moved into a bounded queue. If the
//! queue stays full, the frame is dropped and counted. The producer never blocks for long.
//!
//! ### Consumer
//! The [Consumer] owns the [Transport] and the [Radio]. It takes records out of the queue,
//! converts their timestamps to the host's clock and writes them to the host. Whenever the
//! connection asks for it, it first synchronizes with the host. This means saying hello, reading
//! the host's configuration line, restarting the radio with the negotiated channel and filter
//! mask and writing the PCAP file header. Records queued before that are dropped, since they
//! would break the timestamp anchoring.
//!
//! ### Connection state
//! The producer, the consumer and the DTR/RTS notification of the transport share a single
//! state word, which is only ever updated through a compare-exchange loop. The consumer samples
//! it once per iteration, so changes take effect within one pop timeout.
//!
//! ### Authentication cache
//! Decrypting a capture requires the handshake of each station, which may have happened long
//! before the host connected. All EAPOL frames seen are therefore kept in an append only arena
//! and replayed at the start of every session, placed a minute before its first frame.
//!
//! ## Usage
//! Create the [CaptureSession] once, usually with [CaptureSession::init_static], hand a reference
//! to the radio callback and spawn a task running [Consumer::run]. The transport driver reports
//! line state changes through [CaptureSession::notify_dtr_rts].

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub(crate) mod fmt;

mod auth_cache;
mod config;
mod connection;
mod consumer;
mod error;
mod filter;
mod frame;
mod handshake;
mod pcap;
mod queue;
mod radio;
mod record;
mod session;
mod stats;
mod timebase;
mod transport;

pub use auth_cache::{AuthCache, Replay, REPLAY_OFFSET_SECONDS};
pub use config::{CaptureConfig, DEFAULT_AUTH_CACHE_CAPACITY};
pub use connection::{ConnectionFlags, ConnectionPhase, ConnectionState};
pub use consumer::{Consumer, Step};
pub use error::{PcapError, PcapResult, RadioError, TransportError};
pub use filter::{AddressMatch, CustomFilterMask, FilterConfig, FilterOutcome};
pub use frame::{is_eapol, FrameControl, PacketType, RxControl, RxFrame};
pub use handshake::{negotiate, Command, CommandParser, HostConfig, BANNER, PASSTHROUGH_MARKER};
pub use pcap::{
    LinkType, PcapFileHeader, PcapPacketHeader, PcapTimestamp, PCAP_MAGIC,
    PCAP_MAX_CAPTURE_PACKET_SIZE,
};
pub use queue::{WorkQueue, DEFAULT_QUEUE_LEN};
pub use radio::{filter_mask, Radio};
pub use record::{CaptureRecord, RecordHeader};
pub use session::CaptureSession;
pub use stats::{CaptureStats, StatsSnapshot};
pub use timebase::TimeBase;
pub use transport::Transport;

type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
