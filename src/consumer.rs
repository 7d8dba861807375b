//! The consumer task, streaming captured frames to the host.
//!
//! The task owns the transport and the radio. It synchronizes with the host whenever the
//! connection state asks for it, and otherwise writes one record per iteration. Errors
//! never end the task, they only lead to another synchronization.

use alloc::vec::Vec;

use embassy_time::Timer;

use crate::{
    error::{PcapError, PcapResult},
    handshake::negotiate,
    pcap::{PcapFileHeader, PcapPacketHeader, PcapTimestamp},
    queue::DEFAULT_QUEUE_LEN,
    radio::Radio,
    record::CaptureRecord,
    session::CaptureSession,
    timebase::TimeBase,
    transport::{write_all, Transport},
};

/// What a single iteration of the consumer did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Nothing arrived within the pop timeout.
    Idle,
    /// The handshake completed and the PCAP header was written.
    Synchronized,
    /// Synchronizing failed. It'll be retried on the next iteration.
    SyncFailed(PcapError),
    /// A record was written to the host.
    Wrote,
    /// Writing a record failed, so the host has to be resynchronized.
    WriteFailed(PcapError),
    /// The session was stopped.
    Stopped,
}

/// Drives the connection with the host and writes captured frames to it.
pub struct Consumer<'a, T: Transport, R: Radio, const N: usize = DEFAULT_QUEUE_LEN> {
    session: &'a CaptureSession<N>,
    transport: T,
    radio: R,
    time_base: TimeBase,
}
impl<'a, T: Transport, R: Radio, const N: usize> Consumer<'a, T, R, N> {
    pub fn new(session: &'a CaptureSession<N>, transport: T, radio: R) -> Self {
        Self {
            session,
            transport,
            radio,
            time_base: TimeBase::new(),
        }
    }
    pub fn transport(&self) -> &T {
        &self.transport
    }
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
    pub fn radio(&self) -> &R {
        &self.radio
    }
    /// Give back the transport and the radio.
    pub fn into_inner(self) -> (T, R) {
        (self.transport, self.radio)
    }

    /// One attempt at getting the host ready for a new PCAP stream.
    async fn synchronize(&mut self) -> PcapResult<()> {
        let session = self.session;
        let config = &session.config;
        if session.state.load().need_reinit() {
            debug!("Reinitializing transport.");
            self.transport.reinitialize();
            session.state.reinit_done();
        }
        if !session.state.load().dtr() {
            debug!("Host not yet ready, DTR is low.");
            return Err(PcapError::HostNotReady);
        }

        let host_config = negotiate(
            &mut self.transport,
            config,
            session.filter_config(),
            self.radio.channel(),
            self.radio.filter_mask(),
        )
        .await?;
        session.set_filter_config(host_config.filter);
        if let Err(err) = self.radio.begin_promiscuous_capture(
            host_config.channel,
            host_config.filter_mask,
            host_config.filter_mask,
        ) {
            error!("Restarting promiscuous capture failed: {:?}", err);
            return Err(err.into());
        }
        self.time_base
            .set_host_time(host_config.host_time.seconds, host_config.host_time.microseconds);

        let header = PcapFileHeader::ieee80211(config.snap_len);
        if let Err(err) =
            write_all(&mut self.transport, &header.to_bytes(), config.write_stall_timeout).await
        {
            error!("Write PCAP file header failed: {:?}", err);
            session.state.request_resync();
            return Err(PcapError::HeaderWriteFailed);
        }
        if let Err(err) = self.transport.flush() {
            error!("Flushing PCAP file header failed: {:?}", err);
            session.state.request_resync();
            return Err(PcapError::HeaderWriteFailed);
        }
        session.stats.reset();
        Ok(())
    }
    async fn write_packet(&mut self, header: &PcapPacketHeader, payload: &[u8]) -> PcapResult<()> {
        let stall_timeout = self.session.config.write_stall_timeout;
        write_all(&mut self.transport, &header.to_bytes(), stall_timeout).await?;
        write_all(&mut self.transport, payload, stall_timeout).await
    }
    /// Write all cached authentication frames, placed before the session start.
    async fn replay_auth_cache(&mut self, session_start: PcapTimestamp) -> PcapResult<()> {
        let session = self.session;
        let Some(auth_cache) = session.auth_cache.as_ref() else {
            return Ok(());
        };
        let mut replay = auth_cache.replay(session_start);
        let mut payload = Vec::new();
        let mut replayed = 0usize;
        while let Some(header) = replay.next_into(&mut payload) {
            self.write_packet(&header, &payload).await?;
            replayed += 1;
        }
        if replayed != 0 {
            debug!("Replayed {} authentication frames.", replayed);
        }
        Ok(())
    }
    async fn stream(&mut self, record: CaptureRecord) -> PcapResult<()> {
        let (timestamp, anchored) = self.time_base.reconcile(record.capture_timestamp_raw());
        if anchored {
            self.replay_auth_cache(timestamp).await?;
        }
        self.write_packet(&record.header().pcap_header(timestamp), record.payload())
            .await
    }

    /// Run a single iteration of the consumer.
    ///
    /// This waits for a record, or runs one synchronization attempt if one is pending. The
    /// session has to be started for this to do anything.
    pub async fn step(&mut self) -> Step {
        let session = self.session;
        let config = &session.config;
        let record = session.queue.pop(config.effective_pop_timeout()).await;
        let flags = session.state.load();
        if !flags.running() {
            return Step::Stopped;
        }
        if flags.need_resync() {
            // Anything captured before the handshake would break anchoring.
            drop(record);
            let res = self.synchronize().await;
            let drained = session.queue.drain();
            if drained != 0 {
                trace!("Dropped {} records queued during synchronization.", drained);
            }
            return match res {
                Ok(()) => {
                    if session.state.synchronized().need_resync() {
                        warn!("Host dropped DTR during synchronization.");
                    } else {
                        info!("Streaming to host.");
                    }
                    Step::Synchronized
                }
                Err(err) => {
                    Timer::after(config.resync_retry_delay).await;
                    Step::SyncFailed(err)
                }
            };
        }
        let Some(record) = record else {
            return Step::Idle;
        };
        match self.stream(record).await {
            Ok(()) => Step::Wrote,
            Err(err) => {
                let flags = session.state.request_resync();
                if flags.dtr() {
                    error!("Write PCAP packet failed: {:?}", err);
                } else {
                    error!("Host has disconnected.");
                }
                Timer::after(config.write_failure_backoff).await;
                Step::WriteFailed(err)
            }
        }
    }
    /// Run the consumer, until the session is stopped.
    ///
    /// When this returns, the queue is empty and the connection state is idle.
    pub async fn run(&mut self) -> PcapResult<()> {
        let session = self.session;
        if !session.state.start() {
            error!("Consumer already running.");
            return Err(PcapError::AlreadyRunning);
        }
        info!("Consumer started.");
        while self.step().await != Step::Stopped {}

        session.state.settle();
        // Give producers, which saw the session running, a chance to finish their push.
        let pop_timeout = session.config.effective_pop_timeout();
        while session.queue.pop(pop_timeout).await.is_some() {}
        info!("Consumer stopped.");
        Ok(())
    }
}
