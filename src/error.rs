/// Errors, which can occur while synchronizing with the host or streaming captures to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PcapError {
    /// The host didn't send a complete configuration in time.
    ///
    /// This includes a configuration line, which ended without an `X`.
    HandshakeTimeout,
    /// DTR is low, so there's nobody listening on the other end.
    HostNotReady,
    /// The PCAP file header couldn't be written.
    HeaderWriteFailed,
    /// A PCAP record couldn't be written completely.
    WriteFailed,
    /// The transport stopped accepting data for too long.
    WriteStalled,
    /// The radio refused to restart capturing.
    Radio(RadioError),
    /// Another consumer is already running on this session.
    AlreadyRunning,
}
impl From<RadioError> for PcapError {
    fn from(value: RadioError) -> Self {
        Self::Radio(value)
    }
}
pub type PcapResult<T> = Result<T, PcapError>;

/// An error reported by a [Transport](crate::Transport).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The other end has gone away.
    Disconnected,
    /// Some other I/O error occured.
    Io,
}

/// An error reported by a [Radio](crate::Radio).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    InvalidChannel,
    /// The driver refused to enter promiscuous mode.
    PromiscuousFailed,
}
