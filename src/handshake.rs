//! The dialog with the host, which precedes every PCAP stream.
//!
//! After the banner, the host sends a single line of commands. Each command is a letter,
//! optionally followed by a decimal number. Values too wide for one number are split,
//! with the upper case letter carrying the high part and the lower case letter the low
//! part. The high part has to come first.
//!
//! | Command | Meaning |
//! |---|---|
//! | `C` | Channel |
//! | `F`/`f` | High and low 16 bits of the radio's filter mask |
//! | `S` | High 16 bits of the [CustomFilterMask] |
//! | `U`/`u` | High and low three bytes of the unicast address. Only `U` selects an OUI. |
//! | `M`/`m` | High and low three bytes of the multicast address. `M65536` matches any group address. |
//! | `G`/`g` | Seconds and microseconds of the host's clock |
//! | `P` | Print the settings |
//! | `X` | Execute |
//!
//! A line like `C6F1f0S0G1000g500000X` is typical.

use alloc::string::String;
use core::fmt::Write;

use crate::{
    config::CaptureConfig,
    error::{PcapError, PcapResult},
    filter::{AddressMatch, CustomFilterMask, FilterConfig},
    pcap::PcapTimestamp,
    radio::filter_mask,
    transport::{discard_input, read_byte_timeout, write_all, Transport},
};

/// Sent to the host, when we're ready for its configuration.
pub const BANNER: &str = "\n<<SerialPcap>>\n";
/// Sent to the host after `X`. Everything following this is PCAP.
pub const PASSTHROUGH_MARKER: &str = "<<PASSTHROUGH>>\n";
/// The high value of `M`, which matches all group addresses.
pub const MULTICAST_WILDCARD: i64 = 0x10000;

/// One parsed command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Channel(i64),
    FilterHigh(i64),
    FilterLow(i64),
    CustomFilter(i64),
    UnicastHigh(i64),
    UnicastLow(i64),
    MulticastHigh(i64),
    MulticastLow(i64),
    Seconds(i64),
    Microseconds(i64),
    Print,
    Execute,
    Unknown(u8),
    EndOfLine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParserState {
    Idle,
    Argument {
        id: u8,
        value: i64,
        negative: bool,
        has_digits: bool,
    },
}

/// Turns the bytes of the configuration line into [Command]s.
///
/// Numbers end at the first byte, which isn't a digit. A missing number is zero. Blanks
/// before the number are skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandParser {
    state: ParserState,
}
impl CommandParser {
    pub const fn new() -> Self {
        Self {
            state: ParserState::Idle,
        }
    }
    /// Feed one byte into the parser.
    ///
    /// A byte can complete at most two commands, the one it terminates and itself.
    pub fn feed(&mut self, byte: u8) -> impl Iterator<Item = Command> {
        let mut completed = [None, None];
        match self.state {
            ParserState::Argument {
                id,
                value,
                negative,
                has_digits,
            } => match byte {
                b'0'..=b'9' => {
                    self.state = ParserState::Argument {
                        id,
                        value: value
                            .saturating_mul(10)
                            .saturating_add((byte - b'0') as i64),
                        negative,
                        has_digits: true,
                    };
                }
                b'-' if !has_digits && !negative => {
                    self.state = ParserState::Argument {
                        id,
                        value,
                        negative: true,
                        has_digits,
                    };
                }
                b' ' | b'\t' | b'\r' if !has_digits => {}
                _ => {
                    self.state = ParserState::Idle;
                    completed[0] = Some(Self::finish(id, if negative { -value } else { value }));
                    completed[1] = self.start(byte);
                }
            },
            ParserState::Idle => completed[0] = self.start(byte),
        }
        completed.into_iter().flatten()
    }
    fn start(&mut self, byte: u8) -> Option<Command> {
        match byte {
            b'\n' => Some(Command::EndOfLine),
            b'X' => Some(Command::Execute),
            b'P' => Some(Command::Print),
            b'C' | b'F' | b'f' | b'S' | b'U' | b'u' | b'M' | b'm' | b'G' | b'g' => {
                self.state = ParserState::Argument {
                    id: byte,
                    value: 0,
                    negative: false,
                    has_digits: false,
                };
                None
            }
            // Stray separators and digits.
            b' ' | b'\t' | b'\r' | b'-' | b'0'..=b'9' => None,
            other => Some(Command::Unknown(other)),
        }
    }
    const fn finish(id: u8, value: i64) -> Command {
        match id {
            b'C' => Command::Channel(value),
            b'F' => Command::FilterHigh(value),
            b'f' => Command::FilterLow(value),
            b'S' => Command::CustomFilter(value),
            b'U' => Command::UnicastHigh(value),
            b'u' => Command::UnicastLow(value),
            b'M' => Command::MulticastHigh(value),
            b'm' => Command::MulticastLow(value),
            b'G' => Command::Seconds(value),
            b'g' => Command::Microseconds(value),
            other => Command::Unknown(other),
        }
    }
}
impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a 24-bit value into three bytes.
///
/// Non-positive values clear the bytes and have a length of zero.
fn triplet(value: i64) -> ([u8; 3], u8) {
    if value <= 0 {
        return ([0; 3], 0);
    }
    let value = value as u32;
    ([(value >> 16) as u8, (value >> 8) as u8, value as u8], 3)
}

/// An address pattern, while it's being assembled from its halves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct PartialAddress {
    length: u8,
    address: [u8; 6],
}
impl PartialAddress {
    fn from_match(pattern: Option<AddressMatch>) -> Self {
        pattern.map_or_else(Self::default, |pattern| {
            let mut address = [0u8; 6];
            address[..pattern.length()].copy_from_slice(pattern.as_slice());
            Self {
                length: pattern.length() as u8,
                address,
            }
        })
    }
    fn set_high(&mut self, bytes: [u8; 3]) {
        self.address[..3].copy_from_slice(&bytes);
    }
    fn set_low(&mut self, bytes: [u8; 3]) {
        self.address[3..].copy_from_slice(&bytes);
    }
    fn to_match(self) -> Option<AddressMatch> {
        (self.length != 0).then(|| AddressMatch::new(self.address, self.length))
    }
}

/// The settings negotiated with the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostConfig {
    pub channel: u8,
    /// Passed to the radio, both as the filter and control filter mask.
    pub filter_mask: u32,
    pub filter: FilterConfig,
    /// The host's clock. Zero, if the host didn't send it.
    pub host_time: PcapTimestamp,
}
impl HostConfig {
    /// Render the settings as shown to the host.
    pub fn render(&self, title: &str) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "{title}");
        let _ = writeln!(text, "  Channel: {}", self.channel);
        let _ = writeln!(text, "  filter: 0x{:08X}", self.filter_mask);
        for (enabled, name) in [
            (self.filter.accept_bad_frames, "accept_bad_frames"),
            (self.filter.keep_fcs_bytes, "keep_fcs_bytes"),
            (self.filter.session_filter, "session_filter"),
        ] {
            if enabled {
                let _ = writeln!(text, "  {name}");
            }
        }
        for (name, pattern) in [
            ("multicast", self.filter.multicast_match),
            ("unicast", self.filter.unicast_match),
        ] {
            let Some(pattern) = pattern else {
                continue;
            };
            let _ = write!(text, "  {name}: '");
            for (i, byte) in pattern.as_slice().iter().enumerate() {
                if i != 0 {
                    text.push(':');
                }
                let _ = write!(text, "{byte:02X}");
            }
            let _ = writeln!(text, "'");
        }
        text
    }
}

/// What to do after applying a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Next {
    Continue,
    Print,
    Execute,
    Abort,
}

/// The configuration, while the line is being parsed.
///
/// Nothing outside of this is touched, before `X` was received.
#[derive(Clone, Copy, Debug)]
struct Draft {
    max_channel: u8,
    channel: u8,
    filter_mask: u32,
    radio_filter_mask: u32,
    custom_mask: Option<CustomFilterMask>,
    unicast: PartialAddress,
    multicast: PartialAddress,
    host_time: PcapTimestamp,
    base_filter: FilterConfig,
}
impl Draft {
    fn new(config: &CaptureConfig, current: FilterConfig, channel: u8, radio_filter_mask: u32) -> Self {
        // A radio, which never captured, may not report a usable channel yet.
        let channel = if (1..=config.max_channel).contains(&channel) {
            channel
        } else {
            config.default_channel
        };
        Self {
            max_channel: config.max_channel,
            channel,
            filter_mask: 0,
            radio_filter_mask,
            custom_mask: None,
            unicast: PartialAddress::from_match(current.unicast_match),
            multicast: PartialAddress::from_match(current.multicast_match),
            host_time: PcapTimestamp::default(),
            base_filter: current,
        }
    }
    fn apply(&mut self, command: Command) -> Next {
        match command {
            Command::Channel(channel) => {
                if channel > 0 && channel <= self.max_channel as i64 {
                    self.channel = channel as u8;
                } else {
                    error!("Invalid channel: {}", channel);
                }
            }
            Command::FilterHigh(value) => self.filter_mask = (value as u32 & 0xffff) << 16,
            Command::FilterLow(value) => self.filter_mask |= value as u32 & 0xffff,
            Command::CustomFilter(value) => {
                self.custom_mask = Some(CustomFilterMask::from_bits((value as u32 & 0xffff) << 16))
            }
            Command::UnicastHigh(value) => {
                let (bytes, length) = triplet(value);
                self.unicast.set_high(bytes);
                self.unicast.length = length;
            }
            Command::UnicastLow(value) => {
                let (bytes, length) = triplet(value);
                self.unicast.set_low(bytes);
                if self.unicast.length != 0 {
                    self.unicast.length += length;
                }
            }
            Command::MulticastHigh(value) => {
                let (bytes, length) = triplet(value);
                self.multicast.set_high(bytes);
                self.multicast.length = if value == MULTICAST_WILDCARD { 1 } else { length };
            }
            Command::MulticastLow(value) => {
                let (bytes, length) = triplet(value);
                self.multicast.set_low(bytes);
                // A wildcard followed by a low half was meant as a prefix after all.
                if self.multicast.length == 1 && length != 0 {
                    self.multicast.length += 2;
                }
                if self.multicast.length == 3 {
                    self.multicast.length += length;
                }
            }
            Command::Seconds(value) => match u32::try_from(value) {
                Ok(seconds) if seconds > 0 => self.host_time.seconds = seconds,
                _ => error!("Missing host time."),
            },
            Command::Microseconds(value) => {
                if (0..1_000_000).contains(&value) {
                    self.host_time.microseconds = value as u32;
                } else {
                    error!("Malformed host time.");
                }
            }
            Command::Print => return Next::Print,
            Command::Execute => return Next::Execute,
            Command::Unknown(id) => error!("Unknown config ID: '{}'", id as char),
            Command::EndOfLine => return Next::Abort,
        }
        Next::Continue
    }
    fn host_config(&self) -> HostConfig {
        let mut filter = self.base_filter;
        if let Some(custom_mask) = self.custom_mask {
            filter.apply_custom_mask(custom_mask);
        }
        filter.unicast_match = self.unicast.to_match();
        filter.multicast_match = filter.unicast_match.and(self.multicast.to_match());

        let mut mask = if self.filter_mask == 0 {
            self.radio_filter_mask
        } else {
            self.filter_mask
        };
        if filter.session_filter {
            mask |= filter_mask::MGMT | filter_mask::DATA;
        }
        HostConfig {
            channel: self.channel,
            filter_mask: mask,
            filter,
            host_time: self.host_time,
        }
    }
}

/// Run the dialog with the host.
///
/// `current` is the filter in effect, which provides the values the host doesn't set.
/// Nothing is changed here, applying the result is up to the caller.
pub async fn negotiate(
    transport: &mut impl Transport,
    config: &CaptureConfig,
    current: FilterConfig,
    radio_channel: u8,
    radio_filter_mask: u32,
) -> PcapResult<HostConfig> {
    let discarded = discard_input(transport);
    if discarded != 0 {
        debug!("Discarded {} stale bytes from the host.", discarded);
    }
    info!("Saying hello to the host.");
    write_all(transport, BANNER.as_bytes(), config.write_stall_timeout).await?;

    let Some(mut byte) = read_byte_timeout(transport, config.handshake_timeout).await else {
        error!("Host didn't respond in time.");
        return Err(PcapError::HandshakeTimeout);
    };
    let mut draft = Draft::new(config, current, radio_channel, radio_filter_mask);
    let mut parser = CommandParser::new();
    loop {
        for command in parser.feed(byte) {
            match draft.apply(command) {
                Next::Continue => {}
                Next::Print => {
                    let text = draft.host_config().render("Current Config Settings");
                    write_all(transport, text.as_bytes(), config.write_stall_timeout).await?;
                }
                Next::Execute => {
                    let host_config = draft.host_config();
                    let text = host_config.render("Final Config Settings");
                    write_all(transport, text.as_bytes(), config.write_stall_timeout).await?;
                    write_all(
                        transport,
                        PASSTHROUGH_MARKER.as_bytes(),
                        config.write_stall_timeout,
                    )
                    .await?;
                    info!("Host sync complete.");
                    return Ok(host_config);
                }
                Next::Abort => {
                    error!("Missing 'X' at the end of config.");
                    return Err(PcapError::HandshakeTimeout);
                }
            }
        }
        byte = match read_byte_timeout(transport, config.command_timeout).await {
            Some(byte) => byte,
            None => {
                error!("Host stopped sending config.");
                return Err(PcapError::HandshakeTimeout);
            }
        };
    }
}
