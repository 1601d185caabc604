//! Telnet framing for TN3270
//!
//! Command and option codes, negotiation builders, and an incremental framer
//! that splits a raw byte stream into 3270 records and telnet events.

use log::trace;

/// Telnet command codes (RFC 854, RFC 885)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetCommand {
    /// Interpret As Command - 255 (0xFF)
    IAC = 255,
    /// Don't - 254 (0xFE)
    DONT = 254,
    /// Do - 253 (0xFD)
    DO = 253,
    /// Won't - 252 (0xFC)
    WONT = 252,
    /// Will - 251 (0xFB)
    WILL = 251,
    /// Subnegotiation Begin - 250 (0xFA)
    SB = 250,
    /// Go Ahead - 249 (0xF9)
    GA = 249,
    /// Are You There - 246 (0xF6)
    AYT = 246,
    /// No Operation - 241 (0xF1)
    NOP = 241,
    /// Subnegotiation End - 240 (0xF0)
    SE = 240,
    /// End of Record - 239 (0xEF)
    EOR = 239,
}

impl TelnetCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            255 => Some(TelnetCommand::IAC),
            254 => Some(TelnetCommand::DONT),
            253 => Some(TelnetCommand::DO),
            252 => Some(TelnetCommand::WONT),
            251 => Some(TelnetCommand::WILL),
            250 => Some(TelnetCommand::SB),
            249 => Some(TelnetCommand::GA),
            246 => Some(TelnetCommand::AYT),
            241 => Some(TelnetCommand::NOP),
            240 => Some(TelnetCommand::SE),
            239 => Some(TelnetCommand::EOR),
            _ => None,
        }
    }
}

/// Telnet options a TN3270 client negotiates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelnetOption {
    /// Binary Transmission - 0
    Binary = 0,
    /// Terminal Type - 24
    TerminalType = 24,
    /// End of Record - 25
    EndOfRecord = 25,
    /// TN3270E - 40
    Tn3270e = 40,
}

impl TelnetOption {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TelnetOption::Binary),
            24 => Some(TelnetOption::TerminalType),
            25 => Some(TelnetOption::EndOfRecord),
            40 => Some(TelnetOption::Tn3270e),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TelnetOption::Binary => "Binary",
            TelnetOption::TerminalType => "Terminal Type",
            TelnetOption::EndOfRecord => "End of Record",
            TelnetOption::Tn3270e => "TN3270E",
        }
    }
}

/// Build "IAC <command> <option>"
///
/// ```
/// use tn3270r::protocol_common::telnet_base::{build_negotiation, TelnetCommand};
///
/// assert_eq!(build_negotiation(TelnetCommand::WILL, 0), vec![255, 251, 0]);
/// ```
pub fn build_negotiation(command: TelnetCommand, option: u8) -> Vec<u8> {
    vec![TelnetCommand::IAC as u8, command as u8, option]
}

/// Build "IAC SB <option> <data> IAC SE" with IAC bytes in `data` doubled
pub fn build_subnegotiation(option: u8, data: &[u8]) -> Vec<u8> {
    let mut result = vec![TelnetCommand::IAC as u8, TelnetCommand::SB as u8, option];
    result.extend(escape_iac(data));
    result.push(TelnetCommand::IAC as u8);
    result.push(TelnetCommand::SE as u8);
    result
}

/// Double every IAC byte
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    for &byte in data {
        out.push(byte);
        if byte == TelnetCommand::IAC as u8 {
            out.push(byte);
        }
    }
    out
}

/// One outbound record: escaped data terminated by IAC EOR
pub fn frame_record(data: &[u8]) -> Vec<u8> {
    let mut out = escape_iac(data);
    out.push(TelnetCommand::IAC as u8);
    out.push(TelnetCommand::EOR as u8);
    out
}

/// Something the framer recognised in the inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// A complete record, IAC un-doubled, without the IAC EOR
    Record(Vec<u8>),
    /// DO, DONT, WILL or WONT for an option
    Negotiation { command: TelnetCommand, option: u8 },
    Subnegotiation { option: u8, data: Vec<u8> },
    /// Any other two-byte command
    Command(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramerState {
    Data,
    Iac,
    Option(TelnetCommand),
    SbOption,
    SbData,
    SbIac,
}

/// Incremental telnet decoder.
///
/// Bytes may arrive split anywhere; state carries over between calls to
/// [`TelnetFramer::feed`].
#[derive(Debug, Clone)]
pub struct TelnetFramer {
    state: FramerState,
    record: Vec<u8>,
    sb_option: u8,
    sb_data: Vec<u8>,
}

impl Default for TelnetFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetFramer {
    pub fn new() -> Self {
        Self {
            state: FramerState::Data,
            record: Vec::new(),
            sb_option: 0,
            sb_data: Vec::new(),
        }
    }

    /// Bytes of the record currently being assembled
    pub fn pending_len(&self) -> usize {
        self.record.len()
    }

    /// Consume `data` and return every event it completes
    pub fn feed(&mut self, data: &[u8]) -> Vec<TelnetEvent> {
        const IAC: u8 = TelnetCommand::IAC as u8;
        let mut events = Vec::new();

        for &byte in data {
            self.state = match self.state {
                FramerState::Data => {
                    if byte == IAC {
                        FramerState::Iac
                    } else {
                        self.record.push(byte);
                        FramerState::Data
                    }
                }
                FramerState::Iac => match TelnetCommand::from_u8(byte) {
                    Some(TelnetCommand::IAC) => {
                        self.record.push(IAC);
                        FramerState::Data
                    }
                    Some(TelnetCommand::EOR) => {
                        let record = std::mem::take(&mut self.record);
                        trace!("record complete, {} bytes", record.len());
                        events.push(TelnetEvent::Record(record));
                        FramerState::Data
                    }
                    Some(cmd @ (TelnetCommand::DO | TelnetCommand::DONT | TelnetCommand::WILL | TelnetCommand::WONT)) => {
                        FramerState::Option(cmd)
                    }
                    Some(TelnetCommand::SB) => FramerState::SbOption,
                    _ => {
                        events.push(TelnetEvent::Command(byte));
                        FramerState::Data
                    }
                },
                FramerState::Option(command) => {
                    events.push(TelnetEvent::Negotiation { command, option: byte });
                    FramerState::Data
                }
                FramerState::SbOption => {
                    self.sb_option = byte;
                    self.sb_data.clear();
                    FramerState::SbData
                }
                FramerState::SbData => {
                    if byte == IAC {
                        FramerState::SbIac
                    } else {
                        self.sb_data.push(byte);
                        FramerState::SbData
                    }
                }
                FramerState::SbIac => {
                    if byte == TelnetCommand::SE as u8 {
                        events.push(TelnetEvent::Subnegotiation {
                            option: self.sb_option,
                            data: std::mem::take(&mut self.sb_data),
                        });
                        FramerState::Data
                    } else {
                        // IAC IAC inside SB, or a stray command byte kept as data
                        self.sb_data.push(byte);
                        FramerState::SbData
                    }
                }
            };
        }
        events
    }
}
