//! Telnet option negotiation for TN3270 (RFC 1576) and TN3270E (RFC 2355)
//!
//! The negotiator is passive: the host drives, and every DO/DONT/WILL/WONT
//! and subnegotiation it sends is answered here. Responses accumulate in an
//! output buffer that the connection drains after each event.

use std::collections::HashMap;

use log::{debug, warn};

use crate::protocol_common::telnet_base::{
    build_negotiation, build_subnegotiation, TelnetCommand, TelnetEvent, TelnetOption,
};

/// TERMINAL-TYPE subcommands
const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

/// TN3270E subnegotiation vocabulary
pub const TN3270E_CONNECT: u8 = 1;
pub const TN3270E_DEVICE_TYPE: u8 = 2;
pub const TN3270E_FUNCTIONS: u8 = 3;
pub const TN3270E_IS: u8 = 4;
pub const TN3270E_REASON: u8 = 5;
pub const TN3270E_REJECT: u8 = 6;
pub const TN3270E_REQUEST: u8 = 7;
pub const TN3270E_SEND: u8 = 8;

/// TN3270E data types carried in the record header
pub const TN3270E_DT_3270_DATA: u8 = 0x00;
pub const TN3270E_DT_SCS_DATA: u8 = 0x01;
pub const TN3270E_DT_RESPONSE: u8 = 0x02;
pub const TN3270E_DT_BIND_IMAGE: u8 = 0x03;
pub const TN3270E_DT_UNBIND: u8 = 0x04;
pub const TN3270E_DT_NVT_DATA: u8 = 0x05;
pub const TN3270E_DT_SSCP_LU_DATA: u8 = 0x07;

/// TN3270E functions
pub const TN3270E_FUNC_BIND_IMAGE: u8 = 0x00;
pub const TN3270E_FUNC_DATA_STREAM_CTL: u8 = 0x01;
pub const TN3270E_FUNC_RESPONSES: u8 = 0x02;
pub const TN3270E_FUNC_SCS_CTL_CODES: u8 = 0x03;
pub const TN3270E_FUNC_SYSREQ: u8 = 0x04;

/// Functions this engine implements; anything else is negotiated away
const SUPPORTED_FUNCTIONS: &[u8] = &[TN3270E_FUNC_RESPONSES];

/// REQUEST-FLAG values on 3270-DATA records
pub const TN3270E_RQF_NO_RESPONSE: u8 = 0x00;
pub const TN3270E_RQF_ERROR_RESPONSE: u8 = 0x01;
pub const TN3270E_RQF_ALWAYS_RESPONSE: u8 = 0x02;

/// RESPONSE-FLAG values on RESPONSE records
pub const TN3270E_RSF_POSITIVE: u8 = 0x00;
pub const TN3270E_RSF_NEGATIVE: u8 = 0x01;

/// Single data byte of a RESPONSE record
pub const TN3270E_POS_DEVICE_END: u8 = 0x00;
pub const TN3270E_NEG_COMMAND_REJECT: u8 = 0x00;
pub const TN3270E_NEG_OPERATION_CHECK: u8 = 0x02;

/// Length of the TN3270E record header
pub const TN3270E_HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing exchanged for this option yet
    Initial,
    /// Both sides agree the option is on
    Active,
    /// Both sides agree the option is off
    Inactive,
}

/// Progress of the TN3270E subnegotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tn3270eState {
    /// Not offered, refused, or withdrawn
    Inactive,
    /// WILL TN3270E sent, waiting for SEND DEVICE-TYPE
    Offered,
    DeviceTypeRequested,
    FunctionsRequested,
    /// Functions agreed
    Active { functions: Vec<u8> },
}

/// Five-byte header prefixed to every record while TN3270E is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tn3270eHeader {
    pub data_type: u8,
    pub request_flag: u8,
    pub response_flag: u8,
    pub sequence: u16,
}

impl Tn3270eHeader {
    /// Header for outbound 3270 data
    pub fn data(sequence: u16) -> Self {
        Self {
            data_type: TN3270E_DT_3270_DATA,
            request_flag: 0,
            response_flag: 0,
            sequence,
        }
    }

    /// Header answering the host record with `sequence`
    pub fn response(sequence: u16, positive: bool) -> Self {
        Self {
            data_type: TN3270E_DT_RESPONSE,
            request_flag: 0,
            response_flag: if positive { TN3270E_RSF_POSITIVE } else { TN3270E_RSF_NEGATIVE },
            sequence,
        }
    }

    /// Whether the host expects a RESPONSE record for this one
    pub fn wants_response(&self, failed: bool) -> bool {
        match self.request_flag {
            TN3270E_RQF_ALWAYS_RESPONSE => true,
            TN3270E_RQF_ERROR_RESPONSE => failed,
            _ => false,
        }
    }

    /// Split a record into its header and payload
    pub fn parse(record: &[u8]) -> Option<(Self, &[u8])> {
        if record.len() < TN3270E_HEADER_LEN {
            return None;
        }
        let header = Self {
            data_type: record[0],
            request_flag: record[1],
            response_flag: record[2],
            sequence: u16::from_be_bytes([record[3], record[4]]),
        };
        Some((header, &record[TN3270E_HEADER_LEN..]))
    }

    pub fn to_bytes(self) -> [u8; TN3270E_HEADER_LEN] {
        let [hi, lo] = self.sequence.to_be_bytes();
        [self.data_type, self.request_flag, self.response_flag, hi, lo]
    }
}

#[derive(Debug)]
pub struct TelnetNegotiator {
    /// Options we perform (answered with WILL/WONT)
    local_states: HashMap<TelnetOption, NegotiationState>,
    /// Options the host performs (answered with DO/DONT)
    remote_states: HashMap<TelnetOption, NegotiationState>,

    /// Reported in TERMINAL-TYPE IS, e.g. IBM-3278-2
    terminal_type: String,
    /// Requested in DEVICE-TYPE REQUEST, e.g. IBM-3278-2-E
    tn3270e_device_type: String,
    tn3270e_enabled: bool,
    device_name: Option<String>,

    tn3270e: Tn3270eState,
    /// Device type and LU the host confirmed
    bound_device_type: Option<String>,
    bound_lu: Option<String>,

    /// Pending responses to send
    output_buffer: Vec<u8>,

    failure: Option<String>,
}

impl TelnetNegotiator {
    /// Negotiator for an IBM-3278 of the given model, TN3270E disabled
    pub fn new(model: u8) -> Self {
        let terminal_type = format!("IBM-3278-{model}");
        Self {
            local_states: HashMap::new(),
            remote_states: HashMap::new(),
            tn3270e_device_type: format!("{terminal_type}-E"),
            terminal_type,
            tn3270e_enabled: false,
            device_name: None,
            tn3270e: Tn3270eState::Inactive,
            bound_device_type: None,
            bound_lu: None,
            output_buffer: Vec::new(),
            failure: None,
        }
    }

    /// Report `terminal_type` instead of the model default
    pub fn with_terminal_type(mut self, terminal_type: impl Into<String>) -> Self {
        self.terminal_type = terminal_type.into();
        self.tn3270e_device_type = format!("{}-E", self.terminal_type);
        self
    }

    /// Accept TN3270E, optionally asking for a specific LU
    pub fn with_tn3270e(mut self, enabled: bool, device_name: Option<String>) -> Self {
        self.tn3270e_enabled = enabled;
        self.device_name = device_name;
        self
    }

    pub fn terminal_type(&self) -> &str {
        &self.terminal_type
    }

    /// Answer one telnet event. Records pass through untouched.
    ///
    /// Returns the bytes to send back, possibly empty.
    pub fn handle_event(&mut self, event: &TelnetEvent) -> Vec<u8> {
        self.output_buffer.clear();
        match event {
            TelnetEvent::Negotiation { command, option } => match command {
                TelnetCommand::DO => self.handle_do_command(*option),
                TelnetCommand::DONT => self.handle_dont_command(*option),
                TelnetCommand::WILL => self.handle_will_command(*option),
                TelnetCommand::WONT => self.handle_wont_command(*option),
                _ => {}
            },
            TelnetEvent::Subnegotiation { option, data } => self.handle_subnegotiation(*option, data),
            TelnetEvent::Record(_) | TelnetEvent::Command(_) => {}
        }
        std::mem::take(&mut self.output_buffer)
    }

    /// True once the session can carry 3270 records
    pub fn is_negotiation_complete(&self) -> bool {
        if self.failure.is_some() {
            return false;
        }
        match self.tn3270e {
            Tn3270eState::Active { .. } => true,
            Tn3270eState::Inactive => [TelnetOption::Binary, TelnetOption::EndOfRecord]
                .iter()
                .all(|&opt| self.is_option_active(opt)),
            _ => false,
        }
    }

    /// Why negotiation failed, if it did
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Active in both directions
    pub fn is_option_active(&self, option: TelnetOption) -> bool {
        matches!(self.local_states.get(&option), Some(NegotiationState::Active))
            && matches!(self.remote_states.get(&option), Some(NegotiationState::Active))
    }

    pub fn is_tn3270e_active(&self) -> bool {
        matches!(self.tn3270e, Tn3270eState::Active { .. })
    }

    /// Whether `function` was agreed for this session
    pub fn has_function(&self, function: u8) -> bool {
        matches!(&self.tn3270e, Tn3270eState::Active { functions } if functions.contains(&function))
    }

    pub fn tn3270e_state(&self) -> &Tn3270eState {
        &self.tn3270e
    }

    /// Device type confirmed by DEVICE-TYPE IS
    pub fn bound_device_type(&self) -> Option<&str> {
        self.bound_device_type.as_deref()
    }

    /// LU name confirmed by DEVICE-TYPE IS
    pub fn bound_lu(&self) -> Option<&str> {
        self.bound_lu.as_deref()
    }

    fn supports_local(&self, option: u8) -> Option<TelnetOption> {
        match TelnetOption::from_u8(option)? {
            TelnetOption::Tn3270e if !self.tn3270e_enabled => None,
            supported => Some(supported),
        }
    }

    fn supports_remote(&self, option: u8) -> Option<TelnetOption> {
        match TelnetOption::from_u8(option)? {
            TelnetOption::TerminalType => None,
            TelnetOption::Tn3270e if !self.tn3270e_enabled => None,
            supported => Some(supported),
        }
    }

    /// Handle incoming DO command
    fn handle_do_command(&mut self, option: u8) {
        let Some(supported) = self.supports_local(option) else {
            debug!("refusing DO {option}");
            self.send(TelnetCommand::WONT, option);
            return;
        };
        if self.local_states.get(&supported) != Some(&NegotiationState::Active) {
            debug!("agreeing to DO {}", supported.name());
            self.local_states.insert(supported, NegotiationState::Active);
            self.send(TelnetCommand::WILL, option);
            if supported == TelnetOption::Tn3270e {
                self.tn3270e = Tn3270eState::Offered;
            }
        }
    }

    /// Handle incoming DONT command
    fn handle_dont_command(&mut self, option: u8) {
        let Some(known) = TelnetOption::from_u8(option) else {
            return;
        };
        if self.local_states.get(&known) == Some(&NegotiationState::Active) {
            debug!("host withdrew {}", known.name());
            self.send(TelnetCommand::WONT, option);
        }
        self.local_states.insert(known, NegotiationState::Inactive);
        if known == TelnetOption::Tn3270e {
            self.tn3270e = Tn3270eState::Inactive;
        }
    }

    /// Handle incoming WILL command
    fn handle_will_command(&mut self, option: u8) {
        let Some(supported) = self.supports_remote(option) else {
            debug!("refusing WILL {option}");
            self.send(TelnetCommand::DONT, option);
            return;
        };
        if self.remote_states.get(&supported) != Some(&NegotiationState::Active) {
            self.remote_states.insert(supported, NegotiationState::Active);
            self.send(TelnetCommand::DO, option);
        }
    }

    /// Handle incoming WONT command
    fn handle_wont_command(&mut self, option: u8) {
        let Some(known) = TelnetOption::from_u8(option) else {
            return;
        };
        if self.remote_states.get(&known) == Some(&NegotiationState::Active) {
            self.send(TelnetCommand::DONT, option);
        }
        self.remote_states.insert(known, NegotiationState::Inactive);
    }

    fn handle_subnegotiation(&mut self, option: u8, data: &[u8]) {
        match TelnetOption::from_u8(option) {
            Some(TelnetOption::TerminalType) => {
                if data.first() == Some(&TTYPE_SEND) {
                    debug!("sending terminal type {}", self.terminal_type);
                    let mut payload = vec![TTYPE_IS];
                    payload.extend_from_slice(self.terminal_type.as_bytes());
                    self.output_buffer
                        .extend(build_subnegotiation(TelnetOption::TerminalType as u8, &payload));
                }
            }
            Some(TelnetOption::Tn3270e) if self.tn3270e_enabled => self.handle_tn3270e(data),
            _ => debug!("ignoring subnegotiation for option {option}"),
        }
    }

    fn handle_tn3270e(&mut self, data: &[u8]) {
        match data {
            [TN3270E_SEND, TN3270E_DEVICE_TYPE, ..] => {
                let mut payload = vec![TN3270E_DEVICE_TYPE, TN3270E_REQUEST];
                payload.extend_from_slice(self.tn3270e_device_type.as_bytes());
                if let Some(lu) = &self.device_name {
                    payload.push(TN3270E_CONNECT);
                    payload.extend_from_slice(lu.as_bytes());
                }
                debug!("requesting device type {}", self.tn3270e_device_type);
                self.send_tn3270e(&payload);
                self.tn3270e = Tn3270eState::DeviceTypeRequested;
            }
            [TN3270E_DEVICE_TYPE, TN3270E_IS, rest @ ..] => {
                let (device_type, lu) = match rest.iter().position(|&b| b == TN3270E_CONNECT) {
                    Some(at) => (&rest[..at], Some(&rest[at + 1..])),
                    None => (rest, None),
                };
                self.bound_device_type = Some(String::from_utf8_lossy(device_type).into_owned());
                self.bound_lu = lu.map(|lu| String::from_utf8_lossy(lu).into_owned());
                debug!(
                    "device type {} bound to LU {}",
                    self.bound_device_type.as_deref().unwrap_or_default(),
                    self.bound_lu.as_deref().unwrap_or("-")
                );
                self.send_tn3270e(&[TN3270E_FUNCTIONS, TN3270E_REQUEST]);
                self.tn3270e = Tn3270eState::FunctionsRequested;
            }
            [TN3270E_DEVICE_TYPE, TN3270E_REJECT, rest @ ..] => {
                let reason = match rest {
                    [TN3270E_REASON, code, ..] => format!("device type rejected, reason code {code}"),
                    _ => "device type rejected".to_string(),
                };
                warn!("TN3270E negotiation failed: {reason}");
                self.failure = Some(reason);
            }
            [TN3270E_FUNCTIONS, TN3270E_IS, functions @ ..] => {
                let agreed = supported_functions(functions);
                if agreed.len() != functions.len() {
                    warn!("host confirmed unrequested TN3270E functions {functions:?}, using {agreed:?}");
                }
                debug!("TN3270E active with functions {agreed:?}");
                self.tn3270e = Tn3270eState::Active { functions: agreed };
            }
            [TN3270E_FUNCTIONS, TN3270E_REQUEST, functions @ ..] => {
                let agreed = supported_functions(functions);
                if agreed.len() == functions.len() {
                    let mut payload = vec![TN3270E_FUNCTIONS, TN3270E_IS];
                    payload.extend_from_slice(&agreed);
                    self.send_tn3270e(&payload);
                    debug!("TN3270E active with functions {agreed:?}");
                    self.tn3270e = Tn3270eState::Active { functions: agreed };
                } else {
                    // Counter-propose the subset we implement
                    let mut payload = vec![TN3270E_FUNCTIONS, TN3270E_REQUEST];
                    payload.extend_from_slice(&agreed);
                    self.send_tn3270e(&payload);
                    debug!("host asked for functions {functions:?}, proposing {agreed:?}");
                    self.tn3270e = Tn3270eState::FunctionsRequested;
                }
            }
            other => debug!("ignoring TN3270E subnegotiation {other:?}"),
        }
    }

    fn send(&mut self, command: TelnetCommand, option: u8) {
        self.output_buffer.extend(build_negotiation(command, option));
    }

    fn send_tn3270e(&mut self, payload: &[u8]) {
        self.output_buffer
            .extend(build_subnegotiation(TelnetOption::Tn3270e as u8, payload));
    }
}

fn supported_functions(requested: &[u8]) -> Vec<u8> {
    requested.iter().copied().filter(|f| SUPPORTED_FUNCTIONS.contains(f)).collect()
}
