//! TN3270 terminal engine for mainframe test automation
//!
//! The crate connects to a host over telnet (optionally TLS), negotiates
//! 3270 mode or TN3270E, applies host datastreams to an in-memory screen and
//! lets a test type into fields, press AID keys and wait for the host.
//!
//! ```no_run
//! use std::time::Duration;
//! use tn3270r::{HostConfig, Terminal, TerminalConfig};
//!
//! # fn main() -> tn3270r::Tn3270Result<()> {
//! let terminal = Terminal::new(TerminalConfig::default())?;
//! terminal.connect(&HostConfig::new("mainframe.example.com", 23))?;
//! terminal.wait_for_keyboard(Duration::from_secs(30))?;
//! terminal.type_text("LOGON APPLID(CICS)")?;
//! terminal.enter()?;
//! terminal.wait_for_text_in_field("READY", Duration::from_secs(30))?;
//! println!("{}", terminal.retrieve_screen());
//! # Ok(())
//! # }
//! ```

/// PROTOCOL COMMON: EBCDIC conversion, telnet framing and the seams between
/// the transport, the terminal and the outside world
pub mod protocol_common;

/// LIB3270: IBM 3270 datastream codec and screen model
pub mod lib3270;

pub mod config;
pub mod error;
pub mod network;
pub mod telnet_negotiation;
pub mod terminal;

/// Serializable screen snapshots and their archive
pub mod terminal_image;

pub use config::{HostConfig, TerminalConfig, TlsConfig};
pub use error::{
    ConfigError, DatastreamError, FieldError, NetworkError, TerminalError, Tn3270Error, Tn3270Result,
};
pub use lib3270::{AidKey, Screen, ScreenField, ScreenSize};
pub use network::Tn3270Connection;
pub use protocol_common::traits::{
    ArchiveSink, ConfidentialTextService, DatastreamTransport, InboundSink, TerminalHost,
};
pub use terminal::Terminal;
pub use terminal_image::{CapturedTerminal, TerminalImage};
