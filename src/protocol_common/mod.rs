//! Protocol building blocks shared by the 3270 codec and the transport
//!
//! - [`ebcdic`] - EBCDIC (CP037) to Unicode conversion
//! - [`traits`] - Collaborator and transport seam traits
//! - [`telnet_base`] - Telnet codes, negotiation builders and record framing
//!
//! # Examples
//!
//! ```
//! use tn3270r::protocol_common::ebcdic::{char_to_ebcdic, ebcdic_to_char};
//!
//! assert_eq!(ebcdic_to_char(0xC1), 'A');
//! assert_eq!(char_to_ebcdic('A'), Some(0xC1));
//! ```

pub mod ebcdic;
pub mod telnet_base;
pub mod traits;

pub use ebcdic::{char_to_ebcdic, ebcdic_to_char};
pub use telnet_base::{
    build_negotiation, build_subnegotiation, frame_record, TelnetCommand, TelnetEvent,
    TelnetFramer, TelnetOption,
};
pub use traits::{
    ArchiveSink, ConfidentialTextService, DatastreamTransport, InboundSink, TerminalHost,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        assert_eq!(ebcdic_to_char(0xC1), 'A');
        assert_eq!(build_negotiation(TelnetCommand::WILL, 0), vec![255, 251, 0]);
    }
}
