//! Collaborator and seam traits
//!
//! The engine talks to the outside world only through these traits: host
//! lookup, confidential-text redaction, image archiving, and the transport
//! seam between [`crate::terminal::Terminal`] and the network connection.

use crate::error::{DatastreamResult, NetworkResult};

/// Where to connect
pub trait TerminalHost: Send + Sync {
    fn hostname(&self) -> &str;

    fn telnet_port(&self) -> u16;

    /// Whether the telnet port expects a TLS handshake
    fn is_telnet_port_tls(&self) -> bool;
}

/// Redacts confidential text (passwords and the like) from rendered screens
pub trait ConfidentialTextService: Send + Sync {
    fn remove_confidential_text(&self, text: &str) -> String;
}

/// Receives serialized terminal images
pub trait ArchiveSink {
    /// Store one image.
    ///
    /// # Arguments
    ///
    /// * `terminal_id` - Id of the terminal that captured the image
    /// * `sequence` - Image sequence number within that terminal
    /// * `json` - The image serialized as JSON
    fn store(&mut self, terminal_id: &str, sequence: u64, json: &str) -> Result<(), String>;
}

/// Outbound half of a connection as seen by the terminal
pub trait DatastreamTransport: Send + Sync {
    /// Send one complete outbound 3270 message
    fn send_datastream(&self, data: &[u8]) -> NetworkResult<()>;

    /// Close the connection; calling it twice is harmless
    fn close(&self);

    fn is_connected(&self) -> bool;
}

/// Receives what the connection's reader thread decodes
pub trait InboundSink: Send + Sync {
    /// Handle one inbound record.
    ///
    /// Returns a reply to send back to the host if the record was a read
    /// command, or the decoding error if the record was rejected.
    fn on_record(&self, record: &[u8]) -> DatastreamResult<Option<Vec<u8>>>;

    /// The connection ended; `reason` says why
    fn on_closed(&self, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Redactor;

    impl ConfidentialTextService for Redactor {
        fn remove_confidential_text(&self, text: &str) -> String {
            text.replace("secret", "******")
        }
    }

    #[derive(Default)]
    struct VecSink(Vec<(String, u64)>);

    impl ArchiveSink for VecSink {
        fn store(&mut self, terminal_id: &str, sequence: u64, _json: &str) -> Result<(), String> {
            self.0.push((terminal_id.to_string(), sequence));
            Ok(())
        }
    }

    #[test]
    fn test_redactor_as_trait_object() {
        let service: &dyn ConfidentialTextService = &Redactor;
        assert_eq!(service.remove_confidential_text("pw secret"), "pw ******");
    }

    #[test]
    fn test_sink_records_keys() {
        let mut sink = VecSink::default();
        sink.store("t1", 3, "{}").unwrap();
        assert_eq!(sink.0, vec![("t1".to_string(), 3)]);
    }
}
