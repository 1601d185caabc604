//! Write Structured Field handling through a terminal

use std::sync::Arc;

use tn3270r::error::NetworkResult;
use tn3270r::{DatastreamTransport, ScreenSize, Terminal, TerminalConfig};

struct NullTransport;

impl DatastreamTransport for NullTransport {
    fn send_datastream(&self, _data: &[u8]) -> NetworkResult<()> {
        Ok(())
    }

    fn close(&self) {}

    fn is_connected(&self) -> bool {
        true
    }
}

fn model_2_with_wide_alternate() -> TerminalConfig {
    TerminalConfig { alternate_rows: Some(27), alternate_columns: Some(132), ..Default::default() }
}

#[test]
fn test_read_partition_query_is_answered() {
    let terminal = Terminal::with_id("query", model_2_with_wide_alternate()).unwrap();
    let sink = terminal.attach_transport(Arc::new(NullTransport));

    let reply = sink.on_record(&[0xF3, 0x00, 0x05, 0x01, 0xFF, 0x02]).unwrap().unwrap();
    assert_eq!(reply[0], 0x88);
    // Summary lists Summary, Usable Area and Implicit Partition
    assert_eq!(&reply[1..8], &[0x00, 0x07, 0x81, 0x80, 0x80, 0x81, 0xA6]);

    let implicit = &reply[reply.len() - 17..];
    assert_eq!(&implicit[..4], &[0x00, 0x11, 0x81, 0xA6]);
    // Default 80x24 then alternate 132x27
    assert_eq!(&implicit[9..], &[0x00, 0x50, 0x00, 0x18, 0x00, 0x84, 0x00, 0x1B]);
}

#[test]
fn test_erase_reset_switches_size() {
    let terminal = Terminal::with_id("reset", model_2_with_wide_alternate()).unwrap();
    let sink = terminal.attach_transport(Arc::new(NullTransport));

    assert_eq!(sink.on_record(&[0xF3, 0x00, 0x04, 0x03, 0x80]), Ok(None));
    assert_eq!(terminal.screen().size(), ScreenSize::new(27, 132));
    assert_eq!(terminal.retrieve_screen().lines().count(), 27);

    // Erase/Write always returns to the default size
    sink.on_record(&[0xF5, 0xC2]).unwrap();
    assert_eq!(terminal.screen().size(), ScreenSize::MODEL_2);
    assert!(!terminal.is_keyboard_locked());

    // The image taken at the alternate size records it
    let images = terminal.images();
    assert_eq!(images[0].size, Some(ScreenSize::new(27, 132)));
    assert_eq!(images[1].size, None);
}

#[test]
fn test_unknown_structured_field_is_ignored() {
    let terminal = Terminal::with_id("other", TerminalConfig::default()).unwrap();
    let sink = terminal.attach_transport(Arc::new(NullTransport));

    assert_eq!(sink.on_record(&[0xF3, 0x00, 0x05, 0x40, 0x01, 0x02]), Ok(None));
    assert_eq!(terminal.update_count(), 1);
    // Truncated structured fields fail the record without applying it
    assert!(sink.on_record(&[0xF3, 0x00, 0x09, 0x01]).is_err());
    assert_eq!(terminal.update_count(), 1);
}
