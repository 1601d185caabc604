//! End-to-end sessions against a scripted host on 127.0.0.1
//!
//! Each test binds an ephemeral port, plays the host side of a telnet
//! session in a thread and forwards whatever records the terminal sends
//! back over a channel.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tn3270r::protocol_common::{
    build_negotiation, build_subnegotiation, frame_record, TelnetCommand, TelnetEvent, TelnetFramer, TelnetOption,
};
use tn3270r::telnet_negotiation::{
    TN3270E_CONNECT, TN3270E_DEVICE_TYPE, TN3270E_DT_RESPONSE, TN3270E_FUNCTIONS, TN3270E_FUNC_BIND_IMAGE,
    TN3270E_FUNC_RESPONSES, TN3270E_FUNC_SYSREQ, TN3270E_IS, TN3270E_NEG_OPERATION_CHECK, TN3270E_REASON,
    TN3270E_REJECT, TN3270E_REQUEST, TN3270E_RQF_ALWAYS_RESPONSE, TN3270E_RQF_ERROR_RESPONSE, TN3270E_RSF_NEGATIVE,
    TN3270E_RSF_POSITIVE, TN3270E_SEND,
};
use tn3270r::{HostConfig, NetworkError, Terminal, TerminalConfig, TerminalError, Tn3270Error};

const WAIT: Duration = Duration::from_secs(5);

/// EW restore; SF prot "ID:"; SBA 4; SF unprot; IC; SBA 10; SF prot
const FORM: &[u8] = &[
    0xF5, 0xC2, 0x1D, 0x60, 0xC9, 0xC4, 0x7A, 0x11, 0x40, 0xC4, 0x1D, 0x40, 0x13, 0x11, 0x40, 0x4A, 0x1D, 0x60,
];

/// Enter with the cursor at 8 and "ABC" typed into the field at 5
const ENTER_ABC: &[u8] = &[0x7D, 0x40, 0xC8, 0x11, 0x40, 0xC5, 0xC1, 0xC2, 0xC3];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_config() -> TerminalConfig {
    TerminalConfig {
        rows: Some(2),
        columns: Some(10),
        negotiation_timeout_ms: 5_000,
        reader_poll_interval_ms: 20,
        ..Default::default()
    }
}

/// Host side of one connection
struct FakeHost {
    stream: TcpStream,
    framer: TelnetFramer,
    backlog: Vec<TelnetEvent>,
}

impl FakeHost {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();
        Self { stream, framer: TelnetFramer::new(), backlog: Vec::new() }
    }

    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
        self.stream.flush().unwrap();
    }

    fn send_record(&mut self, record: &[u8]) {
        self.send(&frame_record(record));
    }

    fn next_event(&mut self, mut wanted: impl FnMut(&TelnetEvent) -> bool) -> TelnetEvent {
        loop {
            if let Some(index) = self.backlog.iter().position(&mut wanted) {
                return self.backlog.remove(index);
            }
            let mut buffer = [0u8; 1024];
            let n = self.stream.read(&mut buffer).unwrap();
            assert!(n > 0, "terminal closed the connection");
            self.backlog.extend(self.framer.feed(&buffer[..n]));
        }
    }

    /// Block until the terminal hangs up or the read times out
    fn wait_for_close(&mut self) {
        let mut buffer = [0u8; 1024];
        while matches!(self.stream.read(&mut buffer), Ok(n) if n > 0) {}
    }

    fn next_record(&mut self) -> Vec<u8> {
        match self.next_event(|event| matches!(event, TelnetEvent::Record(_))) {
            TelnetEvent::Record(record) => record,
            _ => unreachable!(),
        }
    }

    /// Plain 3270 mode: terminal type, EOR and BINARY both ways
    fn negotiate_3270(&mut self) {
        let mut offer = build_negotiation(TelnetCommand::DO, TelnetOption::TerminalType as u8);
        offer.extend(build_subnegotiation(TelnetOption::TerminalType as u8, &[1]));
        for option in [TelnetOption::EndOfRecord, TelnetOption::Binary] {
            offer.extend(build_negotiation(TelnetCommand::DO, option as u8));
            offer.extend(build_negotiation(TelnetCommand::WILL, option as u8));
        }
        self.send(&offer);

        let reply = self.next_event(|event| {
            matches!(event, TelnetEvent::Subnegotiation { option, .. } if *option == TelnetOption::TerminalType as u8)
        });
        assert_eq!(
            reply,
            TelnetEvent::Subnegotiation { option: TelnetOption::TerminalType as u8, data: b"\0IBM-3278-2".to_vec() }
        );
    }
}

fn spawn_host(script: impl FnOnce(FakeHost, mpsc::Sender<Vec<u8>>) + Send + 'static) -> (u16, mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let host = FakeHost::accept(&listener);
        script(host, tx);
    });
    (port, rx)
}

#[test]
fn test_plain_3270_session() {
    init_logging();
    let (port, records) = spawn_host(|mut host, tx| {
        host.negotiate_3270();
        host.send_record(FORM);

        tx.send(host.next_record()).unwrap();

        // Read Buffer while the keyboard is still locked
        host.send_record(&[0xF2]);
        tx.send(host.next_record()).unwrap();

        // W restore; SBA 11; "READY"
        host.send_record(&[0xF1, 0xC2, 0x11, 0x40, 0x4B, 0xD9, 0xC5, 0xC1, 0xC4, 0xE8]);
        // Dropping the host closes the session
    });

    let terminal = Terminal::with_id("loopback", small_config()).unwrap();
    terminal.connect(&HostConfig::new("127.0.0.1", port)).unwrap();
    assert!(terminal.is_connected());

    terminal.wait_for_keyboard(WAIT).unwrap();
    assert_eq!(terminal.cursor(), (0, 5));
    assert!(terminal.is_text_in_field("ID:"));

    terminal.type_text("ABC").unwrap();
    terminal.enter().unwrap();
    assert_eq!(records.recv_timeout(WAIT).unwrap(), ENTER_ABC);

    let read_buffer = records.recv_timeout(WAIT).unwrap();
    // AID, cursor, then the 20 cells with attributes as SF orders
    assert_eq!(&read_buffer[..3], &[0x7D, 0x40, 0xC8]);
    assert_eq!(&read_buffer[3..5], &[0x1D, 0x60]);

    terminal.wait_for_text("READY", WAIT).unwrap();
    assert!(!terminal.is_keyboard_locked());
    assert_eq!(terminal.retrieve_screen(), " ID: ABC  \n READY    ");

    let result = terminal.wait_for_update(terminal.update_count(), WAIT);
    assert!(matches!(result, Err(TerminalError::ConnectionClosed { .. })), "{result:?}");
    assert!(!terminal.is_connected());
    assert!(matches!(terminal.enter(), Err(Tn3270Error::Terminal(TerminalError::ConnectionClosed { .. }))));

    let images = terminal.images();
    assert!(images.len() >= 4);
    assert_eq!(images[1].aid.as_deref(), Some("ENTER"));
}

#[test]
fn test_tn3270e_session() {
    init_logging();
    let (port, records) = spawn_host(|mut host, tx| {
        host.send(&build_negotiation(TelnetCommand::DO, TelnetOption::Tn3270e as u8));
        host.next_event(|event| {
            matches!(event, TelnetEvent::Negotiation { command: TelnetCommand::WILL, option } if *option == TelnetOption::Tn3270e as u8)
        });

        let tn3270e = TelnetOption::Tn3270e as u8;
        host.send(&build_subnegotiation(tn3270e, &[TN3270E_SEND, TN3270E_DEVICE_TYPE]));
        let request = host.next_event(|event| matches!(event, TelnetEvent::Subnegotiation { .. }));
        let mut expected = vec![TN3270E_DEVICE_TYPE, TN3270E_REQUEST];
        expected.extend_from_slice(b"IBM-3278-2-E");
        expected.push(TN3270E_CONNECT);
        expected.extend_from_slice(b"LU01");
        assert_eq!(request, TelnetEvent::Subnegotiation { option: tn3270e, data: expected });

        let mut bound = vec![TN3270E_DEVICE_TYPE, TN3270E_IS];
        bound.extend_from_slice(b"IBM-3278-2-E");
        bound.push(TN3270E_CONNECT);
        bound.extend_from_slice(b"LU01");
        host.send(&build_subnegotiation(tn3270e, &bound));

        let functions = host.next_event(|event| matches!(event, TelnetEvent::Subnegotiation { .. }));
        assert_eq!(
            functions,
            TelnetEvent::Subnegotiation { option: tn3270e, data: vec![TN3270E_FUNCTIONS, TN3270E_REQUEST] }
        );
        host.send(&build_subnegotiation(tn3270e, &[TN3270E_FUNCTIONS, TN3270E_IS]));

        // NVT data is ignored, 3270 data is applied
        host.send_record(&[0x05, 0, 0, 0, 0, b'h', b'i']);
        let mut screen = vec![0, 0, 0, 0, 1];
        screen.extend_from_slice(FORM);
        host.send_record(&screen);

        tx.send(host.next_record()).unwrap();
        // Keep the session open until the test is done with it
        host.wait_for_close();
    });

    let config = TerminalConfig { tn3270e: true, device_name: Some("LU01".to_string()), ..small_config() };
    let terminal = Terminal::with_id("tn3270e", config).unwrap();
    terminal.connect(&HostConfig::new("127.0.0.1", port)).unwrap();

    terminal.wait_for_keyboard(WAIT).unwrap();
    assert_eq!(terminal.update_count(), 1);
    terminal.type_text("ABC").unwrap();
    terminal.enter().unwrap();

    let record = records.recv_timeout(WAIT).unwrap();
    assert_eq!(&record[..5], &[0, 0, 0, 0, 0]);
    assert_eq!(&record[5..], ENTER_ABC);

    terminal.disconnect();
    assert!(!terminal.is_connected());
}

#[test]
fn test_tn3270e_responses() {
    init_logging();
    let (port, records) = spawn_host(|mut host, tx| {
        let tn3270e = TelnetOption::Tn3270e as u8;
        host.send(&build_negotiation(TelnetCommand::DO, tn3270e));
        host.send(&build_subnegotiation(tn3270e, &[TN3270E_SEND, TN3270E_DEVICE_TYPE]));
        host.next_event(|event| matches!(event, TelnetEvent::Subnegotiation { .. }));
        let mut bound = vec![TN3270E_DEVICE_TYPE, TN3270E_IS];
        bound.extend_from_slice(b"IBM-3278-2-E");
        host.send(&build_subnegotiation(tn3270e, &bound));
        host.next_event(|event| matches!(event, TelnetEvent::Subnegotiation { .. }));

        // Ask for more than the terminal implements
        let wanted = [
            TN3270E_FUNCTIONS,
            TN3270E_REQUEST,
            TN3270E_FUNC_BIND_IMAGE,
            TN3270E_FUNC_RESPONSES,
            TN3270E_FUNC_SYSREQ,
        ];
        host.send(&build_subnegotiation(tn3270e, &wanted));
        let counter = host.next_event(|event| matches!(event, TelnetEvent::Subnegotiation { .. }));
        assert_eq!(
            counter,
            TelnetEvent::Subnegotiation {
                option: tn3270e,
                data: vec![TN3270E_FUNCTIONS, TN3270E_REQUEST, TN3270E_FUNC_RESPONSES],
            }
        );
        host.send(&build_subnegotiation(tn3270e, &[TN3270E_FUNCTIONS, TN3270E_IS, TN3270E_FUNC_RESPONSES]));

        let with_header = |request_flag: u8, sequence: u8, data: &[u8]| {
            let mut record = vec![0, request_flag, 0, 0, sequence];
            record.extend_from_slice(data);
            record
        };
        host.send_record(&with_header(TN3270E_RQF_ALWAYS_RESPONSE, 1, FORM));
        tx.send(host.next_record()).unwrap();
        // Bad order 0x07, error response requested
        host.send_record(&with_header(TN3270E_RQF_ERROR_RESPONSE, 2, &[0xF1, 0xC2, 0x07]));
        tx.send(host.next_record()).unwrap();
        // Good record under error-response gets no answer, so the next one seen is for 4
        host.send_record(&with_header(TN3270E_RQF_ERROR_RESPONSE, 3, &[0xF1, 0xC2]));
        host.send_record(&with_header(TN3270E_RQF_ALWAYS_RESPONSE, 4, &[0xF1, 0xC2]));
        tx.send(host.next_record()).unwrap();
        host.wait_for_close();
    });

    let config = TerminalConfig { tn3270e: true, ..small_config() };
    let terminal = Terminal::with_id("responses", config).unwrap();
    terminal.connect(&HostConfig::new("127.0.0.1", port)).unwrap();

    assert_eq!(records.recv_timeout(WAIT).unwrap(), [TN3270E_DT_RESPONSE, 0, TN3270E_RSF_POSITIVE, 0, 1, 0x00]);
    assert_eq!(
        records.recv_timeout(WAIT).unwrap(),
        [TN3270E_DT_RESPONSE, 0, TN3270E_RSF_NEGATIVE, 0, 2, TN3270E_NEG_OPERATION_CHECK]
    );
    assert_eq!(records.recv_timeout(WAIT).unwrap(), [TN3270E_DT_RESPONSE, 0, TN3270E_RSF_POSITIVE, 0, 4, 0x00]);

    terminal.wait_for_keyboard(WAIT).unwrap();
    assert!(terminal.is_text_in_field("ID:"));
    terminal.disconnect();
}

#[test]
fn test_host_rejecting_device_type() {
    init_logging();
    let (port, _records) = spawn_host(|mut host, _tx| {
        host.send(&build_negotiation(TelnetCommand::DO, TelnetOption::Tn3270e as u8));
        let tn3270e = TelnetOption::Tn3270e as u8;
        host.send(&build_subnegotiation(tn3270e, &[TN3270E_SEND, TN3270E_DEVICE_TYPE]));
        host.next_event(|event| matches!(event, TelnetEvent::Subnegotiation { .. }));
        // Reason 4 is INV-DEVICE-TYPE
        host.send(&build_subnegotiation(tn3270e, &[TN3270E_DEVICE_TYPE, TN3270E_REJECT, TN3270E_REASON, 4]));
        host.wait_for_close();
    });

    let terminal = Terminal::new(TerminalConfig { tn3270e: true, ..small_config() }).unwrap();
    let result = terminal.connect(&HostConfig::new("127.0.0.1", port));
    match result {
        Err(Tn3270Error::Network(NetworkError::NegotiationFailed { reason })) => {
            assert!(reason.contains("reason code 4"), "{reason}");
        }
        other => panic!("expected negotiation failure, got {other:?}"),
    }
    assert!(!terminal.is_connected());
}

#[test]
fn test_waiter_released_when_host_hangs_up() {
    init_logging();
    let (port, _records) = spawn_host(|mut host, _tx| {
        host.negotiate_3270();
        // W without restore leaves the keyboard locked
        host.send_record(&[0xF1, 0x40]);
        thread::sleep(Duration::from_millis(100));
    });

    let terminal = Terminal::new(small_config()).unwrap();
    terminal.connect(&HostConfig::new("127.0.0.1", port)).unwrap();
    let result = terminal.wait_for_keyboard(WAIT);
    assert!(matches!(result, Err(TerminalError::ConnectionClosed { .. })), "{result:?}");
}
