//! TN3270 transport
//!
//! [`Tn3270Connection`] opens the TCP (optionally TLS) socket, runs telnet
//! negotiation to completion, and then hands inbound records to an
//! [`InboundSink`] from a single background reader thread.

use std::fs;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use base64::Engine;
use log::{debug, info, trace, warn};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::config::{TerminalConfig, TlsConfig};
use crate::error::{DatastreamError, DatastreamResult, NetworkError, NetworkResult};
use crate::protocol_common::telnet_base::{frame_record, TelnetEvent, TelnetFramer};
use crate::protocol_common::traits::{DatastreamTransport, InboundSink, TerminalHost};
use crate::telnet_negotiation::{
    TelnetNegotiator, Tn3270eHeader, TN3270E_DT_3270_DATA, TN3270E_FUNC_RESPONSES, TN3270E_NEG_COMMAND_REJECT,
    TN3270E_NEG_OPERATION_CHECK, TN3270E_POS_DEVICE_END,
};

// A helper trait alias for objects that implement both Read and Write
trait ReadWrite: Read + Write {}
impl<T: Read + Write> ReadWrite for T {}

type DynStream = Box<dyn ReadWrite + Send>;

const MAX_READ_SIZE: usize = 8192;
const MAX_CA_BUNDLE_SIZE: usize = 10_000_000;
const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// State the reader thread takes over from negotiation
struct ReaderState {
    framer: TelnetFramer,
    negotiator: TelnetNegotiator,
    /// Records that arrived together with the last negotiation bytes
    pending: Vec<Vec<u8>>,
}

struct ConnectionInner {
    host: String,
    port: u16,
    stream: Mutex<DynStream>,
    /// Second handle on the socket, used for timeouts and shutdown
    socket: TcpStream,
    closed: AtomicBool,
    tn3270e: AtomicBool,
    /// TN3270E RESPONSES function agreed
    responses: AtomicBool,
    sequence: AtomicU16,
    bound_lu: Option<String>,
    reader_state: Mutex<Option<ReaderState>>,
}

/// A negotiated TN3270 session
pub struct Tn3270Connection {
    inner: Arc<ConnectionInner>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Tn3270Connection {
    /// Connect, run TLS if the host asks for it, and negotiate.
    ///
    /// Returns once the session can carry 3270 records. Call
    /// [`Tn3270Connection::start_reader`] to begin receiving them.
    pub fn connect(host: &dyn TerminalHost, config: &TerminalConfig) -> NetworkResult<Self> {
        let hostname = host.hostname().to_string();
        let port = host.telnet_port();

        let tcp = open_socket(&hostname, port, config.connect_timeout())?;
        tcp.set_nodelay(true)?;
        let socket = tcp.try_clone()?;

        let mut stream: DynStream = if host.is_telnet_port_tls() {
            Box::new(start_tls(&hostname, tcp, &config.tls, config.negotiation_timeout())?)
        } else {
            Box::new(tcp)
        };

        let negotiator = TelnetNegotiator::new(config.model)
            .with_terminal_type(config.terminal_type())
            .with_tn3270e(config.tn3270e, config.device_name.clone());
        let mut state = ReaderState { framer: TelnetFramer::new(), negotiator, pending: Vec::new() };

        negotiate(&mut stream, &socket, &mut state, config.negotiation_timeout()).map_err(|e| {
            let _ = socket.shutdown(Shutdown::Both);
            match e {
                NetworkError::Timeout { timeout_ms, .. } => NetworkError::Timeout {
                    host: hostname.clone(),
                    port,
                    timeout_ms,
                },
                other => other,
            }
        })?;
        socket.set_read_timeout(Some(config.reader_poll_interval()))?;
        socket.set_write_timeout(Some(config.negotiation_timeout()))?;

        let tn3270e = state.negotiator.is_tn3270e_active();
        let responses = state.negotiator.has_function(TN3270E_FUNC_RESPONSES);
        info!(
            "connected to {}:{} as {}{}",
            hostname,
            port,
            state.negotiator.terminal_type(),
            if tn3270e { " (TN3270E)" } else { "" }
        );

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                host: hostname,
                port,
                stream: Mutex::new(stream),
                socket,
                closed: AtomicBool::new(false),
                tn3270e: AtomicBool::new(tn3270e),
                responses: AtomicBool::new(responses),
                sequence: AtomicU16::new(0),
                bound_lu: state.negotiator.bound_lu().map(str::to_string),
                reader_state: Mutex::new(Some(state)),
            }),
            reader: Mutex::new(None),
        })
    }

    /// Spawn the reader thread feeding `sink`. Only the first call starts one.
    pub fn start_reader(&self, sink: Arc<dyn InboundSink>) -> NetworkResult<()> {
        let state = self
            .inner
            .reader_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(NetworkError::NotConnected)?;
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("tn3270-reader-{}:{}", self.inner.host, self.inner.port))
            .spawn(move || inner.run_reader(state, sink))?;
        *self.reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn is_tn3270e(&self) -> bool {
        self.inner.tn3270e.load(Ordering::SeqCst)
    }

    /// LU the host bound under TN3270E
    pub fn bound_lu(&self) -> Option<&str> {
        self.inner.bound_lu.as_deref()
    }
}

impl DatastreamTransport for Tn3270Connection {
    fn send_datastream(&self, data: &[u8]) -> NetworkResult<()> {
        self.inner.send_datastream(data)
    }

    fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("closing connection to {}:{}", self.inner.host, self.inner.port);
            let _ = self.inner.socket.shutdown(Shutdown::Both);
        }
        let handle = self.reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("reader thread for {}:{} panicked", self.inner.host, self.inner.port);
            }
        }
    }

    fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Tn3270Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl ConnectionInner {
    fn lock_stream(&self) -> MutexGuard<'_, DynStream> {
        self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send_datastream(&self, data: &[u8]) -> NetworkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }
        let record = if self.tn3270e.load(Ordering::SeqCst) {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            let mut with_header = Tn3270eHeader::data(sequence).to_bytes().to_vec();
            with_header.extend_from_slice(data);
            frame_record(&with_header)
        } else {
            frame_record(data)
        };
        trace!("sending record, {} bytes", data.len());
        self.write_raw(&record)
    }

    fn write_raw(&self, bytes: &[u8]) -> NetworkResult<()> {
        let mut stream = self.lock_stream();
        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(|e| NetworkError::ConnectionLost { reason: format!("write failed: {e}") })
    }

    fn run_reader(&self, mut state: ReaderState, sink: Arc<dyn InboundSink>) {
        for record in std::mem::take(&mut state.pending) {
            self.deliver(&record, sink.as_ref());
        }

        let mut buffer = [0u8; MAX_READ_SIZE];
        let reason = loop {
            if self.closed.load(Ordering::SeqCst) {
                break "connection closed".to_string();
            }
            // Lock the stream only for the duration of the read
            let read = self.lock_stream().read(&mut buffer);
            match read {
                Ok(0) if self.closed.load(Ordering::SeqCst) => break "connection closed".to_string(),
                Ok(0) => break "connection closed by host".to_string(),
                Ok(n) => {
                    trace!("read {n} bytes");
                    for event in state.framer.feed(&buffer[..n]) {
                        match event {
                            TelnetEvent::Record(record) => self.deliver(&record, sink.as_ref()),
                            other => {
                                let response = state.negotiator.handle_event(&other);
                                self.tn3270e
                                    .store(state.negotiator.is_tn3270e_active(), Ordering::SeqCst);
                                self.responses.store(
                                    state.negotiator.has_function(TN3270E_FUNC_RESPONSES),
                                    Ordering::SeqCst,
                                );
                                if !response.is_empty() {
                                    if let Err(e) = self.write_raw(&response) {
                                        warn!("could not answer negotiation: {e}");
                                    }
                                }
                            }
                        }
                    }
                }
                Err(ref e) if is_timeout(e) => {
                    // Give writers a chance at the stream
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    if self.closed.load(Ordering::SeqCst) {
                        break "connection closed".to_string();
                    }
                    break format!("read failed: {e}");
                }
            }
        };

        self.closed.store(true, Ordering::SeqCst);
        let _ = self.socket.shutdown(Shutdown::Both);
        info!("reader for {}:{} stopped: {}", self.host, self.port, reason);
        sink.on_closed(&reason);
    }

    fn deliver(&self, record: &[u8], sink: &dyn InboundSink) {
        if !self.tn3270e.load(Ordering::SeqCst) {
            let _ = self.apply(record, sink);
            return;
        }
        let (header, payload) = match Tn3270eHeader::parse(record) {
            Some((header, payload)) if header.data_type == TN3270E_DT_3270_DATA => (header, payload),
            Some((header, _)) => {
                debug!("ignoring TN3270E record of data type {:#04x}", header.data_type);
                return;
            }
            None => {
                warn!("TN3270E record shorter than its header ({} bytes)", record.len());
                return;
            }
        };

        let outcome = self.apply(payload, sink);
        if self.responses.load(Ordering::SeqCst) && header.wants_response(outcome.is_err()) {
            self.send_response(header.sequence, &outcome);
        }
    }

    /// Hand one 3270 record to the sink and send its read reply, if any
    fn apply(&self, payload: &[u8], sink: &dyn InboundSink) -> DatastreamResult<()> {
        if let Some(reply) = sink.on_record(payload)? {
            if let Err(e) = self.send_datastream(&reply) {
                warn!("could not send reply to host: {e}");
            }
        }
        Ok(())
    }

    /// Answer a host record that asked for a TN3270E response
    fn send_response(&self, sequence: u16, outcome: &DatastreamResult<()>) {
        let (positive, reason) = match outcome {
            Ok(()) => (true, TN3270E_POS_DEVICE_END),
            Err(DatastreamError::Empty | DatastreamError::UnknownCommand { .. }) => {
                (false, TN3270E_NEG_COMMAND_REJECT)
            }
            Err(_) => (false, TN3270E_NEG_OPERATION_CHECK),
        };
        let mut response = Tn3270eHeader::response(sequence, positive).to_bytes().to_vec();
        response.push(reason);
        debug!("{} response for record {sequence}", if positive { "positive" } else { "negative" });
        if let Err(e) = self.write_raw(&frame_record(&response)) {
            warn!("could not send TN3270E response: {e}");
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Resolve and connect, trying each address in turn
fn open_socket(host: &str, port: u16, timeout: Duration) -> NetworkResult<TcpStream> {
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| NetworkError::DnsResolution { host: host.to_string() })?
        .collect();
    if addresses.is_empty() {
        return Err(NetworkError::DnsResolution { host: host.to_string() });
    }

    let mut last_error = None;
    for address in &addresses {
        debug!("connecting to {address}");
        match TcpStream::connect_timeout(address, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            NetworkError::ConnectionRefused { host: host.to_string(), port }
        }
        Some(e) if is_timeout(&e) => NetworkError::Timeout {
            host: host.to_string(),
            port,
            timeout_ms: timeout.as_millis() as u64,
        },
        Some(e) => NetworkError::ConnectionLost { reason: e.to_string() },
        None => NetworkError::DnsResolution { host: host.to_string() },
    })
}

/// Read and answer telnet events until the negotiator is satisfied
fn negotiate(
    stream: &mut DynStream,
    socket: &TcpStream,
    state: &mut ReaderState,
    timeout: Duration,
) -> NetworkResult<()> {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut buffer = [0u8; MAX_READ_SIZE];

    while !state.negotiator.is_negotiation_complete() {
        if let Some(reason) = state.negotiator.failure() {
            return Err(NetworkError::NegotiationFailed { reason: reason.to_string() });
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(NetworkError::Timeout {
                host: String::new(),
                port: 0,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        socket.set_read_timeout(Some(remaining))?;

        match stream.read(&mut buffer) {
            Ok(0) => {
                return Err(NetworkError::NegotiationFailed {
                    reason: "connection closed during negotiation".to_string(),
                })
            }
            Ok(n) => {
                for event in state.framer.feed(&buffer[..n]) {
                    match event {
                        TelnetEvent::Record(record) => state.pending.push(record),
                        other => {
                            let response = state.negotiator.handle_event(&other);
                            if !response.is_empty() {
                                stream.write_all(&response)?;
                                stream.flush()?;
                            }
                        }
                    }
                }
            }
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => return Err(NetworkError::ConnectionLost { reason: e.to_string() }),
        }
    }

    debug!("telnet negotiation finished in {:.2}s", started.elapsed().as_secs_f64());
    Ok(())
}

fn tls_error(message: impl ToString) -> NetworkError {
    NetworkError::TlsError { message: message.to_string() }
}

/// Wrap `tcp` in a verified TLS session and finish the handshake
fn start_tls(
    host: &str,
    mut tcp: TcpStream,
    tls: &TlsConfig,
    timeout: Duration,
) -> NetworkResult<StreamOwned<ClientConnection, TcpStream>> {
    let config = build_tls_config(tls)?;
    let server_name = ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|e| tls_error(format!("invalid server name {host}: {e}")))?;
    let mut connection = ClientConnection::new(Arc::new(config), server_name).map_err(tls_error)?;

    tcp.set_read_timeout(Some(timeout))?;
    tcp.set_write_timeout(Some(timeout))?;
    while connection.is_handshaking() {
        connection
            .complete_io(&mut tcp)
            .map_err(|e| tls_error(format!("handshake with {host} failed: {e}")))?;
    }
    debug!("TLS established with {host}");
    Ok(StreamOwned::new(connection, tcp))
}

/// Trust store: bundled web roots, optionally the platform store and a CA bundle.
/// Certificate validation is always enforced.
fn build_tls_config(tls: &TlsConfig) -> NetworkResult<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if tls.use_native_roots {
        match rustls_native_certs::load_native_certs() {
            Ok(certs) => {
                let (added, ignored) = roots.add_parsable_certificates(certs);
                debug!("added {added} platform certificates, ignored {ignored}");
            }
            Err(e) => warn!("could not load platform certificates: {e}"),
        }
    }

    if let Some(path) = &tls.ca_bundle_path {
        let certs = load_ca_bundle(Path::new(path))?;
        let (added, _) = roots.add_parsable_certificates(certs);
        if added == 0 {
            return Err(tls_error(format!("no usable certificates in CA bundle {path}")));
        }
        debug!("added {added} trusted CA certificates from {path}");
    }

    Ok(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

fn load_ca_bundle(path: &Path) -> NetworkResult<Vec<CertificateDer<'static>>> {
    let bytes = fs::read(path)
        .map_err(|e| tls_error(format!("failed to read CA bundle {}: {e}", path.display())))?;
    parse_ca_bundle(&bytes)
}

/// Certificates from a PEM bundle, or a single DER certificate
fn parse_ca_bundle(bytes: &[u8]) -> NetworkResult<Vec<CertificateDer<'static>>> {
    if bytes.len() > MAX_CA_BUNDLE_SIZE {
        return Err(tls_error("CA bundle too large"));
    }
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Ok(vec![CertificateDer::from(bytes.to_vec())]);
    };
    if !text.contains(PEM_BEGIN) {
        return Ok(vec![CertificateDer::from(bytes.to_vec())]);
    }

    let mut certs = Vec::new();
    let mut rest = text;
    while let Some(begin) = rest.find(PEM_BEGIN) {
        let body = &rest[begin + PEM_BEGIN.len()..];
        let Some(end) = body.find(PEM_END) else {
            return Err(tls_error("unterminated certificate in PEM bundle"));
        };
        let b64: String = body[..end].split_whitespace().collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| tls_error(format!("invalid base64 in PEM bundle: {e}")))?;
        certs.push(CertificateDer::from(der));
        rest = &body[end + PEM_END.len()..];
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    use crate::config::HostConfig;
    use crate::error::DatastreamResult;

    /// Sink that remembers why the reader stopped
    #[derive(Default)]
    struct ClosingSink {
        reasons: Mutex<Vec<String>>,
    }

    impl InboundSink for ClosingSink {
        fn on_record(&self, _record: &[u8]) -> DatastreamResult<Option<Vec<u8>>> {
            Ok(None)
        }

        fn on_closed(&self, reason: &str) {
            self.reasons.lock().unwrap().push(reason.to_string());
        }
    }

    /// Accept one connection and offer EOR and BINARY both ways
    fn plain_host(listener: TcpListener) -> thread::JoinHandle<TcpStream> {
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(&[255, 253, 25, 255, 251, 25, 255, 253, 0, 255, 251, 0]).unwrap();
            // WILL/DO for both options
            let mut answers = [0u8; 12];
            socket.read_exact(&mut answers).unwrap();
            socket
        })
    }

    fn drain(mut socket: TcpStream) {
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buffer = [0u8; 256];
        while matches!(socket.read(&mut buffer), Ok(n) if n > 0) {}
    }

    #[test]
    fn test_client_close_is_not_blamed_on_host() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let host = plain_host(listener);

        let config = TerminalConfig { reader_poll_interval_ms: 20, ..Default::default() };
        let connection = Tn3270Connection::connect(&HostConfig::new("127.0.0.1", port), &config).unwrap();
        let socket = host.join().unwrap();
        let sink = Arc::new(ClosingSink::default());
        connection.start_reader(sink.clone()).unwrap();

        connection.close();
        assert_eq!(sink.reasons.lock().unwrap().as_slice(), ["connection closed".to_string()]);
        assert!(!connection.is_connected());
        drain(socket);
    }

    #[test]
    fn test_host_hangup_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let host = plain_host(listener);

        let config = TerminalConfig { reader_poll_interval_ms: 20, ..Default::default() };
        let connection = Tn3270Connection::connect(&HostConfig::new("127.0.0.1", port), &config).unwrap();
        let sink = Arc::new(ClosingSink::default());
        connection.start_reader(sink.clone()).unwrap();
        drop(host.join().unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.reasons.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sink.reasons.lock().unwrap().as_slice(), ["connection closed by host".to_string()]);
    }

    #[test]
    fn test_pem_bundle_parsing() {
        let pem = format!(
            "junk\n{PEM_BEGIN}\nAAEC\nAwQ=\n{PEM_END}\n{PEM_BEGIN}\n/w==\n{PEM_END}\n"
        );
        let certs = parse_ca_bundle(pem.as_bytes()).unwrap();
        assert_eq!(certs.len(), 2);
        assert_eq!(&certs[0][..], &[0, 1, 2, 3, 4]);
        assert_eq!(&certs[1][..], &[0xFF]);
    }

    #[test]
    fn test_der_bundle_passthrough() {
        let certs = parse_ca_bundle(&[0x30, 0x82, 0x01]).unwrap();
        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn test_bad_pem_rejected() {
        let pem = format!("{PEM_BEGIN}\n!!!!\n{PEM_END}\n");
        assert!(matches!(parse_ca_bundle(pem.as_bytes()), Err(NetworkError::TlsError { .. })));
        let open = format!("{PEM_BEGIN}\nAAEC\n");
        assert!(parse_ca_bundle(open.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_ca_bundle_is_tls_error() {
        let tls = TlsConfig { ca_bundle_path: Some("/nonexistent/ca.pem".to_string()), use_native_roots: false };
        assert!(matches!(build_tls_config(&tls), Err(NetworkError::TlsError { .. })));
    }

    #[test]
    fn test_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let host = HostConfig::new("127.0.0.1", port);
        let result = Tn3270Connection::connect(&host, &TerminalConfig::default());
        assert!(matches!(result, Err(NetworkError::ConnectionRefused { port: p, .. }) if p == port));
    }

    #[test]
    fn test_negotiation_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept but never negotiate
        let server = thread::spawn(move || listener.accept().map(|(socket, _)| socket));

        let config = TerminalConfig { negotiation_timeout_ms: 200, ..Default::default() };
        let result = Tn3270Connection::connect(&HostConfig::new("127.0.0.1", port), &config);
        assert!(matches!(result, Err(NetworkError::Timeout { timeout_ms: 200, .. })));
        drop(server.join());
    }
}
