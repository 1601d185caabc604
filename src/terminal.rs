//! Synchronous terminal for test automation
//!
//! A [`Terminal`] owns one [`Screen`], one transport and the images captured
//! from both. Host records arrive on the transport's reader thread and are
//! applied under the terminal's mutex; callers block on a condition variable
//! until the keyboard unlocks, text appears, the deadline passes, or the
//! connection closes.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::TerminalConfig;
use crate::error::{ConfigResult, DatastreamResult, NetworkError, TerminalError, TerminalResult, Tn3270Result};
use crate::lib3270::{AidKey, Screen, ScreenField};
use crate::network::Tn3270Connection;
use crate::protocol_common::traits::{ArchiveSink, DatastreamTransport, InboundSink, TerminalHost};
use crate::terminal_image::{CapturedTerminal, TerminalImage};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connected,
    Closed(String),
}

struct TerminalState {
    screen: Screen,
    images: CapturedTerminal,
    connection: ConnectionState,
    /// Bumped on every applied inbound record
    updates: u64,
}

/// Everything the reader thread and the callers share
struct TerminalShared {
    state: Mutex<TerminalState>,
    changed: Condvar,
    capture_images: bool,
}

impl TerminalShared {
    fn lock(&self) -> MutexGuard<'_, TerminalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InboundSink for TerminalShared {
    fn on_record(&self, record: &[u8]) -> DatastreamResult<Option<Vec<u8>>> {
        let mut state = self.lock();
        let reply = state.screen.process_datastream(record).map_err(|e| {
            warn!("dropping host record of {} bytes: {}", record.len(), e);
            e
        })?;
        if self.capture_images {
            let TerminalState { screen, images, .. } = &mut *state;
            images.record(screen, true, None);
        }
        state.updates += 1;
        drop(state);
        self.changed.notify_all();
        Ok(reply)
    }

    fn on_closed(&self, reason: &str) {
        let mut state = self.lock();
        if !matches!(state.connection, ConnectionState::Closed(_)) {
            info!("terminal {} closed: {}", state.images.id, reason);
            state.connection = ConnectionState::Closed(reason.to_string());
        }
        drop(state);
        self.changed.notify_all();
    }
}

enum WaitFailure {
    TimedOut,
    Closed(String),
    NotConnected,
}

/// A 3270 terminal driven by a test
pub struct Terminal {
    id: String,
    config: TerminalConfig,
    shared: Arc<TerminalShared>,
    transport: Mutex<Option<Arc<dyn DatastreamTransport>>>,
}

macro_rules! aid_keys {
    ($($name:ident => $aid:expr),* $(,)?) => {
        $(
            #[doc = concat!("Press `", stringify!($name), "`")]
            pub fn $name(&self) -> Tn3270Result<()> {
                self.aid($aid)
            }
        )*
    };
}

impl Terminal {
    /// A disconnected terminal with a random id
    pub fn new(config: TerminalConfig) -> ConfigResult<Self> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), config)
    }

    /// A disconnected terminal; fails if `config` does not validate
    pub fn with_id(id: impl Into<String>, config: TerminalConfig) -> ConfigResult<Self> {
        config.validate()?;
        let id = id.into();
        let screen = Screen::new(config.primary_size(), config.alternate_size());
        let images = CapturedTerminal::new(id.clone(), config.primary_size(), config.max_images);
        Ok(Self {
            shared: Arc::new(TerminalShared {
                state: Mutex::new(TerminalState {
                    screen,
                    images,
                    connection: ConnectionState::Disconnected,
                    updates: 0,
                }),
                changed: Condvar::new(),
                capture_images: config.capture_images,
            }),
            id,
            config,
            transport: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Connect to `host` and start receiving screens
    pub fn connect(&self, host: &dyn TerminalHost) -> Tn3270Result<()> {
        info!("terminal {} connecting to {}:{}", self.id, host.hostname(), host.telnet_port());
        let connection = Arc::new(Tn3270Connection::connect(host, &self.config)?);
        let sink = self.attach_transport(connection.clone());
        connection.start_reader(sink)?;
        Ok(())
    }

    /// Use `transport` for outbound messages.
    ///
    /// Returns the sink the transport must feed host records and the close
    /// notification into.
    pub fn attach_transport(&self, transport: Arc<dyn DatastreamTransport>) -> Arc<dyn InboundSink> {
        let previous = self
            .transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(transport);
        if let Some(previous) = previous {
            previous.close();
        }
        self.shared.lock().connection = ConnectionState::Connected;
        self.shared.clone()
    }

    /// Close the transport and release every waiter
    pub fn disconnect(&self) {
        let transport = self.transport.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(transport) = transport {
            debug!("terminal {} disconnecting", self.id);
            transport.close();
        }
        self.shared.on_closed("disconnected by client");
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.shared.lock().connection, ConnectionState::Connected)
    }

    fn current_transport(&self) -> TerminalResult<Arc<dyn DatastreamTransport>> {
        if let ConnectionState::Closed(reason) = &self.shared.lock().connection {
            return Err(TerminalError::ConnectionClosed { reason: reason.clone() });
        }
        self.transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TerminalError::NotConnected)
    }

    /// Block until `check` yields a value, the deadline passes, or the
    /// connection ends
    fn wait_for<T>(
        &self,
        timeout: Duration,
        mut check: impl FnMut(&TerminalState) -> Option<T>,
    ) -> Result<T, WaitFailure> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(value) = check(&*state) {
                return Ok(value);
            }
            match &state.connection {
                ConnectionState::Closed(reason) => return Err(WaitFailure::Closed(reason.clone())),
                ConnectionState::Disconnected => return Err(WaitFailure::NotConnected),
                ConnectionState::Connected => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitFailure::TimedOut);
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn wait_error(failure: WaitFailure, on_timeout: TerminalError) -> TerminalError {
        match failure {
            WaitFailure::TimedOut => on_timeout,
            WaitFailure::Closed(reason) => TerminalError::ConnectionClosed { reason },
            WaitFailure::NotConnected => TerminalError::NotConnected,
        }
    }

    /// Block until the host unlocks the keyboard
    pub fn wait_for_keyboard(&self, timeout: Duration) -> TerminalResult<()> {
        self.wait_for(timeout, |state| (!state.screen.is_keyboard_locked()).then_some(()))
            .map_err(|failure| {
                Self::wait_error(
                    failure,
                    TerminalError::Timeout {
                        operation: "wait for keyboard".to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    },
                )
            })
    }

    /// [`Terminal::wait_for_keyboard`] with the configured default timeout
    pub fn wait_for_keyboard_default(&self) -> TerminalResult<()> {
        self.wait_for_keyboard(self.config.default_wait_timeout())
    }

    /// Block until some field contains `text`
    pub fn wait_for_text_in_field(&self, text: &str, timeout: Duration) -> TerminalResult<()> {
        self.wait_for(timeout, |state| {
            state
                .screen
                .logical_fields()
                .iter()
                .any(|field| field.text().contains(text))
                .then_some(())
        })
        .map_err(|failure| Self::wait_error(failure, Self::text_not_found(text, timeout)))
    }

    /// Block until `text` appears anywhere on the screen
    pub fn wait_for_text(&self, text: &str, timeout: Duration) -> TerminalResult<()> {
        self.wait_for(timeout, |state| state.screen.text().contains(text).then_some(()))
            .map_err(|failure| Self::wait_error(failure, Self::text_not_found(text, timeout)))
    }

    /// Block until the screen changes after `since`, as returned by
    /// [`Terminal::update_count`]
    pub fn wait_for_update(&self, since: u64, timeout: Duration) -> TerminalResult<u64> {
        self.wait_for(timeout, |state| (state.updates > since).then_some(state.updates))
            .map_err(|failure| {
                Self::wait_error(
                    failure,
                    TerminalError::Timeout {
                        operation: "wait for screen update".to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    },
                )
            })
    }

    fn text_not_found(text: &str, timeout: Duration) -> TerminalError {
        TerminalError::TextNotFound {
            text: text.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Host records applied so far
    pub fn update_count(&self) -> u64 {
        self.shared.lock().updates
    }

    fn with_screen<T>(&self, action: impl FnOnce(&mut Screen) -> Tn3270Result<T>) -> Tn3270Result<T> {
        action(&mut self.shared.lock().screen)
    }

    /// Type into the field under the cursor
    pub fn type_text(&self, text: &str) -> Tn3270Result<()> {
        self.with_screen(|screen| screen.type_text(text))
    }

    pub fn tab(&self) -> Tn3270Result<()> {
        self.with_screen(Screen::tab)
    }

    pub fn back_tab(&self) -> Tn3270Result<()> {
        self.with_screen(Screen::back_tab)
    }

    pub fn home(&self) -> Tn3270Result<()> {
        self.with_screen(Screen::home)
    }

    pub fn new_line(&self) -> Tn3270Result<()> {
        self.with_screen(Screen::new_line)
    }

    pub fn erase_eof(&self) -> Tn3270Result<()> {
        self.with_screen(Screen::erase_eof)
    }

    pub fn erase_input(&self) -> Tn3270Result<()> {
        self.with_screen(Screen::erase_input)
    }

    pub fn set_cursor_position(&self, row: usize, col: usize) -> Tn3270Result<()> {
        self.with_screen(|screen| Ok(screen.set_cursor_position(row, col)?))
    }

    /// Move the cursor to the start of the first field containing `text`
    pub fn position_cursor_to_field_containing(&self, text: &str) -> Tn3270Result<()> {
        self.with_screen(|screen| {
            let field = screen
                .logical_fields()
                .into_iter()
                .find(|field| field.text().contains(text))
                .ok_or_else(|| TerminalError::FieldNotFound {
                    detail: format!("no field contains '{text}'"),
                })?;
            screen.set_cursor(field.start);
            Ok(())
        })
    }

    /// Press an AID key and send the screen to the host
    pub fn aid(&self, aid: AidKey) -> Tn3270Result<()> {
        let transport = self.current_transport()?;
        let message = {
            let mut state = self.shared.lock();
            state.screen.check_aid(aid)?;
            // The image shows what the operator sent, before Clear erases it
            if self.shared.capture_images {
                let TerminalState { screen, images, .. } = &mut *state;
                images.record(screen, false, Some(aid));
            }
            state.screen.press_aid(aid)?
        };
        debug!("terminal {} sending {} ({} bytes)", self.id, aid.name(), message.len());
        transport.send_datastream(&message).map_err(|e| match e {
            NetworkError::NotConnected => TerminalError::NotConnected.into(),
            other => other.into(),
        })
    }

    aid_keys! {
        enter => AidKey::Enter,
        clear => AidKey::Clear,
        pa1 => AidKey::PA1,
        pa2 => AidKey::PA2,
        pa3 => AidKey::PA3,
        pf1 => AidKey::PF(1),
        pf2 => AidKey::PF(2),
        pf3 => AidKey::PF(3),
        pf4 => AidKey::PF(4),
        pf5 => AidKey::PF(5),
        pf6 => AidKey::PF(6),
        pf7 => AidKey::PF(7),
        pf8 => AidKey::PF(8),
        pf9 => AidKey::PF(9),
        pf10 => AidKey::PF(10),
        pf11 => AidKey::PF(11),
        pf12 => AidKey::PF(12),
        pf13 => AidKey::PF(13),
        pf14 => AidKey::PF(14),
        pf15 => AidKey::PF(15),
        pf16 => AidKey::PF(16),
        pf17 => AidKey::PF(17),
        pf18 => AidKey::PF(18),
        pf19 => AidKey::PF(19),
        pf20 => AidKey::PF(20),
        pf21 => AidKey::PF(21),
        pf22 => AidKey::PF(22),
        pf23 => AidKey::PF(23),
        pf24 => AidKey::PF(24),
    }

    /// Screen text, one line per row
    pub fn retrieve_screen(&self) -> String {
        self.shared.lock().screen.text()
    }

    /// Text of the field under the cursor
    pub fn retrieve_field_at_cursor(&self) -> TerminalResult<String> {
        let state = self.shared.lock();
        let cursor = state.screen.cursor();
        state
            .screen
            .field_at(cursor)
            .map(|field| field.text())
            .ok_or_else(|| TerminalError::FieldNotFound {
                detail: format!("cursor at {cursor} is on an attribute"),
            })
    }

    /// Trimmed text of the field following the first field containing `label`
    pub fn retrieve_field_text_after_field_with_string(&self, label: &str) -> TerminalResult<String> {
        let fields = self.shared.lock().screen.logical_fields();
        let index = fields
            .iter()
            .position(|field| field.text().contains(label))
            .ok_or_else(|| TerminalError::FieldNotFound {
                detail: format!("no field contains '{label}'"),
            })?;
        fields
            .get(index + 1)
            .map(|field| field.text().trim().to_string())
            .ok_or_else(|| TerminalError::FieldNotFound {
                detail: format!("no field after the one containing '{label}'"),
            })
    }

    pub fn search_field_containing(&self, text: &str) -> Option<ScreenField> {
        self.shared
            .lock()
            .screen
            .logical_fields()
            .into_iter()
            .find(|field| field.text().contains(text))
    }

    pub fn is_text_in_field(&self, text: &str) -> bool {
        self.search_field_containing(text).is_some()
    }

    /// Cursor as (row, column)
    pub fn cursor(&self) -> (usize, usize) {
        self.shared.lock().screen.cursor_position()
    }

    pub fn is_keyboard_locked(&self) -> bool {
        self.shared.lock().screen.is_keyboard_locked()
    }

    /// Copy of the current screen
    pub fn screen(&self) -> Screen {
        self.shared.lock().screen.clone()
    }

    /// Images captured and not yet flushed
    pub fn images(&self) -> Vec<TerminalImage> {
        self.shared.lock().images.images.iter().cloned().collect()
    }

    /// Hand captured images to `sink`; see [`CapturedTerminal::flush_images`]
    pub fn flush_images(&self, sink: &mut dyn ArchiveSink) -> usize {
        self.shared.lock().images.flush_images(sink)
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let transport = self.transport.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(transport) = transport {
            transport.close();
        }
    }
}
