//! Screen image capture
//!
//! Every screen a terminal sees or sends is copied into an immutable
//! [`TerminalImage`]. The images of one terminal are kept in a
//! [`CapturedTerminal`] until they are flushed to an [`ArchiveSink`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::lib3270::{AidKey, Field, Screen, ScreenSize};
use crate::protocol_common::traits::{ArchiveSink, ConfidentialTextService};

/// One contiguous run of cells; nulls are `None`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldContents {
    pub chars: Vec<Option<char>>,
}

impl FieldContents {
    fn from_chars(chars: &[char]) -> Self {
        Self {
            chars: chars.iter().map(|&c| (c != '\0').then_some(c)).collect(),
        }
    }

    /// Contents with nulls as spaces
    pub fn text(&self) -> String {
        self.chars
            .iter()
            .map(|c| match c {
                Some(c) if !c.is_control() => *c,
                _ => ' ',
            })
            .collect()
    }
}

/// A field as captured: where its attribute sits and what follows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalField {
    /// Attribute position, or 0/0 for an unformatted screen
    pub row: usize,
    pub column: usize,
    /// No attribute cell; contents start at row/column itself
    pub unformatted: bool,
    pub protected: bool,
    pub numeric: bool,
    pub display: bool,
    pub intensified: bool,
    pub selector_pen: bool,
    pub modified: bool,
    pub contents: Vec<FieldContents>,
}

impl TerminalField {
    pub fn text(&self) -> String {
        self.contents.iter().map(FieldContents::text).collect()
    }

    pub fn len(&self) -> usize {
        self.contents.iter().map(|c| c.chars.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable snapshot of a screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalImage {
    pub sequence: u64,
    /// `<terminal id>-<sequence>`
    pub id: String,
    /// True for host writes, false for screens sent with an AID
    pub inbound: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aid: Option<String>,
    /// Only set when the screen differs from the terminal default size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<ScreenSize>,
    pub cursor_row: usize,
    pub cursor_column: usize,
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<TerminalField>,
}

impl TerminalImage {
    /// Copy `screen` into an image
    pub fn capture(
        screen: &Screen,
        terminal_id: &str,
        sequence: u64,
        inbound: bool,
        aid: Option<AidKey>,
        default_size: ScreenSize,
    ) -> Self {
        let (cursor_row, cursor_column) = screen.cursor_position();
        Self {
            sequence,
            id: format!("{terminal_id}-{sequence}"),
            inbound,
            aid: aid.map(AidKey::name),
            size: (screen.size() != default_size).then_some(screen.size()),
            cursor_row,
            cursor_column,
            timestamp: Utc::now(),
            fields: capture_fields(screen),
        }
    }

    pub fn screen_size(&self, default_size: ScreenSize) -> ScreenSize {
        self.size.unwrap_or(default_size)
    }

    /// Render as text, one line per row.
    ///
    /// Non-display fields render as spaces. `confidential` redacts the
    /// result when given.
    pub fn render_text(
        &self,
        default_size: ScreenSize,
        confidential: Option<&dyn ConfidentialTextService>,
    ) -> String {
        let size = self.screen_size(default_size);
        let cells = size.buffer_size().max(1);
        let columns = size.columns.max(1);
        let mut grid = vec![' '; cells];

        for field in self.fields.iter().filter(|f| f.display) {
            let attribute = field.row * columns + field.column;
            let first = if field.unformatted { attribute } else { attribute + 1 };
            for (i, ch) in field.text().chars().enumerate() {
                grid[(first + i) % cells] = ch;
            }
        }

        let text = grid
            .chunks(columns)
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n");
        match confidential {
            Some(service) => service.remove_confidential_text(&text),
            None => text,
        }
    }
}

fn capture_fields(screen: &Screen) -> Vec<TerminalField> {
    let columns = screen.columns().max(1);
    let pieces = screen.fields();
    let Some(first) = pieces.iter().position(Field::is_start_of_field) else {
        let contents = screen
            .logical_fields()
            .into_iter()
            .map(|f| FieldContents::from_chars(&f.contents))
            .collect();
        return vec![TerminalField {
            row: 0,
            column: 0,
            unformatted: true,
            protected: false,
            numeric: false,
            display: true,
            intensified: false,
            selector_pen: false,
            modified: false,
            contents,
        }];
    };

    let mut fields: Vec<TerminalField> = Vec::new();
    for offset in 0..pieces.len() {
        match &pieces[(first + offset) % pieces.len()] {
            Field::StartOfField { address, attributes } => fields.push(TerminalField {
                row: address.row(columns),
                column: address.column(columns),
                unformatted: false,
                protected: attributes.protected,
                numeric: attributes.numeric,
                display: attributes.display,
                intensified: attributes.intensified,
                selector_pen: attributes.selector_pen,
                modified: attributes.modified,
                contents: Vec::new(),
            }),
            textual => {
                if let Some(field) = fields.last_mut() {
                    field.contents.push(FieldContents::from_chars(&textual.contents()));
                }
            }
        }
    }
    fields
}

/// The images captured by one terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedTerminal {
    pub id: String,
    pub default_size: ScreenSize,
    pub images: VecDeque<TerminalImage>,
    /// 0 keeps every image
    #[serde(skip)]
    max_images: usize,
    #[serde(skip)]
    next_sequence: u64,
}

impl CapturedTerminal {
    pub fn new(id: impl Into<String>, default_size: ScreenSize, max_images: usize) -> Self {
        Self {
            id: id.into(),
            default_size,
            images: VecDeque::new(),
            max_images,
            next_sequence: 1,
        }
    }

    /// Append a snapshot of `screen`; returns its sequence number
    pub fn record(&mut self, screen: &Screen, inbound: bool, aid: Option<AidKey>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let image = TerminalImage::capture(screen, &self.id, sequence, inbound, aid, self.default_size);
        self.images.push_back(image);

        if self.max_images > 0 && self.images.len() > self.max_images {
            if let Some(dropped) = self.images.pop_front() {
                warn!("terminal {} holds more than {} images, dropping {}", self.id, self.max_images, dropped.id);
            }
        }
        sequence
    }

    pub fn latest(&self) -> Option<&TerminalImage> {
        self.images.back()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Hand every held image to `sink` as JSON and forget them.
    ///
    /// Serialization and sink failures are logged; the number of images the
    /// sink accepted is returned.
    pub fn flush_images(&mut self, sink: &mut dyn ArchiveSink) -> usize {
        let mut stored = 0;
        for image in self.images.drain(..) {
            let json = match serde_json::to_string(&image) {
                Ok(json) => json,
                Err(e) => {
                    warn!("could not serialize image {}: {}", image.id, e);
                    continue;
                }
            };
            match sink.store(&self.id, image.sequence, &json) {
                Ok(()) => stored += 1,
                Err(e) => warn!("archive rejected image {}: {}", image.id, e),
            }
        }
        debug!("flushed {stored} images for terminal {}", self.id);
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib3270::{BufferAddress, CommandCode, FieldAttributes, Inbound3270Message, Order, WriteControlCharacter};

    fn screen() -> Screen {
        let size = ScreenSize::new(2, 10);
        let mut screen = Screen::with_size(size);
        let at = |v| BufferAddress::wrapping(v, 20);
        screen
            .process_message(&Inbound3270Message::new(
                CommandCode::EraseWrite,
                Some(WriteControlCharacter::restore()),
                vec![
                    Order::StartField(FieldAttributes::protected()),
                    Order::Text("PW:".chars().collect()),
                    Order::SetBufferAddress(at(4)),
                    Order::StartField(FieldAttributes { display: false, ..FieldAttributes::unprotected() }),
                    Order::Text("hunter".chars().collect()),
                    Order::SetBufferAddress(at(12)),
                    Order::StartField(FieldAttributes::protected()),
                    Order::Text("secret".chars().collect()),
                    Order::SetBufferAddress(at(5)),
                    Order::InsertCursor,
                ],
            ))
            .unwrap();
        screen
    }

    struct Redactor;

    impl ConfidentialTextService for Redactor {
        fn remove_confidential_text(&self, text: &str) -> String {
            text.replace("secret", "******")
        }
    }

    #[derive(Default)]
    struct VecSink {
        stored: Vec<(String, u64, String)>,
        reject: bool,
    }

    impl ArchiveSink for VecSink {
        fn store(&mut self, terminal_id: &str, sequence: u64, json: &str) -> Result<(), String> {
            if self.reject {
                return Err("archive offline".to_string());
            }
            self.stored.push((terminal_id.to_string(), sequence, json.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_capture_fields() {
        let screen = screen();
        let image = TerminalImage::capture(&screen, "t1", 4, true, None, ScreenSize::new(2, 10));
        assert_eq!(image.id, "t1-4");
        assert_eq!(image.size, None);
        assert_eq!((image.cursor_row, image.cursor_column), (0, 5));
        assert_eq!(image.fields.len(), 3);
        assert_eq!(image.fields[0].text(), "PW:");
        assert!(!image.fields[1].display);
        assert_eq!((image.fields[2].row, image.fields[2].column), (1, 2));
        assert_eq!(image.fields[2].text(), "secret ");
    }

    #[test]
    fn test_size_recorded_when_not_default() {
        let image = TerminalImage::capture(&screen(), "t1", 1, false, Some(AidKey::PF(3)), ScreenSize::MODEL_2);
        assert_eq!(image.size, Some(ScreenSize::new(2, 10)));
        assert_eq!(image.aid.as_deref(), Some("PF3"));
    }

    #[test]
    fn test_render_hides_and_redacts() {
        let image = TerminalImage::capture(&screen(), "t1", 1, true, None, ScreenSize::new(2, 10));
        let plain = image.render_text(ScreenSize::new(2, 10), None);
        assert_eq!(plain, " PW:      \n   secret ");

        let redacted = image.render_text(ScreenSize::new(2, 10), Some(&Redactor));
        assert_eq!(redacted, " PW:      \n   ****** ");
    }

    #[test]
    fn test_unformatted_capture() {
        let screen = Screen::with_size(ScreenSize::new(2, 10));
        let image = TerminalImage::capture(&screen, "t", 1, true, None, ScreenSize::new(2, 10));
        assert_eq!(image.fields.len(), 1);
        assert!(image.fields[0].unformatted);
        assert_eq!(image.fields[0].len(), 20);
        assert!(image.fields[0].contents[0].chars.iter().all(Option::is_none));
    }

    #[test]
    fn test_max_images_drops_oldest() {
        let screen = screen();
        let mut captured = CapturedTerminal::new("t1", ScreenSize::new(2, 10), 2);
        for _ in 0..3 {
            captured.record(&screen, true, None);
        }
        assert_eq!(captured.len(), 2);
        assert_eq!(captured.images[0].sequence, 2);
        assert_eq!(captured.latest().map(|i| i.sequence), Some(3));
    }

    #[test]
    fn test_flush_to_sink() {
        let screen = screen();
        let mut captured = CapturedTerminal::new("t1", ScreenSize::new(2, 10), 0);
        captured.record(&screen, true, None);
        captured.record(&screen, false, Some(AidKey::Enter));

        let mut sink = VecSink::default();
        assert_eq!(captured.flush_images(&mut sink), 2);
        assert!(captured.is_empty());
        assert_eq!(sink.stored[1].0, "t1");
        assert_eq!(sink.stored[1].1, 2);
        let image: TerminalImage = serde_json::from_str(&sink.stored[1].2).unwrap();
        assert_eq!(image.aid.as_deref(), Some("ENTER"));
        assert!(sink.stored[0].2.contains("\"cursorRow\""));
    }

    #[test]
    fn test_flush_failures_are_swallowed() {
        let mut captured = CapturedTerminal::new("t1", ScreenSize::new(2, 10), 0);
        captured.record(&screen(), true, None);
        let mut sink = VecSink { reject: true, ..Default::default() };
        assert_eq!(captured.flush_images(&mut sink), 0);
        assert!(captured.is_empty());
    }
}
