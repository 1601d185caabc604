//! The live 3270 screen
//!
//! A [`Screen`] owns the field list that partitions the buffer, the cursor and
//! the keyboard lock. Host messages mutate it through [`Screen::process_datastream`]
//! and [`Screen::process_message`]; the operator side mutates it through
//! typing, cursor movement and AID keys.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::address::{AddressRange, BufferAddress};
use super::codes::{AidKey, CommandCode, XA_3270};
use super::datastream::{
    self, BufferCell, Inbound3270Message, Order, StructuredField, WriteControlCharacter,
};
use super::field::{Field, FieldAttributes};
use crate::error::{DatastreamError, FieldResult, TerminalError, Tn3270Result};
use crate::protocol_common::ebcdic;

/// Rows and columns of a screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSize {
    pub rows: usize,
    pub columns: usize,
}

impl ScreenSize {
    /// Model 2: 24 x 80
    pub const MODEL_2: ScreenSize = ScreenSize { rows: 24, columns: 80 };
    /// Model 3: 32 x 80
    pub const MODEL_3: ScreenSize = ScreenSize { rows: 32, columns: 80 };
    /// Model 4: 43 x 80
    pub const MODEL_4: ScreenSize = ScreenSize { rows: 43, columns: 80 };
    /// Model 5: 27 x 132
    pub const MODEL_5: ScreenSize = ScreenSize { rows: 27, columns: 132 };

    pub fn new(rows: usize, columns: usize) -> Self {
        Self { rows, columns }
    }

    /// Size of an IBM-3278 model, 2 to 5
    pub fn model(model: u8) -> Option<Self> {
        match model {
            2 => Some(Self::MODEL_2),
            3 => Some(Self::MODEL_3),
            4 => Some(Self::MODEL_4),
            5 => Some(Self::MODEL_5),
            _ => None,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.rows * self.columns
    }
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self::MODEL_2
    }
}

/// A field as the operator sees it: an attribute and the cells up to the next one.
///
/// An unformatted screen is one unprotected field with no attribute cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenField {
    pub attribute_address: Option<BufferAddress>,
    pub attributes: FieldAttributes,
    /// First content cell
    pub start: BufferAddress,
    pub contents: Vec<char>,
}

impl ScreenField {
    /// Content cells; `None` when the next attribute follows immediately
    pub fn content_range(&self) -> Option<AddressRange> {
        (!self.contents.is_empty()).then(|| AddressRange::starting_at(self.start, self.contents.len()))
    }

    pub fn contains(&self, address: BufferAddress) -> bool {
        self.content_range().is_some_and(|range| range.contains(address))
    }

    pub fn is_modifiable(&self) -> bool {
        !self.attributes.protected
    }

    /// Contents with nulls and control characters shown as spaces
    pub fn text(&self) -> String {
        self.contents.iter().map(|&c| printable(c)).collect()
    }
}

fn printable(ch: char) -> char {
    if ch.is_control() {
        ' '
    } else {
        ch
    }
}

/// One 3270 screen
#[derive(Debug, Clone)]
pub struct Screen {
    primary: ScreenSize,
    alternate: ScreenSize,
    size: ScreenSize,
    /// Sorted by start address; only the last entry may wrap
    fields: Vec<Field>,
    cursor: BufferAddress,
    keyboard_locked: bool,
    alarm: bool,
    last_aid: AidKey,
}

impl Screen {
    /// A cleared screen at the primary size with the keyboard locked
    pub fn new(primary: ScreenSize, alternate: ScreenSize) -> Self {
        let mut screen = Self {
            primary,
            alternate,
            size: primary,
            fields: Vec::new(),
            cursor: BufferAddress::wrapping(0, primary.buffer_size()),
            keyboard_locked: true,
            alarm: false,
            last_aid: AidKey::NoAid,
        };
        screen.erase(primary);
        screen
    }

    pub fn with_size(size: ScreenSize) -> Self {
        Self::new(size, size)
    }

    pub fn rows(&self) -> usize {
        self.size.rows
    }

    pub fn columns(&self) -> usize {
        self.size.columns
    }

    pub fn size(&self) -> ScreenSize {
        self.size
    }

    pub fn primary_size(&self) -> ScreenSize {
        self.primary
    }

    pub fn buffer_size(&self) -> usize {
        self.size.buffer_size()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn cursor(&self) -> BufferAddress {
        self.cursor
    }

    /// Cursor as (row, column)
    pub fn cursor_position(&self) -> (usize, usize) {
        (self.cursor.row(self.columns()), self.cursor.column(self.columns()))
    }

    pub fn is_keyboard_locked(&self) -> bool {
        self.keyboard_locked
    }

    /// True once a WCC with the alarm bit has been applied
    pub fn alarm(&self) -> bool {
        self.alarm
    }

    pub fn last_aid(&self) -> AidKey {
        self.last_aid
    }

    pub fn is_formatted(&self) -> bool {
        self.fields.iter().any(Field::is_start_of_field)
    }

    /// Buffer size a host record will be decoded against
    pub fn buffer_size_for(&self, bytes: &[u8]) -> usize {
        match bytes.first().copied().and_then(CommandCode::from_u8) {
            Some(CommandCode::EraseWrite) => self.primary.buffer_size(),
            Some(CommandCode::EraseWriteAlternate) => self.alternate.buffer_size(),
            _ => self.buffer_size(),
        }
    }

    /// Decode and apply one host record.
    ///
    /// Returns the reply for read commands and Read Partition Query. A failed
    /// record leaves the screen untouched.
    pub fn process_datastream(&mut self, bytes: &[u8]) -> Tn3270Result<Option<Vec<u8>>> {
        let message = datastream::decode(bytes, self.buffer_size_for(bytes))?;
        self.process_message(&message)
    }

    /// Apply a decoded message atomically
    pub fn process_message(&mut self, message: &Inbound3270Message) -> Tn3270Result<Option<Vec<u8>>> {
        let mut working = self.clone();
        let reply = working.apply(message)?;
        debug_assert!(working.is_partitioned());
        *self = working;
        Ok(reply)
    }

    fn apply(&mut self, message: &Inbound3270Message) -> Tn3270Result<Option<Vec<u8>>> {
        match message.command {
            CommandCode::EraseWrite => {
                self.erase(self.primary);
                self.apply_write(message)?;
                Ok(None)
            }
            CommandCode::EraseWriteAlternate => {
                self.erase(self.alternate);
                self.apply_write(message)?;
                Ok(None)
            }
            CommandCode::Write => {
                self.apply_write(message)?;
                Ok(None)
            }
            CommandCode::EraseAllUnprotected => {
                self.erase_all_unprotected()?;
                Ok(None)
            }
            CommandCode::ReadBuffer => Ok(Some(self.read_buffer())),
            CommandCode::ReadModified => Ok(Some(self.read_modified(false))),
            CommandCode::ReadModifiedAll => Ok(Some(self.read_modified(true))),
            CommandCode::WriteStructuredField => self.apply_structured_fields(&message.structured_fields),
        }
    }

    /// Reset to one unformatted null field at `size`, cursor home
    fn erase(&mut self, size: ScreenSize) {
        let buffer_size = size.buffer_size().max(1);
        self.size = size;
        self.fields = vec![Field::chars(AddressRange::whole(buffer_size), '\0')];
        self.cursor = BufferAddress::wrapping(0, buffer_size);
    }

    /// Re-home an order address onto the current buffer
    fn locate(&self, address: BufferAddress) -> Result<BufferAddress, DatastreamError> {
        BufferAddress::new(address.value(), self.buffer_size()).ok_or(DatastreamError::InvalidAddress {
            address: address.value(),
            buffer_size: self.buffer_size(),
            offset: 0,
        })
    }

    /// `[from, to-1]`, the whole buffer when `from == to`
    fn span(from: BufferAddress, to: BufferAddress) -> AddressRange {
        let len = from.distance_to(to);
        AddressRange::starting_at(from, if len == 0 { from.size() } else { len })
    }

    fn apply_write(&mut self, message: &Inbound3270Message) -> Tn3270Result<()> {
        let wcc = message.write_control_character.unwrap_or_default();
        if wcc.reset_mdt {
            self.reset_modified(|_| true);
        }

        let mut current = self.cursor;
        for order in &message.orders {
            trace!("order {:?} at {}", order, current);
            match order {
                Order::SetBufferAddress(address) => current = self.locate(*address)?,
                Order::StartField(attributes) | Order::StartFieldExtended(attributes) => {
                    self.write_field(Field::start_of_field(current, attributes.clone()))?;
                    current = current.next();
                }
                Order::SetAttribute { .. } => {}
                Order::ModifyField(pairs) => {
                    if let Some(attributes) = self.attributes_at_mut(current) {
                        for &(attr_type, value) in pairs {
                            if attr_type == XA_3270 {
                                let extended = std::mem::take(&mut attributes.extended);
                                *attributes = FieldAttributes::from_byte(value);
                                attributes.extended = extended;
                            } else {
                                attributes.extended.apply(attr_type, value);
                            }
                        }
                        current = current.next();
                    }
                }
                Order::InsertCursor => self.cursor = current,
                Order::ProgramTab => {
                    current = self
                        .next_unprotected_start(current, false)
                        .unwrap_or_else(|| BufferAddress::wrapping(0, self.buffer_size()));
                }
                Order::RepeatToAddress { ch, target } => {
                    let target = self.locate(*target)?;
                    self.write_field(Field::chars(Self::span(current, target), *ch))?;
                    current = target;
                }
                Order::EraseUnprotectedToAddress(target) => {
                    let target = self.locate(*target)?;
                    self.null_unprotected(&Self::span(current, target))?;
                    current = target;
                }
                Order::GraphicEscape(ch) => current = self.write_text(current, &[*ch])?,
                Order::Text(chars) => current = self.write_text(current, chars)?,
            }
        }

        if wcc.alarm {
            self.alarm = true;
        }
        if wcc.keyboard_restore {
            self.keyboard_locked = false;
            self.last_aid = AidKey::NoAid;
        }
        Ok(())
    }

    fn apply_structured_fields(&mut self, fields: &[StructuredField]) -> Tn3270Result<Option<Vec<u8>>> {
        let mut reply = None;
        for sf in fields {
            match sf {
                StructuredField::ReadPartitionQuery => {
                    debug!("Answering Read Partition Query");
                    reply = Some(datastream::encode_query_reply(
                        (self.primary.rows, self.primary.columns),
                        (self.alternate.rows, self.alternate.columns),
                    ));
                }
                StructuredField::EraseReset { alternate } => {
                    self.erase(if *alternate { self.alternate } else { self.primary });
                }
                StructuredField::Other { id, .. } => {
                    debug!("Ignoring structured field 0x{id:02X}");
                }
            }
        }
        Ok(reply)
    }

    fn erase_all_unprotected(&mut self) -> FieldResult<()> {
        let whole = AddressRange::whole(self.buffer_size());
        self.null_unprotected(&whole)?;
        self.reset_modified(|attributes| !attributes.protected);
        self.keyboard_locked = false;
        self.last_aid = AidKey::NoAid;
        self.cursor = self.home_address();
        Ok(())
    }

    /// Excise the field's range from the list, insert it and merge textual neighbours
    fn write_field(&mut self, field: Field) -> FieldResult<()> {
        let range = field.range();
        let start = field.start();
        let textual = field.is_textual();

        let mut fields = Vec::with_capacity(self.fields.len() + 2);
        for existing in self.fields.drain(..) {
            fields.extend(existing.split(&range));
        }
        fields.push(field);
        fields.sort_by_key(|f| f.start().value());
        self.fields = fields;

        if textual {
            self.coalesce(start)?;
        }
        Ok(())
    }

    /// Write `chars` from `at`, returning the address after the last one
    fn write_text(&mut self, at: BufferAddress, chars: &[char]) -> FieldResult<BufferAddress> {
        if chars.is_empty() {
            return Ok(at);
        }
        let size = self.buffer_size();
        // Only the last `size` chars survive a run longer than the buffer
        let skip = chars.len().saturating_sub(size);
        self.write_field(Field::text(at.advance(skip), chars[skip..].to_vec()))?;
        Ok(at.advance(chars.len()))
    }

    fn index_of(&self, start: BufferAddress) -> Option<usize> {
        self.fields
            .binary_search_by_key(&start.value(), |f| f.start().value())
            .ok()
    }

    /// Merge the field starting at `start` with textual fields either side
    fn coalesce(&mut self, start: BufferAddress) -> FieldResult<()> {
        let Some(mut index) = self.index_of(start) else {
            return Ok(());
        };

        if self.fields.len() > 1 {
            let next = (index + 1) % self.fields.len();
            if self.fields[next].is_textual() {
                let merged = self.fields[index].merge(&self.fields[next])?;
                index = self.replace_pair(index, next, merged);
            }
        }
        if self.fields.len() > 1 {
            let prev = (index + self.fields.len() - 1) % self.fields.len();
            if self.fields[prev].is_textual() {
                let merged = self.fields[prev].merge(&self.fields[index])?;
                self.replace_pair(prev, index, merged);
            }
        }
        Ok(())
    }

    fn replace_pair(&mut self, a: usize, b: usize, merged: Field) -> usize {
        let start = merged.start();
        self.fields.remove(a.max(b));
        self.fields.remove(a.min(b));
        self.fields.push(merged);
        self.fields.sort_by_key(|f| f.start().value());
        self.index_of(start).unwrap_or(0)
    }

    fn attributes_at_mut(&mut self, address: BufferAddress) -> Option<&mut FieldAttributes> {
        let index = self.index_of(address)?;
        match &mut self.fields[index] {
            Field::StartOfField { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    fn reset_modified(&mut self, which: impl Fn(&FieldAttributes) -> bool) {
        for field in &mut self.fields {
            if let Field::StartOfField { attributes, .. } = field {
                if which(attributes) {
                    attributes.modified = false;
                }
            }
        }
    }

    /// Null every unprotected content cell inside `span`
    fn null_unprotected(&mut self, span: &AddressRange) -> FieldResult<()> {
        let mut runs = Vec::new();
        for field in self.logical_fields().iter().filter(|f| f.is_modifiable()) {
            let Some(content) = field.content_range() else { continue };
            let mut run: Option<(BufferAddress, usize)> = None;
            for address in content.addresses() {
                if span.contains(address) {
                    run = Some(match run {
                        Some((first, len)) => (first, len + 1),
                        None => (address, 1),
                    });
                } else if let Some((first, len)) = run.take() {
                    runs.push(AddressRange::starting_at(first, len));
                }
            }
            if let Some((first, len)) = run {
                runs.push(AddressRange::starting_at(first, len));
            }
        }
        for range in runs {
            self.write_field(Field::chars(range, '\0'))?;
        }
        Ok(())
    }

    /// Fields in buffer order beginning with the first attribute
    pub fn logical_fields(&self) -> Vec<ScreenField> {
        let Some(first) = self.fields.iter().position(Field::is_start_of_field) else {
            let contents = self.buffer_chars();
            return vec![ScreenField {
                attribute_address: None,
                attributes: FieldAttributes::unprotected(),
                start: BufferAddress::wrapping(0, self.buffer_size()),
                contents,
            }];
        };

        let mut out: Vec<ScreenField> = Vec::new();
        let count = self.fields.len();
        for offset in 0..count {
            match &self.fields[(first + offset) % count] {
                Field::StartOfField { address, attributes } => out.push(ScreenField {
                    attribute_address: Some(*address),
                    attributes: attributes.clone(),
                    start: address.next(),
                    contents: Vec::new(),
                }),
                textual => {
                    if let Some(last) = out.last_mut() {
                        last.contents.extend(textual.contents());
                    }
                }
            }
        }
        out
    }

    /// Field whose content holds `address`
    pub fn field_at(&self, address: BufferAddress) -> Option<ScreenField> {
        self.logical_fields().into_iter().find(|f| f.contains(address))
    }

    /// Every cell from address 0
    pub fn cells(&self) -> Vec<BufferCell> {
        // An erased screen always holds at least one cell
        let size = self.buffer_size().max(1);
        let mut cells = vec![BufferCell::Char('\0'); size];
        for field in &self.fields {
            match field {
                Field::StartOfField { address, attributes } => {
                    cells[address.value()] = BufferCell::Attribute(attributes.clone());
                }
                textual => {
                    for (address, ch) in textual.range().addresses().zip(textual.contents()) {
                        cells[address.value()] = BufferCell::Char(ch);
                    }
                }
            }
        }
        cells
    }

    /// Cell characters from address 0, attribute cells as nulls
    fn buffer_chars(&self) -> Vec<char> {
        self.cells()
            .into_iter()
            .map(|cell| match cell {
                BufferCell::Char(ch) => ch,
                BufferCell::Attribute(_) => '\0',
            })
            .collect()
    }

    /// Screen as displayed, one line per row.
    ///
    /// Attribute cells, nulls and non-display fields render as spaces.
    pub fn text(&self) -> String {
        let size = self.buffer_size();
        let mut chars = vec![' '; size];
        for field in self.logical_fields() {
            if !field.attributes.display {
                continue;
            }
            for (i, &ch) in field.contents.iter().enumerate() {
                chars[field.start.advance(i).value()] = printable(ch);
            }
        }
        chars
            .chunks(self.columns().max(1))
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// True when the field list covers the buffer exactly once
    pub fn is_partitioned(&self) -> bool {
        let size = self.buffer_size();
        let count = self.fields.len();
        if count == 0 || self.fields.iter().map(Field::len).sum::<usize>() != size {
            return false;
        }
        let sorted = self.fields.windows(2).all(|w| w[0].start().value() < w[1].start().value());
        let sized = self.fields.iter().all(|f| f.range().size() == size);
        let contiguous = (0..count).all(|i| self.fields[i].end().next() == self.fields[(i + 1) % count].start());
        sorted && sized && contiguous
    }

    /// First content cell of the nearest unprotected field after `from`.
    ///
    /// With `include_origin` a field starting exactly at `from` is nearest,
    /// otherwise it is the farthest.
    fn next_unprotected_start(&self, from: BufferAddress, include_origin: bool) -> Option<BufferAddress> {
        if !self.is_formatted() {
            return None;
        }
        let size = self.buffer_size();
        self.logical_fields()
            .into_iter()
            .filter(|f| f.is_modifiable() && !f.contents.is_empty())
            .map(|f| f.start)
            .min_by_key(|&start| match from.distance_to(start) {
                0 if !include_origin => size,
                d => d,
            })
    }

    fn home_address(&self) -> BufferAddress {
        let origin = BufferAddress::wrapping(0, self.buffer_size());
        self.next_unprotected_start(origin, true).unwrap_or(origin)
    }

    /// Whether `aid` could be pressed now
    pub fn check_aid(&self, aid: AidKey) -> Result<(), TerminalError> {
        if !aid.is_keyboard_key() {
            return Err(TerminalError::InvalidInput { reason: format!("{} is not a keyboard AID", aid.name()) });
        }
        self.ensure_unlocked()
    }

    fn ensure_unlocked(&self) -> Result<(), TerminalError> {
        if self.keyboard_locked {
            Err(TerminalError::KeyboardLocked)
        } else {
            Ok(())
        }
    }

    fn modifiable_field_at_cursor(&self) -> Result<ScreenField, TerminalError> {
        self.field_at(self.cursor)
            .filter(ScreenField::is_modifiable)
            .ok_or_else(|| {
                let (row, col) = self.cursor_position();
                TerminalError::FieldNotFound {
                    detail: format!("no modifiable field at row {row}, column {col}"),
                }
            })
    }

    fn set_modified(&mut self, field: &ScreenField) {
        if let Some(address) = field.attribute_address {
            if let Some(attributes) = self.attributes_at_mut(address) {
                attributes.modified = true;
            }
        }
    }

    /// Type `text` at the cursor into the field under it.
    ///
    /// Nothing is written unless all of `text` fits in the field.
    pub fn type_text(&mut self, text: &str) -> Tn3270Result<()> {
        self.ensure_unlocked()?;
        let field = self.modifiable_field_at_cursor()?;
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Ok(());
        }
        if field.attributes.numeric && !chars.iter().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | ' ')) {
            return Err(TerminalError::InvalidInput {
                reason: format!("'{text}' is not numeric"),
            }
            .into());
        }
        if !ebcdic::is_encodable(text) {
            return Err(TerminalError::InvalidInput {
                reason: format!("'{text}' has characters outside the host code page"),
            }
            .into());
        }
        let Some(content) = field.content_range() else {
            return Err(TerminalError::FieldNotFound { detail: "field has no content cells".to_string() }.into());
        };
        let room = content.len() - content.offset_of(self.cursor);
        if chars.len() > room {
            return Err(TerminalError::InvalidInput {
                reason: format!("{} characters do not fit in the {} left in the field", chars.len(), room),
            }
            .into());
        }

        self.write_text(self.cursor, &chars)?;
        self.set_modified(&field);
        let after = self.cursor.advance(chars.len());
        self.cursor = if content.contains(after) && after != content.start() {
            after
        } else {
            self.next_unprotected_start(after, true).unwrap_or(after)
        };
        Ok(())
    }

    /// Move to the next unprotected field
    pub fn tab(&mut self) -> Tn3270Result<()> {
        self.ensure_unlocked()?;
        self.cursor = self
            .next_unprotected_start(self.cursor, false)
            .ok_or_else(|| TerminalError::FieldNotFound { detail: "no unprotected field to tab to".to_string() })?;
        Ok(())
    }

    /// Move to the start of this field, or of the previous one when already there
    pub fn back_tab(&mut self) -> Tn3270Result<()> {
        self.ensure_unlocked()?;
        let cursor = self.cursor;
        let size = self.buffer_size();
        let target = self
            .is_formatted()
            .then(|| {
                self.logical_fields()
                    .into_iter()
                    .filter(|f| f.is_modifiable() && !f.contents.is_empty())
                    .map(|f| f.start)
                    .min_by_key(|start| match start.distance_to(cursor) {
                        0 => size,
                        d => d,
                    })
            })
            .flatten()
            .ok_or_else(|| TerminalError::FieldNotFound { detail: "no unprotected field to tab to".to_string() })?;
        self.cursor = target;
        Ok(())
    }

    /// Move to the first unprotected field, or address 0
    pub fn home(&mut self) -> Tn3270Result<()> {
        self.ensure_unlocked()?;
        self.cursor = self.home_address();
        Ok(())
    }

    /// Move to the first unprotected field at or after the start of the next row
    pub fn new_line(&mut self) -> Tn3270Result<()> {
        self.ensure_unlocked()?;
        let columns = self.columns().max(1);
        let next_row = (self.cursor.row(columns) + 1) % self.rows().max(1);
        let origin = BufferAddress::wrapping(next_row * columns, self.buffer_size());
        self.cursor = self.next_unprotected_start(origin, true).unwrap_or(origin);
        Ok(())
    }

    /// Null the field from the cursor to its end
    pub fn erase_eof(&mut self) -> Tn3270Result<()> {
        self.ensure_unlocked()?;
        let field = self.modifiable_field_at_cursor()?;
        if let Some(content) = field.content_range() {
            let len = content.len() - content.offset_of(self.cursor);
            self.write_field(Field::chars(AddressRange::starting_at(self.cursor, len), '\0'))?;
            self.set_modified(&field);
        }
        Ok(())
    }

    /// Null every unprotected field and home the cursor
    pub fn erase_input(&mut self) -> Tn3270Result<()> {
        self.ensure_unlocked()?;
        let whole = AddressRange::whole(self.buffer_size());
        self.null_unprotected(&whole)?;
        self.reset_modified(|attributes| !attributes.protected);
        self.cursor = self.home_address();
        Ok(())
    }

    pub fn set_cursor_position(&mut self, row: usize, col: usize) -> Result<(), TerminalError> {
        if row >= self.rows() {
            return Err(TerminalError::InvalidCursorPosition { row, col });
        }
        self.cursor = BufferAddress::from_row_col(row, col, self.columns(), self.buffer_size())
            .ok_or(TerminalError::InvalidCursorPosition { row, col })?;
        Ok(())
    }

    pub fn set_cursor(&mut self, address: BufferAddress) {
        self.cursor = BufferAddress::wrapping(address.value(), self.buffer_size());
    }

    /// Press an AID key: lock the keyboard and build the message for the host.
    ///
    /// Clear also erases the screen back to the primary size.
    pub fn press_aid(&mut self, aid: AidKey) -> Tn3270Result<Vec<u8>> {
        self.check_aid(aid)?;
        self.keyboard_locked = true;
        self.last_aid = aid;
        if aid == AidKey::Clear {
            self.erase(self.primary);
        }
        let modified = self.modified_data();
        Ok(datastream::encode_aid(aid, self.cursor, &modified))
    }

    /// Data sent inbound: modified fields, or the whole buffer when unformatted
    fn modified_data(&self) -> Vec<(Option<BufferAddress>, Vec<char>)> {
        if !self.is_formatted() {
            let contents = self.buffer_chars();
            return if contents.iter().any(|&c| c != '\0') { vec![(None, contents)] } else { Vec::new() };
        }
        self.logical_fields()
            .into_iter()
            .filter(|f| f.attributes.modified)
            .map(|f| (Some(f.start), f.contents))
            .collect()
    }

    fn read_modified(&self, all: bool) -> Vec<u8> {
        if self.last_aid.is_short_read() && !all {
            return vec![self.last_aid.to_u8()];
        }
        datastream::encode_read_modified(self.last_aid, self.cursor, &self.modified_data())
    }

    fn read_buffer(&self) -> Vec<u8> {
        datastream::encode_read_buffer(self.last_aid, self.cursor, &self.cells())
    }

    /// Fields with the modified data tag set
    pub fn modified_fields(&self) -> Vec<ScreenField> {
        self.logical_fields().into_iter().filter(|f| f.attributes.modified).collect()
    }

    /// Rebuild a host Write for this screen, used by diagnostics and replay
    pub fn to_erase_write(&self) -> Inbound3270Message {
        let mut orders = Vec::new();
        for field in &self.fields {
            match field {
                Field::StartOfField { address, attributes } => {
                    orders.push(Order::SetBufferAddress(*address));
                    orders.push(Order::StartField(attributes.clone()));
                }
                Field::Chars { range, ch } => {
                    orders.push(Order::SetBufferAddress(range.start()));
                    orders.push(Order::RepeatToAddress { ch: *ch, target: range.end().next() });
                }
                Field::Text { range, text } => {
                    orders.push(Order::SetBufferAddress(range.start()));
                    orders.push(Order::Text(text.clone()));
                }
            }
        }
        orders.push(Order::SetBufferAddress(self.cursor));
        orders.push(Order::InsertCursor);
        let wcc = WriteControlCharacter { keyboard_restore: !self.keyboard_locked, ..Default::default() };
        let command = if self.size == self.primary {
            CommandCode::EraseWrite
        } else {
            CommandCode::EraseWriteAlternate
        };
        Inbound3270Message::new(command, Some(wcc), orders)
    }
}
