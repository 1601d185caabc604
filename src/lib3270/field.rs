//! Screen fields and their split/merge operations
//!
//! The screen is a list of [`Field`]s that partitions the circular buffer.
//! A field is either a one-cell start-of-field attribute marker or a run of
//! character cells, held as explicit text or as one repeated character.

use super::address::{graphic_code, AddressRange, BufferAddress};
use super::codes::*;
use crate::error::{FieldError, FieldResult};

/// Attributes carried by a start-of-field marker
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldAttributes {
    pub protected: bool,
    pub numeric: bool,
    pub display: bool,
    pub intensified: bool,
    pub selector_pen: bool,
    pub modified: bool,
    pub extended: ExtendedAttributes,
}

impl FieldAttributes {
    /// Decode an SF attribute byte
    pub fn from_byte(byte: u8) -> Self {
        let display_bits = byte & ATTR_DISPLAY;
        Self {
            protected: byte & ATTR_PROTECTED != 0,
            numeric: byte & ATTR_NUMERIC != 0,
            display: display_bits != DISPLAY_HIDDEN,
            intensified: display_bits == DISPLAY_INTENSIFIED,
            selector_pen: display_bits == DISPLAY_INTENSIFIED || display_bits == DISPLAY_PEN_DETECTABLE,
            modified: byte & ATTR_MDT != 0,
            extended: ExtendedAttributes::default(),
        }
    }

    /// Attribute bits, without graphic conversion
    pub fn to_bits(&self) -> u8 {
        let mut byte = 0;
        if self.protected {
            byte |= ATTR_PROTECTED;
        }
        if self.numeric {
            byte |= ATTR_NUMERIC;
        }
        byte |= if !self.display {
            DISPLAY_HIDDEN
        } else if self.intensified {
            DISPLAY_INTENSIFIED
        } else if self.selector_pen {
            DISPLAY_PEN_DETECTABLE
        } else {
            DISPLAY_NORMAL
        };
        if self.modified {
            byte |= ATTR_MDT;
        }
        byte
    }

    /// Attribute byte as sent inbound in Read Buffer replies
    pub fn to_byte(&self) -> u8 {
        graphic_code(self.to_bits())
    }

    pub fn unprotected() -> Self {
        Self::from_byte(0)
    }

    pub fn protected() -> Self {
        Self::from_byte(ATTR_PROTECTED)
    }
}

/// Extended attributes from SFE, SA and MF type/value pairs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedAttributes {
    pub highlighting: Option<u8>,
    pub foreground_color: Option<u8>,
    pub background_color: Option<u8>,
    pub charset: Option<u8>,
    pub validation: Option<u8>,
    pub outlining: Option<u8>,
    pub transparency: Option<u8>,
}

impl ExtendedAttributes {
    /// Record one type/value pair; `false` for types this engine ignores
    pub fn apply(&mut self, attr_type: u8, value: u8) -> bool {
        let slot = match attr_type {
            XA_HIGHLIGHTING => &mut self.highlighting,
            XA_FOREGROUND => &mut self.foreground_color,
            XA_BACKGROUND => &mut self.background_color,
            XA_CHARSET => &mut self.charset,
            XA_VALIDATION => &mut self.validation,
            XA_OUTLINING => &mut self.outlining,
            XA_TRANSPARENCY => &mut self.transparency,
            XA_ALL => {
                *self = Self::default();
                return true;
            }
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// One entry of the screen's field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Attribute marker occupying exactly one cell
    StartOfField {
        address: BufferAddress,
        attributes: FieldAttributes,
    },
    /// Explicit cell contents, one char per cell
    Text { range: AddressRange, text: Vec<char> },
    /// One character repeated over the range
    Chars { range: AddressRange, ch: char },
}

impl Field {
    pub fn start_of_field(address: BufferAddress, attributes: FieldAttributes) -> Self {
        Field::StartOfField { address, attributes }
    }

    /// Text field beginning at `start`; `text` must not be empty
    pub fn text(start: BufferAddress, text: impl Into<Vec<char>>) -> Self {
        let text = text.into();
        Field::Text { range: AddressRange::starting_at(start, text.len()), text }
    }

    pub fn chars(range: AddressRange, ch: char) -> Self {
        Field::Chars { range, ch }
    }

    pub fn range(&self) -> AddressRange {
        match self {
            Field::StartOfField { address, .. } => AddressRange::new(*address, *address),
            Field::Text { range, .. } | Field::Chars { range, .. } => *range,
        }
    }

    pub fn start(&self) -> BufferAddress {
        self.range().start()
    }

    pub fn end(&self) -> BufferAddress {
        self.range().end()
    }

    pub fn len(&self) -> usize {
        self.range().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_start_of_field(&self) -> bool {
        matches!(self, Field::StartOfField { .. })
    }

    pub fn attributes(&self) -> Option<&FieldAttributes> {
        match self {
            Field::StartOfField { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    /// Character at `address`, `None` for markers or addresses outside the field
    pub fn char_at(&self, address: BufferAddress) -> Option<char> {
        let range = self.range();
        if !range.contains(address) {
            return None;
        }
        match self {
            Field::StartOfField { .. } => None,
            Field::Text { text, .. } => text.get(range.offset_of(address)).copied(),
            Field::Chars { ch, .. } => Some(*ch),
        }
    }

    /// Cell contents in buffer order; empty for a marker
    pub fn contents(&self) -> Vec<char> {
        match self {
            Field::StartOfField { .. } => Vec::new(),
            Field::Text { text, .. } => text.clone(),
            Field::Chars { range, ch } => vec![*ch; range.len()],
        }
    }

    /// Piece of a textual field covering `len` cells from `offset`
    fn slice(&self, offset: usize, len: usize) -> Field {
        let start = self.start().advance(offset);
        let range = AddressRange::starting_at(start, len);
        match self {
            Field::Text { text, .. } => Field::Text { range, text: text[offset..offset + len].to_vec() },
            Field::Chars { ch, .. } => Field::Chars { range, ch: *ch },
            Field::StartOfField { .. } => self.clone(),
        }
    }

    /// What remains of this field once `cut` is excised.
    ///
    /// Covered fields vanish, fields cut in the middle become two pieces, an
    /// edge overlap truncates and a disjoint range leaves the field as is. A
    /// marker is removed when its cell is in `cut` and untouched otherwise.
    pub fn split(&self, cut: &AddressRange) -> Vec<Field> {
        let range = self.range();
        if !range.overlaps(cut) {
            return vec![self.clone()];
        }
        if self.is_start_of_field() {
            return if cut.contains(range.start()) { Vec::new() } else { vec![self.clone()] };
        }

        // Runs of cells outside `cut`, in field offset order
        let mut pieces = Vec::new();
        let mut run_start: Option<usize> = None;
        for (offset, address) in range.addresses().enumerate() {
            match (cut.contains(address), run_start) {
                (false, None) => run_start = Some(offset),
                (true, Some(begin)) => {
                    pieces.push(self.slice(begin, offset - begin));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(begin) = run_start {
            pieces.push(self.slice(begin, range.len() - begin));
        }
        pieces
    }

    /// Join this field with `next`, which must begin at the cell after this one ends.
    ///
    /// The result is always a `Text` field. Markers never merge.
    pub fn merge(&self, next: &Field) -> FieldResult<Field> {
        if self.is_start_of_field() || next.is_start_of_field() {
            return Err(FieldError::UnsupportedOperation {
                operation: "merge",
                reason: format!("start of field cannot merge ({} with {})", self.range(), next.range()),
            });
        }
        if self.end().next() != next.start() || self.len() + next.len() > self.range().size() {
            return Err(FieldError::UnsupportedOperation {
                operation: "merge",
                reason: format!("fields {} and {} are not adjacent", self.range(), next.range()),
            });
        }
        let mut text = self.contents();
        text.extend(next.contents());
        Ok(Field::Text { range: AddressRange::new(self.start(), next.end()), text })
    }

    /// True for textual fields that may merge with a textual neighbour
    pub fn is_textual(&self) -> bool {
        !self.is_start_of_field()
    }
}
