//! 3270 datastream codec
//!
//! Decodes host-to-terminal records into [`Inbound3270Message`]s and builds the
//! terminal-to-host records: AID messages, read replies and Query Reply.
//! Character data is translated between EBCDIC and `char` here and nowhere
//! else.

use log::{debug, trace};

use super::address::{decode_address, encode_address, BufferAddress};
use super::codes::*;
use super::field::{ExtendedAttributes, FieldAttributes};
use crate::error::{DatastreamError, DatastreamResult};
use crate::protocol_common::ebcdic;

/// Write Control Character flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteControlCharacter {
    pub reset: bool,
    pub alarm: bool,
    pub keyboard_restore: bool,
    pub reset_mdt: bool,
}

impl WriteControlCharacter {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            reset: byte & WCC_RESET != 0,
            alarm: byte & WCC_ALARM != 0,
            keyboard_restore: byte & WCC_RESTORE != 0,
            reset_mdt: byte & WCC_RESET_MDT != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.reset {
            byte |= WCC_RESET;
        }
        if self.alarm {
            byte |= WCC_ALARM;
        }
        if self.keyboard_restore {
            byte |= WCC_RESTORE;
        }
        if self.reset_mdt {
            byte |= WCC_RESET_MDT;
        }
        byte
    }

    /// Unlock the keyboard and reset modified flags, the usual host WCC
    pub fn restore() -> Self {
        Self { keyboard_restore: true, reset_mdt: true, ..Self::default() }
    }
}

/// One decoded order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    SetBufferAddress(BufferAddress),
    StartField(FieldAttributes),
    /// SFE, attributes already merged with any extended pairs
    StartFieldExtended(FieldAttributes),
    /// Character attribute; parsed, ignored by the screen
    SetAttribute { attr_type: u8, value: u8 },
    ModifyField(Vec<(u8, u8)>),
    InsertCursor,
    ProgramTab,
    RepeatToAddress { ch: char, target: BufferAddress },
    EraseUnprotectedToAddress(BufferAddress),
    GraphicEscape(char),
    Text(Vec<char>),
}

/// Structured fields carried by Write Structured Field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredField {
    /// Read Partition Query or Query List; answered with a Query Reply
    ReadPartitionQuery,
    EraseReset { alternate: bool },
    Other { id: u8, data: Vec<u8> },
}

/// A decoded host-to-terminal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound3270Message {
    pub command: CommandCode,
    pub write_control_character: Option<WriteControlCharacter>,
    pub orders: Vec<Order>,
    pub structured_fields: Vec<StructuredField>,
}

impl Inbound3270Message {
    pub fn new(command: CommandCode, wcc: Option<WriteControlCharacter>, orders: Vec<Order>) -> Self {
        Self { command, write_control_character: wcc, orders, structured_fields: Vec::new() }
    }

    /// Host-side encoding of this message
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.command.to_u8()];
        if self.command.is_write() {
            out.push(self.write_control_character.unwrap_or_default().to_byte());
            for order in &self.orders {
                encode_order(order, &mut out);
            }
        }
        if self.command == CommandCode::WriteStructuredField {
            for sf in &self.structured_fields {
                encode_structured_field(sf, &mut out);
            }
        }
        out
    }
}

fn encode_order(order: &Order, out: &mut Vec<u8>) {
    match order {
        Order::SetBufferAddress(addr) => {
            out.push(ORDER_SBA);
            out.extend_from_slice(&encode_address(addr.value(), addr.size()));
        }
        Order::StartField(attrs) => {
            out.push(ORDER_SF);
            out.push(attrs.to_byte());
        }
        Order::StartFieldExtended(attrs) => {
            let pairs = extended_pairs(&attrs.extended);
            out.push(ORDER_SFE);
            out.push(pairs.len() as u8 + 1);
            out.extend_from_slice(&[XA_3270, attrs.to_byte()]);
            for (t, v) in pairs {
                out.extend_from_slice(&[t, v]);
            }
        }
        Order::SetAttribute { attr_type, value } => {
            out.extend_from_slice(&[ORDER_SA, *attr_type, *value]);
        }
        Order::ModifyField(pairs) => {
            out.push(ORDER_MF);
            out.push(pairs.len() as u8);
            for (t, v) in pairs {
                out.extend_from_slice(&[*t, *v]);
            }
        }
        Order::InsertCursor => out.push(ORDER_IC),
        Order::ProgramTab => out.push(ORDER_PT),
        Order::RepeatToAddress { ch, target } => {
            out.push(ORDER_RA);
            out.extend_from_slice(&encode_address(target.value(), target.size()));
            out.extend(ebcdic::encode([*ch]));
        }
        Order::EraseUnprotectedToAddress(target) => {
            out.push(ORDER_EUA);
            out.extend_from_slice(&encode_address(target.value(), target.size()));
        }
        Order::GraphicEscape(ch) => {
            out.push(ORDER_GE);
            out.extend(ebcdic::encode([*ch]));
        }
        Order::Text(chars) => out.extend(ebcdic::encode(chars.iter().copied())),
    }
}

fn extended_pairs(ext: &ExtendedAttributes) -> Vec<(u8, u8)> {
    [
        (XA_HIGHLIGHTING, ext.highlighting),
        (XA_FOREGROUND, ext.foreground_color),
        (XA_CHARSET, ext.charset),
        (XA_BACKGROUND, ext.background_color),
        (XA_TRANSPARENCY, ext.transparency),
        (XA_VALIDATION, ext.validation),
        (XA_OUTLINING, ext.outlining),
    ]
    .into_iter()
    .filter_map(|(t, v)| v.map(|v| (t, v)))
    .collect()
}

fn encode_structured_field(sf: &StructuredField, out: &mut Vec<u8>) {
    let body: Vec<u8> = match sf {
        StructuredField::ReadPartitionQuery => vec![SF_READ_PARTITION, 0xFF, READ_PARTITION_QUERY],
        StructuredField::EraseReset { alternate } => {
            vec![SF_ERASE_RESET, if *alternate { 0x80 } else { 0x00 }]
        }
        StructuredField::Other { id, data } => {
            let mut body = vec![*id];
            body.extend_from_slice(data);
            body
        }
    };
    out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
    out.extend(body);
}

/// Decode one host record for a buffer of `buffer_size` cells
pub fn decode(bytes: &[u8], buffer_size: usize) -> DatastreamResult<Inbound3270Message> {
    DataStreamParser::new(bytes, buffer_size).parse()
}

/// Cursor over one record
struct DataStreamParser<'a> {
    data: &'a [u8],
    pos: usize,
    buffer_size: usize,
}

impl<'a> DataStreamParser<'a> {
    fn new(data: &'a [u8], buffer_size: usize) -> Self {
        Self { data, pos: 0, buffer_size }
    }

    fn parse(&mut self) -> DatastreamResult<Inbound3270Message> {
        let code = self.next_byte("command")?;
        let command = CommandCode::from_u8(code)
            .ok_or(DatastreamError::UnknownCommand { code, offset: 0 })?;
        trace!("3270 command {:?}, {} bytes", command, self.data.len());

        let mut message = Inbound3270Message::new(command, None, Vec::new());
        match command {
            CommandCode::Write | CommandCode::EraseWrite | CommandCode::EraseWriteAlternate => {
                if self.pos < self.data.len() {
                    let wcc = self.next_byte("WCC")?;
                    message.write_control_character = Some(WriteControlCharacter::from_byte(wcc));
                    message.orders = self.parse_orders()?;
                } else {
                    message.write_control_character = Some(WriteControlCharacter::default());
                }
            }
            CommandCode::WriteStructuredField => {
                message.structured_fields = self.parse_structured_fields()?;
            }
            CommandCode::EraseAllUnprotected
            | CommandCode::ReadBuffer
            | CommandCode::ReadModified
            | CommandCode::ReadModifiedAll => {}
        }
        Ok(message)
    }

    fn next_byte(&mut self, what: &'static str) -> DatastreamResult<u8> {
        if self.pos >= self.data.len() {
            return Err(if self.data.is_empty() {
                DatastreamError::Empty
            } else {
                DatastreamError::Truncated { what, offset: self.pos }
            });
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn read_address(&mut self, what: &'static str) -> DatastreamResult<BufferAddress> {
        let offset = self.pos;
        let b1 = self.next_byte(what)?;
        let b2 = self.next_byte(what)?;
        let address = decode_address(b1, b2);
        BufferAddress::new(address, self.buffer_size).ok_or(DatastreamError::InvalidAddress {
            address,
            buffer_size: self.buffer_size,
            offset,
        })
    }

    /// Character operand of RA, which may itself be a graphic escape
    fn read_char(&mut self, what: &'static str) -> DatastreamResult<char> {
        let byte = self.next_byte(what)?;
        let byte = if byte == ORDER_GE { self.next_byte(what)? } else { byte };
        Ok(ebcdic::ebcdic_to_char(byte))
    }

    fn read_pairs(&mut self, what: &'static str) -> DatastreamResult<Vec<(u8, u8)>> {
        let count = self.next_byte(what)? as usize;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let attr_type = self.next_byte(what)?;
            let value = self.next_byte(what)?;
            pairs.push((attr_type, value));
        }
        Ok(pairs)
    }

    fn parse_orders(&mut self) -> DatastreamResult<Vec<Order>> {
        let mut orders = Vec::new();
        let mut text: Vec<char> = Vec::new();

        while self.pos < self.data.len() {
            let offset = self.pos;
            let byte = self.data[offset];

            if byte >= 0x40 || is_control_character(byte) {
                text.push(ebcdic::ebcdic_to_char(byte));
                self.pos += 1;
                continue;
            }

            let order = OrderCode::from_u8(byte)
                .ok_or(DatastreamError::UnknownOrder { code: byte, offset })?;
            if !text.is_empty() {
                orders.push(Order::Text(std::mem::take(&mut text)));
            }
            self.pos += 1;
            orders.push(self.parse_order(order)?);
        }

        if !text.is_empty() {
            orders.push(Order::Text(text));
        }
        Ok(orders)
    }

    fn parse_order(&mut self, order: OrderCode) -> DatastreamResult<Order> {
        Ok(match order {
            OrderCode::SetBufferAddress => Order::SetBufferAddress(self.read_address("SBA")?),
            OrderCode::StartField => Order::StartField(FieldAttributes::from_byte(self.next_byte("SF")?)),
            OrderCode::StartFieldExtended => {
                let pairs = self.read_pairs("SFE")?;
                let mut attrs = FieldAttributes::default();
                let mut extended = ExtendedAttributes::default();
                attrs.display = true;
                for (attr_type, value) in pairs {
                    if attr_type == XA_3270 {
                        attrs = FieldAttributes::from_byte(value);
                    } else if !extended.apply(attr_type, value) {
                        debug!("Ignoring SFE attribute type 0x{attr_type:02X}");
                    }
                }
                attrs.extended = extended;
                Order::StartFieldExtended(attrs)
            }
            OrderCode::SetAttribute => Order::SetAttribute {
                attr_type: self.next_byte("SA")?,
                value: self.next_byte("SA")?,
            },
            OrderCode::ModifyField => Order::ModifyField(self.read_pairs("MF")?),
            OrderCode::InsertCursor => Order::InsertCursor,
            OrderCode::ProgramTab => Order::ProgramTab,
            OrderCode::RepeatToAddress => {
                let target = self.read_address("RA")?;
                let ch = self.read_char("RA")?;
                Order::RepeatToAddress { ch, target }
            }
            OrderCode::EraseUnprotectedToAddress => Order::EraseUnprotectedToAddress(self.read_address("EUA")?),
            OrderCode::GraphicEscape => Order::GraphicEscape(ebcdic::ebcdic_to_char(self.next_byte("GE")?)),
        })
    }

    fn parse_structured_fields(&mut self) -> DatastreamResult<Vec<StructuredField>> {
        let mut fields = Vec::new();
        while self.pos < self.data.len() {
            let offset = self.pos;
            let hi = self.next_byte("structured field length")?;
            let lo = self.next_byte("structured field length")?;
            let declared = u16::from_be_bytes([hi, lo]) as usize;
            // A zero length runs to the end of the record
            let length = if declared == 0 { self.data.len() - offset } else { declared };
            if length < 3 || offset + length > self.data.len() {
                return Err(DatastreamError::InvalidStructuredField {
                    offset,
                    reason: format!("length {declared} with {} bytes left", self.data.len() - offset),
                });
            }
            let id = self.data[offset + 2];
            let body = &self.data[offset + 3..offset + length];
            self.pos = offset + length;

            fields.push(match id {
                SF_READ_PARTITION
                    if matches!(body.get(1), Some(&READ_PARTITION_QUERY) | Some(&READ_PARTITION_QUERY_LIST)) =>
                {
                    StructuredField::ReadPartitionQuery
                }
                SF_ERASE_RESET => StructuredField::EraseReset {
                    alternate: body.first().is_some_and(|flags| flags & 0x80 != 0),
                },
                _ => StructuredField::Other { id, data: body.to_vec() },
            });
        }
        Ok(fields)
    }
}

/// Append `chars` as EBCDIC with nulls suppressed
pub fn encode_field_data(chars: &[char], out: &mut Vec<u8>) {
    out.extend(ebcdic::encode(chars.iter().copied().filter(|&c| c != '\0')));
}

/// Build an AID message.
///
/// Short-read keys send only the AID byte; every other key sends the cursor
/// and the modified fields as [`encode_read_modified`] does.
pub fn encode_aid(aid: AidKey, cursor: BufferAddress, modified: &[(Option<BufferAddress>, Vec<char>)]) -> Vec<u8> {
    if aid.is_short_read() {
        return vec![aid.to_u8()];
    }
    encode_read_modified(aid, cursor, modified)
}

/// AID, cursor, then each modified field as `SBA(start)` plus its data.
///
/// A `None` start sends the data without an SBA, as an unformatted buffer does.
pub fn encode_read_modified(aid: AidKey, cursor: BufferAddress, modified: &[(Option<BufferAddress>, Vec<char>)]) -> Vec<u8> {
    let mut out = vec![aid.to_u8()];
    out.extend_from_slice(&encode_address(cursor.value(), cursor.size()));
    for (start, chars) in modified {
        if let Some(start) = start {
            out.push(ORDER_SBA);
            out.extend_from_slice(&encode_address(start.value(), start.size()));
        }
        encode_field_data(chars, &mut out);
    }
    out
}

/// One cell as reported by Read Buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferCell {
    Attribute(FieldAttributes),
    Char(char),
}

/// Read Buffer reply: every cell in buffer order from address 0
pub fn encode_read_buffer(aid: AidKey, cursor: BufferAddress, cells: &[BufferCell]) -> Vec<u8> {
    let mut out = vec![aid.to_u8()];
    out.extend_from_slice(&encode_address(cursor.value(), cursor.size()));
    for cell in cells {
        match cell {
            BufferCell::Attribute(attrs) => {
                out.push(ORDER_SF);
                out.push(attrs.to_byte());
            }
            BufferCell::Char('\0') => out.push(CC_NUL),
            BufferCell::Char(ch) => out.extend(ebcdic::encode([*ch])),
        }
    }
    out
}

/// Query Reply answering Read Partition Query: Summary, Usable Area and
/// Implicit Partition for the given primary and alternate sizes
pub fn encode_query_reply(primary: (usize, usize), alternate: (usize, usize)) -> Vec<u8> {
    let (rows, columns) = primary;
    let (alt_rows, alt_columns) = alternate;
    let mut out = vec![AID_STRUCTURED_FIELD];

    let summary = [SF_QUERY_REPLY, QR_SUMMARY, QR_SUMMARY, QR_USABLE_AREA, QR_IMPLICIT_PARTITION];
    push_query_reply(&mut out, &summary);

    let mut usable = vec![SF_QUERY_REPLY, QR_USABLE_AREA, 0x01, 0x00];
    usable.extend_from_slice(&(alt_columns as u16).to_be_bytes());
    usable.extend_from_slice(&(alt_rows as u16).to_be_bytes());
    usable.push(0x00);
    usable.extend_from_slice(&[0x00, 0x0A, 0x02, 0xE5, 0x00, 0x02, 0x00, 0x6F]);
    usable.extend_from_slice(&[0x09, 0x0C]);
    usable.extend_from_slice(&((alt_rows * alt_columns) as u16).to_be_bytes());
    push_query_reply(&mut out, &usable);

    let mut implicit = vec![SF_QUERY_REPLY, QR_IMPLICIT_PARTITION, 0x00, 0x00, 0x0B, 0x01, 0x00];
    implicit.extend_from_slice(&(columns as u16).to_be_bytes());
    implicit.extend_from_slice(&(rows as u16).to_be_bytes());
    implicit.extend_from_slice(&(alt_columns as u16).to_be_bytes());
    implicit.extend_from_slice(&(alt_rows as u16).to_be_bytes());
    push_query_reply(&mut out, &implicit);

    out
}

fn push_query_reply(out: &mut Vec<u8>, body: &[u8]) {
    out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(body);
}
