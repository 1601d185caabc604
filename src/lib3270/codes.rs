//! 3270 datastream constants
//!
//! Command codes, orders, control characters, WCC and attribute bits, AID
//! bytes and the structured field identifiers used by Query Reply.
//!
//! # References
//! - RFC 1576: TN3270 Current Practices
//! - RFC 2355: TN3270 Enhancements
//! - IBM 3270 Data Stream Programmer's Reference (GA23-0059)

/// 3270 command codes (local/channel form)
pub const CMD_WRITE: u8 = 0x01;
pub const CMD_ERASE_WRITE: u8 = 0x05;
pub const CMD_ERASE_WRITE_ALTERNATE: u8 = 0x0D;
pub const CMD_READ_BUFFER: u8 = 0x02;
pub const CMD_READ_MODIFIED: u8 = 0x06;
pub const CMD_READ_MODIFIED_ALL: u8 = 0x0E;
pub const CMD_ERASE_ALL_UNPROTECTED: u8 = 0x0F;
pub const CMD_WRITE_STRUCTURED_FIELD: u8 = 0x11;

/// 3270 command codes as sent over SNA sessions
pub const SNA_CMD_WRITE: u8 = 0xF1;
pub const SNA_CMD_ERASE_WRITE: u8 = 0xF5;
pub const SNA_CMD_ERASE_WRITE_ALTERNATE: u8 = 0x7E;
pub const SNA_CMD_READ_BUFFER: u8 = 0xF2;
pub const SNA_CMD_READ_MODIFIED: u8 = 0xF6;
pub const SNA_CMD_READ_MODIFIED_ALL: u8 = 0x6E;
pub const SNA_CMD_ERASE_ALL_UNPROTECTED: u8 = 0x6F;
pub const SNA_CMD_WRITE_STRUCTURED_FIELD: u8 = 0xF3;

/// Order codes embedded in Write datastreams
pub const ORDER_SF: u8 = 0x1D;    // Start Field
pub const ORDER_SFE: u8 = 0x29;   // Start Field Extended
pub const ORDER_SBA: u8 = 0x11;   // Set Buffer Address
pub const ORDER_SA: u8 = 0x28;    // Set Attribute
pub const ORDER_MF: u8 = 0x2C;    // Modify Field
pub const ORDER_IC: u8 = 0x13;    // Insert Cursor
pub const ORDER_PT: u8 = 0x05;    // Program Tab
pub const ORDER_RA: u8 = 0x3C;    // Repeat to Address
pub const ORDER_EUA: u8 = 0x12;   // Erase Unprotected to Address
pub const ORDER_GE: u8 = 0x08;    // Graphic Escape

/// Control characters allowed in the character stream below 0x40
pub const CC_NUL: u8 = 0x00;
pub const CC_FF: u8 = 0x0C;
pub const CC_CR: u8 = 0x0D;
pub const CC_NL: u8 = 0x15;
pub const CC_EM: u8 = 0x19;
pub const CC_DUP: u8 = 0x1C;
pub const CC_FM: u8 = 0x1E;
pub const CC_SUB: u8 = 0x3F;

/// Write Control Character bits
pub const WCC_RESET: u8 = 0x40;
pub const WCC_ALARM: u8 = 0x04;
pub const WCC_RESTORE: u8 = 0x02;
pub const WCC_RESET_MDT: u8 = 0x01;

/// Field attribute byte bits
pub const ATTR_PROTECTED: u8 = 0x20;
pub const ATTR_NUMERIC: u8 = 0x10;
pub const ATTR_DISPLAY: u8 = 0x0C;
pub const ATTR_MDT: u8 = 0x01;

/// Values of the display bits
pub const DISPLAY_NORMAL: u8 = 0x00;
pub const DISPLAY_PEN_DETECTABLE: u8 = 0x04;
pub const DISPLAY_INTENSIFIED: u8 = 0x08;
pub const DISPLAY_HIDDEN: u8 = 0x0C;

/// Extended attribute types carried by SFE, SA and MF
pub const XA_ALL: u8 = 0x00;
pub const XA_3270: u8 = 0xC0;
pub const XA_VALIDATION: u8 = 0xC1;
pub const XA_OUTLINING: u8 = 0xC2;
pub const XA_HIGHLIGHTING: u8 = 0x41;
pub const XA_FOREGROUND: u8 = 0x42;
pub const XA_CHARSET: u8 = 0x43;
pub const XA_BACKGROUND: u8 = 0x45;
pub const XA_TRANSPARENCY: u8 = 0x46;

/// AID bytes
pub const AID_NO_AID: u8 = 0x60;
pub const AID_STRUCTURED_FIELD: u8 = 0x88;
pub const AID_ENTER: u8 = 0x7D;
pub const AID_CLEAR: u8 = 0x6D;
pub const AID_PA1: u8 = 0x6C;
pub const AID_PA2: u8 = 0x6E;
pub const AID_PA3: u8 = 0x6B;

/// PF1 to PF24 in key order
pub const AID_PF: [u8; 24] = [
    0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0x7A, 0x7B, 0x7C,
    0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0x4A, 0x4B, 0x4C,
];

/// Structured field identifiers
pub const SF_READ_PARTITION: u8 = 0x01;
pub const SF_ERASE_RESET: u8 = 0x03;
pub const SF_QUERY_REPLY: u8 = 0x81;

/// Read Partition operation types
pub const READ_PARTITION_QUERY: u8 = 0x02;
pub const READ_PARTITION_QUERY_LIST: u8 = 0x03;

/// Query Reply codes
pub const QR_SUMMARY: u8 = 0x80;
pub const QR_USABLE_AREA: u8 = 0x81;
pub const QR_IMPLICIT_PARTITION: u8 = 0xA6;

/// 3270 commands, accepting both channel and SNA encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Write,
    EraseWrite,
    EraseWriteAlternate,
    EraseAllUnprotected,
    ReadBuffer,
    ReadModified,
    ReadModifiedAll,
    WriteStructuredField,
}

impl CommandCode {
    /// Convert a byte value to a CommandCode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            CMD_WRITE | SNA_CMD_WRITE => Some(Self::Write),
            CMD_ERASE_WRITE | SNA_CMD_ERASE_WRITE => Some(Self::EraseWrite),
            CMD_ERASE_WRITE_ALTERNATE | SNA_CMD_ERASE_WRITE_ALTERNATE => Some(Self::EraseWriteAlternate),
            CMD_ERASE_ALL_UNPROTECTED | SNA_CMD_ERASE_ALL_UNPROTECTED => Some(Self::EraseAllUnprotected),
            CMD_READ_BUFFER | SNA_CMD_READ_BUFFER => Some(Self::ReadBuffer),
            CMD_READ_MODIFIED | SNA_CMD_READ_MODIFIED => Some(Self::ReadModified),
            CMD_READ_MODIFIED_ALL | SNA_CMD_READ_MODIFIED_ALL => Some(Self::ReadModifiedAll),
            CMD_WRITE_STRUCTURED_FIELD | SNA_CMD_WRITE_STRUCTURED_FIELD => Some(Self::WriteStructuredField),
            _ => None,
        }
    }

    /// SNA encoding, the form hosts send over TN3270
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Write => SNA_CMD_WRITE,
            Self::EraseWrite => SNA_CMD_ERASE_WRITE,
            Self::EraseWriteAlternate => SNA_CMD_ERASE_WRITE_ALTERNATE,
            Self::EraseAllUnprotected => SNA_CMD_ERASE_ALL_UNPROTECTED,
            Self::ReadBuffer => SNA_CMD_READ_BUFFER,
            Self::ReadModified => SNA_CMD_READ_MODIFIED,
            Self::ReadModifiedAll => SNA_CMD_READ_MODIFIED_ALL,
            Self::WriteStructuredField => SNA_CMD_WRITE_STRUCTURED_FIELD,
        }
    }

    /// Write, Erase/Write and Erase/Write Alternate carry a WCC and orders
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::EraseWrite | Self::EraseWriteAlternate)
    }

    pub fn is_erase(self) -> bool {
        matches!(self, Self::EraseWrite | Self::EraseWriteAlternate)
    }
}

/// Order codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCode {
    StartField = ORDER_SF as isize,
    StartFieldExtended = ORDER_SFE as isize,
    SetBufferAddress = ORDER_SBA as isize,
    SetAttribute = ORDER_SA as isize,
    ModifyField = ORDER_MF as isize,
    InsertCursor = ORDER_IC as isize,
    ProgramTab = ORDER_PT as isize,
    RepeatToAddress = ORDER_RA as isize,
    EraseUnprotectedToAddress = ORDER_EUA as isize,
    GraphicEscape = ORDER_GE as isize,
}

impl OrderCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            ORDER_SF => Some(Self::StartField),
            ORDER_SFE => Some(Self::StartFieldExtended),
            ORDER_SBA => Some(Self::SetBufferAddress),
            ORDER_SA => Some(Self::SetAttribute),
            ORDER_MF => Some(Self::ModifyField),
            ORDER_IC => Some(Self::InsertCursor),
            ORDER_PT => Some(Self::ProgramTab),
            ORDER_RA => Some(Self::RepeatToAddress),
            ORDER_EUA => Some(Self::EraseUnprotectedToAddress),
            ORDER_GE => Some(Self::GraphicEscape),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// True for bytes below 0x40 that may appear inside a character run
pub fn is_control_character(byte: u8) -> bool {
    matches!(byte, CC_NUL | CC_FF | CC_CR | CC_NL | CC_EM | CC_DUP | CC_FM | CC_SUB)
}

/// Attention identifier keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AidKey {
    NoAid,
    Enter,
    Clear,
    PA1,
    PA2,
    PA3,
    /// PF1 through PF24
    PF(u8),
    StructuredField,
}

impl AidKey {
    /// PF key by number, `None` outside 1..=24
    pub fn pf(number: u8) -> Option<Self> {
        (1..=24).contains(&number).then_some(Self::PF(number))
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            AID_NO_AID => Some(Self::NoAid),
            AID_ENTER => Some(Self::Enter),
            AID_CLEAR => Some(Self::Clear),
            AID_PA1 => Some(Self::PA1),
            AID_PA2 => Some(Self::PA2),
            AID_PA3 => Some(Self::PA3),
            AID_STRUCTURED_FIELD => Some(Self::StructuredField),
            _ => AID_PF
                .iter()
                .position(|&b| b == value)
                .map(|i| Self::PF(i as u8 + 1)),
        }
    }

    /// Keys an operator can press: everything but NoAid, the structured
    /// field AID and PF numbers outside 1..=24
    pub fn is_keyboard_key(self) -> bool {
        match self {
            Self::NoAid | Self::StructuredField => false,
            Self::PF(n) => (1..=24).contains(&n),
            _ => true,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::NoAid => AID_NO_AID,
            Self::Enter => AID_ENTER,
            Self::Clear => AID_CLEAR,
            Self::PA1 => AID_PA1,
            Self::PA2 => AID_PA2,
            Self::PA3 => AID_PA3,
            Self::PF(n @ 1..=24) => AID_PF[(n - 1) as usize],
            Self::PF(_) => AID_NO_AID,
            Self::StructuredField => AID_STRUCTURED_FIELD,
        }
    }

    /// Clear and the PA keys send the AID byte alone
    pub fn is_short_read(self) -> bool {
        matches!(self, Self::Clear | Self::PA1 | Self::PA2 | Self::PA3)
    }

    /// Name used in image records and logs
    pub fn name(self) -> String {
        match self {
            Self::NoAid => "NOAID".to_string(),
            Self::Enter => "ENTER".to_string(),
            Self::Clear => "CLEAR".to_string(),
            Self::PA1 => "PA1".to_string(),
            Self::PA2 => "PA2".to_string(),
            Self::PA3 => "PA3".to_string(),
            Self::PF(n) => format!("PF{n}"),
            Self::StructuredField => "SF".to_string(),
        }
    }
}
