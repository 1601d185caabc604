//! EBCDIC code page 037 translation
//!
//! The datastream carries character data in EBCDIC; the screen model holds
//! Unicode `char`s. Translation happens only at the codec boundary.

use once_cell::sync::Lazy;

/// CP037 EBCDIC to Unicode, indexed by EBCDIC byte
const EBCDIC_CP037_TO_ASCII: [char; 256] = [
    // 0x00-0x0F: Control characters
    '\x00', '\x01', '\x02', '\x03', '\u{009C}', '\t', '\u{0086}', '\x7F',
    '\u{0097}', '\u{008D}', '\u{008E}', '\x0B', '\x0C', '\r', '\x0E', '\x0F',
    // 0x10-0x1F: Control characters
    '\x10', '\x11', '\x12', '\x13', '\u{009D}', '\u{0085}', '\x08', '\u{0087}',
    '\x18', '\x19', '\u{0092}', '\u{008F}', '\x1C', '\x1D', '\x1E', '\x1F',
    // 0x20-0x2F: Control characters and special
    '\u{0080}', '\u{0081}', '\u{0082}', '\u{0083}', '\u{0084}', '\n', '\x17', '\x1B',
    '\u{0088}', '\u{0089}', '\u{008A}', '\u{008B}', '\u{008C}', '\x05', '\x06', '\x07',
    // 0x30-0x3F: Control characters
    '\u{0090}', '\u{0091}', '\x16', '\u{0093}', '\u{0094}', '\u{0095}', '\u{0096}', '\x04',
    '\u{0098}', '\u{0099}', '\u{009A}', '\u{009B}', '\x14', '\x15', '\u{009E}', '\x1A',
    // 0x40-0x4F: Space and special characters
    ' ', '\u{00A0}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E1}', '\u{00E3}', '\u{00E5}',
    '\u{00E7}', '\u{00F1}', '\u{00A2}', '.', '<', '(', '+', '|',
    // 0x50-0x5F: Ampersand and special characters
    '&', '\u{00E9}', '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00ED}', '\u{00EE}', '\u{00EF}',
    '\u{00EC}', '\u{00DF}', '!', '$', '*', ')', ';', '\u{00AC}',
    // 0x60-0x6F: Dash and special characters
    '-', '/', '\u{00C2}', '\u{00C4}', '\u{00C0}', '\u{00C1}', '\u{00C3}', '\u{00C5}',
    '\u{00C7}', '\u{00D1}', '\u{00A6}', ',', '%', '_', '>', '?',
    // 0x70-0x7F: Special characters and quotes
    '\u{00F8}', '\u{00C9}', '\u{00CA}', '\u{00CB}', '\u{00C8}', '\u{00CD}', '\u{00CE}', '\u{00CF}',
    '\u{00CC}', '`', ':', '#', '@', '\'', '=', '"',
    // 0x80-0x8F: Special character and lowercase a-i
    '\u{00D8}', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', '\u{00AB}', '\u{00BB}', '\u{00F0}', '\u{00FD}', '\u{00FE}', '\u{00B1}',
    // 0x90-0x9F: Degree symbol and lowercase j-r
    '\u{00B0}', 'j', 'k', 'l', 'm', 'n', 'o', 'p',
    'q', 'r', '\u{00AA}', '\u{00BA}', '\u{00E6}', '\u{00B8}', '\u{00C6}', '\u{00A4}',
    // 0xA0-0xAF: Micro sign and lowercase s-z
    '\u{00B5}', '~', 's', 't', 'u', 'v', 'w', 'x',
    'y', 'z', '\u{00A1}', '\u{00BF}', '\u{00D0}', '\u{00DD}', '\u{00DE}', '\u{00AE}',
    // 0xB0-0xBF: Caret and special characters
    '^', '\u{00A3}', '\u{00A5}', '\u{00B7}', '\u{00A9}', '\u{00A7}', '\u{00B6}', '\u{00BC}',
    '\u{00BD}', '\u{00BE}', '[', ']', '\u{00AF}', '\u{00A8}', '\u{00B4}', '\u{00D7}',
    // 0xC0-0xCF: Left brace and uppercase A-I
    '{', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', '\u{00AD}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00F3}', '\u{00F5}',
    // 0xD0-0xDF: Right brace and uppercase J-R
    '}', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    'Q', 'R', '\u{00B9}', '\u{00FB}', '\u{00FC}', '\u{00F9}', '\u{00FA}', '\u{00FF}',
    // 0xE0-0xEF: Backslash and uppercase S-Z
    '\\', '\u{00F7}', 'S', 'T', 'U', 'V', 'W', 'X',
    'Y', 'Z', '\u{00B2}', '\u{00D4}', '\u{00D6}', '\u{00D2}', '\u{00D3}', '\u{00D5}',
    // 0xF0-0xFF: Digits 0-9 and special characters
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', '\u{00B3}', '\u{00DB}', '\u{00DC}', '\u{00D9}', '\u{00DA}', '\u{009F}',
];

/// Reverse of the CP037 table for every char it produces
static UNICODE_TO_CP037: Lazy<std::collections::HashMap<char, u8>> = Lazy::new(|| {
    EBCDIC_CP037_TO_ASCII
        .iter()
        .enumerate()
        .map(|(byte, &ch)| (ch, byte as u8))
        .collect()
});

/// EBCDIC space
pub const EBCDIC_SPACE: u8 = 0x40;

/// Translate one EBCDIC byte
pub fn ebcdic_to_char(byte: u8) -> char {
    EBCDIC_CP037_TO_ASCII[byte as usize]
}

/// Translate one char, `None` when CP037 has no code point for it
pub fn char_to_ebcdic(ch: char) -> Option<u8> {
    UNICODE_TO_CP037.get(&ch).copied()
}

/// Translate an EBCDIC run into chars
pub fn decode(bytes: &[u8]) -> Vec<char> {
    bytes.iter().map(|&b| ebcdic_to_char(b)).collect()
}

/// Translate chars into EBCDIC, substituting a space for unmapped chars
pub fn encode(chars: impl IntoIterator<Item = char>) -> Vec<u8> {
    chars
        .into_iter()
        .map(|ch| char_to_ebcdic(ch).unwrap_or(EBCDIC_SPACE))
        .collect()
}

/// True when every char of `text` has an EBCDIC code point
pub fn is_encodable(text: &str) -> bool {
    text.chars().all(|ch| char_to_ebcdic(ch).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_digits() {
        assert_eq!(ebcdic_to_char(0xC1), 'A');
        assert_eq!(ebcdic_to_char(0x81), 'a');
        assert_eq!(ebcdic_to_char(0xF0), '0');
        assert_eq!(ebcdic_to_char(0x40), ' ');
        assert_eq!(char_to_ebcdic('Z'), Some(0xE9));
        assert_eq!(char_to_ebcdic('9'), Some(0xF9));
    }

    #[test]
    fn test_table_is_a_bijection() {
        for byte in 0..=255u8 {
            assert_eq!(char_to_ebcdic(ebcdic_to_char(byte)), Some(byte), "byte 0x{byte:02X}");
        }
    }

    #[test]
    fn test_encode_substitutes_unmapped() {
        assert_eq!(encode("A\u{4E2D}".chars()), vec![0xC1, EBCDIC_SPACE]);
        assert!(!is_encodable("\u{4E2D}"));
        assert!(is_encodable("LOGON ID"));
        assert_eq!(decode(&[0xC8, 0x89]), vec!['H', 'i']);
    }
}
