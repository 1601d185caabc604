//! Circular buffer addressing
//!
//! A 3270 buffer is a ring of `rows * columns` cells. Every position, range
//! and distance used by the screen algorithm goes through the helpers here so
//! that wraparound is handled in one place.

use std::fmt;

/// 12-bit address code table, indexed by 6-bit value
const ADDRESS_CODES: [u8; 64] = [
    0x40, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7,
    0xC8, 0xC9, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F,
    0x50, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7,
    0xD8, 0xD9, 0x5A, 0x5B, 0x5C, 0x5D, 0x5E, 0x5F,
    0x60, 0x61, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7,
    0xE8, 0xE9, 0x6A, 0x6B, 0x6C, 0x6D, 0x6E, 0x6F,
    0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7,
    0xF8, 0xF9, 0x7A, 0x7B, 0x7C, 0x7D, 0x7E, 0x7F,
];

/// Largest buffer addressable with 12-bit coding
pub const MAX_12BIT_BUFFER: usize = 4096;

/// A position in a circular buffer of `size` cells.
///
/// The value is always `< size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferAddress {
    value: usize,
    size: usize,
}

impl BufferAddress {
    /// `None` when `value >= size` or the buffer is empty
    pub fn new(value: usize, size: usize) -> Option<Self> {
        (value < size).then_some(Self { value, size })
    }

    /// Address of `value` reduced modulo `size`
    pub fn wrapping(value: usize, size: usize) -> Self {
        let size = size.max(1);
        Self { value: value % size, size }
    }

    pub fn from_row_col(row: usize, column: usize, columns: usize, size: usize) -> Option<Self> {
        if column >= columns {
            return None;
        }
        Self::new(row * columns + column, size)
    }

    pub fn value(self) -> usize {
        self.value
    }

    pub fn size(self) -> usize {
        self.size
    }

    pub fn row(self, columns: usize) -> usize {
        self.value / columns.max(1)
    }

    pub fn column(self, columns: usize) -> usize {
        self.value % columns.max(1)
    }

    /// `(addr + n) mod size`
    pub fn advance(self, n: usize) -> Self {
        Self { value: (self.value + n % self.size) % self.size, size: self.size }
    }

    /// `(addr - n) mod size`
    pub fn retreat(self, n: usize) -> Self {
        Self { value: (self.value + self.size - n % self.size) % self.size, size: self.size }
    }

    pub fn next(self) -> Self {
        self.advance(1)
    }

    pub fn prev(self) -> Self {
        self.retreat(1)
    }

    /// `(other - self + size) mod size`
    pub fn distance_to(self, other: BufferAddress) -> usize {
        (other.value + self.size - self.value % self.size) % self.size
    }
}

impl fmt::Display for BufferAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Inclusive range `[start, end]` over the ring; `start > end` wraps past 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    start: BufferAddress,
    end: BufferAddress,
}

impl AddressRange {
    pub fn new(start: BufferAddress, end: BufferAddress) -> Self {
        Self { start, end }
    }

    /// Range from raw values, reduced modulo `size`
    pub fn of(start: usize, end: usize, size: usize) -> Self {
        Self {
            start: BufferAddress::wrapping(start, size),
            end: BufferAddress::wrapping(end, size),
        }
    }

    /// Range of `len` cells beginning at `start`; `len` must be at least 1
    pub fn starting_at(start: BufferAddress, len: usize) -> Self {
        Self { start, end: start.advance(len.max(1) - 1) }
    }

    /// Every cell of the buffer, `[0, size-1]`
    pub fn whole(size: usize) -> Self {
        let size = size.max(1);
        Self::of(0, size - 1, size)
    }

    pub fn start(&self) -> BufferAddress {
        self.start
    }

    pub fn end(&self) -> BufferAddress {
        self.end
    }

    pub fn size(&self) -> usize {
        self.start.size()
    }

    pub fn len(&self) -> usize {
        self.start.distance_to(self.end) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn wraps(&self) -> bool {
        self.start.value() > self.end.value()
    }

    /// `distance(start, p) <= distance(start, end)`
    pub fn contains(&self, p: BufferAddress) -> bool {
        self.start.distance_to(p) <= self.start.distance_to(self.end)
    }

    /// True when every cell of `other` is in `self`
    pub fn covers(&self, other: &AddressRange) -> bool {
        self.contains(other.start)
            && self.contains(other.end)
            && self.start.distance_to(other.start) <= self.start.distance_to(other.end)
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.contains(other.start) || other.contains(self.start)
    }

    /// Offset of `p` from the start of the range
    pub fn offset_of(&self, p: BufferAddress) -> usize {
        self.start.distance_to(p)
    }

    /// Addresses in buffer order from start to end
    pub fn addresses(&self) -> impl Iterator<Item = BufferAddress> + '_ {
        let start = self.start;
        (0..self.len()).map(move |i| start.advance(i))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Encode `address` for a buffer of `size` cells.
///
/// Buffers up to 4096 cells use 12-bit coding; larger ones use 14-bit binary.
pub fn encode_address(address: usize, size: usize) -> [u8; 2] {
    if size <= MAX_12BIT_BUFFER {
        [
            ADDRESS_CODES[(address >> 6) & 0x3F],
            ADDRESS_CODES[address & 0x3F],
        ]
    } else {
        [((address >> 8) & 0x3F) as u8, (address & 0xFF) as u8]
    }
}

/// Graphic form of a 6-bit value, as used for attribute bytes sent inbound
pub fn graphic_code(value: u8) -> u8 {
    ADDRESS_CODES[(value & 0x3F) as usize]
}

/// Decode a two-byte buffer address.
///
/// 14-bit binary when the two high bits of the first byte are zero, 12-bit
/// coded otherwise.
pub fn decode_address(byte1: u8, byte2: u8) -> usize {
    if byte1 & 0xC0 == 0 {
        (((byte1 & 0x3F) as usize) << 8) | byte2 as usize
    } else {
        (((byte1 & 0x3F) as usize) << 6) | (byte2 & 0x3F) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(v: usize) -> BufferAddress {
        BufferAddress::wrapping(v, 20)
    }

    #[test]
    fn test_advance_wraps() {
        assert_eq!(addr(18).advance(3).value(), 1);
        assert_eq!(addr(0).retreat(1).value(), 19);
        assert_eq!(addr(5).advance(40).value(), 5);
        assert!(BufferAddress::new(20, 20).is_none());
    }

    #[test]
    fn test_distance_forward() {
        assert_eq!(addr(3).distance_to(addr(7)), 4);
        assert_eq!(addr(17).distance_to(addr(2)), 5);
        assert_eq!(addr(9).distance_to(addr(9)), 0);
    }

    #[test]
    fn test_wrapping_range_contains() {
        let range = AddressRange::of(17, 2, 20);
        assert!(range.wraps());
        assert_eq!(range.len(), 6);
        assert!(range.contains(addr(19)));
        assert!(range.contains(addr(0)));
        assert!(range.contains(addr(2)));
        assert!(!range.contains(addr(3)));
        assert!(!range.contains(addr(16)));
    }

    #[test]
    fn test_covers_and_overlaps() {
        let outer = AddressRange::of(15, 5, 20);
        assert!(outer.covers(&AddressRange::of(18, 1, 20)));
        assert!(!outer.covers(&AddressRange::of(4, 6, 20)));
        assert!(outer.overlaps(&AddressRange::of(4, 6, 20)));
        assert!(!outer.overlaps(&AddressRange::of(6, 14, 20)));
        // A range covering the tail of another is not covered by it
        assert!(!AddressRange::of(2, 4, 20).covers(&AddressRange::of(4, 2, 20)));
    }

    #[test]
    fn test_whole_buffer_range() {
        let whole = AddressRange::whole(20);
        assert_eq!(whole.len(), 20);
        assert!(whole.contains(addr(19)));
        assert_eq!(whole.addresses().count(), 20);
    }

    #[test]
    fn test_12bit_addresses() {
        assert_eq!(encode_address(0, 1920), [0x40, 0x40]);
        assert_eq!(encode_address(80, 1920), [0xC1, 0x50]);
        assert_eq!(encode_address(1919, 1920), [0x5D, 0x7F]);
        assert_eq!(decode_address(0xC1, 0x50), 80);
        assert_eq!(decode_address(0x5D, 0x7F), 1919);
    }

    #[test]
    fn test_14bit_addresses() {
        let bytes = encode_address(5000, 27 * 132 * 2);
        assert_eq!(bytes[0] & 0xC0, 0);
        assert_eq!(decode_address(bytes[0], bytes[1]), 5000);
        assert_eq!(decode_address(0x00, 0x50), 80);
    }
}
