//! IBM 3270 datastream and screen model
//!
//! - [`codes`] - Command, order, attribute and AID codes
//! - [`address`] - Circular buffer addresses and ranges
//! - [`field`] - The field sum type and its split/merge operations
//! - [`datastream`] - Decoding host records and encoding replies
//! - [`screen`] - The live screen that applies decoded messages
//!
//! # Example Usage
//!
//! ```rust
//! use tn3270r::lib3270::{Screen, ScreenSize};
//!
//! let mut screen = Screen::with_size(ScreenSize::MODEL_2);
//! // Erase/Write, WCC restore, SF protected, "HELLO"
//! screen
//!     .process_datastream(&[0xF5, 0xC2, 0x1D, 0x60, 0xC8, 0xC5, 0xD3, 0xD3, 0xD6])
//!     .unwrap();
//! assert!(!screen.is_keyboard_locked());
//! assert!(screen.text().starts_with(" HELLO"));
//! ```

pub mod address;
pub mod codes;
pub mod datastream;
pub mod field;
pub mod screen;

pub use address::{AddressRange, BufferAddress};
pub use codes::{AidKey, CommandCode, OrderCode};
pub use datastream::{
    decode, BufferCell, Inbound3270Message, Order, StructuredField, WriteControlCharacter,
};
pub use field::{ExtendedAttributes, Field, FieldAttributes};
pub use screen::{Screen, ScreenField, ScreenSize};
