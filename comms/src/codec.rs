//! The conversions between messages and their wire bytes.

use std::io;

/// Encodes a message for the wire.
pub trait Serialize<'a> {
    /// Writes the owned part of `self` into `buf`.
    ///
    /// # Returns
    /// An optional borrowed tail that the sender writes right after `buf`
    /// without copying it first.
    ///
    /// # Errors
    /// `InvalidData` if `self` can't be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}

/// Decodes a message, possibly borrowing from the received bytes.
pub trait Deserialize<'a>: Sized {
    /// # Errors
    /// `InvalidData` if `buf` isn't a valid encoding.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
