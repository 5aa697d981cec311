use std::io;

/// Reads a message out of a byte buffer, possibly borrowing from it.
pub trait Deserialize<'a>: Sized {
    /// Parses `buf` into `Self`.
    ///
    /// # Arguments
    /// * `buf` - The received message body, without the length prefix.
    ///
    /// # Returns
    /// The parsed message or an `InvalidData` io error.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
