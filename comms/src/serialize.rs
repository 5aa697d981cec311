/// Writes a message into a byte buffer.
pub trait Serialize<'a> {
    /// Appends the serialized header and body of `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to write into.
    ///
    /// # Returns
    /// An optional trailing slice that should be written right after `buf`
    /// without being copied into it.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
