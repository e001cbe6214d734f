use std::io;

/// A type that knows how to write itself into a frame.
pub trait Serialize<'a> {
    /// Writes the head of the message into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length prefix.
    ///
    /// # Returns
    /// A trailing slice to be written after `buf` without copying it, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
