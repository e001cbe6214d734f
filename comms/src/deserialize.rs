use std::io;

/// A type that can be borrowed out of a received frame.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
