// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Serialization of values according to the [Binary Data Serialization].
///
/// Serialization is infallible: it writes into any in-memory byte sink.
///
/// [Binary Data Serialization]: https://core.telegram.org/mtproto/serialize
pub trait Serializable {
    /// Serializes the body into the given buffer.
    fn serialize<B: Extend<u8>>(&self, buf: &mut B);

    /// Convenience function to serialize the object into a new buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.serialize(&mut buffer);
        buffer
    }
}

/// Serializes the boolean according to the following definitions:
///
/// * `false` is serialized as `boolFalse#bc799737 = Bool;`.
/// * `true` is serialized as `boolTrue#997275b5 = Bool;`.
///
/// # Examples
///
/// ```
/// use molniya_tl_types::Serializable;
///
/// assert_eq!(true.to_bytes(), [0xb5, 0x75, 0x72, 0x99]);
/// assert_eq!(false.to_bytes(), [0x37, 0x97, 0x79, 0xbc]);
/// ```
impl Serializable for bool {
    #[allow(clippy::unreadable_literal)]
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        if *self { 0x997275b5u32 } else { 0xbc799737u32 }.serialize(buf)
    }
}

/// Serializes the 32-bit signed integer according to `int ? = Int;`.
///
/// # Examples
///
/// ```
/// use molniya_tl_types::Serializable;
///
/// assert_eq!(1i32.to_bytes(), [0x01, 0x00, 0x00, 0x00]);
/// assert_eq!((-1i32).to_bytes(), [0xff, 0xff, 0xff, 0xff]);
/// ```
impl Serializable for i32 {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        buf.extend(self.to_le_bytes())
    }
}

impl Serializable for u32 {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes the 64-bit signed integer according to `long ? = Long;`.
impl Serializable for i64 {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes the 128-bit integer according to `int128 4*[ int ] = Int128;`
/// (the raw 16 bytes, no length or padding).
impl Serializable for [u8; 16] {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        buf.extend(*self)
    }
}

/// Serializes the 256-bit integer according to `int256 8*[ int ] = Int256;`.
impl Serializable for [u8; 32] {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        buf.extend(*self)
    }
}

/// Serializes the floating point according to `double ? = Double;`.
impl Serializable for f64 {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes a boxed vector according to
/// `vector#1cb5c415 {t:Type} # [ t ] = Vector t;`.
///
/// # Examples
///
/// ```
/// use molniya_tl_types::Serializable;
///
/// assert_eq!(Vec::<i32>::new().to_bytes(), [0x15, 0xc4, 0xb5, 0x1c, 0x0, 0x0, 0x0, 0x0]);
/// assert_eq!(vec![0x7f_i32].to_bytes(),
///            [0x15, 0xc4, 0xb5, 0x1c, 0x1, 0x0, 0x0, 0x0, 0x7f, 0x0, 0x0, 0x0]);
/// ```
impl<T: Serializable> Serializable for Vec<T> {
    #[allow(clippy::unreadable_literal)]
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        0x1cb5c415u32.serialize(buf);
        (self.len() as i32).serialize(buf);
        for x in self {
            x.serialize(buf);
        }
    }
}

/// Serializes a bare vector (no constructor id prefix).
///
/// # Examples
///
/// ```
/// use molniya_tl_types::{RawVec, Serializable};
///
/// assert_eq!(RawVec(vec![0x7f_i32]).to_bytes(), [0x1, 0x0, 0x0, 0x0, 0x7f, 0x0, 0x0, 0x0]);
/// ```
impl<T: Serializable> Serializable for crate::RawVec<T> {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        (self.0.len() as i32).serialize(buf);
        for x in self.0.iter() {
            x.serialize(buf);
        }
    }
}

/// Serializes a UTF-8 string as a byte-string (`string ? = String;`).
impl Serializable for String {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        self.as_bytes().serialize(buf)
    }
}

impl Serializable for Vec<u8> {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        (&self[..]).serialize(buf)
    }
}

/// Serializes a byte-string according to `string ? = String;`:
/// a single length byte below 254, otherwise `0xfe` followed by the
/// 24-bit length; the total is zero-padded to 4-byte alignment.
///
/// # Examples
///
/// ```
/// use molniya_tl_types::Serializable;
///
/// assert_eq!((&[0x7f_u8][..]).to_bytes(), &[0x01, 0x7f, 0x00, 0x00]);
/// ```
impl Serializable for &[u8] {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        let len = if self.len() < 254 {
            buf.extend([self.len() as u8]);
            self.len() + 1
        } else {
            buf.extend([
                254,
                (self.len() & 0xff) as u8,
                ((self.len() >> 8) & 0xff) as u8,
                ((self.len() >> 16) & 0xff) as u8,
            ]);
            self.len()
        };

        buf.extend(self.iter().copied());
        buf.extend((0..(4 - (len % 4)) % 4).map(|_| 0u8));
    }
}

/// Serializes an unparsed blob verbatim (the value is assumed to already
/// be a valid serialization).
impl Serializable for crate::Blob {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        buf.extend(self.0.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialized_bytes_len(len: usize) -> usize {
        vec![0u8; len].to_bytes().len()
    }

    #[test]
    fn check_bytes_padding() {
        // The header switches from 1 to 4 bytes exactly at 254, and the
        // result is always padded to a multiple of 4.
        assert_eq!(serialized_bytes_len(0), 4);
        assert_eq!(serialized_bytes_len(1), 4);
        assert_eq!(serialized_bytes_len(3), 4);
        assert_eq!(serialized_bytes_len(4), 8);
        assert_eq!(serialized_bytes_len(253), 256);
        assert_eq!(serialized_bytes_len(254), 260);
        assert_eq!(serialized_bytes_len(255), 260);
        assert_eq!(serialized_bytes_len(1024), 1028);
    }

    #[test]
    fn check_large_bytes_header() {
        let data = vec![0x7f_u8; 300];
        let bytes = data.to_bytes();
        assert_eq!(&bytes[..4], &[254, 44, 1, 0]);
        assert_eq!(&bytes[4..304], &data[..]);
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn check_string_padding() {
        assert_eq!("".to_string().to_bytes(), [0x00, 0x00, 0x00, 0x00]);
        assert_eq!("Hi".to_string().to_bytes(), [0x02, b'H', b'i', 0x00]);
        assert_eq!("Hi!".to_string().to_bytes(), [0x03, b'H', b'i', b'!']);
    }
}
