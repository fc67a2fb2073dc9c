// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport, UnpackedOffset};
use molniya_crypto::DequeBuffer;

/// An implementation of the [intermediate transport]:
///
/// ```text
/// +----+----...----+
/// | len|  payload  |
/// +----+----...----+
///  ^^^^ 4 bytes
/// ```
///
/// The first packet of a connection is preceded by the four-byte
/// `0xeeeeeeee` initialisation tag. There is no integrity check.
///
/// [intermediate transport]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
pub struct Intermediate {
    init: bool,
}

#[allow(clippy::new_without_default)]
impl Intermediate {
    const TAG: [u8; 4] = 0xee_ee_ee_ee_u32.to_le_bytes();

    pub fn new() -> Self {
        Self { init: false }
    }
}

impl Transport for Intermediate {
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>) {
        let len = buffer.len();
        assert_eq!(len % 4, 0);

        buffer.extend_front(&(len as i32).to_le_bytes());

        if !self.init {
            buffer.extend_front(&Self::TAG);
            self.init = true;
        }
    }

    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error> {
        if buffer.len() < 4 {
            return Err(Error::MissingBytes {
                needed: 4 - buffer.len(),
            });
        }

        let len = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
        if len < 4 {
            return Err(Error::BadLen { got: len });
        }

        let len = len as usize;
        if buffer.len() < 4 + len {
            return Err(Error::MissingBytes {
                needed: 4 + len - buffer.len(),
            });
        }

        if len == 4 {
            let status = i32::from_le_bytes(buffer[4..8].try_into().unwrap());
            if status < 0 {
                return Err(Error::BadStatus {
                    status: (-status) as u32,
                });
            }
        }

        Ok(UnpackedOffset {
            data_start: 4,
            data_end: 4 + len,
            next_offset: 4 + len,
        })
    }

    fn reset(&mut self) {
        log::debug!("resetting the intermediate transport to resend its tag");
        self.init = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a new intermediate transport, and `n` bytes of input data for it.
    fn setup_pack(n: usize) -> (Intermediate, DequeBuffer<u8>) {
        let mut buffer = DequeBuffer::with_capacity(n, 8);
        buffer.extend((0..n).map(|x| (x & 0xff) as u8));
        (Intermediate::new(), buffer)
    }

    #[test]
    fn pack_empty() {
        let (mut transport, mut buffer) = setup_pack(0);
        transport.pack(&mut buffer);
        assert_eq!(&buffer[..], &[0xee, 0xee, 0xee, 0xee, 0, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn pack_non_padded() {
        let (mut transport, mut buffer) = setup_pack(7);
        transport.pack(&mut buffer);
    }

    #[test]
    fn pack_normal() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer);
        assert_eq!(&buffer[..8], &[0xee, 0xee, 0xee, 0xee, 128, 0, 0, 0]);
        assert_eq!(&buffer[8..], &orig[..]);
    }

    #[test]
    fn unpack_missing_bytes_are_exact() {
        let mut transport = Intermediate::new();
        assert_eq!(
            transport.unpack(&[1]),
            Err(Error::MissingBytes { needed: 3 })
        );
        assert_eq!(
            transport.unpack(&[8, 0, 0, 0, 1, 2]),
            Err(Error::MissingBytes { needed: 6 })
        );
    }

    #[test]
    fn unpack_normal() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer);
        let offset = transport.unpack(&buffer[4..]).unwrap(); // skip init tag
        assert_eq!(&buffer[4..][offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_bad_status() {
        let mut transport = Intermediate::new();
        let mut buffer = (4_i32).to_le_bytes().to_vec();
        buffer.extend(&(-404_i32).to_le_bytes());

        assert_eq!(
            transport.unpack(&buffer),
            Err(Error::BadStatus { status: 404 })
        );
    }
}
