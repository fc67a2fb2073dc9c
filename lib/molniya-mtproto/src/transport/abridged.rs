// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport, UnpackedOffset};
use molniya_crypto::DequeBuffer;

/// The lightest MTProto transport: an implementation of the
/// [abridged transport].
///
/// The length header is a single byte counting 4-byte words; lengths of
/// 127 words or more spill into a 4-byte header whose first byte is
/// `0x7f`. The first packet of a connection is preceded by the one-byte
/// `0xef` initialisation tag.
///
/// ```text
/// +-+----...----+    +-+---+----...----+
/// |L|  payload  | or |7f| L |  payload  |
/// +-+----...----+    +-+---+----...----+
/// ```
///
/// There is no integrity check; that is delegated to the MTProto
/// envelope itself.
///
/// [abridged transport]: https://core.telegram.org/mtproto/mtproto-transports#abridged
pub struct Abridged {
    init: bool,
}

#[allow(clippy::new_without_default)]
impl Abridged {
    pub fn new() -> Self {
        Self { init: false }
    }
}

impl Transport for Abridged {
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>) {
        let len = buffer.len();
        assert_eq!(len % 4, 0);

        let len = len / 4;
        if len < 127 {
            buffer.extend_front(&[len as u8]);
        } else {
            buffer.extend_front(&(0x7f | ((len as u32) << 8)).to_le_bytes());
        }

        if !self.init {
            buffer.extend_front(&[0xef]);
            self.init = true;
        }
    }

    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error> {
        if buffer.is_empty() {
            return Err(Error::MissingBytes { needed: 1 });
        }

        let header_len;
        let len = buffer[0];
        let len = if len < 127 {
            header_len = 1;
            len as i32
        } else {
            if buffer.len() < 4 {
                return Err(Error::MissingBytes {
                    needed: 4 - buffer.len(),
                });
            }

            header_len = 4;
            i32::from_le_bytes(buffer[0..4].try_into().unwrap()) >> 8
        };

        let len = header_len + (len as usize) * 4;
        if buffer.len() < len {
            return Err(Error::MissingBytes {
                needed: len - buffer.len(),
            });
        }

        // A one-word packet is how the server reports transport errors.
        if len - header_len == 4 {
            let status = i32::from_le_bytes(buffer[header_len..header_len + 4].try_into().unwrap());
            if status < 0 {
                return Err(Error::BadStatus {
                    status: (-status) as u32,
                });
            }
        }

        Ok(UnpackedOffset {
            data_start: header_len,
            data_end: len,
            next_offset: len,
        })
    }

    fn reset(&mut self) {
        self.init = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a new abridged transport, and `n` bytes of input data for it.
    fn setup_pack(n: usize) -> (Abridged, DequeBuffer<u8>) {
        let mut buffer = DequeBuffer::with_capacity(n, 8);
        buffer.extend((0..n).map(|x| (x & 0xff) as u8));
        (Abridged::new(), buffer)
    }

    #[test]
    fn pack_empty() {
        let (mut transport, mut buffer) = setup_pack(0);
        transport.pack(&mut buffer);
        assert_eq!(&buffer[..], &[0xef, 0]);
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
        assert_eq!(&buffer[..2], &[0xef, 32]);
        assert_eq!(&buffer[2..], &orig[..]);
    }

    #[test]
    fn pack_large() {
        // 508 bytes is the largest one-byte length (127 words).
        let (mut transport, mut buffer) = setup_pack(508);
        let orig = buffer.clone();
        transport.pack(&mut buffer);
        assert_eq!(&buffer[..5], &[0xef, 0x7f, 0x7f, 0, 0]);
        assert_eq!(&buffer[5..], &orig[..]);
    }

    #[test]
    fn unpack_missing_bytes_are_exact() {
        let mut transport = Abridged::new();
        assert_eq!(
            transport.unpack(&[]),
            Err(Error::MissingBytes { needed: 1 })
        );
        assert_eq!(
            transport.unpack(&[2]),
            Err(Error::MissingBytes { needed: 8 })
        );
        assert_eq!(
            transport.unpack(&[0x7f, 0x7f]),
            Err(Error::MissingBytes { needed: 2 })
        );
        assert_eq!(
            transport.unpack(&[0x7f, 0x7f, 0, 0]),
            Err(Error::MissingBytes { needed: 508 })
        );
    }

    #[test]
    fn unpack_normal() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer);
        let offset = transport.unpack(&buffer[1..]).unwrap(); // skip init byte
        assert_eq!(&buffer[1..][offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_large() {
        let (mut transport, mut buffer) = setup_pack(508);
        let orig = buffer.clone();
        transport.pack(&mut buffer);
        let offset = transport.unpack(&buffer[1..]).unwrap();
        assert_eq!(offset.next_offset, 512);
        assert_eq!(&buffer[1..][offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_two_at_once() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();

        let mut two_buffer = Vec::new();
        transport.pack(&mut buffer);
        two_buffer.extend(&buffer[1..]); // init byte
        let single_size = two_buffer.len();

        buffer = orig.clone();
        transport.pack(&mut buffer);
        two_buffer.extend(&buffer[..]);

        let offset = transport.unpack(&two_buffer).unwrap();
        assert_eq!(&two_buffer[offset.data_start..offset.data_end], &orig[..]);
        assert_eq!(offset.next_offset, single_size);

        let offset = transport.unpack(&two_buffer[single_size..]).unwrap();
        assert_eq!(
            &two_buffer[single_size..][offset.data_start..offset.data_end],
            &orig[..]
        );
    }

    #[test]
    fn unpack_bad_status() {
        let mut transport = Abridged::new();
        let mut buffer = vec![1u8];
        buffer.extend(&(-404_i32).to_le_bytes());

        assert_eq!(
            transport.unpack(&buffer),
            Err(Error::BadStatus { status: 404 })
        );
    }

    #[test]
    fn reset_resends_init() {
        let (mut transport, mut buffer) = setup_pack(4);
        transport.pack(&mut buffer);
        assert_eq!(buffer[0], 0xef);

        let mut buffer = DequeBuffer::with_capacity(4, 8);
        buffer.extend([0u8; 4]);
        transport.pack(&mut buffer);
        assert_ne!(buffer[0], 0xef);

        transport.reset();
        let mut buffer = DequeBuffer::with_capacity(4, 8);
        buffer.extend([0u8; 4]);
        transport.pack(&mut buffer);
        assert_eq!(buffer[0], 0xef);
    }
}
