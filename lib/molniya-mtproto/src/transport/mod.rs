// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The [MTProto transports]: the framing disciplines that pack serialized
//! messages for transmission over a byte stream such as TCP.
//!
//! [MTProto transports]: https://core.telegram.org/mtproto#mtproto-transport
mod abridged;
mod full;
mod intermediate;

pub use abridged::Abridged;
pub use full::Full;
pub use intermediate::Intermediate;

use molniya_crypto::DequeBuffer;
use std::fmt;

/// The error type reported by the different transports.
///
/// Only `MissingBytes` allows the connection to continue; every other
/// variant means the stream can no longer be trusted.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Not enough bytes were provided; exactly `needed` more are
    /// required to make progress.
    MissingBytes {
        /// How many further bytes must be read before retrying.
        needed: usize,
    },

    /// The length is either too short or too long to represent a valid
    /// packet.
    BadLen { got: i32 },

    /// The sequence number received does not match the expected value.
    BadSeq { expected: i32, got: i32 },

    /// The checksum of the packet does not match its expected value.
    BadCrc { expected: u32, got: u32 },

    /// The server sent a negative length in place of a packet, which is
    /// how transport-level errors are reported. Status `404` means the
    /// authorization key is not usable, which is never recoverable.
    BadStatus { status: u32 },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: ")?;
        match self {
            Error::MissingBytes { needed } => write!(f, "need {} more bytes", needed),
            Error::BadLen { got } => write!(f, "bad len (got {})", got),
            Error::BadSeq { expected, got } => {
                write!(f, "bad seq (expected {}, got {})", expected, got)
            }
            Error::BadCrc { expected, got } => {
                write!(f, "bad crc (expected {}, got {})", expected, got)
            }
            Error::BadStatus { status } => write!(f, "bad status (server sent {})", status),
        }
    }
}

/// The region of a buffer occupied by one unpacked packet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnpackedOffset {
    /// Offset where the payload starts.
    pub data_start: usize,

    /// Offset one past the end of the payload.
    pub data_end: usize,

    /// Offset where the next packet would start.
    pub next_offset: usize,
}

/// A packet framing discipline over a reliable byte stream.
pub trait Transport {
    /// Packs the entire contents of `buffer` in place as one outbound
    /// packet, prepending whatever header the framing needs (and the
    /// one-time initialisation tag on first use).
    ///
    /// Panics if the buffer's length is not divisible by 4.
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>);

    /// Attempts to peel one packet from the front of `buffer`.
    ///
    /// On short input, fails with [`Error::MissingBytes`] carrying the
    /// exact shortfall so the caller can await precisely that many bytes.
    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error>;

    /// Forget all per-connection state, ready for use on a fresh stream.
    fn reset(&mut self);
}
