// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rust definitions for the types and functions of the schema files under
//! `tl/`, in the form of `struct`s and `enum`s generated at build time.
//!
//! Everything implements [`Serializable`]; types also implement
//! [`Deserializable`]. Each boxed type's enum doubles as the dispatch
//! table from constructor id to deserializer, and [`name_for_id`] maps
//! identifiers back to their schema names for diagnostics.
//!
//! # Features
//!
//! * `tl-api`: generate code for `tl/api.tl` (default).
//! * `tl-mtproto`: generate code for `tl/mtproto.tl`.
//! * `deserializable-functions`: implement [`Deserializable`] for
//!   [`functions`] too, which only servers need.

#![deny(unsafe_code)]
pub mod deserialize;
pub mod errors;
mod generated;
pub mod serialize;

pub use deserialize::{Cursor, Deserializable};
pub use generated::{enums, functions, name_for_id, types, LAYER};
pub use serialize::Serializable;

/// The concrete type of a vector, that is, `vector` as opposed to the
/// boxed type `Vector`. The bare form lacks the `0x1cb5c415` prefix.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// An unparsed blob of serialized data.
///
/// Used for generic parameters (`!X`), which pass an already-serialized
/// value through without interpretation.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// Anything implementing this trait is identifiable by both ends of a
/// connection when performing Remote Procedure Calls and transmitting
/// objects.
pub trait Identifiable {
    /// The unique identifier for the type.
    const CONSTRUCTOR_ID: u32;
}

/// Structures implementing this trait are suitable for use as Remote
/// Procedure Calls, and know the type of the values they return.
pub trait RemoteCall: Serializable {
    /// The type of the "return" value coming from the other end of the
    /// connection.
    type Return: Deserializable;
}
