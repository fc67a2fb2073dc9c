// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Generates Rust code from parsed [Type Language] definitions.
//!
//! Each concrete constructor becomes a `struct` under `types` (or
//! `functions`), and each boxed type becomes an `enum` under `enums` whose
//! `Deserializable` impl doubles as the constructor-id dispatch table.
//!
//! The generated code expects the including crate to make the core traits
//! reachable as `crate::{Serializable, Deserializable, Identifiable,
//! RemoteCall}` along with `crate::deserialize`, `crate::errors`,
//! `crate::RawVec` and `crate::Blob`, the way `molniya-tl-types` does.
//!
//! [Type Language]: https://core.telegram.org/mtproto/TL

#![deny(unsafe_code)]

mod enums;
mod grouper;
mod metadata;
mod naming;
mod structs;

use molniya_tl_parser::tl::{Category, Definition, Type};
use std::io::{self, Write};

/// Knobs controlling what exactly gets generated.
pub struct Config {
    /// Generate the `name_for_id` reverse lookup function.
    pub gen_name_for_id: bool,

    /// Implement `Deserializable` for functions too (servers want this,
    /// clients do not).
    pub deserializable_functions: bool,

    /// Derive `Debug` on everything.
    pub impl_debug: bool,

    /// Generate `From<Type> for Enum` conversions.
    pub impl_from_type: bool,

    /// Generate `TryFrom<Enum> for Type` conversions
    /// (plain `From` when there is a single constructor).
    pub impl_from_enum: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gen_name_for_id: false,
            deserializable_functions: false,
            impl_debug: true,
            impl_from_type: true,
            impl_from_enum: true,
        }
    }
}

/// Types treated specially by the serialization core rather than being
/// generated (`Bool` maps to Rust's `bool`).
const SPECIAL_CASED_TYPES: [&str; 1] = ["Bool"];

pub(crate) fn ignore_type(ty: &Type) -> bool {
    SPECIAL_CASED_TYPES.iter().any(|&x| x == ty.name)
}

/// Writes the Rust code corresponding to all `definitions` into `file`.
pub fn generate_rust_code<W: Write>(
    file: &mut W,
    definitions: &[Definition],
    layer: i32,
    config: &Config,
) -> io::Result<()> {
    writeln!(
        file,
        "/// The schema layer from which the definitions were generated.\n\
         pub const LAYER: i32 = {};\n",
        layer
    )?;

    if config.gen_name_for_id {
        writeln!(
            file,
            "/// Return the name from the `.tl` definition corresponding to the given identifier.\n\
             pub fn name_for_id(id: u32) -> &'static str {{\n    \
                 match id {{\n        \
                     0x1cb5c415 => \"vector\","
        )?;
        for def in definitions {
            writeln!(file, "        0x{:x} => \"{}\",", def.id, def.full_name())?;
        }
        writeln!(
            file,
            "        _ => \"(unknown)\",\n    \
             }}\n\
             }}\n"
        )?;
    }

    let metadata = metadata::Metadata::new(definitions);
    structs::write_category_mod(file, Category::Types, definitions, &metadata, config)?;
    structs::write_category_mod(file, Category::Functions, definitions, &metadata, config)?;
    enums::write_enums_mod(file, definitions, &metadata, config)?;

    Ok(())
}
