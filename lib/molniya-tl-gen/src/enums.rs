// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Generation of one `enum` per boxed type. Their `Deserializable` impls
//! are the constructor-id dispatch tables of the schema.

use crate::metadata::Metadata;
use crate::naming::{pascal_name, struct_path, variant_name};
use crate::{grouper, Config};
use molniya_tl_parser::tl::{Definition, Type};
use std::io::{self, Write};

/// Writes the enumeration listing all constructors of a type:
///
/// ```ignore
/// pub enum Name {
///     Variant(crate::types::Name),
/// }
/// ```
fn write_enum<W: Write>(
    file: &mut W,
    indent: &str,
    ty: &Type,
    metadata: &Metadata,
    config: &Config,
) -> io::Result<()> {
    if config.impl_debug {
        writeln!(file, "{}#[derive(Debug)]", indent)?;
    }
    writeln!(file, "{}#[derive(Clone, PartialEq)]", indent)?;
    writeln!(file, "{}pub enum {} {{", indent, pascal_name(&ty.name))?;
    for d in metadata.defs_with_type(ty) {
        if d.params.is_empty() {
            writeln!(file, "{}    {},", indent, variant_name(d))?;
        } else if metadata.is_recursive_def(d) {
            // Indirection bounds the size of self-referential variants.
            writeln!(
                file,
                "{}    {}(Box<{}>),",
                indent,
                variant_name(d),
                struct_path(d)
            )?;
        } else {
            writeln!(
                file,
                "{}    {}({}),",
                indent,
                variant_name(d),
                struct_path(d)
            )?;
        }
    }
    writeln!(file, "{}}}", indent)?;
    Ok(())
}

/// Writes the `impl Serializable`: each variant writes its constructor id
/// followed by the constructor body.
fn write_serializable<W: Write>(
    file: &mut W,
    indent: &str,
    ty: &Type,
    metadata: &Metadata,
) -> io::Result<()> {
    writeln!(
        file,
        "{}impl crate::Serializable for {} {{",
        indent,
        pascal_name(&ty.name)
    )?;
    writeln!(
        file,
        "{}    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {{",
        indent
    )?;
    writeln!(file, "{}        use crate::Identifiable;", indent)?;
    writeln!(file, "{}        match self {{", indent)?;
    for d in metadata.defs_with_type(ty) {
        if d.params.is_empty() {
            writeln!(
                file,
                "{}            Self::{} => {}::CONSTRUCTOR_ID.serialize(buf),",
                indent,
                variant_name(d),
                struct_path(d)
            )?;
        } else {
            writeln!(
                file,
                "{}            Self::{}(x) => {{",
                indent,
                variant_name(d)
            )?;
            writeln!(
                file,
                "{}                {}::CONSTRUCTOR_ID.serialize(buf);",
                indent,
                struct_path(d)
            )?;
            writeln!(file, "{}                x.serialize(buf);", indent)?;
            writeln!(file, "{}            }}", indent)?;
        }
    }
    writeln!(file, "{}        }}", indent)?;
    writeln!(file, "{}    }}", indent)?;
    writeln!(file, "{}}}", indent)?;
    Ok(())
}

/// Writes the `impl Deserializable`: reads a constructor id and dispatches
/// to the matching constructor, or fails with `UnexpectedConstructor`.
fn write_deserializable<W: Write>(
    file: &mut W,
    indent: &str,
    ty: &Type,
    metadata: &Metadata,
) -> io::Result<()> {
    writeln!(
        file,
        "{}impl crate::Deserializable for {} {{",
        indent,
        pascal_name(&ty.name)
    )?;
    writeln!(
        file,
        "{}    fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {{",
        indent
    )?;
    writeln!(file, "{}        use crate::Identifiable;", indent)?;
    writeln!(file, "{}        let id = u32::deserialize(buf)?;", indent)?;
    writeln!(file, "{}        Ok(match id {{", indent)?;
    for d in metadata.defs_with_type(ty) {
        if d.params.is_empty() {
            writeln!(
                file,
                "{}            {}::CONSTRUCTOR_ID => Self::{},",
                indent,
                struct_path(d),
                variant_name(d)
            )?;
        } else if metadata.is_recursive_def(d) {
            writeln!(
                file,
                "{}            {}::CONSTRUCTOR_ID => Self::{}(Box::new({}::deserialize(buf)?)),",
                indent,
                struct_path(d),
                variant_name(d),
                struct_path(d)
            )?;
        } else {
            writeln!(
                file,
                "{}            {}::CONSTRUCTOR_ID => Self::{}({}::deserialize(buf)?),",
                indent,
                struct_path(d),
                variant_name(d),
                struct_path(d)
            )?;
        }
    }
    writeln!(
        file,
        "{}            _ => return Err(crate::deserialize::Error::UnexpectedConstructor {{ id }}),",
        indent
    )?;
    writeln!(file, "{}        }})", indent)?;
    writeln!(file, "{}    }}", indent)?;
    writeln!(file, "{}}}", indent)?;
    Ok(())
}

/// Writes the `From<Type> for Enum` conversions.
fn write_impl_from<W: Write>(
    file: &mut W,
    indent: &str,
    ty: &Type,
    metadata: &Metadata,
) -> io::Result<()> {
    for def in metadata.defs_with_type(ty) {
        writeln!(
            file,
            "{}impl From<{}> for {} {{",
            indent,
            struct_path(def),
            pascal_name(&ty.name),
        )?;
        if def.params.is_empty() {
            writeln!(
                file,
                "{}    fn from(_x: {}) -> Self {{\n\
                 {}        Self::{}\n\
                 {}    }}",
                indent,
                struct_path(def),
                indent,
                variant_name(def),
                indent
            )?;
        } else {
            writeln!(
                file,
                "{}    fn from(x: {}) -> Self {{\n\
                 {}        Self::{}({}x{})\n\
                 {}    }}",
                indent,
                struct_path(def),
                indent,
                variant_name(def),
                if metadata.is_recursive_def(def) {
                    "Box::new("
                } else {
                    ""
                },
                if metadata.is_recursive_def(def) {
                    ")"
                } else {
                    ""
                },
                indent
            )?;
        }
        writeln!(file, "{}}}", indent)?;
    }
    Ok(())
}

/// Writes an entire boxed type as Rust code (`enum` and `impl`s).
fn write_definition<W: Write>(
    file: &mut W,
    indent: &str,
    ty: &Type,
    metadata: &Metadata,
    config: &Config,
) -> io::Result<()> {
    write_enum(file, indent, ty, metadata, config)?;
    write_serializable(file, indent, ty, metadata)?;
    write_deserializable(file, indent, ty, metadata)?;
    if config.impl_from_type {
        write_impl_from(file, indent, ty, metadata)?;
    }
    Ok(())
}

/// Write the entire module dedicated to enums.
pub(crate) fn write_enums_mod<W: Write>(
    file: &mut W,
    definitions: &[Definition],
    metadata: &Metadata,
    config: &Config,
) -> io::Result<()> {
    writeln!(
        file,
        "/// Boxed types, each represented by an `enum` over its constructors.\n\
         #[allow(clippy::large_enum_variant, clippy::unreadable_literal)]\n\
         pub mod enums {{"
    )?;

    let grouped = grouper::group_types_by_ns(definitions);
    let mut sorted_keys: Vec<&String> = grouped.keys().collect();
    sorted_keys.sort();
    for key in sorted_keys.into_iter() {
        let indent = if key.is_empty() {
            "    "
        } else {
            writeln!(file, "    #[allow(clippy::large_enum_variant)]")?;
            writeln!(file, "    pub mod {} {{", key)?;
            "        "
        };

        for ty in grouped[key].iter() {
            write_definition(file, indent, ty, metadata, config)?;
        }

        if !key.is_empty() {
            writeln!(file, "    }}")?;
        }
    }

    writeln!(file, "}}")
}
