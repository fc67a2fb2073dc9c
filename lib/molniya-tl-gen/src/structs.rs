// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Generation of one `struct` per concrete constructor or function.

use crate::metadata::Metadata;
use crate::naming::{
    field_name, field_type, field_type_expr, pascal_name, rust_type, struct_path, type_path,
    variant_name,
};
use crate::{grouper, Config};
use molniya_tl_parser::tl::{Category, Definition, ParameterType};
use std::io::{self, Write};

/// Defines the `struct` corresponding to the definition:
///
/// ```ignore
/// pub struct Name {
///     pub field: Type,
/// }
/// ```
fn write_struct<W: Write>(
    file: &mut W,
    indent: &str,
    def: &Definition,
    config: &Config,
) -> io::Result<()> {
    if config.impl_debug {
        writeln!(file, "{}#[derive(Debug)]", indent)?;
    }
    writeln!(file, "{}#[derive(Clone, PartialEq)]", indent)?;

    if def.params.is_empty() {
        writeln!(file, "{}pub struct {};", indent, pascal_name(&def.name))?;
        return Ok(());
    }

    writeln!(file, "{}pub struct {} {{", indent, pascal_name(&def.name))?;
    for param in def.params.iter() {
        match param.ty {
            // The flags bitfield is computed on the fly, never stored.
            ParameterType::Flags => {}
            ParameterType::Normal { .. } => {
                writeln!(
                    file,
                    "{}    pub {}: {},",
                    indent,
                    field_name(param),
                    field_type(param)
                )?;
            }
        }
    }
    writeln!(file, "{}}}", indent)?;
    Ok(())
}

/// Defines the `impl Identifiable` corresponding to the definition.
fn write_identifiable<W: Write>(file: &mut W, indent: &str, def: &Definition) -> io::Result<()> {
    writeln!(
        file,
        "{}impl crate::Identifiable for {} {{\n\
         {}    const CONSTRUCTOR_ID: u32 = 0x{:x};\n\
         {}}}",
        indent,
        pascal_name(&def.name),
        indent,
        def.id,
        indent
    )?;
    Ok(())
}

/// Defines the `impl Serializable` corresponding to the definition.
fn write_serializable<W: Write>(file: &mut W, indent: &str, def: &Definition) -> io::Result<()> {
    writeln!(
        file,
        "{}impl crate::Serializable for {} {{",
        indent,
        pascal_name(&def.name)
    )?;

    let body_is_empty = def.category == Category::Types && def.params.is_empty();
    writeln!(
        file,
        "{}    fn serialize<B: Extend<u8>>(&self, {}buf: &mut B) {{",
        indent,
        if body_is_empty { "_" } else { "" }
    )?;

    if def.category == Category::Functions {
        // Functions are always serialized boxed.
        writeln!(
            file,
            "{}        <Self as crate::Identifiable>::CONSTRUCTOR_ID.serialize(buf);",
            indent
        )?;
    }

    for param in def.params.iter() {
        write!(file, "{}        ", indent)?;
        match &param.ty {
            ParameterType::Flags => {
                write!(file, "(0u32")?;
                for p in def.params.iter() {
                    if let ParameterType::Normal {
                        ty,
                        flag: Some(flag),
                    } = &p.ty
                    {
                        if flag.name == param.name {
                            write!(
                                file,
                                " | if self.{}{} {{ {} }} else {{ 0 }}",
                                field_name(p),
                                if ty.name == "true" { "" } else { ".is_some()" },
                                1u32 << flag.index
                            )?;
                        }
                    }
                }
                writeln!(file, ").serialize(buf);")?;
            }
            ParameterType::Normal { ty, flag } => {
                // `true` carries no body; its flag bit is the whole value.
                if ty.name != "true" {
                    if flag.is_some() {
                        writeln!(file, "if let Some(ref x) = self.{} {{", field_name(param))?;
                        writeln!(file, "{}            x.serialize(buf);", indent)?;
                        writeln!(file, "{}        }}", indent)?;
                    } else {
                        writeln!(file, "self.{}.serialize(buf);", field_name(param))?;
                    }
                }
            }
        }
    }

    writeln!(file, "{}    }}", indent)?;
    writeln!(file, "{}}}", indent)?;
    Ok(())
}

/// Defines the `impl Deserializable` corresponding to the definition.
fn write_deserializable<W: Write>(
    file: &mut W,
    indent: &str,
    def: &Definition,
) -> io::Result<()> {
    writeln!(
        file,
        "{}impl crate::Deserializable for {} {{",
        indent,
        pascal_name(&def.name)
    )?;
    writeln!(
        file,
        "{}    fn deserialize({}buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {{",
        indent,
        if def.params.is_empty() { "_" } else { "" }
    )?;

    for (i, param) in def.params.iter().enumerate() {
        write!(file, "{}        ", indent)?;
        match &param.ty {
            ParameterType::Flags => {
                writeln!(file, "let {} = u32::deserialize(buf)?;", field_name(param))?;
            }
            ParameterType::Normal { ty, flag } => {
                if ty.name == "true" {
                    let flag = flag
                        .as_ref()
                        .expect("the `true` type must always be used in a flag");
                    writeln!(
                        file,
                        "let {} = ({} & {}) != 0;",
                        field_name(param),
                        flag.name,
                        1u32 << flag.index
                    )?;
                } else {
                    write!(file, "let {} = ", field_name(param))?;
                    if let Some(flag) = flag {
                        writeln!(file, "if ({} & {}) != 0 {{", flag.name, 1u32 << flag.index)?;
                        write!(file, "{}            Some(", indent)?;
                    }
                    if ty.generic_ref {
                        // The length of a generic value is not encoded
                        // anywhere, so it can only be read when it spans
                        // the entire remaining buffer.
                        if i == def.params.len() - 1 {
                            write!(
                                file,
                                "{{ let mut tmp = Vec::new(); buf.read_to_end(&mut tmp)?; crate::Blob(tmp) }}"
                            )?;
                        } else {
                            write!(
                                file,
                                "unimplemented!(\"cannot read generic params in the middle\")"
                            )?;
                        }
                    } else {
                        write!(file, "{}::deserialize(buf)?", field_type_expr(param))?;
                    }
                    if flag.is_some() {
                        writeln!(file, ")")?;
                        writeln!(file, "{}        }} else {{", indent)?;
                        writeln!(file, "{}            None", indent)?;
                        write!(file, "{}        }}", indent)?;
                    }
                    writeln!(file, ";")?;
                }
            }
        }
    }

    if def.params.is_empty() {
        writeln!(file, "{}        Ok({})", indent, pascal_name(&def.name))?;
    } else {
        writeln!(file, "{}        Ok({} {{", indent, pascal_name(&def.name))?;
        for param in def.params.iter() {
            match &param.ty {
                ParameterType::Flags => {}
                ParameterType::Normal { .. } => {
                    writeln!(file, "{}            {},", indent, field_name(param))?;
                }
            }
        }
        writeln!(file, "{}        }})", indent)?;
    }
    writeln!(file, "{}    }}", indent)?;
    writeln!(file, "{}}}", indent)?;
    Ok(())
}

/// Defines the `impl RemoteCall` corresponding to a function.
fn write_remote_call<W: Write>(file: &mut W, indent: &str, def: &Definition) -> io::Result<()> {
    writeln!(
        file,
        "{}impl crate::RemoteCall for {} {{\n\
         {}    type Return = {};\n\
         {}}}",
        indent,
        pascal_name(&def.name),
        indent,
        rust_type(&def.ty),
        indent
    )?;
    Ok(())
}

/// Defines the conversion from the boxed enum back into this concrete
/// type: `From` when there is a single constructor, `TryFrom` otherwise.
fn write_impl_from_enum<W: Write>(
    file: &mut W,
    indent: &str,
    def: &Definition,
    metadata: &Metadata,
) -> io::Result<()> {
    let infallible = metadata.defs_with_type(&def.ty).len() == 1;
    let enum_path = type_path(&def.ty);

    if infallible {
        writeln!(
            file,
            "{}impl From<{}> for {} {{",
            indent,
            enum_path,
            struct_path(def)
        )?;
        writeln!(file, "{}    fn from(x: {}) -> Self {{", indent, enum_path)?;
    } else {
        writeln!(
            file,
            "{}impl TryFrom<{}> for {} {{",
            indent,
            enum_path,
            struct_path(def)
        )?;
        writeln!(
            file,
            "{}    type Error = crate::errors::WrongVariant;",
            indent
        )?;
        writeln!(
            file,
            "{}    fn try_from(x: {}) -> Result<Self, Self::Error> {{",
            indent, enum_path
        )?;
    }

    writeln!(file, "{}        match x {{", indent)?;
    let (pattern, value) = if def.params.is_empty() {
        (String::new(), struct_path(def))
    } else if metadata.is_recursive_def(def) {
        ("(x)".to_string(), "*x".to_string())
    } else {
        ("(x)".to_string(), "x".to_string())
    };
    let value = if infallible {
        value
    } else {
        format!("Ok({})", value)
    };
    writeln!(
        file,
        "{}            {}::{}{} => {},",
        indent,
        enum_path,
        variant_name(def),
        pattern,
        value,
    )?;
    if !infallible {
        writeln!(
            file,
            "{}            _ => Err(crate::errors::WrongVariant),",
            indent
        )?;
    }
    writeln!(file, "{}        }}", indent)?;
    writeln!(file, "{}    }}", indent)?;
    writeln!(file, "{}}}", indent)?;
    Ok(())
}

/// Writes an entire definition as Rust code (`struct` and `impl`s).
fn write_definition<W: Write>(
    file: &mut W,
    indent: &str,
    def: &Definition,
    metadata: &Metadata,
    config: &Config,
) -> io::Result<()> {
    write_struct(file, indent, def, config)?;
    write_identifiable(file, indent, def)?;
    write_serializable(file, indent, def)?;
    if def.category == Category::Types || config.deserializable_functions {
        write_deserializable(file, indent, def)?;
    }
    if def.category == Category::Functions {
        write_remote_call(file, indent, def)?;
    }
    if def.category == Category::Types && config.impl_from_enum {
        write_impl_from_enum(file, indent, def, metadata)?;
    }
    Ok(())
}

/// Write the entire module for the desired category.
pub(crate) fn write_category_mod<W: Write>(
    file: &mut W,
    category: Category,
    definitions: &[Definition],
    metadata: &Metadata,
    config: &Config,
) -> io::Result<()> {
    match category {
        Category::Types => {
            writeln!(
                file,
                "/// Bare types, each represented by a `struct`.\n\
                 #[allow(clippy::cognitive_complexity, clippy::identity_op, clippy::unreadable_literal)]\n\
                 pub mod types {{"
            )?;
        }
        Category::Functions => {
            writeln!(
                file,
                "/// Callable functions, each represented by a `struct`.\n\
                 /// Their return type is the associated `RemoteCall::Return`.\n\
                 #[allow(clippy::cognitive_complexity, clippy::identity_op, clippy::unreadable_literal)]\n\
                 pub mod functions {{"
            )?;
        }
    }

    let grouped = grouper::group_by_ns(definitions, category);
    let mut sorted_keys: Vec<&String> = grouped.keys().collect();
    sorted_keys.sort();
    for key in sorted_keys.into_iter() {
        let indent = if key.is_empty() {
            "    "
        } else {
            writeln!(file, "    #[allow(clippy::unreadable_literal)]")?;
            writeln!(file, "    pub mod {} {{", key)?;
            "        "
        };

        for definition in grouped[key].iter() {
            write_definition(file, indent, definition, metadata, config)?;
        }

        if !key.is_empty() {
            writeln!(file, "    }}")?;
        }
    }

    writeln!(file, "}}")
}
