// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Mapping of Type Language names to Rust names and paths.

use molniya_tl_parser::tl::{Definition, Parameter, ParameterType, Type};

/// Convert a TL name into a Rust `PascalCase` name, excluding namespaces.
pub(crate) fn pascal_name(name: &str) -> String {
    enum Casing {
        Upper,
        Lower,
        Preserve,
    }

    let name = match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => name,
    };

    let mut result = String::with_capacity(name.len());

    name.chars().fold(Casing::Upper, |casing, c| {
        if c == '_' {
            return Casing::Upper;
        }

        match casing {
            Casing::Upper => {
                result.push(c.to_ascii_uppercase());
                Casing::Lower
            }
            Casing::Lower => {
                result.push(c.to_ascii_lowercase());
                if c.is_ascii_uppercase() {
                    Casing::Lower
                } else {
                    Casing::Preserve
                }
            }
            Casing::Preserve => {
                result.push(c);
                if c.is_ascii_uppercase() {
                    Casing::Lower
                } else {
                    Casing::Preserve
                }
            }
        }
    });

    result
}

/// The enum variant name for a definition, with the redundant prefix
/// shared with its type removed.
pub(crate) fn variant_name(def: &Definition) -> String {
    let name = pascal_name(&def.name);
    let ty_name = pascal_name(&def.ty.name);

    let variant = if name.starts_with(&ty_name) {
        &name[ty_name.len()..]
    } else {
        &name
    };

    match variant {
        "" => {
            // Use the name from the last uppercase letter.
            &name[name
                .bytes()
                .rposition(|c| c.is_ascii_uppercase())
                .unwrap_or(0)..]
        }
        "Self" => {
            // `Self` is not a valid variant name; use one letter more.
            &name[name
                .bytes()
                .take(name.len() - variant.len())
                .rposition(|c| c.is_ascii_uppercase())
                .unwrap_or(0)..]
        }
        _ => variant,
    }
    .to_string()
}

/// Fully-qualified path to the `struct` generated for a definition.
pub(crate) fn struct_path(def: &Definition) -> String {
    let mut result = String::from("crate::types::");
    def.namespace.iter().for_each(|ns| {
        result.push_str(ns);
        result.push_str("::");
    });
    result.push_str(&pascal_name(&def.name));
    result
}

/// Fully-qualified path to the Rust type generated for a TL type:
/// the `enum` for boxed types, the `struct` for bare ones.
pub(crate) fn type_path(ty: &Type) -> String {
    let mut result = String::new();
    result.push_str(if ty.bare {
        "crate::types::"
    } else {
        "crate::enums::"
    });
    ty.namespace.iter().for_each(|ns| {
        result.push_str(ns);
        result.push_str("::");
    });
    result.push_str(&pascal_name(&ty.name));
    result
}

/// The Rust field name for a parameter, dodging keywords.
pub(crate) fn field_name(param: &Parameter) -> String {
    match &param.name[..] {
        "final" => "r#final".into(),
        "loop" => "r#loop".into(),
        "self" => "is_self".into(),
        "static" => "r#static".into(),
        "type" => "r#type".into(),
        _ => {
            let mut result = param.name.clone();
            result[..].make_ascii_lowercase();
            result
        }
    }
}

fn push_builtin_or_path(result: &mut String, ty: &Type) {
    let base = match ty.name.as_ref() {
        "Bool" => "bool",
        "bytes" => "Vec<u8>",
        "double" => "f64",
        "int" => "i32",
        "int128" => "[u8; 16]",
        "int256" => "[u8; 32]",
        "long" => "i64",
        "string" => "String",
        "true" => "bool",
        "vector" => "crate::RawVec",
        "Vector" => "Vec",
        _ => "",
    };
    if base.is_empty() {
        result.push_str(&type_path(ty));
    } else {
        result.push_str(base);
    }
}

/// The Rust type for a TL type, in type position.
pub(crate) fn rust_type(ty: &Type) -> String {
    let mut result = String::new();
    if ty.generic_ref {
        // Generic references can hold any serialized value.
        result.push_str("crate::Blob");
    } else {
        push_builtin_or_path(&mut result, ty);
        if let Some(arg) = &ty.generic_arg {
            result.push('<');
            push_builtin_or_path(&mut result, arg);
            result.push('>');
        }
    }
    result
}

/// The Rust type for a parameter, in field position.
pub(crate) fn field_type(param: &Parameter) -> String {
    match &param.ty {
        ParameterType::Flags => "u32".into(),
        ParameterType::Normal { ty, flag } if flag.is_some() && ty.name == "true" => {
            // `flags.i?true` is an empty type; the flag bit is the value.
            "bool".into()
        }
        ParameterType::Normal { ty, flag } => {
            let mut result = String::new();
            if flag.is_some() {
                result.push_str("Option<");
            }
            result.push_str(&rust_type(ty));
            if flag.is_some() {
                result.push('>');
            }
            result
        }
    }
}

fn push_builtin_or_path_expr(result: &mut String, ty: &Type) {
    // A few base types are not valid paths verbatim in expression position.
    let base = match ty.name.as_ref() {
        "bytes" => "Vec::<u8>",
        "int128" => "<[u8; 16]>",
        "int256" => "<[u8; 32]>",
        _ => "",
    };

    if base.is_empty() {
        push_builtin_or_path(result, ty);
    } else {
        result.push_str(base);
    }
}

/// Like [`field_type`], but usable as a path in expression position
/// (e.g. `Vec::<u8>` rather than `Vec<u8>`). Optionals get no treatment.
pub(crate) fn field_type_expr(param: &Parameter) -> String {
    match &param.ty {
        ParameterType::Flags => "u32".into(),
        ParameterType::Normal { ty, flag } if flag.is_some() && ty.name == "true" => "bool".into(),
        ParameterType::Normal { ty, .. } => {
            let mut result = String::new();
            if ty.generic_ref {
                result.push_str("crate::Blob");
            } else {
                push_builtin_or_path_expr(&mut result, ty);
                if let Some(arg) = &ty.generic_arg {
                    result.push_str("::<");
                    push_builtin_or_path_expr(&mut result, arg);
                    result.push('>');
                }
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molniya_tl_parser::tl::Category;

    fn get_definition(name: &str, ty: &str) -> Definition {
        Definition {
            namespace: vec![],
            name: name.to_string(),
            id: 0,
            params: vec![],
            ty: Type {
                namespace: vec![],
                name: ty.to_string(),
                bare: false,
                generic_ref: false,
                generic_arg: None,
            },
            category: Category::Types,
        }
    }

    #[test]
    fn check_pascal_name() {
        assert_eq!(pascal_name("ns.some_OK_name"), "SomeOkName");
        assert_eq!(pascal_name("updateShortMessage"), "UpdateShortMessage");
    }

    #[test]
    fn check_variant_name() {
        let name = variant_name(&get_definition("new_session_created", "NewSession"));
        assert_eq!(name, "Created");

        let name = variant_name(&get_definition("true", "True"));
        assert_eq!(name, "True");

        let name = variant_name(&get_definition("inputPeerSelf", "InputPeer"));
        assert_eq!(name, "PeerSelf");

        let name = variant_name(&get_definition("updatesTooLong", "Updates"));
        assert_eq!(name, "TooLong");
    }
}
