// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::fmt;
use std::str::FromStr;

use crate::errors::{ParamParseError, ParseError};
use crate::tl::{Category, Flag, Parameter, ParameterType, Type};
use crate::utils::infer_id;

/// A single [Type Language] definition.
///
/// [Type Language]: https://core.telegram.org/mtproto/TL
#[derive(Debug, PartialEq)]
pub struct Definition {
    /// The namespace components of the definition. Empty when the name
    /// of the definition belongs to the global namespace.
    pub namespace: Vec<String>,

    /// The name of this definition. Also known as "predicate" or "method".
    pub name: String,

    /// The numeric identifier of this definition, either declared with
    /// `#` or inferred from the canonical representation.
    pub id: u32,

    /// A possibly-empty list of parameters.
    pub params: Vec<Parameter>,

    /// The type this definition belongs to.
    pub ty: Type,

    /// The category this definition belongs to.
    pub category: Category,
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ns in self.namespace.iter() {
            write!(f, "{}.", ns)?;
        }
        write!(f, "{}#{:x}", self.name, self.id)?;

        // Generic types referenced by any parameter must be declared first.
        let mut type_defs = vec![];
        for param in self.params.iter() {
            if let ParameterType::Normal { ty, .. } = &param.ty {
                ty.find_generic_refs(&mut type_defs);
            }
        }
        type_defs.sort_unstable();
        type_defs.dedup();
        for type_def in type_defs {
            write!(f, " {{{}:Type}}", type_def)?;
        }

        for param in self.params.iter() {
            write!(f, " {}", param)?;
        }

        // The return type is never written with the `!` generic marker,
        // even when `generic_ref` is set (used by codegen to know the
        // type is generic).
        write!(f, " = ")?;
        for ns in self.ty.namespace.iter() {
            write!(f, "{}.", ns)?;
        }
        write!(f, "{}", self.ty.name)?;
        if let Some(generic_arg) = &self.ty.generic_arg {
            write!(f, "<{}>", generic_arg)?;
        }
        Ok(())
    }
}

impl FromStr for Definition {
    type Err = ParseError;

    /// Parses a [Type Language] definition.
    ///
    /// # Examples
    ///
    /// ```
    /// use molniya_tl_parser::tl::Definition;
    ///
    /// assert!("sendMessage chat_id:int message:string = Message".parse::<Definition>().is_ok());
    /// ```
    ///
    /// [Type Language]: https://core.telegram.org/mtproto/TL
    fn from_str(definition: &str) -> Result<Self, Self::Err> {
        if definition.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        // `left = ty`
        let (left, ty) = definition.split_once('=').ok_or(ParseError::MissingType)?;
        let (left, ty) = (left.trim(), ty.trim());

        let mut ty = Type::from_str(ty).map_err(|_| ParseError::MissingType)?;

        // `name middle`
        let (name, middle) = match left.find(char::is_whitespace) {
            Some(pos) => (&left[..pos], left[pos..].trim()),
            None => (left, ""),
        };

        // `name#id`
        let (name, id) = match name.split_once('#') {
            Some((name, id)) => (name, Some(id)),
            None => (name, None),
        };

        // `ns1.ns2.name`
        let mut namespace: Vec<String> = name.split('.').map(|part| part.to_string()).collect();
        if namespace.iter().any(|part| part.is_empty()) {
            return Err(ParseError::MissingName);
        }

        // Safe to unwrap because split() yields at least one element.
        let name = namespace.pop().unwrap();

        let id = match id {
            Some(id) => u32::from_str_radix(id.trim(), 16).map_err(ParseError::InvalidId)?,
            None => infer_id(definition),
        };

        // `middle`, validating flag and generic references as they appear
        let mut type_defs: Vec<String> = vec![];
        let mut flag_defs: Vec<String> = vec![];

        let params = middle
            .split_whitespace()
            .map(Parameter::from_str)
            .filter_map(|p| match p {
                // Generic type definitions are recorded, not kept as params.
                Err(ParamParseError::TypeDef { name }) => {
                    type_defs.push(name);
                    None
                }

                // Flag fields are recorded and kept.
                Ok(Parameter {
                    ref name,
                    ty: ParameterType::Flags,
                }) => {
                    flag_defs.push(name.clone());
                    Some(Ok(p.unwrap()))
                }

                // Generic references must point to an earlier `{X:Type}`.
                Ok(Parameter {
                    ty:
                        ParameterType::Normal {
                            ty:
                                Type {
                                    ref name,
                                    generic_ref: true,
                                    ..
                                },
                            ..
                        },
                    ..
                }) => {
                    if type_defs.contains(name) {
                        Some(Ok(p.unwrap()))
                    } else {
                        Some(Err(ParseError::InvalidParam(ParamParseError::MissingDef)))
                    }
                }

                // Flag-gated parameters must point to an earlier `name:#`.
                Ok(Parameter {
                    ty:
                        ParameterType::Normal {
                            flag: Some(Flag { ref name, .. }),
                            ..
                        },
                    ..
                }) => {
                    if flag_defs.contains(name) {
                        Some(Ok(p.unwrap()))
                    } else {
                        Some(Err(ParseError::InvalidParam(ParamParseError::MissingDef)))
                    }
                }

                Ok(p) => Some(Ok(p)),

                Err(ParamParseError::NotImplemented) => Some(Err(ParseError::NotImplemented)),
                Err(x) => Some(Err(ParseError::InvalidParam(x))),
            })
            .collect::<Result<_, ParseError>>()?;

        // The return type lacks the `!` marker, so whether it is generic
        // is determined by the type definitions seen in the parameters.
        if type_defs.contains(&ty.name) {
            ty.generic_ref = true;
        }

        Ok(Definition {
            namespace,
            name,
            id,
            params,
            ty,
            category: Category::Types,
        })
    }
}

impl Definition {
    /// The namespace and name joined back into a single string.
    pub fn full_name(&self) -> String {
        let mut result = String::with_capacity(
            self.namespace.iter().map(|ns| ns.len() + 1).sum::<usize>() + self.name.len(),
        );
        for ns in self.namespace.iter() {
            result.push_str(ns);
            result.push('.');
        }
        result.push_str(&self.name);
        result
    }

    /// The identifier this definition would have if it carried none:
    /// the CRC32 of the canonical representation.
    ///
    /// For schema files that declare identifiers explicitly, a value
    /// different from [`Definition::id`] means the declaration drifted
    /// from its canonical text.
    pub fn inferred_id(&self) -> u32 {
        let repr = self.to_string();
        infer_id(&repr.replacen(&format!("#{:x}", self.id), "", 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_def() {
        assert_eq!(Definition::from_str(""), Err(ParseError::Empty));
    }

    #[test]
    fn parse_bad_id() {
        let bad = u32::from_str_radix("bar", 16).unwrap_err();
        let bad_empty = u32::from_str_radix("", 16).unwrap_err();
        assert_eq!(
            Definition::from_str("foo#bar = baz"),
            Err(ParseError::InvalidId(bad))
        );
        assert_eq!(
            Definition::from_str("foo# = baz"),
            Err(ParseError::InvalidId(bad_empty))
        );
    }

    #[test]
    fn parse_no_name() {
        assert_eq!(Definition::from_str(" = foo"), Err(ParseError::MissingName));
    }

    #[test]
    fn parse_no_type() {
        assert_eq!(Definition::from_str("foo"), Err(ParseError::MissingType));
        assert_eq!(Definition::from_str("foo = "), Err(ParseError::MissingType));
    }

    #[test]
    fn parse_unimplemented() {
        assert_eq!(
            Definition::from_str("int ? = Int"),
            Err(ParseError::NotImplemented)
        );
    }

    #[test]
    fn parse_inferred_id() {
        let def = "rpc_answer_dropped msg_id:long seq_no:int bytes:int = RpcDropAnswer";
        assert_eq!(Definition::from_str(def).unwrap().id, 0xa43ad8b7);

        let def = "rpc_answer_dropped#123456 msg_id:long seq_no:int bytes:int = RpcDropAnswer";
        let def = Definition::from_str(def).unwrap();
        assert_eq!(def.id, 0x123456);
        assert_eq!(def.inferred_id(), 0xa43ad8b7);
    }

    #[test]
    fn parse_valid_definition() {
        let def = Definition::from_str("a#1=d").unwrap();
        assert_eq!(def.name, "a");
        assert_eq!(def.id, 1);
        assert!(def.params.is_empty());
        assert_eq!(def.ty.name, "d");

        let def = Definition::from_str("a=d<e>").unwrap();
        assert_ne!(def.id, 0);
        assert_eq!(def.ty.generic_arg.as_deref(), Some(&"e".parse().unwrap()));

        let def = Definition::from_str("a b:c = d").unwrap();
        assert_eq!(def.params.len(), 1);

        let def = Definition::from_str("a#1 {b:Type} c:!b = d").unwrap();
        assert_eq!(def.params.len(), 1);
        assert!(matches!(
            def.params[0].ty,
            ParameterType::Normal {
                ty: Type {
                    generic_ref: true,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn parse_multiline_definition() {
        let def = "
            first#1 lol:param
              = t;
            ";

        assert_eq!(Definition::from_str(def).unwrap().id, 1);

        let def = "
            second#2
              lol:String
            = t;
            ";

        assert_eq!(Definition::from_str(def).unwrap().id, 2);
    }

    #[test]
    fn parse_complete() {
        let def = "ns1.name#123 {X:Type} flags:# pname:flags.10?ns2.Vector<!X> = ns3.Type";
        assert_eq!(
            Definition::from_str(def),
            Ok(Definition {
                namespace: vec!["ns1".into()],
                name: "name".into(),
                id: 0x123,
                params: vec![
                    Parameter {
                        name: "flags".into(),
                        ty: ParameterType::Flags,
                    },
                    Parameter {
                        name: "pname".into(),
                        ty: ParameterType::Normal {
                            ty: Type {
                                namespace: vec!["ns2".into()],
                                name: "Vector".into(),
                                bare: false,
                                generic_ref: false,
                                generic_arg: Some(Box::new(Type {
                                    namespace: vec![],
                                    name: "X".into(),
                                    bare: false,
                                    generic_ref: true,
                                    generic_arg: None,
                                })),
                            },
                            flag: Some(Flag {
                                name: "flags".into(),
                                index: 10
                            })
                        },
                    },
                ],
                ty: Type {
                    namespace: vec!["ns3".into()],
                    name: "Type".into(),
                    bare: false,
                    generic_ref: false,
                    generic_arg: None,
                },
                category: Category::Types,
            })
        );
    }

    #[test]
    fn parse_missing_generic() {
        let def = "name param:!X = Type";
        assert_eq!(
            Definition::from_str(def),
            Err(ParseError::InvalidParam(ParamParseError::MissingDef))
        );

        let def = "name {X:Type} param:!Y = Type";
        assert_eq!(
            Definition::from_str(def),
            Err(ParseError::InvalidParam(ParamParseError::MissingDef))
        );
    }

    #[test]
    fn parse_unknown_flags() {
        let def = "name param:flags.0?true = Type";
        assert_eq!(
            Definition::from_str(def),
            Err(ParseError::InvalidParam(ParamParseError::MissingDef))
        );

        let def = "name foo:# param:flags.0?true = Type";
        assert_eq!(
            Definition::from_str(def),
            Err(ParseError::InvalidParam(ParamParseError::MissingDef))
        );
    }

    #[test]
    fn check_to_string() {
        let def = "ns1.name#123 {X:Type} flags:# pname:flags.10?ns2.Vector<!X> = ns3.Type";
        assert_eq!(Definition::from_str(def).unwrap().to_string(), def);
    }
}
