// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::fmt;
use std::str::FromStr;

use crate::errors::ParamParseError;
use crate::tl::{Flag, Type};

/// A parameter type.
#[derive(Debug, PartialEq)]
pub enum ParameterType {
    /// The parameter holds a flag bitfield (`#`). Its value is computed
    /// from which flag-gated siblings are present, never stored.
    Flags,

    /// An ordinary type, whose presence may depend on a flag bit.
    Normal {
        /// The actual type of the parameter.
        ty: Type,

        /// The flag upon which the presence of this parameter depends,
        /// if it is conditional.
        flag: Option<Flag>,
    },
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flags => write!(f, "#"),
            Self::Normal { ty, flag } => {
                if let Some(flag) = flag {
                    write!(f, "{}?", flag)?;
                }
                write!(f, "{}", ty)
            }
        }
    }
}

impl FromStr for ParameterType {
    type Err = ParamParseError;

    /// Parses a parameter type such as `#`, `int` or `flags.0?Vector<long>`.
    fn from_str(ty: &str) -> Result<Self, Self::Err> {
        if ty.is_empty() {
            return Err(ParamParseError::Empty);
        }

        if ty == "#" {
            return Ok(ParameterType::Flags);
        }

        // `flag_name.flag_index?type`
        let (ty, flag) = match ty.split_once('?') {
            Some((flag, ty)) => (ty, Some(flag.parse()?)),
            None => (ty, None),
        };

        Ok(ParameterType::Normal {
            ty: ty.parse()?,
            flag,
        })
    }
}
