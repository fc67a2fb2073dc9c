// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::collections::{HashMap, HashSet};

use molniya_tl_parser::tl::{Category, Definition, ParameterType, Type};

/// Cross-definition facts required while generating code.
pub(crate) struct Metadata<'a> {
    recursing_defs: HashSet<u32>,
    defs_with_type: HashMap<(&'a [String], &'a str), Vec<&'a Definition>>,
}

impl<'a> Metadata<'a> {
    pub fn new(definitions: &'a [Definition]) -> Self {
        let mut metadata = Self {
            recursing_defs: HashSet::new(),
            defs_with_type: HashMap::new(),
        };

        definitions
            .iter()
            .filter(|d| d.category == Category::Types)
            .for_each(|d| {
                if d.params.iter().any(|p| match &p.ty {
                    ParameterType::Flags => false,
                    ParameterType::Normal { ty, .. } => {
                        ty.namespace == d.ty.namespace && ty.name == d.ty.name
                    }
                }) {
                    metadata.recursing_defs.insert(d.id);
                }

                metadata
                    .defs_with_type
                    .entry((&d.ty.namespace[..], &d.ty.name))
                    .or_default()
                    .push(d);
            });

        metadata
    }

    /// Whether any parameter of the definition is of its own boxed type
    /// (in which case the enum variant needs indirection).
    pub fn is_recursive_def(&self, def: &Definition) -> bool {
        self.recursing_defs.contains(&def.id)
    }

    /// All the definitions producing the given boxed type, in file order.
    pub fn defs_with_type<'b>(&'b self, ty: &'b Type) -> &'b [&'a Definition] {
        self.defs_with_type
            .get(&(&ty.namespace[..], &ty.name[..]))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
