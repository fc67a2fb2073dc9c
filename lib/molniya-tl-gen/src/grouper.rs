// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Group definitions by namespace (one level deep, per the grammar).
use std::collections::HashMap;

use molniya_tl_parser::tl::{Category, Definition, Type};

/// Group the definitions of one category by their namespace.
/// Definitions in the global namespace land under the empty key.
pub(crate) fn group_by_ns<'a>(
    definitions: &'a [Definition],
    category: Category,
) -> HashMap<String, Vec<&'a Definition>> {
    let mut result: HashMap<String, Vec<&Definition>> = HashMap::new();
    definitions
        .iter()
        .filter(|d| d.category == category && !crate::ignore_type(&d.ty))
        .for_each(|d| {
            let ns = d.namespace.first().map(String::as_str).unwrap_or("");
            result.entry(ns.into()).or_default().push(d);
        });

    for vec in result.values_mut() {
        vec.sort_by_key(|d| &d.name);
    }
    result
}

/// Group the boxed types produced by type definitions by namespace,
/// deduplicated (many constructors share one type).
pub(crate) fn group_types_by_ns(definitions: &[Definition]) -> HashMap<String, Vec<&Type>> {
    let mut result: HashMap<String, Vec<&Type>> = HashMap::new();
    definitions
        .iter()
        .filter(|d| {
            d.category == Category::Types && !d.ty.generic_ref && !crate::ignore_type(&d.ty)
        })
        .for_each(|d| {
            let ns = d.ty.namespace.first().map(String::as_str).unwrap_or("");
            let entry = result.entry(ns.into()).or_default();
            if !entry.iter().any(|ty| ty.name == d.ty.name) {
                entry.push(&d.ty);
            }
        });

    for vec in result.values_mut() {
        vec.sort_by_key(|ty| &ty.name);
    }
    result
}
