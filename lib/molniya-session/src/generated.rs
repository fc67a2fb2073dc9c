// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Code generated by `build.rs` from the session schema.
include!(concat!(env!("OUT_DIR"), "/generated.rs"));
