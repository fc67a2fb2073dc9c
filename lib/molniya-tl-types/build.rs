// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parses the schema files under `tl/` and generates their Rust code.
use molniya_tl_gen::{generate_rust_code, Config};
use molniya_tl_parser::parse_tl_file;
use molniya_tl_parser::tl::Definition;
use std::env;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Definitions whose declared identifier is known not to match their
/// canonical representation (historical server-side oddities).
const ID_CHECK_EXEMPT: &[&str] = &["ipPortSecret", "accessPointRule", "help.configSimple"];

/// Load the definitions from a schema file. Parse errors are printed and
/// the offending definitions skipped (the official files contain a few
/// builtin declarations no parser handles, such as `vector`).
fn load_tl(path: &str) -> std::io::Result<Vec<Definition>> {
    let contents = fs::read_to_string(path)?;
    Ok(parse_tl_file(&contents)
        .filter_map(|d| match d {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("TL: parse error in {}: {:?}", path, e);
                None
            }
        })
        .collect())
}

/// Fail the build if any definition declares an identifier that is not
/// the CRC32 of its canonical form.
fn validate_ids(path: &str, definitions: &[Definition]) {
    for def in definitions {
        let inferred = def.inferred_id();
        if def.id != inferred && !ID_CHECK_EXEMPT.contains(&def.full_name().as_str()) {
            panic!(
                "{}: `{}` declares id {:08x} but its canonical form yields {:08x}",
                path,
                def.full_name(),
                def.id,
                inferred
            );
        }
    }
}

/// Find the `// LAYER N` comment and return its value.
fn find_layer(path: &str) -> std::io::Result<Option<i32>> {
    const LAYER_MARK: &str = "LAYER";

    Ok(BufReader::new(File::open(path)?).lines().find_map(|line| {
        let line = line.unwrap();
        if line.trim().starts_with("//") {
            if let Some(pos) = line.find(LAYER_MARK) {
                if let Ok(layer) = line[pos + LAYER_MARK.len()..].trim().parse() {
                    return Some(layer);
                }
            }
        }

        None
    }))
}

fn main() -> std::io::Result<()> {
    println!("cargo:rerun-if-changed=tl/api.tl");
    println!("cargo:rerun-if-changed=tl/mtproto.tl");

    let layer = match find_layer("tl/api.tl")? {
        Some(x) => x,
        None => panic!("no layer information found in api.tl"),
    };

    let mut definitions = Vec::new();
    if env::var_os("CARGO_FEATURE_TL_API").is_some() {
        let defs = load_tl("tl/api.tl")?;
        validate_ids("tl/api.tl", &defs);
        definitions.extend(defs);
    }
    if env::var_os("CARGO_FEATURE_TL_MTPROTO").is_some() {
        let defs = load_tl("tl/mtproto.tl")?;
        validate_ids("tl/mtproto.tl", &defs);
        definitions.extend(defs);
    }

    let config = Config {
        gen_name_for_id: true,
        deserializable_functions: env::var_os("CARGO_FEATURE_DESERIALIZABLE_FUNCTIONS").is_some(),
        ..Config::default()
    };

    let mut file = BufWriter::new(File::create(
        Path::new(&env::var("OUT_DIR").unwrap()).join("generated.rs"),
    )?);
    generate_rust_code(&mut file, &definitions, layer, &config)?;
    file.flush()
}
