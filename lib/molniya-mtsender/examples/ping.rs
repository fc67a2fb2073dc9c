// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Connect with a previously-exported session string and ping the
//! server once:
//!
//! ```sh
//! cargo run --example ping -- 1AaBb…
//! ```
use molniya_mtsender::{connect_with_auth, ServerAddr};
use molniya_session::Session;
use molniya_tl_types as tl;
use std::error::Error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new().init()?;

    let session_string = std::env::args()
        .nth(1)
        .expect("usage: ping <session-string>");
    let session = Session::import_string(&session_string)?;
    let dc = session.dcs().next().expect("session has no datacenter");
    let auth_key = dc.auth_key.expect("session has no authorization key");

    let mut sender = connect_with_auth(
        molniya_mtproto::transport::Full::new(),
        ServerAddr::Tcp { address: dc.addr },
        auth_key,
    )
    .await?;

    let tl::enums::Pong::Pong(pong) = sender
        .invoke(&tl::functions::Ping {
            ping_id: 0x1111_2222_3333_4444,
        })
        .await?;

    println!("pong! ping_id = {:x}", pong.ping_id);
    Ok(())
}
