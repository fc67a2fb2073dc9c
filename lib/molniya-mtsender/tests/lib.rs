// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end tests against the live test fleet live in this file and
//! are ignored by default: they need the network and a disposable
//! account, which CI does not have.
use molniya_mtproto::mtp;
use molniya_mtproto::transport;
use molniya_mtsender::{connect_with_auth, ServerAddr};
use molniya_tl_types as tl;

include!("../../includes/check_deps_documented.rs");

const TELEGRAM_TEST_DC_2: &str = "149.154.167.40:443";

/// Requires a reachable network and a valid, pre-negotiated key to do
/// anything beyond connecting, so it only checks the connect path.
#[ignore]
#[tokio::test(flavor = "current_thread")]
async fn live_connect_to_test_dc() {
    simple_logger::SimpleLogger::new().init().ok();

    let addr = ServerAddr::Tcp {
        address: TELEGRAM_TEST_DC_2.parse().unwrap(),
    };
    // A made-up key: the connection opens, but the server will reject
    // the first payload with a transport-level 404.
    let sender = connect_with_auth(transport::Full::new(), addr, [7; 256])
        .await
        .unwrap();
    let _: &molniya_mtsender::Sender<transport::Full, mtp::Encrypted> = &sender;
    let _ = tl::LAYER;
}
