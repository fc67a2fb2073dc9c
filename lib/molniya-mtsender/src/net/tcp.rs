// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use log::info;
pub use tokio::net::tcp::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::ServerAddr;

pub enum NetStream {
    Tcp(TcpStream),
}

impl NetStream {
    pub(crate) fn split(&mut self) -> (ReadHalf, WriteHalf) {
        match self {
            Self::Tcp(stream) => stream.split(),
        }
    }

    pub(crate) async fn connect(addr: &ServerAddr) -> Result<Self, std::io::Error> {
        match addr {
            ServerAddr::Tcp { address } => {
                info!("connecting to {}...", address);
                Ok(NetStream::Tcp(TcpStream::connect(address).await?))
            }
        }
    }
}
