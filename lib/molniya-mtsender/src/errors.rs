// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use molniya_mtproto::{mtp, transport};
use molniya_tl_types as tl;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::OnceLock;

/// The catalogue of known error names and their canonical classes,
/// shipped as a CSV next to the sources. Messages with a captured
/// number use the name with the `_X` suffix already removed.
fn known_errors() -> &'static HashMap<&'static str, i32> {
    static KNOWN_ERRORS: OnceLock<HashMap<&'static str, i32>> = OnceLock::new();
    KNOWN_ERRORS.get_or_init(|| {
        include_str!("../data/rpc_errors.csv")
            .lines()
            .skip(1) // header
            .filter_map(|line| {
                let (name, code) = line.split_once(',')?;
                Some((name.trim(), code.trim().parse().ok()?))
            })
            .collect()
    })
}

/// Errors that occur while reading from the connection.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    Transport(transport::Error),
    Deserialize(mtp::DeserializeError),
}

impl ReadError {
    /// Whether reconnecting with the same key makes sense after this
    /// error. Security failures (bad message keys, session takeover,
    /// transport status 404) never qualify.
    pub fn should_reconnect(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Transport(transport::Error::BadStatus { .. }) => false,
            Self::Transport(_) => true,
            Self::Deserialize(_) => false,
        }
    }
}

impl std::error::Error for ReadError {}

impl Clone for ReadError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(
                e.raw_os_error()
                    .map(io::Error::from_raw_os_error)
                    .unwrap_or_else(|| io::Error::new(e.kind(), e.to_string())),
            ),
            Self::Transport(e) => Self::Transport(e.clone()),
            Self::Deserialize(e) => Self::Deserialize(e.clone()),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "read error, IO failed: {}", err),
            Self::Transport(err) => write!(f, "read error, transport-level: {}", err),
            Self::Deserialize(err) => write!(f, "read error, bad response: {}", err),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<transport::Error> for ReadError {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<mtp::DeserializeError> for ReadError {
    fn from(error: mtp::DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<tl::deserialize::Error> for ReadError {
    fn from(error: tl::deserialize::Error) -> Self {
        Self::Deserialize(error.into())
    }
}

/// The error type reported by the server when a request is misused.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// A numerical value similar to HTTP status codes.
    pub code: i32,

    /// The ASCII error name, in screaming snake case, with any captured
    /// number already removed (`FLOOD_WAIT_3` becomes `FLOOD_WAIT`).
    pub name: String,

    /// The number captured from the error name, if it had one (seconds
    /// to wait for `FLOOD_WAIT`, the new datacenter for `*_MIGRATE`).
    pub value: Option<u32>,

    /// The constructor identifier of the request that triggered this
    /// error. Not present when the error was artificially constructed.
    pub caused_by: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(caused_by) = self.caused_by {
            write!(f, " caused by {}", tl::name_for_id(caused_by))?;
        }
        if let Some(value) = self.value {
            write!(f, " (value: {})", value)?;
        }
        Ok(())
    }
}

impl From<tl::types::RpcError> for RpcError {
    fn from(error: tl::types::RpcError) -> Self {
        // Extract the numeric "argument" from the error, if any.
        if let Some(value) = error
            .error_message
            .split(|c: char| !c.is_ascii_digit())
            .find(|s| !s.is_empty())
        {
            let mut to_remove = String::with_capacity(1 + value.len());
            to_remove.push('_');
            to_remove.push_str(value);
            Self {
                code: error.error_code,
                name: error.error_message.replace(&to_remove, ""),
                // Safe to unwrap, matched on digits.
                value: Some(value.parse().unwrap()),
                caused_by: None,
            }
        } else {
            Self {
                code: error.error_code,
                name: error.error_message,
                value: None,
                caused_by: None,
            }
        }
    }
}

impl RpcError {
    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// Useful in `match` arm guards. A single leading or trailing
    /// asterisk is allowed, turning the match into a suffix or prefix
    /// check respectively.
    ///
    /// # Examples
    ///
    /// ```
    /// # let request_result = Result::<(), _>::Err(molniya_mtsender::RpcError {
    /// #     code: 400, name: "PHONE_CODE_INVALID".to_string(), value: None, caused_by: None });
    /// #
    /// match request_result {
    ///     Err(rpc_err) if rpc_err.is("SESSION_PASSWORD_NEEDED") => panic!(),
    ///     Err(rpc_err) if rpc_err.is("PHONE_CODE_*") => {}
    ///     _ => panic!(),
    /// }
    /// ```
    pub fn is(&self, rpc_error: &str) -> bool {
        if let Some(rpc_error) = rpc_error.strip_suffix('*') {
            self.name.starts_with(rpc_error)
        } else if let Some(rpc_error) = rpc_error.strip_prefix('*') {
            self.name.ends_with(rpc_error)
        } else {
            self.name == rpc_error
        }
    }

    /// The canonical class for this error name from the shipped
    /// catalogue, when the name is a known one. Useful because the
    /// server is not fully consistent in the codes it attaches.
    pub fn canonical_code(&self) -> Option<i32> {
        known_errors().get(self.name.as_str()).copied()
    }

    /// Whether this error asks the caller to migrate to another
    /// datacenter, and which one.
    pub fn migrate_to_dc(&self) -> Option<i32> {
        if self.code == 303 || self.canonical_code() == Some(303) {
            self.value.map(|dc| dc as i32)
        } else {
            None
        }
    }

    pub(crate) fn with_caused_by(mut self, constructor_id: u32) -> Self {
        self.caused_by = Some(constructor_id);
        self
    }
}

/// This error occurs when a Remote Procedure Call was unsuccessful.
#[derive(Debug)]
pub enum InvocationError {
    /// The server could not process the request.
    Rpc(RpcError),

    /// The request was dropped and its result will never arrive
    /// (cancelled, or rejected by a non-retryable bad-message notice).
    Dropped,

    /// The request's serialized form is too large to ever be sent.
    PayloadTooLarge { size: usize },

    /// The error occurred while reading the response.
    Read(ReadError),
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "request error: {}", err),
            Self::Dropped => write!(f, "request error: dropped (cancelled)"),
            Self::PayloadTooLarge { size } => {
                write!(f, "request error: payload of {} bytes is too large", size)
            }
            Self::Read(err) => write!(f, "request error: {}", err),
        }
    }
}

impl From<ReadError> for InvocationError {
    fn from(error: ReadError) -> Self {
        Self::Read(error)
    }
}

impl From<mtp::DeserializeError> for InvocationError {
    fn from(error: mtp::DeserializeError) -> Self {
        Self::from(ReadError::from(error))
    }
}

impl From<tl::deserialize::Error> for InvocationError {
    fn from(error: tl::deserialize::Error) -> Self {
        Self::from(ReadError::from(error))
    }
}

impl InvocationError {
    /// Matches on the name of the RPC error (case-sensitive); `false`
    /// for any non-RPC error. See [`RpcError::is`].
    #[inline]
    pub fn is(&self, rpc_error: &str) -> bool {
        match self {
            Self::Rpc(rpc) => rpc.is(rpc_error),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rpc_error_parsing() {
        assert_eq!(
            RpcError::from(tl::types::RpcError {
                error_code: 400,
                error_message: "CHAT_INVALID".into(),
            }),
            RpcError {
                code: 400,
                name: "CHAT_INVALID".into(),
                value: None,
                caused_by: None,
            }
        );

        assert_eq!(
            RpcError::from(tl::types::RpcError {
                error_code: 420,
                error_message: "FLOOD_WAIT_31".into(),
            }),
            RpcError {
                code: 420,
                name: "FLOOD_WAIT".into(),
                value: Some(31),
                caused_by: None,
            }
        );

        assert_eq!(
            RpcError::from(tl::types::RpcError {
                error_code: 500,
                error_message: "INTERDC_2_CALL_ERROR".into(),
            }),
            RpcError {
                code: 500,
                name: "INTERDC_CALL_ERROR".into(),
                value: Some(2),
                caused_by: None,
            }
        );
    }

    #[test]
    fn check_error_catalogue() {
        let flood = RpcError::from(tl::types::RpcError {
            error_code: 420,
            error_message: "FLOOD_WAIT_3".into(),
        });
        assert_eq!(flood.canonical_code(), Some(420));
        assert_eq!(flood.migrate_to_dc(), None);

        let migrate = RpcError::from(tl::types::RpcError {
            error_code: 303,
            error_message: "PHONE_MIGRATE_4".into(),
        });
        assert_eq!(migrate.canonical_code(), Some(303));
        assert_eq!(migrate.migrate_to_dc(), Some(4));

        let unknown = RpcError::from(tl::types::RpcError {
            error_code: 400,
            error_message: "SOME_NEW_ERROR".into(),
        });
        assert_eq!(unknown.canonical_code(), None);
    }

    #[test]
    fn check_fatal_classification() {
        assert!(ReadError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "eof"))
            .should_reconnect());
        assert!(ReadError::Transport(transport::Error::BadCrc {
            expected: 1,
            got: 2
        })
        .should_reconnect());
        assert!(!ReadError::Transport(transport::Error::BadStatus { status: 404 })
            .should_reconnect());
        assert!(!ReadError::Deserialize(mtp::DeserializeError::BadSessionId {
            got: 1,
            expected: 2
        })
        .should_reconnect());
    }
}
