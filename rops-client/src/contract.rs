//! # Reply Contracts
//!
//! Purpose: Interpret a decoded `Reply` according to the contract of the
//! command that produced it. Every function matches the reply exhaustively
//! and is shared by the blocking and async clients.
//!
//! | contract        | success shape            | `-ERR` reply      | other shapes          |
//! |-----------------|--------------------------|-------------------|-----------------------|
//! | `status`        | simple string -> `true`  | `false`           | `UnexpectedResponse`  |
//! | `ok`            | simple string            | `Server`          | `UnexpectedResponse`  |
//! | `integer`       | integer                  | `Server`          | `UnexpectedResponse`  |
//! | `bulk_text`     | bulk string -> `Some`    | `Server`          | `None`                |
//! | `array`         | array -> `Some`          | `Server`          | `None`                |
//! | `promotion`     | integer -> `Some`        | `None`            | `None`                |

use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::resp::{latin1_decode, Reply};

/// Status commands: `+...` is success, `-...` is failure.
pub fn status(reply: Reply) -> ClientResult<bool> {
    match reply {
        Reply::SimpleString(_) => Ok(true),
        Reply::Error(_) => Ok(false),
        other => Err(unexpected("status", &other)),
    }
}

/// State-changing commands that must answer with a definite `+` status.
pub fn ok(reply: Reply) -> ClientResult<()> {
    match reply {
        Reply::SimpleString(_) => Ok(()),
        Reply::Error(message) => Err(ClientError::Server { message }),
        other => Err(unexpected("status", &other)),
    }
}

/// Status text of a `+` reply (also accepts a bulk string).
pub fn status_text(reply: Reply) -> ClientResult<String> {
    match reply {
        Reply::SimpleString(text) => Ok(text),
        Reply::BulkString(Some(data)) => Ok(latin1_decode(&data)),
        Reply::Error(message) => Err(ClientError::Server { message }),
        other => Err(unexpected("status text", &other)),
    }
}

/// Integer-returning commands.
pub fn integer(reply: Reply) -> ClientResult<i64> {
    match reply {
        Reply::Integer(value) => Ok(value),
        Reply::Error(message) => Err(ClientError::Server { message }),
        other => Err(unexpected("integer", &other)),
    }
}

/// Raises an error reply; passes every other reply through.
pub fn checked(reply: Reply) -> ClientResult<Reply> {
    match reply {
        Reply::Error(message) => Err(ClientError::Server { message }),
        other => Ok(other),
    }
}

/// Read-style text commands; a wrong shape yields `None`.
pub fn bulk_text(reply: Reply) -> ClientResult<Option<String>> {
    match checked(reply)? {
        Reply::BulkString(Some(data)) => Ok(Some(latin1_decode(&data))),
        other => {
            debug!(reply = other.kind(), "expected bulk string");
            Ok(None)
        }
    }
}

/// Read-style array commands; a wrong shape yields `None`.
pub fn array(reply: Reply) -> ClientResult<Option<Vec<Reply>>> {
    match checked(reply)? {
        Reply::Array(Some(items)) => Ok(Some(items)),
        other => {
            debug!(reply = other.kind(), "expected array");
            Ok(None)
        }
    }
}

/// Promotion prepare: the epoch, or `None` when the server refused.
pub fn promotion(reply: Reply) -> Option<i64> {
    match reply {
        Reply::Integer(epoch) => Some(epoch),
        Reply::Error(message) => {
            debug!(%message, "promotion prepare refused");
            None
        }
        other => {
            debug!(reply = other.kind(), "unexpected promotion reply");
            None
        }
    }
}

/// GET: value, `None` for a missing key.
pub fn value(reply: Reply) -> ClientResult<Option<Vec<u8>>> {
    match reply {
        Reply::BulkString(data) => Ok(data),
        Reply::Error(message) => Err(ClientError::Server { message }),
        other => Err(unexpected("bulk string", &other)),
    }
}

/// GET issued for its side effect: `true` when the server answered with a
/// bulk string (present or missing key), `false` on an error reply.
pub fn fetched(reply: Reply) -> ClientResult<bool> {
    match reply {
        Reply::BulkString(_) => Ok(true),
        Reply::Error(_) => Ok(false),
        other => Err(unexpected("bulk string", &other)),
    }
}

/// Flattens an array reply into its bulk string items.
pub fn bulk_items(items: Vec<Reply>) -> Vec<Vec<u8>> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Reply::BulkString(Some(data)) => Some(data),
            _ => None,
        })
        .collect()
}

/// Pairs up a flat `name, value, name, value...` array (CONFIG GET).
///
/// A trailing unpaired element is dropped.
pub fn pairs(items: Vec<Reply>) -> Vec<(String, String)> {
    let texts: Vec<String> = items
        .iter()
        .map(|item| item.as_text().unwrap_or_default())
        .collect();
    texts
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

fn unexpected(expected: &str, reply: &Reply) -> ClientError {
    ClientError::UnexpectedResponse(format!("expected {expected}, got {}", reply.kind()))
}
