//! Line protocol spoken with compression workers
//!
//! ```text
//! worker  -> Ready
//! caller  -> {"command":"modify","compress":true}
//! caller  -> <base64 payload>
//! worker  -> OK
//! worker  -> <base64 result>
//! ```
//!
//! Any line on the worker's error stream aborts the request in flight.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use super::PoolError;

pub(crate) const READY: &str = "Ready";
pub(crate) const OK: &str = "OK";

#[derive(Debug, Serialize)]
struct Command {
    command: &'static str,
    compress: bool,
}

const COMPRESS: Command = Command {
    command: "modify",
    compress: true,
};

/// The two request lines, newline-terminated
pub(crate) fn encode_request(payload: &[u8]) -> Result<String, PoolError> {
    let command = serde_json::to_string(&COMPRESS)
        .map_err(|err| PoolError::Protocol(format!("cannot encode command: {err}")))?;
    let mut request = String::with_capacity(command.len() + payload.len() * 4 / 3 + 8);
    request.push_str(&command);
    request.push('\n');
    STANDARD.encode_string(payload, &mut request);
    request.push('\n');
    Ok(request)
}

pub(crate) fn decode_result(line: &str) -> Result<Vec<u8>, PoolError> {
    STANDARD
        .decode(line.trim())
        .map_err(|err| PoolError::Protocol(format!("result line is not base64: {err}")))
}
