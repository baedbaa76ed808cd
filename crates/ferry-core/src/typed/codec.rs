//! Payload codec - JSON <-> typed tasks.
//!
//! Both directions fail permanently. A payload that does not decode today will
//! not decode on the next attempt either.

use serde::Serialize;
use serde_json::Value;

use super::handler::HandlerError;
use super::task::Task;

pub fn decode<T: Task>(payload: Value) -> Result<T, HandlerError> {
    serde_json::from_value(payload)
        .map_err(|e| HandlerError::permanent(format!("payload for {}: {e}", T::NAME)))
}

pub fn encode<O: Serialize>(output: &O) -> Result<Value, HandlerError> {
    serde_json::to_value(output).map_err(|e| HandlerError::permanent(format!("result: {e}")))
}
