//! Host↔worker execution protocol.
//!
//! # Responsibilities
//! - Define the two wire messages: invocation in, reply out
//! - Define the control channel commands and exit reasons
//!
//! # Design Decisions
//! - Exactly one JSON-serialized message each way per invocation
//! - One outstanding invocation per unit (the handle serializes callers)
//! - A budget-exceeded worker exits with no payload; the absence of a
//!   payload is the signal, never a synthesized error body

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// Host → worker: one request invocation.
///
/// Headers are ordered and lower-cased; multi-value headers are comma-joined
/// before they get here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokePayload {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
}

/// Worker → host: one response.
///
/// `body` is omitted when the handler's response body was literally
/// undefined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, rename = "statusText", skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_status() -> u16 {
    200
}

/// Control commands sent to a unit's message loop.
pub enum UnitCommand {
    /// One serialized [`InvokePayload`]. The reply sender is dropped without
    /// a value when the worker terminates instead of responding.
    Invoke {
        message: String,
        reply: oneshot::Sender<Result<String, String>>,
    },
    /// The literal `"close"` control message: end the loop, exit cleanly.
    Close,
}

/// Why a unit's message loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Close control message; exit code 0.
    Clean,
    /// Per-request CPU budget exceeded; the computed response was discarded.
    CpuBudget,
    /// The isolate grew past its heap limit and was terminated before V8
    /// could abort the host process.
    HeapLimit,
    /// Abnormal exit (bootstrap failure, isolate death).
    Crash,
}

impl ExitReason {
    pub fn code(self) -> i32 {
        match self {
            ExitReason::Clean => 0,
            ExitReason::CpuBudget => 1,
            ExitReason::HeapLimit => 1,
            ExitReason::Crash => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_omits_absent_body() {
        let payload = InvokePayload {
            method: "GET".into(),
            url: "http://localhost/hello".into(),
            headers: IndexMap::new(),
            body: None,
            params: BTreeMap::new(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("\"body\""));
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_reply_defaults() {
        let reply: WorkerReply = serde_json::from_str("{}").unwrap();
        assert_eq!(reply.status, 200);
        assert!(reply.body.is_none());

        let reply: WorkerReply =
            serde_json::from_str(r#"{"status":404,"statusText":"Not Found"}"#).unwrap();
        assert_eq!(reply.status, 404);
        assert_eq!(reply.status_text.as_deref(), Some("Not Found"));
    }
}
