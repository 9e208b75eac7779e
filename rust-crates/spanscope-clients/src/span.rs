use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trace span as emitted by an instrumented program
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "default_sampled")]
    pub sampled: bool,
    #[serde(default)]
    pub status: Option<SpanStatus>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// Lifecycle of a span; times are nanoseconds since the epoch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "_tag")]
pub enum SpanStatus {
    Started {
        #[serde(rename = "startTime")]
        start_time: u64,
    },
    Ended {
        #[serde(rename = "startTime")]
        start_time: u64,
        #[serde(rename = "endTime")]
        end_time: u64,
    },
}

fn default_sampled() -> bool {
    true
}

impl Span {
    /// Convert span to JSON string with newline
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}
