//! # LITF Protocol Codec Module / LITF 协议编解码模块
//!
//! This module implements the Language-Independent Test Format codec: one
//! self-delimited JSON record per line, decoded into typed [`Event`]s and
//! encoded back to the exact wire form. The codec is pure and stateless, so
//! it is safe to call concurrently from every runner adapter.
//!
//! 此模块实现了语言无关测试格式（LITF）的编解码器：每行一个自定界的 JSON
//! 记录，解码为带类型的 [`Event`]，并可编码回完全相同的线上形式。
//! 编解码器是纯粹且无状态的，因此可以从每个运行器适配器并发调用。
//!
//! Decoding is total over well-formed input and classifies every malformed
//! line into exactly one [`DecodeError`] variant; nothing is ever silently
//! dropped. Unknown additional fields are preserved through a round-trip but
//! ignored by the state machine.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::models::TestStatus;

/// The wire schema version this codec speaks.
pub const LITF_VERSION: u64 = 1;

/// The fixed enumeration of record kinds a runner may emit.
/// 运行器可以发出的固定记录种类枚举。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    SuiteStart,
    SuiteEnd,
    TestStart,
    TestResult,
    Log,
    Error,
}

impl EventKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "suite-start" => Some(EventKind::SuiteStart),
            "suite-end" => Some(EventKind::SuiteEnd),
            "test-start" => Some(EventKind::TestStart),
            "test-result" => Some(EventKind::TestResult),
            "log" => Some(EventKind::Log),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            EventKind::SuiteStart => "suite-start",
            EventKind::SuiteEnd => "suite-end",
            EventKind::TestStart => "test-start",
            EventKind::TestResult => "test-result",
            EventKind::Log => "log",
            EventKind::Error => "error",
        }
    }
}

/// Terminal outcome a runner reports for one test.
/// 运行器为单个测试报告的终态结果。
///
/// This is deliberately narrower than [`TestStatus`]: the wire never carries
/// `pending` or `running`, those exist only in the reconstructed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl Outcome {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "passed" => Some(Outcome::Passed),
            "failed" => Some(Outcome::Failed),
            "skipped" => Some(Outcome::Skipped),
            "errored" => Some(Outcome::Errored),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Errored => "errored",
        }
    }
}

impl From<Outcome> for TestStatus {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Passed => TestStatus::Passed,
            Outcome::Failed => TestStatus::Failed,
            Outcome::Skipped => TestStatus::Skipped,
            Outcome::Errored => TestStatus::Errored,
        }
    }
}

/// Kind-specific payload of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// `suite-start`, `suite-end` and `test-start` carry no payload.
    None,
    /// `test-result` carries the outcome and optional duration/message.
    Result {
        status: Outcome,
        duration_ms: Option<f64>,
        message: Option<String>,
    },
    /// `log` and `error` carry free-form text.
    Message { message: String },
}

/// An immutable record emitted by a runner adapter at a point in time.
/// 运行器适配器在某一时刻发出的不可变记录。
///
/// Events are the only way run state changes and are never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Ordered nesting names locating the suite/test in the hierarchy.
    pub suite_path: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    /// Unknown wire fields, preserved verbatim but ignored by the state
    /// machine.
    pub extra: BTreeMap<String, Value>,
}

impl Event {
    fn new(kind: EventKind, suite_path: Vec<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            suite_path,
            timestamp,
            payload: EventPayload::None,
            extra: BTreeMap::new(),
        }
    }

    pub fn suite_start(path: Vec<String>, at: DateTime<Utc>) -> Self {
        Self::new(EventKind::SuiteStart, path, at)
    }

    pub fn suite_end(path: Vec<String>, at: DateTime<Utc>) -> Self {
        Self::new(EventKind::SuiteEnd, path, at)
    }

    pub fn test_start(path: Vec<String>, at: DateTime<Utc>) -> Self {
        Self::new(EventKind::TestStart, path, at)
    }

    pub fn test_result(
        path: Vec<String>,
        at: DateTime<Utc>,
        status: Outcome,
        duration_ms: Option<f64>,
        message: Option<String>,
    ) -> Self {
        let mut ev = Self::new(EventKind::TestResult, path, at);
        ev.payload = EventPayload::Result {
            status,
            duration_ms,
            message,
        };
        ev
    }

    pub fn log(path: Vec<String>, at: DateTime<Utc>, message: String) -> Self {
        let mut ev = Self::new(EventKind::Log, path, at);
        ev.payload = EventPayload::Message { message };
        ev
    }

    /// An `error` event; also used by the supervisor as the pseudo-event
    /// injected for every decode failure, so feed corruption stays visible.
    pub fn error(path: Vec<String>, at: DateTime<Utc>, message: String) -> Self {
        let mut ev = Self::new(EventKind::Error, path, at);
        ev.payload = EventPayload::Message { message };
        ev
    }
}

/// Classification of a malformed protocol line.
/// 格式错误的协议行的分类。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

fn take(obj: &mut Map<String, Value>, field: &'static str) -> Result<Value, DecodeError> {
    obj.remove(field).ok_or(DecodeError::MissingField(field))
}

fn as_str(value: Value, field: &str) -> Result<String, DecodeError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(DecodeError::MalformedPayload(format!(
            "field `{field}` must be a string, got {other}"
        ))),
    }
}

/// Decodes one wire line into an [`Event`].
///
/// Every failure is classified: an unrecognized `kind` is [`DecodeError::UnknownKind`],
/// an absent required field is [`DecodeError::MissingField`] and everything
/// else (bad JSON, wrong types, non-numeric durations, unsupported versions)
/// is [`DecodeError::MalformedPayload`].
///
/// 将一条线上记录解码为 [`Event`]，所有失败都会被准确分类。
pub fn decode(line: &str) -> Result<Event, DecodeError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| DecodeError::MalformedPayload(format!("invalid JSON: {e}")))?;
    let mut obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(DecodeError::MalformedPayload(format!(
                "record must be a JSON object, got {other}"
            )));
        }
    };

    match take(&mut obj, "v")? {
        Value::Number(n) if n.as_u64() == Some(LITF_VERSION) => {}
        other => {
            return Err(DecodeError::MalformedPayload(format!(
                "unsupported protocol version {other}"
            )));
        }
    }

    let kind_str = as_str(take(&mut obj, "kind")?, "kind")?;
    let kind = EventKind::parse(&kind_str).ok_or(DecodeError::UnknownKind(kind_str))?;

    let suite_path = match take(&mut obj, "suite_path")? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| as_str(item, "suite_path"))
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(DecodeError::MalformedPayload(format!(
                "field `suite_path` must be an array of strings, got {other}"
            )));
        }
    };
    if suite_path.is_empty() {
        return Err(DecodeError::MalformedPayload(
            "field `suite_path` must not be empty".to_string(),
        ));
    }

    let ts_str = as_str(take(&mut obj, "timestamp")?, "timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&ts_str)
        .map_err(|e| DecodeError::MalformedPayload(format!("bad timestamp `{ts_str}`: {e}")))?
        .with_timezone(&Utc);

    let payload = match kind {
        EventKind::TestResult => {
            let status_str = as_str(take(&mut obj, "status")?, "status")?;
            let status = Outcome::parse(&status_str).ok_or_else(|| {
                DecodeError::MalformedPayload(format!("unknown status `{status_str}`"))
            })?;
            let duration_ms = match obj.remove("duration_ms") {
                None | Some(Value::Null) => None,
                Some(Value::Number(n)) => n.as_f64(),
                Some(other) => {
                    return Err(DecodeError::MalformedPayload(format!(
                        "field `duration_ms` must be a number, got {other}"
                    )));
                }
            };
            let message = match obj.remove("message") {
                None | Some(Value::Null) => None,
                Some(v) => Some(as_str(v, "message")?),
            };
            EventPayload::Result {
                status,
                duration_ms,
                message,
            }
        }
        EventKind::Log | EventKind::Error => EventPayload::Message {
            message: as_str(take(&mut obj, "message")?, "message")?,
        },
        EventKind::SuiteStart | EventKind::SuiteEnd | EventKind::TestStart => EventPayload::None,
    };

    // Whatever the runner sent beyond the schema travels along untouched.
    // 运行器发送的超出模式的字段将原样保留。
    let extra = obj.into_iter().collect();

    Ok(Event {
        kind,
        suite_path,
        timestamp,
        payload,
        extra,
    })
}

/// Encodes an [`Event`] into its wire line (no trailing newline).
///
/// Encoding is the exact inverse of [`decode`] for well-formed events:
/// `decode(&encode(e)) == Ok(e)`.
pub fn encode(event: &Event) -> String {
    let mut obj = Map::new();
    obj.insert("v".to_string(), Value::from(LITF_VERSION));
    obj.insert("kind".to_string(), Value::from(event.kind.as_str()));
    obj.insert(
        "suite_path".to_string(),
        Value::Array(event.suite_path.iter().map(|s| Value::from(s.as_str())).collect()),
    );
    obj.insert(
        "timestamp".to_string(),
        Value::from(event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    );

    match &event.payload {
        EventPayload::None => {}
        EventPayload::Result {
            status,
            duration_ms,
            message,
        } => {
            obj.insert("status".to_string(), Value::from(status.as_str()));
            if let Some(ms) = duration_ms {
                obj.insert("duration_ms".to_string(), Value::from(*ms));
            }
            if let Some(msg) = message {
                obj.insert("message".to_string(), Value::from(msg.as_str()));
            }
        }
        EventPayload::Message { message } => {
            obj.insert("message".to_string(), Value::from(message.as_str()));
        }
    }

    for (key, value) in &event.extra {
        obj.insert(key.clone(), value.clone());
    }

    Value::Object(obj).to_string()
}
