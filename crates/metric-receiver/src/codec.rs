// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of inbound JSON events to InfluxDB line protocol.
//!
//! An event looks like:
//!
//! ```json
//! {"measurement": "cpu", "tags": {"host": "a"}, "fields": {"usage": 0.5}, "timestamp": 1656581409}
//! ```
//!
//! and is encoded as a single line:
//!
//! ```text
//! cpu,host=a usage=0.5 1656581409
//! ```

use crate::errors::ValidationError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    // JSON carries no integer/float distinction, every number is a float
    Number(f64),
    String(String),
}

/// Decoded inbound event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CanonicalMetric {
    #[serde(rename = "measurement", default)]
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Values <= 0 are treated as unset and the sink assigns the time.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Line protocol bytes of one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord(Vec<u8>);

impl EncodedRecord {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl CanonicalMetric {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.tags.keys().chain(self.fields.keys()).any(String::is_empty) {
            return Err(ValidationError::EmptyKey(self.name.clone()));
        }
        // tags without a value are left out of the line
        if self.tags.values().all(String::is_empty) {
            return Err(ValidationError::MissingTags(self.name.clone()));
        }
        if self.fields.is_empty() {
            return Err(ValidationError::MissingFields(self.name.clone()));
        }
        Ok(())
    }

    /// Renders the metric as one line. Tags and fields come out sorted by key,
    /// tags with an empty value are skipped.
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.name, &[',', ' ']);

        for (key, value) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(value, &[',', '=', ' ']));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            write_field_value(&mut line, value);
        }

        if let Some(timestamp) = self.timestamp.filter(|t| *t > 0) {
            // writing to a String cannot fail
            let _ = write!(line, " {timestamp}");
        }

        line
    }
}

/// Parses one raw event and encodes it, or explains why it was rejected.
pub fn encode(raw: &[u8]) -> Result<EncodedRecord, ValidationError> {
    let metric: CanonicalMetric =
        serde_json::from_slice(raw).map_err(|e| ValidationError::Parse(e.to_string()))?;
    metric.validate()?;
    Ok(EncodedRecord(metric.to_line_protocol().into_bytes()))
}

fn write_field_value(line: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Bool(b) => line.push_str(if *b { "true" } else { "false" }),
        FieldValue::Number(n) => {
            let _ = write!(line, "{n}");
        }
        FieldValue::String(s) => {
            line.push('"');
            for c in s.chars() {
                match c {
                    '\\' => line.push_str("\\\\"),
                    '"' => line.push_str("\\\""),
                    '\n' => line.push_str("\\n"),
                    c => line.push(c),
                }
            }
            line.push('"');
        }
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\n' {
            out.push_str("\\n");
            continue;
        }
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
