// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire data model for trace exports.
//!
//! An agent sends a sequence of [`ExportTraceRequest`]s. Each one carries an optional
//! [`NodeIdentity`] describing the reporting process and zero or more [`Span`]s. Spans are
//! treated as opaque records by the interceptor; only the node they are grouped under matters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Language of the library that produced the spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    #[default]
    Unspecified,
    Cpp,
    CSharp,
    Erlang,
    GoLang,
    Java,
    NodeJs,
    Php,
    Python,
    Ruby,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "unspecified",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Erlang => "erlang",
            Self::GoLang => "go",
            Self::Java => "java",
            Self::NodeJs => "nodejs",
            Self::Php => "php",
            Self::Python => "python",
            Self::Ruby => "ruby",
        };
        f.write_str(name)
    }
}

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentifier {
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    #[serde(default)]
    pub language: Language,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exporter_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub core_library_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
}

/// Describes the process that reported a set of spans.
///
/// Two identities denote the same logical node iff their [`canonical_key`](Self::canonical_key)
/// bytes are equal. Field order is fixed by the struct declaration and `attributes` is a
/// `BTreeMap`, so the encoding is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<ProcessIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_info: Option<LibraryInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_info: Option<ServiceInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl NodeIdentity {
    #[must_use]
    pub fn new(host_name: &str, pid: u32, language: Language) -> Self {
        Self {
            identifier: Some(ProcessIdentifier {
                host_name: host_name.to_string(),
                pid,
                start_timestamp: None,
            }),
            library_info: Some(LibraryInfo {
                language,
                ..Default::default()
            }),
            service_info: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Canonical serialized form used to group structurally-equal nodes.
    pub fn canonical_key(&self) -> Result<NodeKey, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| NodeKey(bytes.into()))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "{}:{}", id.host_name, id.pid)?,
            None => f.write_str("<unidentified>")?,
        }
        if let Some(library) = &self.library_info {
            write!(f, "/{}", library.language)?;
        }
        Ok(())
    }
}

/// Byte-string key of a canonicalized node. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey(Arc<[u8]>);

impl NodeKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    #[default]
    Unspecified,
    Server,
    Client,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    #[default]
    Unspecified,
    ChildLinkedSpan,
    ParentLinkedSpan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub trace_id: Vec<u8>,
    #[serde(default)]
    pub span_id: Vec<u8>,
    #[serde(default, rename = "type")]
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracestateEntry {
    pub key: String,
    pub value: String,
}

/// A single unit of trace telemetry. Carried through the interceptor untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace_id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub span_id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_span_id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: SpanKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<Vec<TracestateEntry>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

/// One message on an export stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportTraceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeIdentity>,
    #[serde(default)]
    pub spans: Vec<Span>,
}
