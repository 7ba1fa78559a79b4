//! Wire protocol types for the control connection and port slots.
//!
//! - **Command frame** (controller → daemon): `{"name", "payload", "id"?}`
//! - **Envelope** (daemon → controller, and producer → port slot):
//!   `{"success", "payload", "error"?, "id"?}`

use serde::{Deserialize, Serialize};

use crate::host::{Pid, ProcessTarget, WriteMode};

/// An inbound command. `payload` is untyped at this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Correlation id, echoed on the response. Numeric ids are kept as text.
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
}

/// Correlation ids as controllers send them.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Text(text) => text,
            WireId::Number(n) => n.to_string(),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<WireId>::deserialize(deserializer)?.map(String::from))
}

/// Uniform response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Envelope {
    pub fn success(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            id: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: serde_json::Value::Null,
            error: Some(error.into()),
            id: None,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}

/// A frame that could not be decoded as a [`CommandFrame`].
#[derive(Debug, thiserror::Error)]
#[error("malformed command frame: {reason}")]
pub struct ProtocolError {
    pub reason: String,
    /// Correlation id, if one could be salvaged from the raw text.
    pub id: Option<String>,
}

/// Decode one inbound text record.
pub fn decode_frame(text: &str) -> Result<CommandFrame, ProtocolError> {
    match serde_json::from_str::<CommandFrame>(text) {
        Ok(frame) => Ok(frame),
        Err(e) => {
            let id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|mut v| v.get_mut("id").map(serde_json::Value::take))
                .and_then(|id| serde_json::from_value::<WireId>(id).ok())
                .map(String::from);
            Err(ProtocolError {
                reason: e.to_string(),
                id,
            })
        }
    }
}

/// The fixed set of commands the daemon understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Read,
    Write,
    Deploy,
    Execute,
    IsRunning,
    FileExists,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        Self::Read,
        Self::Write,
        Self::Deploy,
        Self::Execute,
        Self::IsRunning,
        Self::FileExists,
    ];

    /// Look up a command by its wire name. Case-sensitive.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Deploy => "deploy",
            Self::Execute => "execute",
            Self::IsRunning => "isRunning",
            Self::FileExists => "fileExists",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadRequest {
    pub handle: String,
}

/// Write payload data: a single string or a list of lines.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WriteData {
    Text(String),
    Lines(Vec<String>),
}

impl WriteData {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            Self::Text(text) => vec![text],
            Self::Lines(lines) => lines,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub handle: String,
    pub data: WriteData,
    #[serde(default)]
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub target: String,
    pub files: Vec<String>,
}

/// A script argument as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptArg {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl std::fmt::Display for ScriptArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

pub fn stringify_args(args: &[ScriptArg]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

fn default_threads() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub host: String,
    #[serde(default = "default_threads")]
    pub threads: u32,
    pub script: String,
    #[serde(default)]
    pub args: Vec<ScriptArg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsRunningRequest {
    #[serde(default)]
    pub id: Option<Pid>,
    #[serde(default)]
    pub script: Option<String>,
    /// Empty or missing means the daemon's own server.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub args: Vec<ScriptArg>,
}

impl IsRunningRequest {
    /// The pid wins over the script name when both are given.
    pub fn target(&self) -> Option<ProcessTarget> {
        match (self.id, &self.script) {
            (Some(pid), _) => Some(ProcessTarget::Pid(pid)),
            (None, Some(script)) => Some(ProcessTarget::Script(script.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileExistsRequest {
    pub file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub pid: Pid,
}

#[derive(Debug, Clone, Serialize)]
pub struct IsRunningResponse {
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileExistsResponse {
    pub exists: bool,
}
