//! Command handler registry.
//!
//! The set of commands is closed ([`CommandKind`]); each one decodes its typed
//! payload, calls a service and returns a JSON result for the envelope.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bridge::protocol::{
    CommandKind, DeployRequest, ExecuteRequest, ExecuteResponse, FileExistsRequest,
    FileExistsResponse, IsRunningRequest, IsRunningResponse, ReadRequest, WriteRequest,
    stringify_args,
};
use crate::host::HostError;
use crate::services::{Evaluator, Io};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("can't find handler {0}")]
    UnknownHandler(String),
    #[error("invalid payload for {command}: {source}")]
    InvalidPayload {
        command: CommandKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("isRunning needs an id or a script")]
    MissingTarget,
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("failed to encode {command} result: {source}")]
    Encode {
        command: CommandKind,
        #[source]
        source: serde_json::Error,
    },
}

pub struct Registry {
    io: Io,
    evaluator: Evaluator,
    default_host: String,
}

impl Registry {
    /// `default_host` answers `isRunning` requests that name no host.
    pub fn new(io: Io, evaluator: Evaluator, default_host: impl Into<String>) -> Self {
        Self {
            io,
            evaluator,
            default_host: default_host.into(),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<CommandKind, HandlerError> {
        CommandKind::parse(name).ok_or_else(|| HandlerError::UnknownHandler(name.to_string()))
    }

    pub async fn execute(&self, kind: CommandKind, payload: Value) -> Result<Value, HandlerError> {
        match kind {
            CommandKind::Read => {
                let req: ReadRequest = decode(kind, payload)?;
                Ok(Value::String(self.io.read(&req.handle).await?))
            }
            CommandKind::Write => {
                let req: WriteRequest = decode(kind, payload)?;
                let lines = req.data.into_lines();
                self.io.write(&req.handle, &lines, req.mode).await?;
                Ok(Value::Bool(true))
            }
            CommandKind::Deploy => {
                let req: DeployRequest = decode(kind, payload)?;
                self.evaluator.deploy(&req.target, &req.files).await?;
                Ok(Value::Bool(true))
            }
            CommandKind::Execute => {
                let req: ExecuteRequest = decode(kind, payload)?;
                let args = stringify_args(&req.args);
                let pid = self
                    .evaluator
                    .execute(&req.host, req.threads, &req.script, &args)
                    .await?;
                encode(kind, ExecuteResponse { pid })
            }
            CommandKind::IsRunning => {
                let req: IsRunningRequest = decode(kind, payload)?;
                let target = req.target().ok_or(HandlerError::MissingTarget)?;
                let host = match req.host.as_deref() {
                    Some(host) if !host.is_empty() => host,
                    _ => &self.default_host,
                };
                let args = stringify_args(&req.args);
                let running = self
                    .evaluator
                    .executor()
                    .is_running(&target, host, &args)
                    .await?;
                encode(kind, IsRunningResponse { running })
            }
            CommandKind::FileExists => {
                let req: FileExistsRequest = decode(kind, payload)?;
                let exists = self.io.exists(&req.file).await?;
                encode(kind, FileExistsResponse { exists })
            }
        }
    }
}

fn decode<T: DeserializeOwned>(command: CommandKind, payload: Value) -> Result<T, HandlerError> {
    serde_json::from_value(payload).map_err(|source| HandlerError::InvalidPayload { command, source })
}

fn encode<T: serde::Serialize>(command: CommandKind, value: T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|source| HandlerError::Encode { command, source })
}
