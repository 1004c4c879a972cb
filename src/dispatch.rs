//! Request routing and the `{"error": ...}` envelope.

use serde_json::{Map, Value, json};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::model::Decompiler;
use crate::tools::{Params, ToolContext, find_tool, tools_json};

const DISPATCH_TARGET: &str = "class_inspector::dispatch";

/// Outcome of one request, rendered as the response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success(Value),
    Error(ToolError),
}

impl Envelope {
    pub fn is_error(&self) -> bool {
        matches!(self, Envelope::Error(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Envelope::Success(value) => value.clone(),
            Envelope::Error(error) => json!({ "error": error.to_string() }),
        }
    }

    /// Two-space indented JSON.
    pub fn to_pretty_string(&self) -> String {
        let value = self.to_json();
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    }
}

impl From<Result<Value, ToolError>> for Envelope {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => Envelope::Success(value),
            Err(error) => Envelope::Error(error),
        }
    }
}

/// Routes requests to the operation table against one decompiler.
#[derive(Clone)]
pub struct Dispatcher {
    decompiler: Arc<dyn Decompiler>,
}

impl Dispatcher {
    pub fn new(decompiler: Arc<dyn Decompiler>) -> Self {
        Self { decompiler }
    }

    pub fn route(&self, method: &str, path: &str, body: &str) -> Envelope {
        match path {
            "/invoke" if method.eq_ignore_ascii_case("POST") => self.invoke_json(body),
            "/tools" => Envelope::Success(tools_json()),
            _ => Envelope::Error(ToolError::NoRoute),
        }
    }

    /// Handles an `/invoke` body: `{"tool": name, "parameters": {...}}`.
    pub fn invoke_json(&self, body: &str) -> Envelope {
        let request = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Envelope::Error(ToolError::InvalidJson(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )));
            }
            Err(e) => return Envelope::Error(ToolError::InvalidJson(e.to_string())),
        };

        let tool = match request.get("tool") {
            Some(Value::String(name)) if !name.is_empty() => name.as_str(),
            _ => return Envelope::Error(ToolError::MissingTool),
        };
        let empty = Map::new();
        let parameters = match request.get("parameters") {
            Some(Value::Object(map)) => map,
            _ => &empty,
        };

        self.invoke(tool, parameters)
    }

    /// Runs one operation. Handler panics become error envelopes.
    pub fn invoke(&self, tool: &str, parameters: &Map<String, Value>) -> Envelope {
        let Some(spec) = find_tool(tool) else {
            return Envelope::Error(ToolError::UnknownTool(tool.to_string()));
        };

        debug!(target: DISPATCH_TARGET, tool, "invoking");
        let ctx = ToolContext::new(self.decompiler.as_ref());
        let params = Params::new(parameters);
        let outcome = catch_unwind(AssertUnwindSafe(|| (spec.handler)(&ctx, &params)));

        match outcome {
            Ok(result) => {
                if let Err(error) = &result {
                    debug!(target: DISPATCH_TARGET, tool, error = %error, "tool failed");
                }
                result.into()
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(target: DISPATCH_TARGET, tool, panic = %message, "tool panicked");
                Envelope::Error(ToolError::Unexpected(message))
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
