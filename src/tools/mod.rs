//! Memory tools exposed to the voice model.
//!
//! The set is fixed: `remember_fact` and `recall_memories`. Calls arrive as a name plus
//! JSON arguments and always produce a short spoken reply; failures never reach the
//! user as raw errors.

mod memory;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::SessionMemoryController;

pub use memory::{ToolCall, ToolReply};

/// Tool definition for the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function definition with schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: MemoryTool, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTool {
    RememberFact,
    RecallMemories,
}

impl MemoryTool {
    pub const ALL: [MemoryTool; 2] = [MemoryTool::RememberFact, MemoryTool::RecallMemories];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RememberFact => "remember_fact",
            Self::RecallMemories => "recall_memories",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::RememberFact => {
                "Remember an important fact about the user for future conversations. Use when the user shares something worth keeping, like a preference, a name, or a plan."
            }
            Self::RecallMemories => {
                "Search your memory for information about a specific topic. Use when the user refers to something from an earlier conversation."
            }
        }
    }

    pub fn parameters_schema(&self) -> Value {
        memory::parameters_schema(*self)
    }

    /// Definition in the function-calling format.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

impl fmt::Display for MemoryTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemoryTool {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.name() == s)
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

/// Definitions for every memory tool.
pub fn tool_schemas() -> Vec<ToolDefinition> {
    MemoryTool::ALL.iter().map(MemoryTool::definition).collect()
}

/// Parse and run a tool call against a session.
pub async fn dispatch(session: &SessionMemoryController, name: &str, args: Value) -> ToolReply {
    match ToolCall::parse(name, args) {
        Ok(call) => call.execute(session).await,
        Err(e) => {
            tracing::warn!("Rejected tool call: {}", e);
            ToolReply::failure(e.spoken())
        }
    }
}

impl ToolError {
    /// Short reply for the user.
    pub fn spoken(&self) -> String {
        match self {
            Self::UnknownTool(_) => "Sorry, I can't do that.".to_string(),
            Self::InvalidArguments { tool, .. } => match tool {
                MemoryTool::RememberFact => "Sorry, I couldn't save that to memory.".to_string(),
                MemoryTool::RecallMemories => {
                    "Sorry, I couldn't search my memory right now.".to_string()
                }
            },
        }
    }
}
