//! Memory tools - let the model store and look up facts about the user.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{MemoryTool, ToolError};
use crate::session::{SessionError, SessionMemoryController};

const MEMORY_UNAVAILABLE: &str = "Memory is not available in this session.";

/// Spoken result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolReply {
    pub success: bool,
    pub text: String,
}

impl ToolReply {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    pub(super) fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RememberFactArgs {
    #[serde(alias = "fact")]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RecallMemoriesArgs {
    #[serde(alias = "topic")]
    query: String,
}

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    RememberFact { text: String },
    RecallMemories { query: String },
}

impl ToolCall {
    /// Parse a call from the tool name and its JSON arguments.
    ///
    /// Arguments may also arrive as a JSON-encoded string.
    pub fn parse(name: &str, args: Value) -> Result<Self, ToolError> {
        let tool: MemoryTool = name.parse()?;
        let args = match args {
            Value::String(raw) => serde_json::from_str(&raw).map_err(|e| invalid(tool, e))?,
            other => other,
        };

        match tool {
            MemoryTool::RememberFact => {
                let args: RememberFactArgs =
                    serde_json::from_value(args).map_err(|e| invalid(tool, e))?;
                Ok(Self::RememberFact { text: args.text })
            }
            MemoryTool::RecallMemories => {
                let args: RecallMemoriesArgs =
                    serde_json::from_value(args).map_err(|e| invalid(tool, e))?;
                Ok(Self::RecallMemories { query: args.query })
            }
        }
    }

    pub fn tool(&self) -> MemoryTool {
        match self {
            Self::RememberFact { .. } => MemoryTool::RememberFact,
            Self::RecallMemories { .. } => MemoryTool::RecallMemories,
        }
    }

    pub async fn execute(&self, session: &SessionMemoryController) -> ToolReply {
        match self {
            Self::RememberFact { text } => remember_fact(session, text).await,
            Self::RecallMemories { query } => recall_memories(session, query).await,
        }
    }
}

fn invalid(tool: MemoryTool, err: serde_json::Error) -> ToolError {
    ToolError::InvalidArguments {
        tool,
        reason: err.to_string(),
    }
}

pub(super) fn parameters_schema(tool: MemoryTool) -> Value {
    match tool {
        MemoryTool::RememberFact => json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The fact to remember, phrased about the user (e.g., 'User's daughter is called Mia')"
                }
            },
            "required": ["text"]
        }),
        MemoryTool::RecallMemories => json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Topic to look up (e.g., 'favourite food', 'holiday plans')"
                }
            },
            "required": ["query"]
        }),
    }
}

async fn remember_fact(session: &SessionMemoryController, text: &str) -> ToolReply {
    match session.remember_fact(text).await {
        Ok(fact) => ToolReply::ok(format!("I'll remember that: {}", fact)),
        Err(SessionError::MemoryDisabled) => ToolReply::failure(MEMORY_UNAVAILABLE),
        Err(e) => {
            tracing::error!("Failed to remember fact: {}", e);
            ToolReply::failure("Sorry, I couldn't save that to memory.")
        }
    }
}

async fn recall_memories(session: &SessionMemoryController, query: &str) -> ToolReply {
    let topic = query.trim();
    match session.recall_memories(topic).await {
        Ok(facts) if facts.is_empty() => {
            ToolReply::ok(format!("I don't have any memories about '{}' yet.", topic))
        }
        Ok(facts) => {
            let lines: Vec<String> = facts.iter().map(|f| format!("- {}", f.text)).collect();
            ToolReply::ok(format!(
                "Here's what I remember about '{}':\n{}",
                topic,
                lines.join("\n")
            ))
        }
        Err(SessionError::MemoryDisabled) => ToolReply::failure(MEMORY_UNAVAILABLE),
        Err(e) => {
            tracing::error!("Failed to recall memories: {}", e);
            ToolReply::failure("Sorry, I couldn't search my memory right now.")
        }
    }
}
