//! AskUser tool: the per-task question primitive.
//!
//! The dispatcher intercepts calls to this tool: it suspends the turn,
//! emits an `agent_question` event, and resumes with the client's answers
//! injected as the tool result. Executing it directly means the
//! interception was bypassed, which is an error.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub const ASK_USER_TOOL: &str = "AskUser";

pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        ASK_USER_TOOL
    }

    fn description(&self) -> &str {
        "Ask the user clarifying questions when you cannot proceed without their input. \
         Provide each question with a short id; answers come back keyed by id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "description": "Questions to ask the user",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {
                                "type": "string",
                                "description": "Short identifier for this question"
                            },
                            "question": {
                                "type": "string",
                                "description": "The question text"
                            },
                            "options": {
                                "type": "array",
                                "description": "Suggested answers, if any",
                                "items": { "type": "string" }
                            }
                        },
                        "required": ["id", "question"],
                        "additionalProperties": false
                    },
                    "minItems": 1
                }
            },
            "required": ["questions"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::error("AskUser must be handled by the dispatcher, not executed directly")
    }
}
