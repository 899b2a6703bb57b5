//! JSON schemas the model must answer with. Sent on every request.

use super::wire::ResponseFormat;
use serde_json::{json, Value};

pub const ANALYSIS_SCHEMA_NAME: &str = "commit_analysis";
pub const MERGE_SCHEMA_NAME: &str = "merge_message";

/// Actions the model may choose. `split-commits` and `create-pr` are never offered.
pub const ANALYSIS_ACTIONS: [&str; 4] = ["commit-direct", "create-branch", "review", "merge"];
pub const MERGE_STRATEGIES: [&str; 3] = ["squash", "regular", "fast-forward"];

pub fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "commit_message": {
                "type": "string",
                "description": "Commit message: title line (max 72 chars, no trailing period), optional blank line and body"
            },
            "action": { "type": "string", "enum": ANALYSIS_ACTIONS },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "reasoning": { "type": "string" },
            "branch_name": { "type": "string" },
            "alternatives": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ANALYSIS_ACTIONS },
                        "description": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                    },
                    "required": ["action", "description", "confidence"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["commit_message", "action", "confidence", "reasoning"],
        "additionalProperties": false
    })
}

pub fn merge_message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "merge_message": { "type": "string" },
            "strategy": { "type": "string", "enum": MERGE_STRATEGIES },
            "reasoning": { "type": "string" }
        },
        "required": ["merge_message", "strategy", "reasoning"],
        "additionalProperties": false
    })
}

pub fn analysis_format() -> ResponseFormat {
    ResponseFormat::strict_schema(ANALYSIS_SCHEMA_NAME, analysis_schema())
}

pub fn merge_message_format() -> ResponseFormat {
    ResponseFormat::strict_schema(MERGE_SCHEMA_NAME, merge_message_schema())
}
