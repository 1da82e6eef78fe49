//! Demo tools served by the binary.

use serde_json::{Value, json};
use toolgate::{ToolBackend, ToolDescriptor, ToolError};

/// A handful of stateless tools for trying the server out.
pub struct DemoTools;

impl ToolBackend for DemoTools {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "echo".into(),
                description: "Returns its arguments unchanged".into(),
                input_schema: json!({"type": "object"}),
            },
            ToolDescriptor {
                name: "sum".into(),
                description: "Adds up a list of numbers".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"numbers": {"type": "array", "items": {"type": "number"}}},
                    "required": ["numbers"],
                }),
            },
            ToolDescriptor {
                name: "upper".into(),
                description: "Uppercases a string".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"],
                }),
            },
        ]
    }

    async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
        match tool {
            "echo" => Ok(arguments),
            "sum" => sum(&arguments),
            "upper" => arguments["text"]
                .as_str()
                .map(|text| json!({ "text": text.to_uppercase() }))
                .ok_or_else(|| ToolError::InvalidArguments("`text` must be a string".into())),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn sum(arguments: &Value) -> Result<Value, ToolError> {
    let numbers = arguments["numbers"]
        .as_array()
        .ok_or_else(|| ToolError::InvalidArguments("`numbers` must be an array".into()))?;

    let mut total = 0.0;
    for n in numbers {
        total += n
            .as_f64()
            .ok_or_else(|| ToolError::InvalidArguments(format!("not a number: {n}")))?;
    }
    Ok(json!({ "sum": total }))
}
