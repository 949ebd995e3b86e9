//! Current time tool.

use async_trait::async_trait;
use deskloop_core::error::ToolError;
use deskloop_core::tool::{Tool, ToolResult};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time, formatted as YYYY-MM-DD HH:MM:SS."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let now = chrono::Local::now();
        Ok(ToolResult::ok(now.format("%Y-%m-%d %H:%M:%S").to_string()))
    }
}
