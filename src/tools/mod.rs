//! Built-in tool implementations.
//!
//! - `calculate` - Binary arithmetic
//! - `tasks` - Long-running job with progress frames
//! - `fetch` - Upstream HTTP GET

pub mod calculate;
pub mod fetch;
pub mod tasks;

use reqwest::Client;

use crate::error::Result;
use crate::mcp::handler::ToolDispatcher;

/// Register all tools with the dispatcher.
pub fn register_all_tools(dispatcher: &mut ToolDispatcher, http_client: Client) -> Result<()> {
    dispatcher.register(calculate::CalculateTool::new())?;
    dispatcher.register(tasks::LongTaskTool::new())?;
    dispatcher.register(fetch::FetchUrlTool::new(http_client))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_tools() {
        let mut dispatcher = ToolDispatcher::new();
        register_all_tools(&mut dispatcher, Client::new()).unwrap();

        assert_eq!(dispatcher.tool_count(), 3);
        for name in ["calculate", "long_task", "fetch_url"] {
            assert!(dispatcher.has_tool(name), "missing {}", name);
        }
    }
}
