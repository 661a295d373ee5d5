use std::sync::Arc;

use super::handler::ToolHandler;

struct ToolDef {
    name: String,
    handler: Arc<dyn ToolHandler>,
}

/// Catalog of tools the runner can execute, looked up by name.
pub struct ToolSet {
    tools: Vec<ToolDef>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn add(mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        let name = name.into();
        self.tools.retain(|t| t.name != name);
        self.tools.push(ToolDef {
            name,
            handler: Arc::new(handler),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .map(|t| Arc::clone(&t.handler))
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}
