//! Concurrent tool registry.
//!
//! Maps tool names to implementations.  Writes happen at init time; after
//! that the registry is read-mostly and shared across sessions, so a
//! [`DashMap`] keeps lookups lock-free.  Parameter schemas are compiled once
//! at registration so the gateway validates without recompiling per call.

use std::sync::Arc;

use dashmap::DashMap;
use jsonschema::{Draft, JSONSchema};
use tracing::{debug, warn};

use super::{Tool, ToolDescriptor};

/// A registered tool plus its pre-compiled parameter schema.
pub(crate) struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
    pub descriptor: ToolDescriptor,
    /// `None` when the descriptor's schema itself failed to compile; the
    /// gateway then skips validation and lets the tool defend itself.
    pub schema: Option<JSONSchema>,
}

/// Name → tool mapping shared by the gateway and the engine.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its descriptor name, replacing any previous
    /// registration with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor();
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&descriptor.parameters)
            .map_err(|e| {
                warn!(
                    tool = %descriptor.name,
                    error = %e,
                    "parameter schema failed to compile; gateway validation disabled for this tool"
                );
            })
            .ok();

        debug!(tool = %descriptor.name, "tool registered");
        self.tools.insert(
            descriptor.name.clone(),
            Arc::new(RegisteredTool {
                tool,
                descriptor,
                schema,
            }),
        );
    }

    /// Look up a tool by name.
    pub(crate) fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors of every registered tool, sorted by name for stable
    /// request assembly.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<_> = self
            .tools
            .iter()
            .map(|e| e.value().descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
