use std::sync::Arc;

use conveyor_config::ToolsConfig;
use tracing::{debug, info};

use super::{ToolDefinition, ToolFailure, ToolHandler};

/// Site-wide tool state the catalog consults: global enablement and whether
/// the tool's credentials/settings are present.
pub trait ToolSettings: Send + Sync {
    fn is_globally_enabled(&self, tool: &str) -> bool;
    fn is_configured(&self, tool: &str) -> bool;
}

impl ToolSettings for ToolsConfig {
    fn is_globally_enabled(&self, tool: &str) -> bool {
        !self.is_disabled(tool)
    }

    fn is_configured(&self, tool: &str) -> bool {
        self.has_settings(tool)
    }
}

struct CatalogEntry {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Read-only registry of every tool the engine knows about.
///
/// Built at startup and shared behind an `Arc`; conversation runs only read
/// from it.
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    settings: Arc<dyn ToolSettings>,
}

impl ToolCatalog {
    pub fn new(settings: Arc<dyn ToolSettings>) -> Self {
        Self {
            entries: Vec::new(),
            settings,
        }
    }

    /// Register a tool. A later registration with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        info!("registered tool: {}", definition.name);
        let entry = CatalogEntry {
            definition,
            handler,
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.definition.name == entry.definition.name)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.entry(name).map(|e| &e.definition)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entry(name).map(|e| Arc::clone(&e.handler))
    }

    fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.definition.name == name)
    }

    /// Site-level checks shared by discovery and execution: globally enabled
    /// and, unless opt-out, configured.
    pub fn check_runtime(&self, definition: &ToolDefinition) -> Result<(), ToolFailure> {
        if !self.settings.is_globally_enabled(&definition.name) {
            return Err(ToolFailure::Disabled(definition.name.clone()));
        }
        if definition.requires_config
            && !definition.is_opt_out
            && !self.settings.is_configured(&definition.name)
        {
            return Err(ToolFailure::NotConfigured(definition.name.clone()));
        }
        Ok(())
    }

    /// Tools usable by `agent_type` in this invocation.
    ///
    /// `enabled_ids` is the invocation's selected set; an empty set places no
    /// restriction. Catalog order is preserved.
    pub fn get_available_tools(&self, agent_type: &str, enabled_ids: &[String]) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .map(|e| &e.definition)
            .filter(|d| d.applies_to(agent_type))
            .filter(|d| enabled_ids.is_empty() || enabled_ids.iter().any(|id| id == &d.name))
            .filter(|d| match self.check_runtime(d) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(tool = %d.name, %reason, "tool filtered from available set");
                    false
                }
            })
            .cloned()
            .collect()
    }
}
