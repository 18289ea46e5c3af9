use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use conveyor_security::redact_parameters;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ToolCatalog, ToolDefinition, ToolFailure, ToolResult};
use crate::context::InvocationContext;
use crate::params::{build_for_handler_tool, build_parameters};
use crate::providers::ToolCall;

/// Runs tool calls against the catalog's handlers.
///
/// Nothing escapes `execute_tool`: lookups, configuration problems, handler
/// errors and handler panics all come back as a failed [`ToolResult`].
#[derive(Clone)]
pub struct ToolExecutor {
    catalog: Arc<ToolCatalog>,
}

impl ToolExecutor {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub async fn execute_tool(
        &self,
        call: &ToolCall,
        available: &[ToolDefinition],
        context: &InvocationContext,
    ) -> ToolResult {
        match self.try_execute(call, available, context).await {
            Ok(result) => result,
            Err(failure) => {
                warn!(tool = %call.name, reason = %failure, "tool call failed");
                failure.into()
            }
        }
    }

    async fn try_execute(
        &self,
        call: &ToolCall,
        available: &[ToolDefinition],
        context: &InvocationContext,
    ) -> Result<ToolResult, ToolFailure> {
        let definition = available
            .iter()
            .find(|d| d.name == call.name)
            .ok_or_else(|| ToolFailure::NotFound(call.name.clone()))?;

        self.catalog.check_runtime(definition)?;

        let parameters = if definition.is_handler_tool() {
            build_for_handler_tool(&call.parameters, context, definition)
        } else {
            build_parameters(&call.parameters, context, definition)
        };

        let missing = definition.missing_required(&parameters);
        if !missing.is_empty() {
            return Err(ToolFailure::MissingParameters {
                tool: call.name.clone(),
                missing,
            });
        }

        let handler = self
            .catalog
            .handler(&call.name)
            .ok_or_else(|| ToolFailure::NotFound(call.name.clone()))?;

        let logged = redact_parameters(&Value::Object(call.parameters.clone()));
        debug!(tool = %call.name, parameters = %logged, "executing tool");

        match AssertUnwindSafe(handler.execute(&parameters))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ToolFailure::Handler {
                tool: call.name.clone(),
                message: e.to_string(),
            }),
            Err(panic) => Err(ToolFailure::Panicked {
                tool: call.name.clone(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
