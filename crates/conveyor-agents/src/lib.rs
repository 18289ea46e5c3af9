pub mod context;
pub mod directives;
pub mod messages;
pub mod params;
pub mod providers;
pub mod request;
pub mod runtime;
pub mod tools;

pub use context::{DataPacket, EngineParameters, InvocationContext};
pub use directives::{
    ALL_AGENT_TYPES, CHAT_AGENT, Directive, DirectiveContext, DirectiveRegistry,
    DirectiveRegistryBuilder, FnDirective, PIPELINE_AGENT,
};
pub use messages::{
    MessageFormatter, ToolCallValidation, build_message, generate_duplicate_correction_message,
    validate_tool_call,
};
pub use params::{build_for_handler_tool, build_parameters};
pub use providers::{AiRequest, AiResponse, ChatMessage, ChatRole, ProviderGateway, ToolCall, ToolSchema};
pub use request::{RequestBuilder, normalize_reply};
pub use runtime::{
    ConversationLoop, ConversationOptions, ConversationOutcome, ConversationState,
    ToolExecutionRecord,
};
pub use tools::{
    ParameterKind, ParameterSpec, ToolCatalog, ToolDefinition, ToolExecutor, ToolFailure,
    ToolHandler, ToolResult, ToolSettings,
};
