mod calculator;
mod calendar;

pub use calculator::Calculator;
pub use calendar::Calendar;

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::call::ToolCall;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ToolError {
    #[error("malformed tool call: {0}")]
    MalformedCall(String),
    #[error("no tool named `{0}`")]
    UnknownTool(String),
    #[error("invalid argument for `{tool}`: {message}")]
    InvalidArgument { tool: String, message: String },
    #[error("`{tool}` failed: {message}")]
    Execution { tool: String, message: String },
}

/// A callable tool: takes a text argument, returns a text result.
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn invoke(&self, argument: &str) -> Result<String, ToolError>;
}

/// Callback used for closure-backed tools. Receives the call argument and
/// returns the tool output as a string.
pub type ToolCallback = dyn Fn(&str) -> Result<String, ToolError> + Send + Sync;

/// A tool backed by a closure.
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    callback: Arc<ToolCallback>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            callback: Arc::new(callback),
        }
    }
}

impl ToolAdapter for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn invoke(&self, argument: &str) -> Result<String, ToolError> {
        (self.callback)(argument)
    }
}

/// Tools available to candidate calls, looked up case-insensitively by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn ToolAdapter>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in [`Calculator`].
    ///
    /// Every default tool is a pure function of its argument, so filtering
    /// decisions made with it are reproducible. A [`Calendar`] has to be
    /// registered explicitly.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Calculator);
        registry
    }

    /// Add a tool, returning the one it replaced, if any.
    pub fn register<T: ToolAdapter + 'static>(
        &mut self,
        tool: T,
    ) -> Option<Arc<dyn ToolAdapter>> {
        self.tools.insert(tool.name().to_lowercase(), Arc::new(tool))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.tools.get(&name.to_lowercase())
    }

    /// Registered tool names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.values().map(|t| t.name())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .get(&call.tool)
            .ok_or_else(|| ToolError::UnknownTool(call.tool.clone()))?;
        tool.invoke(&call.argument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = ToolRegistry::with_defaults();
        registry.register(Calendar::system());
        assert_eq!(registry.len(), 2);
        assert!(registry.get("calculator").is_some());
        assert!(registry.get("CALENDAR").is_some());
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, ["Calculator", "Calendar"]);
    }

    #[test]
    fn test_defaults_are_clock_independent() {
        let registry = ToolRegistry::with_defaults();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["Calculator"]);
        let err = registry.invoke(&ToolCall::new("Calendar", "")).unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("Calendar".to_string()));

        let call = ToolCall::new("Calculator", "400 / 7");
        let first = registry.invoke(&call).unwrap();
        let second = ToolRegistry::with_defaults().invoke(&call).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invoke_dispatches_by_name() {
        let registry = ToolRegistry::with_defaults();
        let out = registry.invoke(&ToolCall::new("Calculator", "6 * 7")).unwrap();
        assert_eq!(out, "42");
        let err = registry.invoke(&ToolCall::new("Search", "rust")).unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("Search".to_string()));
    }

    #[test]
    fn test_fn_tool_replaces_existing() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(FnTool::new("Echo", "", |arg: &str| Ok(arg.to_string())));
        let previous = registry.register(FnTool::new("echo", "Upper-cases", |arg: &str| {
            Ok(arg.to_uppercase())
        }));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.invoke(&ToolCall::new("ECHO", "hi")).unwrap(), "HI");
        assert_eq!(registry.get("echo").unwrap().description(), "Upper-cases");
    }
}
