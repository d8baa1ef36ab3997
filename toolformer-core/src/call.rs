use serde::Serialize;

use crate::tools::ToolError;

/// A tool invocation written as `Name(argument)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    pub tool: String,
    pub argument: String,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            argument: argument.into(),
        }
    }

    /// Parse the text following a start marker.
    ///
    /// Anything from the first occurrence of `end_literal` on is ignored,
    /// since tokenizers may merge the end marker with the closing parenthesis.
    /// The argument spans from the first `(` to the last `)`.
    pub fn parse(text: &str, end_literal: &str) -> Result<Self, ToolError> {
        let text = match text.find(end_literal) {
            Some(end) if !end_literal.is_empty() => &text[..end],
            _ => text,
        };
        let text = text.trim();

        let open = text
            .find('(')
            .ok_or_else(|| ToolError::MalformedCall(format!("no `(` in {text:?}")))?;
        let close = text
            .rfind(')')
            .filter(|close| *close > open)
            .ok_or_else(|| ToolError::MalformedCall(format!("no closing `)` in {text:?}")))?;
        if !text[close + 1..].trim().is_empty() {
            return Err(ToolError::MalformedCall(format!(
                "unexpected text after the call in {text:?}"
            )));
        }

        let tool = text[..open].trim();
        if tool.is_empty() || !tool.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(ToolError::MalformedCall(format!(
                "invalid tool name {tool:?}"
            )));
        }

        Ok(Self::new(tool, text[open + 1..close].trim()))
    }

    /// The call as the model would write it.
    pub fn render(&self) -> String {
        format!("{}({})", self.tool, self.argument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_call() {
        let call = ToolCall::parse("Calculator(400 / 1400)", "]").unwrap();
        assert_eq!(call, ToolCall::new("Calculator", "400 / 1400"));
        assert_eq!(call.render(), "Calculator(400 / 1400)");
    }

    #[test]
    fn test_parse_ignores_text_after_end_marker() {
        let call = ToolCall::parse(" Calendar()] and then some text.", "]").unwrap();
        assert_eq!(call, ToolCall::new("Calendar", ""));
    }

    #[test]
    fn test_parse_nested_parentheses() {
        let call = ToolCall::parse("Calculator((2 + 3) * 4)", "]").unwrap();
        assert_eq!(call.argument, "(2 + 3) * 4");
    }

    #[test]
    fn test_parse_rejects_malformed_calls() {
        for text in [
            "",
            "Calculator",
            "Calculator(2 + 2",
            "(2 + 2)",
            "Two words(1)",
            "Calculator(1) trailing",
        ] {
            assert!(
                matches!(ToolCall::parse(text, "]"), Err(ToolError::MalformedCall(_))),
                "{text:?} should not parse"
            );
        }
    }
}
