use minijinja::{context, Environment};

use crate::error::{Result, ToolformerError};

/// Few-shot prompt teaching a model to insert Calculator calls.
pub const CALCULATOR_PROMPT: &str = "Your task is to add calls to a Calculator API to a piece of text. \
The calls should help you get information required to complete the text. \
You can call the API by writing \"[Calculator(expression)]\" where \"expression\" is the expression to be computed. \
Here are some examples of API calls:\n\
Input: The number in the next term is 18 + 12 x 3 = 54.\n\
Output: The number in the next term is 18 + 12 x 3 = [Calculator(18 + 12 * 3)] 54.\n\
Input: From this, we have 4 * 30 minutes = 120 minutes.\n\
Output: From this, we have 4 * 30 minutes = [Calculator(4 * 30)] 120 minutes.\n\
Input: {input}\n\
Output:";

const INPUT_VARIABLE: &str = "input";

/// Turns an input document into a prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptTemplate {
    /// `{input}` is replaced; `{{` and `}}` stand for literal braces.
    Substitution(String),
    /// A Jinja template rendered with an `input` variable.
    Jinja(String),
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        let mut seen_input = false;
        for_each_segment(&template, |segment| {
            if let Segment::Variable(name) = segment {
                if name != INPUT_VARIABLE {
                    return Err(ToolformerError::config(format!(
                        "unknown template variable `{{{name}}}`"
                    )));
                }
                seen_input = true;
            }
            Ok(())
        })?;
        if !seen_input {
            return Err(ToolformerError::config(
                "prompt template has no `{input}` placeholder",
            ));
        }
        Ok(Self::Substitution(template))
    }

    pub fn jinja(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        Environment::new()
            .template_from_str(&template)
            .map_err(|e| ToolformerError::config(format!("invalid Jinja template: {e}")))?;
        Ok(Self::Jinja(template))
    }

    pub fn calculator() -> Self {
        Self::Substitution(CALCULATOR_PROMPT.to_string())
    }

    pub fn format(&self, input: &str) -> Result<String> {
        match self {
            Self::Substitution(template) => {
                let mut out = String::with_capacity(template.len() + input.len());
                for_each_segment(template, |segment| {
                    match segment {
                        Segment::Literal(text) => out.push_str(text),
                        Segment::Variable(_) => out.push_str(input),
                    }
                    Ok(())
                })?;
                Ok(out)
            }
            Self::Jinja(template) => Environment::new()
                .render_str(template, context! { input => input })
                .map_err(|e| ToolformerError::config(format!("could not render template: {e}"))),
        }
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

fn for_each_segment<'a>(
    template: &'a str,
    mut f: impl FnMut(Segment<'a>) -> Result<()>,
) -> Result<()> {
    let mut rest = template;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("{{") {
            f(Segment::Literal("{"))?;
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("}}") {
            f(Segment::Literal("}"))?;
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('{') {
            let Some(close) = tail.find('}') else {
                return Err(ToolformerError::config("unclosed `{` in prompt template"));
            };
            f(Segment::Variable(tail[..close].trim()))?;
            rest = &tail[close + 1..];
        } else if rest.starts_with('}') {
            return Err(ToolformerError::config("unmatched `}` in prompt template"));
        } else {
            let next = rest.find(&['{', '}'][..]).unwrap_or(rest.len());
            f(Segment::Literal(&rest[..next]))?;
            rest = &rest[next..];
        }
    }
    Ok(())
}
