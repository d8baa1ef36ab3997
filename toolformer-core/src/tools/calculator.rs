use super::{ToolAdapter, ToolError};

const NAME: &str = "Calculator";

/// Evaluates arithmetic with `+ - * / ^` and parentheses.
///
/// Results are rounded to two decimals and printed without trailing zeros.
#[derive(Clone, Copy, Debug, Default)]
pub struct Calculator;

impl ToolAdapter for Calculator {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression, e.g. Calculator(400 / 1400)."
    }

    fn invoke(&self, argument: &str) -> Result<String, ToolError> {
        let mut parser = Parser::new(argument)?;
        let value = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(invalid(format!("unexpected {tok:?}")));
        }
        if !value.is_finite() {
            return Err(ToolError::Execution {
                tool: NAME.to_string(),
                message: "result is not a finite number".to_string(),
            });
        }
        Ok(format_number(value))
    }
}

fn invalid(message: impl Into<String>) -> ToolError {
    ToolError::InvalidArgument {
        tool: NAME.to_string(),
        message: message.into(),
    }
}

fn format_number(value: f64) -> String {
    let scaled = value * 100.0;
    // Values this large have no fractional part to round.
    let rounded = if scaled.is_finite() {
        scaled.round() / 100.0
    } else {
        value
    };
    let text = format!("{rounded:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    Open,
    Close,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, ToolError> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();
        while let Some(&c) = chars.peek() {
            match c {
                ' ' | '\t' => {
                    chars.next();
                }
                '0'..='9' | '.' => {
                    let mut number = String::new();
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() || d == '.' {
                            number.push(d);
                        } else if d != ',' {
                            break;
                        }
                        chars.next();
                    }
                    let value = number
                        .parse::<f64>()
                        .map_err(|_| invalid(format!("bad number {number:?}")))?;
                    tokens.push(Token::Num(value));
                }
                '+' | '-' | '*' | '/' | '^' => {
                    tokens.push(Token::Op(c));
                    chars.next();
                }
                'x' | '×' => {
                    tokens.push(Token::Op('*'));
                    chars.next();
                }
                '÷' => {
                    tokens.push(Token::Op('/'));
                    chars.next();
                }
                '(' => {
                    tokens.push(Token::Open);
                    chars.next();
                }
                ')' => {
                    tokens.push(Token::Close);
                    chars.next();
                }
                other => return Err(invalid(format!("unexpected character {other:?}"))),
            }
        }
        if tokens.is_empty() {
            return Err(invalid("empty expression"));
        }
        Ok(Self { tokens, pos: 0 })
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<f64, ToolError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ToolError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = if op == '*' { value * rhs } else { value / rhs };
        }
        Ok(value)
    }

    // `-2^2` is `-(2^2)`.
    fn unary(&mut self) -> Result<f64, ToolError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, ToolError> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            // Right associative, and the exponent may be negated.
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, ToolError> {
        match self.next() {
            Some(Token::Num(value)) => Ok(value),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(invalid("unbalanced parentheses")),
                }
            }
            Some(tok) => Err(invalid(format!("unexpected {tok:?}"))),
            None => Err(invalid("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> Result<String, ToolError> {
        Calculator.invoke(expr)
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval("2+2").unwrap(), "4");
        assert_eq!(eval("2 + 3 * 4").unwrap(), "14");
        assert_eq!(eval("(2 + 3) * 4").unwrap(), "20");
        assert_eq!(eval("2 ^ 3 ^ 2").unwrap(), "512");
        assert_eq!(eval("-3 + 5").unwrap(), "2");
        assert_eq!(eval("10 - 4 - 3").unwrap(), "3");
    }

    #[test]
    fn test_negation_binds_looser_than_power() {
        assert_eq!(eval("-2^2").unwrap(), "-4");
        assert_eq!(eval("(-2)^2").unwrap(), "4");
        assert_eq!(eval("2^-1").unwrap(), "0.5");
        assert_eq!(eval("3 * -2").unwrap(), "-6");
    }

    #[test]
    fn test_rounding() {
        assert_eq!(eval("400 / 1400").unwrap(), "0.29");
        assert_eq!(eval("1 / 4").unwrap(), "0.25");
        assert_eq!(eval("5 / 2").unwrap(), "2.5");
        assert_eq!(eval("1,000 * 3").unwrap(), "3000");
        assert_eq!(eval("-0.001").unwrap(), "0");
    }

    #[test]
    fn test_errors() {
        let invalid = |e| matches!(eval(e), Err(ToolError::InvalidArgument { .. }));
        let failed = |e| matches!(eval(e), Err(ToolError::Execution { .. }));
        assert!(invalid(""));
        assert!(invalid("2 +"));
        assert!(invalid("(2 + 3"));
        assert!(invalid("2 3"));
        assert!(invalid("two"));
        assert!(failed("1 / 0"));
        assert!(failed("10^309"));
    }

    #[test]
    fn test_huge_finite_results_stay_numeric() {
        let out = eval("10^307").unwrap();
        assert!(out.chars().all(|c| c.is_ascii_digit()), "{out}");
        let parsed: f64 = out.parse().unwrap();
        assert!((parsed / 1e307 - 1.0).abs() < 1e-9);
    }
}
