//! Calculator tool: evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, `^` (right-associative power), parentheses,
//! decimals, and unary negation, via a small recursive-descent parser.

use async_trait::async_trait;
use jarvis_core::error::ToolError;
use jarvis_core::tool::Tool;
use serde_json::{Map, Value};

use crate::required_str;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Calculate the result of a mathematical expression. Supports +, -, *, /, ^, parentheses, and decimal numbers."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '5 * (3 + 2)'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let expr = required_str(&arguments, "expression")?;
        let value = evaluate(expr).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason,
        })?;
        Ok(format!("{expr} = {}", format_number(value)))
    }
}

/// Render integers without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluate a mathematical expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(&tokens);
    let result = parser.parse_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(format!("Unexpected token at position {}: {tok:?}", parser.pos));
    }
    if !result.is_finite() {
        return Err("Result is not a finite number".into());
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let tok = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let num_str = &input[start..end];
                let num = num_str
                    .parse()
                    .map_err(|_| format!("Invalid number: {num_str}"))?;
                Token::Number(num)
            }
            c => return Err(format!("Expression contains invalid character '{c}'")),
        };
        tokens.push(tok);
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.consume();
                    left += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.consume();
                    left -= self.parse_term()?;
                }
                _ => return Ok(left),
            }
        }
    }

    // term = unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.consume();
                    left *= self.parse_unary()?;
                }
                Some(Token::Slash) => {
                    self.consume();
                    let right = self.parse_unary()?;
                    if right == 0.0 {
                        return Err("Division by zero".into());
                    }
                    left /= right;
                }
                _ => return Ok(left),
            }
        }
    }

    // unary = '-' unary | power
    fn parse_unary(&mut self) -> Result<f64, String> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            return Ok(-self.parse_unary()?);
        }
        self.parse_power()
    }

    // power = primary ('^' unary)?
    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    // primary = NUMBER | '(' expr ')'
    fn parse_primary(&mut self) -> Result<f64, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(*n),
            Some(Token::LParen) => {
                let val = self.parse_expr()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(val),
                    _ => Err("Expected closing parenthesis".into()),
                }
            }
            Some(tok) => Err(format!("Unexpected token: {tok:?}")),
            None => Err("Unexpected end of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(expr: &str) -> Map<String, Value> {
        serde_json::json!({"expression": expr}).as_object().cloned().unwrap()
    }

    #[test]
    fn operator_precedence() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ^ 2").unwrap(), -4.0);
        assert_eq!(evaluate("2 ^ -1").unwrap(), 0.5);
    }

    #[test]
    fn division_by_zero() {
        assert!(evaluate("1 / 0").is_err());
    }

    #[test]
    fn decimals() {
        assert_eq!(evaluate("3.14 * 2").unwrap(), 6.28);
    }

    #[test]
    fn invalid_input() {
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("1.2.3").is_err());
        assert!(evaluate("__import__('os')").is_err());
    }

    #[tokio::test]
    async fn tool_formats_result() {
        let out = CalculatorTool.execute(args("10 / 2")).await.unwrap();
        assert_eq!(out, "10 / 2 = 5");

        let out = CalculatorTool.execute(args("10 / 3")).await.unwrap();
        assert!(out.starts_with("10 / 3 = 3.333"));
    }

    #[tokio::test]
    async fn tool_reports_failures() {
        let err = CalculatorTool.execute(args("1 / 0")).await.unwrap_err();
        assert!(err.to_string().contains("Division by zero"));

        let err = CalculatorTool.execute(Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
