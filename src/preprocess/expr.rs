//! `#if` expression evaluation.
//!
//! Grammar:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := "defined" ( "(" IDENT ")" | IDENT ) | "(" or ")" | compare
//! compare := value ( ( "==" | "!=" | "<" | ">" | "<=" | ">=" ) value )?
//! value   := "-"? INT | IDENT
//! ```
//!
//! Identifiers resolve through the macro table; undefined names are `0`.

use super::MacroSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Int(i64),
    Op(&'static str),
}

const OPERATORS: &[&str] = &["&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "(", ")", "-"];

fn tokenize(expr: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut rest = expr.trim_start();
    while !rest.is_empty() {
        let c = rest.chars().next().unwrap_or(' ');
        if c.is_ascii_digit() {
            let end = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            tokens.push(Token::Int(parse_int(&rest[..end])?));
            rest = &rest[end..];
        } else if c.is_ascii_alphabetic() || c == '_' {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            tokens.push(Token::Ident(&rest[..end]));
            rest = &rest[end..];
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Op(*op));
            rest = &rest[op.len()..];
        } else {
            return Err(format!("unexpected character '{c}'"));
        }
        rest = rest.trim_start();
    }
    Ok(tokens)
}

fn parse_int(literal: &str) -> Result<i64, String> {
    let digits = literal.trim_end_matches(['u', 'U', 'l', 'L']);
    let parsed = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse(),
    };
    parsed.map_err(|_| format!("'{literal}' is not an integer"))
}

struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
    macros: &'t MacroSet,
}

impl<'a> Parser<'_, 'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), String> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(format!("expected '{op}'"))
        }
    }

    fn or(&mut self) -> Result<bool, String> {
        let mut value = self.and()?;
        while self.eat("||") {
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, String> {
        let mut value = self.unary()?;
        while self.eat("&&") {
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool, String> {
        if self.eat("!") {
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        if matches!(self.peek(), Some(Token::Ident("defined"))) {
            self.pos += 1;
            let parens = self.eat("(");
            let Some(Token::Ident(name)) = self.peek().cloned() else {
                return Err("expected a name after 'defined'".into());
            };
            self.pos += 1;
            if parens {
                self.expect(")")?;
            }
            return Ok(self.macros.contains(name));
        }
        if self.eat("(") {
            let value = self.or()?;
            self.expect(")")?;
            return Ok(value);
        }
        let lhs = self.value()?;
        let op = match self.peek() {
            Some(Token::Op(op @ ("==" | "!=" | "<" | ">" | "<=" | ">="))) => *op,
            _ => return Ok(lhs != 0),
        };
        self.pos += 1;
        let rhs = self.value()?;
        Ok(match op {
            "==" => lhs == rhs,
            "!=" => lhs != rhs,
            "<" => lhs < rhs,
            ">" => lhs > rhs,
            "<=" => lhs <= rhs,
            _ => lhs >= rhs,
        })
    }

    fn value(&mut self) -> Result<i64, String> {
        let negate = self.eat("-");
        let v = match self.peek().cloned() {
            Some(Token::Int(v)) => v,
            Some(Token::Ident(name)) => resolve(name, self.macros, 0)?,
            _ => return Err("expected a value".into()),
        };
        self.pos += 1;
        Ok(if negate { -v } else { v })
    }
}

/// Integer value of a macro, following macro-to-macro aliases.
fn resolve(name: &str, macros: &MacroSet, depth: usize) -> Result<i64, String> {
    let Some(value) = macros.get(name) else {
        return Ok(0);
    };
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("'{name}' has no value"));
    }
    if depth < 16
        && value.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return resolve(value, macros, depth + 1);
    }
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value)
        .trim();
    match inner.strip_prefix('-') {
        Some(digits) => parse_int(digits.trim()).map(|v| -v),
        None => parse_int(inner),
    }
}

/// Evaluates a condition against `macros`.
pub(super) fn evaluate(expr: &str, macros: &MacroSet) -> Result<bool, String> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err("empty condition".into());
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        macros,
    };
    let value = parser.or()?;
    if parser.pos != tokens.len() {
        return Err("unexpected trailing tokens".into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macros() -> MacroSet {
        MacroSet::from(&[("A", "2"), ("B", ""), ("ALIAS", "A"), ("NEG", "(-3)")][..])
    }

    #[test]
    fn test_literals_and_names() {
        let m = macros();
        assert_eq!(evaluate("1", &m), Ok(true));
        assert_eq!(evaluate("0", &m), Ok(false));
        assert_eq!(evaluate("A", &m), Ok(true));
        assert_eq!(evaluate("UNDEFINED", &m), Ok(false));
        assert_eq!(evaluate("ALIAS == 2", &m), Ok(true));
        assert_eq!(evaluate("NEG < 0", &m), Ok(true));
    }

    #[test]
    fn test_defined_forms() {
        let m = macros();
        assert_eq!(evaluate("defined(B)", &m), Ok(true));
        assert_eq!(evaluate("defined B && !defined(C)", &m), Ok(true));
        assert_eq!(evaluate("!(defined(A) || defined(B))", &m), Ok(false));
    }

    #[test]
    fn test_precedence() {
        let m = macros();
        assert_eq!(evaluate("0 && 1 || 1", &m), Ok(true));
        assert_eq!(evaluate("A >= 2 && A != 3", &m), Ok(true));
        assert_eq!(evaluate("0x10 > 15", &m), Ok(true));
    }

    #[test]
    fn test_errors() {
        let m = macros();
        assert!(evaluate("B == 1", &m).is_err());
        assert!(evaluate("A +", &m).is_err());
        assert!(evaluate("F(1)", &m).is_err());
        assert!(evaluate("", &m).is_err());
    }
}
