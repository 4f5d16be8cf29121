//! Filter string parser.
//!
//! Grammar (keywords case-insensitive):
//!
//! ```text
//! expr    := or
//! or      := and ( OR and )*
//! and     := unary ( AND unary )*
//! unary   := NOT unary | '(' expr ')' | cmp
//! cmp     := field op literal
//! op      := = | == | != | <> | < | <= | > | >=
//! literal := 'text' ('' escapes a quote) | integer | true | false
//! ```

use std::fmt;

use crate::ast::{CmpOp, Comparison, Expr, Literal};
use crate::SearchError;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Op(CmpOp),
    LParen,
    RParen,
    And,
    Or,
    Not,
    Bool(bool),
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "field {s}"),
            Tok::Str(s) => write!(f, "string '{s}'"),
            Tok::Int(i) => write!(f, "number {i}"),
            Tok::Op(op) => write!(f, "operator {op}"),
            Tok::LParen => f.write_str("'('"),
            Tok::RParen => f.write_str("')'"),
            Tok::And => f.write_str("AND"),
            Tok::Or => f.write_str("OR"),
            Tok::Not => f.write_str("NOT"),
            Tok::Bool(b) => write!(f, "{b}"),
        }
    }
}

fn err(offset: usize, message: impl Into<String>) -> SearchError {
    SearchError::Parse { offset, message: message.into() }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')
}

fn lex(src: &str) -> Result<Vec<(usize, Tok)>, SearchError> {
    let mut out = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => { chars.next(); out.push((i, Tok::LParen)); }
            ')' => { chars.next(); out.push((i, Tok::RParen)); }
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => {
                            if matches!(chars.peek(), Some((_, '\''))) {
                                chars.next();
                                s.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some((_, ch)) => s.push(ch),
                        None => return Err(err(i, "unterminated string literal")),
                    }
                }
                out.push((i, Tok::Str(s)));
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let next = chars.peek().map(|&(_, ch)| ch);
                let op = match (c, next) {
                    ('=', Some('=')) => { chars.next(); CmpOp::Eq }
                    ('=', _) => CmpOp::Eq,
                    ('!', Some('=')) => { chars.next(); CmpOp::Ne }
                    ('<', Some('=')) => { chars.next(); CmpOp::Le }
                    ('<', Some('>')) => { chars.next(); CmpOp::Ne }
                    ('<', _) => CmpOp::Lt,
                    ('>', Some('=')) => { chars.next(); CmpOp::Ge }
                    ('>', _) => CmpOp::Gt,
                    _ => return Err(err(i, "expected '=' after '!'")),
                };
                out.push((i, Tok::Op(op)));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_digit() { s.push(ch); chars.next(); } else { break; }
                }
                let n = s.parse::<i64>().map_err(|_| err(i, format!("invalid number {s}")))?;
                out.push((i, Tok::Int(n)));
            }
            c if is_ident_start(c) => {
                let mut s = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if is_ident_char(ch) { s.push(ch); chars.next(); } else { break; }
                }
                let tok = match s.to_ascii_lowercase().as_str() {
                    "and" => Tok::And,
                    "or" => Tok::Or,
                    "not" => Tok::Not,
                    "true" => Tok::Bool(true),
                    "false" => Tok::Bool(false),
                    _ => Tok::Ident(s),
                };
                out.push((i, tok));
            }
            other => return Err(err(i, format!("unexpected character {other:?}"))),
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<(usize, Tok)> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<Expr, SearchError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Expr::Or(terms) })
    }

    fn parse_and(&mut self) -> Result<Expr, SearchError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Tok::And) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Expr::And(terms) })
    }

    fn parse_unary(&mut self) -> Result<Expr, SearchError> {
        if self.depth >= MAX_DEPTH {
            return Err(err(self.offset(), "expression nested too deeply"));
        }
        match self.peek() {
            Some(Tok::Not) => {
                self.pos += 1;
                self.depth += 1;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(Expr::Not(Box::new(inner)))
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                self.depth += 1;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some((_, Tok::RParen)) => Ok(inner),
                    Some((o, t)) => Err(err(o, format!("expected ')', found {t}"))),
                    None => Err(err(self.end, "expected ')', found end of input")),
                }
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, SearchError> {
        let field = match self.next() {
            Some((_, Tok::Ident(f))) => f,
            Some((o, t)) => return Err(err(o, format!("expected field name, found {t}"))),
            None => return Err(err(self.end, "expected field name, found end of input")),
        };
        let op = match self.next() {
            Some((_, Tok::Op(op))) => op,
            Some((o, t)) => return Err(err(o, format!("expected operator after {field}, found {t}"))),
            None => return Err(err(self.end, format!("expected operator after {field}"))),
        };
        let value = match self.next() {
            Some((_, Tok::Str(s))) => Literal::Str(s),
            Some((_, Tok::Int(i))) => Literal::Int(i),
            Some((_, Tok::Bool(b))) => Literal::Bool(b),
            Some((o, t)) => return Err(err(o, format!("expected value for {field}, found {t}"))),
            None => return Err(err(self.end, format!("expected value for {field}"))),
        };
        Ok(Expr::Compare(Comparison { field, op, value }))
    }
}

/// Parse a filter string. Blank input means "no filter".
pub fn parse_filter(src: &str) -> Result<Option<Expr>, SearchError> {
    let tokens = lex(src)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut p = Parser { tokens, pos: 0, end: src.len(), depth: 0 };
    let expr = p.parse_or()?;
    if let Some((o, t)) = p.next() {
        return Err(err(o, format!("unexpected {t}")));
    }
    Ok(Some(expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(field: &str, op: CmpOp, v: Literal) -> Expr {
        Expr::Compare(Comparison::new(field, op, v))
    }

    #[test]
    fn blank_is_no_filter() {
        assert_eq!(parse_filter("   ").unwrap(), None);
    }

    #[test]
    fn single_comparison() {
        let e = parse_filter("name = 'prod-1'").unwrap().unwrap();
        assert_eq!(e, cmp("name", CmpOp::Eq, Literal::Str("prod-1".into())));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let e = parse_filter("a='1' or b='2' AND c='3'").unwrap().unwrap();
        let expected = Expr::Or(vec![
            cmp("a", CmpOp::Eq, Literal::Str("1".into())),
            Expr::And(vec![
                cmp("b", CmpOp::Eq, Literal::Str("2".into())),
                cmp("c", CmpOp::Eq, Literal::Str("3".into())),
            ]),
        ]);
        assert_eq!(e, expected);
    }

    #[test]
    fn dotted_fields_quotes_numbers_and_not() {
        let e = parse_filter("NOT (labels.app.kubernetes.io/name != 'it''s') and generation >= -2")
            .unwrap()
            .unwrap();
        let Expr::And(parts) = e else { panic!("expected AND") };
        assert_eq!(
            parts[0],
            Expr::Not(Box::new(cmp("labels.app.kubernetes.io/name", CmpOp::Ne, Literal::Str("it's".into()))))
        );
        assert_eq!(parts[1], cmp("generation", CmpOp::Ge, Literal::Int(-2)));
    }

    #[test]
    fn errors_carry_offsets() {
        match parse_filter("name = 'x' AND") {
            Err(SearchError::Parse { offset, .. }) => assert_eq!(offset, 14),
            other => panic!("unexpected {other:?}"),
        }
        match parse_filter("name 'x'") {
            Err(SearchError::Parse { offset, message }) => {
                assert_eq!(offset, 5);
                assert!(message.contains("operator"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse_filter("name = 'open"), Err(SearchError::Parse { offset: 7, .. })));
        assert!(matches!(parse_filter("(name = 'x'"), Err(SearchError::Parse { .. })));
        assert!(matches!(parse_filter("name ! 'x'"), Err(SearchError::Parse { .. })));
        assert!(matches!(parse_filter("name = 'x' )"), Err(SearchError::Parse { .. })));
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}name='x'{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(parse_filter(&deep), Err(SearchError::Parse { .. })));
    }
}
