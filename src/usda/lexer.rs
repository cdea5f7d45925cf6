//! Tokenizer for text layers.

use crate::util::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// Identifier, possibly namespaced (`primvars:st`).
    Ident(String),
    /// Numeric literal kept as text; converted once the declared type is known.
    Number(String),
    Str(String),
    Asset(String),
    Path(String),
    Punct(char),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

pub fn parse_error(line: usize, column: usize, message: impl Into<String>) -> Error {
    Error::Parse { line, column, message: message.into() }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, out: &mut String, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
    }

    fn delimited(&mut self, close: char, what: &str, line: usize, column: usize) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == close => return Ok(out),
                Some('\n') | None => return Err(parse_error(line, column, format!("unterminated {what}"))),
                Some(c) => out.push(c),
            }
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('"' | '\\' | '\'')) => out.push(c),
                    Some(c) => {
                        return Err(parse_error(self.line, self.column - 1, format!("unknown escape '\\{c}'")));
                    }
                    None => return Err(parse_error(line, column, "unterminated string")),
                },
                Some('\n') | None => return Err(parse_error(line, column, "unterminated string")),
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self, first: char) -> String {
        let mut out = String::from(first);
        if first == '-' && self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.take_while(&mut out, |c| c.is_ascii_alphabetic());
            return out;
        }
        self.take_while(&mut out, |c| c.is_ascii_digit() || c == '.');
        if matches!(self.peek(), Some('e' | 'E')) {
            out.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                out.push(sign);
                self.bump();
            }
            self.take_while(&mut out, |c| c.is_ascii_digit());
        }
        out
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Split `text` into tokens, dropping whitespace and `#` comments.
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut lx = Lexer { chars: text.chars().peekable(), line: 1, column: 1 };
    let mut tokens = Vec::new();
    while let Some(c) = lx.peek() {
        let (line, column) = (lx.line, lx.column);
        if c.is_whitespace() {
            lx.bump();
            continue;
        }
        if c == '#' {
            while lx.peek().is_some_and(|c| c != '\n') {
                lx.bump();
            }
            continue;
        }
        lx.bump();
        let kind = match c {
            '"' => TokenKind::Str(lx.string(line, column)?),
            '@' => TokenKind::Asset(lx.delimited('@', "asset path", line, column)?),
            '<' => TokenKind::Path(lx.delimited('>', "path", line, column)?),
            '(' | ')' | '[' | ']' | '{' | '}' | '=' | ',' | ':' | '.' => TokenKind::Punct(c),
            '-' | '+' | '0'..='9' => TokenKind::Number(lx.number(c)),
            c if is_ident_start(c) => {
                let mut ident = String::from(c);
                lx.take_while(&mut ident, is_ident_char);
                TokenKind::Ident(ident)
            }
            other => return Err(parse_error(line, column, format!("unexpected character '{other}'"))),
        };
        tokens.push(Token { kind, line, column });
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_property_line() {
        assert_eq!(
            kinds("uniform token[] xformOpOrder = [\"xformOp:transform\"]"),
            vec![
                TokenKind::Ident("uniform".into()),
                TokenKind::Ident("token".into()),
                TokenKind::Punct('['),
                TokenKind::Punct(']'),
                TokenKind::Ident("xformOpOrder".into()),
                TokenKind::Punct('='),
                TokenKind::Punct('['),
                TokenKind::Str("xformOp:transform".into()),
                TokenKind::Punct(']'),
            ]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            kinds("-1.5e-3 -inf @0/a.png@ </Root/Cube.points> x.connect # comment"),
            vec![
                TokenKind::Number("-1.5e-3".into()),
                TokenKind::Number("-inf".into()),
                TokenKind::Asset("0/a.png".into()),
                TokenKind::Path("/Root/Cube.points".into()),
                TokenKind::Ident("x".into()),
                TokenKind::Punct('.'),
                TokenKind::Ident("connect".into()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("def\n  Mesh \"A\"").unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 8));
    }

    #[test]
    fn test_unterminated_string() {
        match tokenize("\n  \"abc").unwrap_err() {
            Error::Parse { line, column, .. } => assert_eq!((line, column), (2, 3)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
