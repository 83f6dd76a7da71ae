//! Structural scanner for HCL configuration text.
//!
//! Produces the block/attribute layout of a file together with byte
//! offsets, so callers can patch values in place without disturbing the
//! rest of the text. Expressions are not evaluated; an attribute value is
//! the raw source between `=` and the end of the expression.
//!
//! Quoted strings (with escapes and `${ }` templates), heredocs and all
//! three comment styles are skipped when matching braces.

use thiserror::Error;

/// Scanner failure with the byte offset where it happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HCL parse error at byte {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

/// `name = value` inside a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// Offset of the first byte of the line the attribute starts on
    pub line_start: usize,
    pub name_start: usize,
    pub value_start: usize,
    /// Exclusive end of the value, trailing whitespace and comments excluded
    pub value_end: usize,
}

/// `kind "label" ... { body }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    /// Offset of the first byte of the line the block starts on
    pub line_start: usize,
    /// Offset of the block keyword
    pub start: usize,
    /// Offset of `{`
    pub open: usize,
    /// Offset of the matching `}`
    pub close: usize,
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

/// Top-level content of a file, or the inside of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

impl Block {
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn block(&self, kind: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.kind == kind)
    }

    /// Whitespace preceding the block keyword on its line.
    pub fn indent<'a>(&self, src: &'a str) -> &'a str {
        &src[self.line_start..self.start]
    }
}

impl Attribute {
    pub fn value<'a>(&self, src: &'a str) -> &'a str {
        &src[self.value_start..self.value_end]
    }

    pub fn indent<'a>(&self, src: &'a str) -> &'a str {
        &src[self.line_start..self.name_start]
    }
}

impl Body {
    /// Top-level blocks of the given kind.
    pub fn blocks_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }
}

/// Scan a whole file.
pub fn parse(src: &str) -> Result<Body, ParseError> {
    let mut scanner = Scanner {
        src,
        bytes: src.as_bytes(),
        pos: 0,
    };
    scanner.parse_body(false)
}

/// Decode a quoted HCL string literal; falls back to the raw text without quotes.
pub fn unquote(literal: &str) -> String {
    let trimmed = literal.trim();
    serde_json::from_str::<String>(trimmed).unwrap_or_else(|_| {
        trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed)
            .to_string()
    })
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-'
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn line_start(&self, offset: usize) -> usize {
        self.src[..offset].rfind('\n').map_or(0, |i| i + 1)
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        match self.src[self.pos + 2..].find("*/") {
            Some(end) => {
                self.pos += 2 + end + 2;
                Ok(())
            }
            None => Err(ParseError {
                offset: start,
                message: "unterminated block comment".into(),
            }),
        }
    }

    /// Spaces, tabs and comments; stops at newlines.
    fn skip_inline_space(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(b' ' | b'\t' | b'\r'), _) => self.pos += 1,
                (Some(b'#'), _) | (Some(b'/'), Some(b'/')) => self.skip_line_comment(),
                (Some(b'/'), Some(b'*')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            self.skip_inline_space()?;
            if self.peek() == Some(b'\n') {
                self.pos += 1;
            } else {
                return Ok(());
            }
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.src[start..self.pos].to_string()
    }

    /// At `"`; leaves `pos` after the closing quote.
    fn skip_string(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            match (c, self.peek_at(1)) {
                (b'\\', _) => self.pos += 2,
                (b'"', _) => {
                    self.pos += 1;
                    return Ok(());
                }
                (b'$', Some(b'$')) | (b'%', Some(b'%')) => self.pos += 2,
                (b'$' | b'%', Some(b'{')) => {
                    self.pos += 2;
                    self.skip_template()?;
                }
                (b'\n', _) => break,
                _ => self.pos += 1,
            }
        }
        Err(ParseError {
            offset: start,
            message: "unterminated string".into(),
        })
    }

    /// Just inside `${`; leaves `pos` after the matching `}`.
    fn skip_template(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                b'"' => self.skip_string()?,
                b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => self.pos += 1,
            }
        }
        Err(ParseError {
            offset: start,
            message: "unterminated template interpolation".into(),
        })
    }

    /// At `<<`; leaves `pos` at the end of the terminator line.
    fn skip_heredoc(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 2;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let marker = self.read_ident();
        if marker.is_empty() {
            return Err(self.error("heredoc without marker"));
        }
        self.skip_line_comment();

        while self.peek() == Some(b'\n') {
            self.pos += 1;
            let line_end = self.src[self.pos..]
                .find('\n')
                .map_or(self.src.len(), |i| self.pos + i);
            if self.src[self.pos..line_end].trim() == marker {
                self.pos = line_end;
                return Ok(());
            }
            self.pos = line_end;
        }
        Err(ParseError {
            offset: start,
            message: format!("unterminated heredoc {marker}"),
        })
    }

    /// Skip an attribute expression, returning its trimmed end offset.
    fn skip_value(&mut self) -> Result<usize, ParseError> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut end = self.pos;

        while let Some(c) = self.peek() {
            match (c, self.peek_at(1)) {
                (b'\n', _) if depth == 0 => break,
                (b'}' | b')' | b']', _) if depth == 0 => break,
                (b'#', _) | (b'/', Some(b'/')) => {
                    if depth == 0 {
                        break;
                    }
                    self.skip_line_comment();
                    continue;
                }
                (b'/', Some(b'*')) => {
                    self.skip_block_comment()?;
                    continue;
                }
                (b'"', _) => self.skip_string()?,
                (b'<', Some(b'<')) => self.skip_heredoc()?,
                (b'{' | b'(' | b'[', _) => {
                    depth += 1;
                    self.pos += 1;
                }
                (b'}' | b')' | b']', _) => {
                    depth -= 1;
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
            if !matches!(self.bytes[self.pos - 1], b' ' | b'\t' | b'\r' | b'\n') {
                end = self.pos;
            }
        }

        if depth > 0 {
            return Err(ParseError {
                offset: start,
                message: "unbalanced brackets in expression".into(),
            });
        }
        Ok(end.max(start))
    }

    fn parse_body(&mut self, nested: bool) -> Result<Body, ParseError> {
        let mut body = Body::default();

        loop {
            self.skip_trivia()?;
            let Some(c) = self.peek() else {
                if nested {
                    return Err(self.error("unclosed block"));
                }
                return Ok(body);
            };

            if c == b'}' {
                if nested {
                    return Ok(body);
                }
                return Err(self.error("unexpected '}'"));
            }
            if !is_ident_start(c) {
                return Err(self.error(format!("unexpected character {:?}", c as char)));
            }

            let name_start = self.pos;
            let line_start = self.line_start(name_start);
            let name = self.read_ident();
            self.skip_inline_space()?;

            if self.peek() == Some(b'=') && self.peek_at(1) != Some(b'=') {
                self.pos += 1;
                self.skip_inline_space()?;
                let value_start = self.pos;
                let value_end = self.skip_value()?;
                body.attributes.push(Attribute {
                    name,
                    line_start,
                    name_start,
                    value_start,
                    value_end,
                });
                continue;
            }

            let mut labels = Vec::new();
            loop {
                self.skip_inline_space()?;
                match self.peek() {
                    Some(b'"') => {
                        let label_start = self.pos;
                        self.skip_string()?;
                        labels.push(unquote(&self.src[label_start..self.pos]));
                    }
                    Some(c) if is_ident_start(c) => labels.push(self.read_ident()),
                    Some(b'{') => break,
                    _ => return Err(self.error(format!("expected '{{' after {name}"))),
                }
            }

            let open = self.pos;
            self.pos += 1;
            let inner = self.parse_body(true)?;
            let close = self.pos;
            self.pos += 1;

            body.blocks.push(Block {
                kind: name,
                labels,
                line_start,
                start: name_start,
                open,
                close,
                attributes: inner.attributes,
                blocks: inner.blocks,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_and_attributes() {
        let src = r#"
terraform {
  required_providers {
    azurerm = {
      source  = "hashicorp/azurerm"
      version = "~> 3.0"
    }
  }
}

provider "azurerm" {
  features {}
  subscription_id = "abc"
}
"#;
        let body = parse(src).unwrap();
        assert_eq!(body.blocks.len(), 2);

        let terraform = &body.blocks[0];
        let required = terraform.block("required_providers").unwrap();
        let azurerm = required.attribute("azurerm").unwrap();
        assert!(azurerm.value(src).starts_with('{'));
        assert!(azurerm.value(src).ends_with('}'));

        let provider = &body.blocks[1];
        assert_eq!(provider.kind, "provider");
        assert_eq!(provider.label(0), Some("azurerm"));
        assert!(provider.block("features").is_some());
        assert_eq!(provider.attribute("subscription_id").unwrap().value(src), "\"abc\"");
        assert_eq!(&src[provider.close..=provider.close], "}");
        assert_eq!(provider.indent(src), "");
    }

    #[test]
    fn test_braces_inside_strings_and_comments() {
        let src = r#"provider "aws" {
  # a comment with an unbalanced { brace
  region = "us-{east}-1" // trailing }
  /* block comment } */
  profile = "${var.env == "prod" ? "p{" : "d"}"
}
resource "aws_s3_bucket" "b" {}
"#;
        let body = parse(src).unwrap();
        assert_eq!(body.blocks.len(), 2);
        let provider = &body.blocks[0];
        assert_eq!(provider.attribute("region").unwrap().value(src), "\"us-{east}-1\"");
        assert_eq!(
            provider.attribute("profile").unwrap().value(src),
            r#""${var.env == "prod" ? "p{" : "d"}""#
        );
        assert_eq!(body.blocks[1].labels, vec!["aws_s3_bucket", "b"]);
    }

    #[test]
    fn test_heredoc_values() {
        let src = "locals {\n  policy = <<-EOT\n    { \"unbalanced\": {\n  EOT\n  after = 1\n}\n";
        let body = parse(src).unwrap();
        let locals = &body.blocks[0];
        assert_eq!(locals.attributes.len(), 2);
        assert_eq!(locals.attribute("after").unwrap().value(src), "1");
    }

    #[test]
    fn test_one_line_block() {
        let src = "provider \"kubernetes\" { config_path = \"~/.kube/config\" }\n";
        let body = parse(src).unwrap();
        let block = &body.blocks[0];
        assert_eq!(
            block.attribute("config_path").unwrap().value(src),
            "\"~/.kube/config\""
        );
        assert_eq!(block.close, src.rfind('}').unwrap());
    }

    #[test]
    fn test_multiline_values() {
        let src = "module \"m\" {\n  tags = {\n    a = \"1\"\n  }\n  list = [\n    1,\n    2,\n  ]\n}\n";
        let body = parse(src).unwrap();
        let module = &body.blocks[0];
        assert_eq!(module.attributes.len(), 2);
        assert!(module.blocks.is_empty());
        assert!(module.attribute("list").unwrap().value(src).ends_with(']'));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("provider \"x\" {\n  a = 1\n").is_err());
        assert!(parse("provider \"x\" {\n  a = \"oops\n}\n").is_err());
        assert!(parse("}\n").is_err());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"hashicorp/aws\""), "hashicorp/aws");
        assert_eq!(unquote("\"a\\\"b\""), "a\"b");
        assert_eq!(unquote("bare"), "bare");
    }
}
