//! Command-string syntax shared by scripts and provenance records:
//!
//! ```text
//! kind(key=value, text='quoted, text', list=[a, b], ref=${0})
//! ```
//!
//! Bare values run until `,`, `)` or `]` and are trimmed. Quoted values use
//! `'` or `"` with backslash escapes.

use cairn_types::Variant;

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Bare(String),
    Quoted(String),
    List(Vec<RawValue>),
}

impl RawValue {
    /// Text of a scalar value. Lists have no text form.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Bare(s) | RawValue::Quoted(s) => Some(s),
            RawValue::List(_) => None,
        }
    }

    /// Bare words are typed by their spelling; quoted text stays a string.
    pub fn to_variant(&self) -> Variant {
        match self {
            RawValue::Quoted(s) => Variant::Str(s.clone()),
            RawValue::Bare(s) => {
                if let Ok(b) = s.parse::<bool>() {
                    Variant::Bool(b)
                } else if let Ok(i) = s.parse::<i64>() {
                    Variant::Int(i)
                } else if let Ok(d) = s.parse::<f64>() {
                    Variant::Double(d)
                } else {
                    Variant::Str(s.clone())
                }
            }
            RawValue::List(items) => Variant::List(items.iter().map(RawValue::to_variant).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<(String, RawValue)>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (column {column})")]
pub struct ParseError {
    pub message: String,
    pub column: usize,
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            column: self.pos + 1,
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}', found end of input", want))),
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn value(&mut self) -> Result<RawValue, ParseError> {
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.pos += 1;
                let mut text = String::new();
                loop {
                    match self.bump() {
                        None => return Err(self.error("unterminated string")),
                        Some('\\') => match self.bump() {
                            Some(c) => text.push(c),
                            None => return Err(self.error("unterminated string")),
                        },
                        Some(c) if c == q => break,
                        Some(c) => text.push(c),
                    }
                }
                Ok(RawValue::Quoted(text))
            }
            Some('[') => {
                self.pos += 1;
                self.skip_ws();
                let mut items = Vec::new();
                if self.peek() == Some(']') {
                    self.pos += 1;
                    return Ok(RawValue::List(items));
                }
                loop {
                    self.skip_ws();
                    items.push(self.value()?);
                    self.skip_ws();
                    match self.bump() {
                        Some(',') => continue,
                        Some(']') => break,
                        _ => return Err(self.error("expected ',' or ']' in list")),
                    }
                }
                Ok(RawValue::List(items))
            }
            _ => {
                let start = self.pos;
                while self.peek().is_some_and(|c| !matches!(c, ',' | ')' | ']')) {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                let text = text.trim();
                if text.is_empty() {
                    return Err(self.error("expected a value"));
                }
                Ok(RawValue::Bare(text.to_string()))
            }
        }
    }
}

pub fn parse_command(input: &str) -> Result<ParsedCommand, ParseError> {
    let mut cursor = Cursor::new(input);
    cursor.skip_ws();
    let name = cursor.ident();
    if name.is_empty() {
        return Err(cursor.error("expected an action name"));
    }
    cursor.skip_ws();

    let mut args: Vec<(String, RawValue)> = Vec::new();
    if cursor.peek().is_some() {
        cursor.expect('(')?;
        cursor.skip_ws();
        if cursor.peek() == Some(')') {
            cursor.pos += 1;
        } else {
            loop {
                cursor.skip_ws();
                let key = cursor.ident();
                if key.is_empty() {
                    return Err(cursor.error("expected an argument name"));
                }
                if args.iter().any(|(k, _)| *k == key) {
                    return Err(cursor.error(format!("duplicate argument '{}'", key)));
                }
                cursor.skip_ws();
                cursor.expect('=')?;
                cursor.skip_ws();
                let value = cursor.value()?;
                args.push((key, value));
                cursor.skip_ws();
                match cursor.bump() {
                    Some(',') => continue,
                    Some(')') => break,
                    _ => return Err(cursor.error("expected ',' or ')'")),
                }
            }
        }
        cursor.skip_ws();
        if cursor.peek().is_some() {
            return Err(cursor.error("unexpected input after ')'"));
        }
    }

    Ok(ParsedCommand { name, args })
}

/// Parse a lone value, as used for parameter defaults.
pub fn parse_value(input: &str) -> Result<RawValue, ParseError> {
    let mut cursor = Cursor::new(input);
    cursor.skip_ws();
    let value = cursor.value()?;
    cursor.skip_ws();
    if cursor.peek().is_some() {
        return Err(cursor.error("unexpected input after value"));
    }
    Ok(value)
}

/// Quote text that would not read back as the same string.
pub fn quote_if_needed(text: &str) -> String {
    let ambiguous = text.parse::<bool>().is_ok() || text.parse::<f64>().is_ok();
    let needs_quotes = text.is_empty()
        || ambiguous
        || text.trim() != text
        || text
            .chars()
            .any(|c| {
                matches!(
                    c,
                    ',' | '(' | ')' | '[' | ']' | '\'' | '"' | '=' | '\\' | '$' | '{' | '}'
                )
            });
    if !needs_quotes {
        return text.to_string();
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

pub fn format_variant(value: &Variant) -> String {
    match value {
        Variant::Str(s) => quote_if_needed(s),
        Variant::List(items) => {
            let inner: Vec<String> = items.iter().map(format_variant).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
