use std::iter::Peekable;
use std::str::Chars;

use crate::{bits::BitMask, ds::Value, error::ParseError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Integer(i64),
    Word(String),
    Str(String),
    ParenList(Vec<Value>),
    OpenBlock,
    CloseBlock,
    Pair(Value, Value),
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) line: usize,
}

impl Token {
    /// Short source-like rendering used in error messages
    pub(crate) fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Integer(value) => value.to_string(),
            TokenKind::Word(word) | TokenKind::Str(word) => word.clone(),
            TokenKind::ParenList(items) => {
                let items: Vec<_> = items.iter().map(Value::to_string).collect();
                format!("({})", items.join(", "))
            }
            TokenKind::OpenBlock => "{".to_string(),
            TokenKind::CloseBlock => "}".to_string(),
            TokenKind::Pair(key, value) => format!("{}:{}", key, value),
            TokenKind::Comma => ",".to_string(),
        }
    }
}

/// Characters that end an atom
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '{' | '}' | '(' | ')' | ',' | '#' | '"' | '\'')
}

struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    tokens: Vec<Token>,
}

/// Splits microprogram source text into tokens.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokenizer = Tokenizer {
        chars: input.chars().peekable(),
        line: 1,
        tokens: Vec::new(),
    };
    tokenizer.run()?;
    Ok(tokenizer.tokens)
}

impl Tokenizer<'_> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, line: usize) {
        self.tokens.push(Token { kind, line });
    }

    fn run(&mut self) -> Result<(), ParseError> {
        while let Some(&c) = self.chars.peek() {
            let line = self.line;
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '#' => self.skip_line_comment(),
                '{' => {
                    self.bump();
                    self.push(TokenKind::OpenBlock, line);
                }
                '}' => {
                    self.bump();
                    self.push(TokenKind::CloseBlock, line);
                }
                ',' => {
                    self.bump();
                    self.push(TokenKind::Comma, line);
                }
                '(' => {
                    self.bump();
                    let items = self.paren_list(line)?;
                    self.push(TokenKind::ParenList(items), line);
                }
                ')' => return Err(ParseError::new(line, "Unexpected ')'")),
                '"' | '\'' => {
                    self.bump();
                    let text = self.string(c, line)?;
                    self.push(TokenKind::Str(text), line);
                }
                _ => {
                    let atom = self.atom();
                    if atom.starts_with("/*") {
                        self.skip_block_comment(&atom[2..], line)?;
                    } else {
                        self.atom_token(atom, line)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    /// Skips to the end of a block comment; `consumed` is the part of the
    /// comment already read as an atom.
    fn skip_block_comment(&mut self, consumed: &str, line: usize) -> Result<(), ParseError> {
        if consumed.contains("*/") {
            return Ok(());
        }
        let mut previous = consumed.chars().last();
        while let Some(c) = self.bump() {
            if previous == Some('*') && c == '/' {
                return Ok(());
            }
            previous = Some(c);
        }
        Err(ParseError::new(line, "Unfinished block comment"))
    }

    fn atom(&mut self) -> String {
        let mut atom = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_delimiter(c) {
                break;
            }
            atom.push(c);
            self.bump();
        }
        atom
    }

    fn string(&mut self, quote: char, line: usize) -> Result<String, ParseError> {
        let mut text = String::new();
        while let Some(c) = self.bump() {
            if c == quote {
                return Ok(text);
            }
            text.push(c);
        }
        Err(ParseError::new(line, "Unfinished string"))
    }

    fn paren_list(&mut self, line: usize) -> Result<Vec<Value>, ParseError> {
        let mut items = Vec::new();
        let mut current = String::new();
        while let Some(c) = self.bump() {
            match c {
                ')' if items.is_empty() && current.trim().is_empty() => return Ok(items),
                ',' | ')' => {
                    let item = current.trim();
                    if item.is_empty() {
                        return Err(ParseError::new(self.line, "Empty entry in list"));
                    }
                    items.push(cast_value(item, self.line)?);
                    current.clear();
                    if c == ')' {
                        return Ok(items);
                    }
                }
                _ => current.push(c),
            }
        }
        Err(ParseError::new(line, "Unfinished parameter/argument list"))
    }

    fn atom_token(&mut self, atom: String, line: usize) -> Result<(), ParseError> {
        // Label markers and colons inside a bit selector never form a pair
        let colon = match (atom.find(':'), atom.find('[')) {
            (Some(0), _) => None,
            (Some(colon), Some(bracket)) if bracket < colon => None,
            (colon, _) => colon,
        };
        match colon.map(|i| (&atom[..i], &atom[i + 1..])) {
            Some((key, "")) => {
                let key = cast_value(key, line)?;
                let value = self.pair_value(line)?;
                self.push(TokenKind::Pair(key, value), line);
            }
            Some((key, value)) => {
                let pair = TokenKind::Pair(cast_value(key, line)?, cast_value(value, line)?);
                self.push(pair, line);
            }
            None => {
                let kind = cast(&atom, line)?;
                self.push(kind, line);
            }
        }
        Ok(())
    }

    /// Reads the value half of a `key: value` pair written with whitespace
    /// after the colon.
    fn pair_value(&mut self, line: usize) -> Result<Value, ParseError> {
        while let Some(&c) = self.chars.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.bump();
        }
        let value = self.atom();
        if value.is_empty() {
            return Err(ParseError::new(line, "Missing value after ':'"));
        }
        cast_value(&value, line)
    }
}

fn cast_value(text: &str, line: usize) -> Result<Value, ParseError> {
    Ok(match cast(text, line)? {
        TokenKind::Integer(value) => Value::Integer(value),
        _ => Value::Symbol(text.to_string()),
    })
}

/// Turns an atom into an integer when it looks like one, otherwise a word.
fn cast(text: &str, line: usize) -> Result<TokenKind, ParseError> {
    if let Some((base, mask)) = parse_selector(text, line)? {
        return Ok(match cast(base, line)? {
            TokenKind::Integer(value) => {
                let bits = mask
                    .to_u64_mask()
                    .map_err(|e| ParseError::new(line, &e.to_string()))?;
                TokenKind::Integer(((value as u64 & bits) >> mask.lower_bound()) as i64)
            }
            _ => TokenKind::Word(text.to_string()),
        });
    }
    if let Some(hex) = text.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16)
            .map(TokenKind::Integer)
            .map_err(|_| ParseError::new(line, "Malformed hexadecimal number"));
    }
    Ok(match text.parse::<i64>() {
        Ok(value) => TokenKind::Integer(value),
        Err(_) => TokenKind::Word(text.to_string()),
    })
}

/// Splits `base[hi:lo]` or `base[bit]` into its base and mask.
fn parse_selector(text: &str, line: usize) -> Result<Option<(&str, BitMask)>, ParseError> {
    let Some(inner) = text.strip_suffix(']') else {
        return Ok(None);
    };
    let Some((base, range)) = inner.split_once('[') else {
        return Ok(None);
    };
    if base.is_empty() {
        return Ok(None);
    }
    let bit = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| ParseError::new(line, &format!("Invalid bit selector '{}'", text)))
    };
    let mask = match range.split_once(':') {
        Some((msb, lsb)) => BitMask::new(bit(msb)?, bit(lsb)?),
        None => BitMask::single(bit(range)?),
    };
    Ok(Some((base, mask)))
}
