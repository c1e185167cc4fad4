//! Tokenizer shared by the DDS and DAS grammars.
//!
//! Both documents are whitespace-insensitive sequences of words, quoted
//! strings and a handful of punctuation characters. `#` starts a comment
//! that runs to the end of the line.

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace1, not_line_ending, one_of},
    combinator::map,
    sequence::preceded,
    IResult,
};

use dap_model::{DapError, DapResult};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    Word(&'a str),
    Quoted(String),
    Punct(char),
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<'a> {
    pub token: Token<'a>,
    pub offset: usize,
}

const PUNCTUATION: &str = "{}[];=,";

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !PUNCTUATION.contains(c) && c != '"'
}

fn comment(input: &str) -> IResult<&str, &str> {
    preceded(char('#'), not_line_ending)(input)
}

fn punct(input: &str) -> IResult<&str, char> {
    one_of(PUNCTUATION)(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(is_word_char)(input)
}

/// A double-quoted string; a backslash escapes the following character.
fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"')(input)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&rest[i + 1..], out)),
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// Split `text` into tokens, dropping whitespace and comments.
pub fn tokenize(text: &str) -> DapResult<Vec<Spanned<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let offset = text.len() - rest.len();
        let parsed = alt((
            map(multispace1, |_| None),
            map(comment, |_| None),
            map(quoted, |s| Some(Token::Quoted(s))),
            map(punct, |c| Some(Token::Punct(c))),
            map(word, |w| Some(Token::Word(w))),
        ))(rest);

        match parsed {
            Ok((remaining, token)) => {
                if let Some(token) = token {
                    tokens.push(Spanned { token, offset });
                }
                rest = remaining;
            }
            Err(_) if rest.starts_with('"') => {
                return Err(DapError::parse_at("unterminated string literal", text, offset));
            }
            Err(_) => {
                return Err(DapError::parse_at("unexpected character", text, offset));
            }
        }
    }

    Ok(tokens)
}

/// Recursive-descent cursor over a token list.
pub struct TokenCursor<'a> {
    text: &'a str,
    tokens: Vec<Spanned<'a>>,
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    pub fn new(text: &'a str) -> DapResult<Self> {
        Ok(Self {
            text,
            tokens: tokenize(text)?,
            pos: 0,
        })
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    /// The token after the next one.
    pub fn peek_second(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos + 1).map(|s| &s.token)
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Byte offset of the next token, or the end of the text.
    pub fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.text.len())
    }

    pub fn next_token(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// A metadata error pointing at the next token.
    pub fn error(&self, message: impl Into<String>) -> DapError {
        DapError::parse_at(message, self.text, self.offset())
    }

    /// A metadata error pointing at an earlier byte offset.
    pub fn error_at(&self, message: impl Into<String>, offset: usize) -> DapError {
        DapError::parse_at(message, self.text, offset)
    }

    pub fn is_punct(&self, c: char) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == c)
    }

    /// Consume `c` if it is next.
    pub fn eat_punct(&mut self, c: char) -> bool {
        if self.is_punct(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, c: char) -> DapResult<()> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", c, self.describe_next())))
        }
    }

    pub fn expect_word(&mut self, what: &str) -> DapResult<&'a str> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let w = *w;
                self.pos += 1;
                Ok(w)
            }
            _ => Err(self.error(format!("expected {}, found {}", what, self.describe_next()))),
        }
    }

    /// Consume a word equal to `keyword` (case-insensitive).
    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> DapResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", keyword, self.describe_next())))
        }
    }

    pub fn describe_next(&self) -> String {
        match self.peek() {
            Some(Token::Word(w)) => format!("'{}'", w),
            Some(Token::Quoted(s)) => format!("\"{}\"", s),
            Some(Token::Punct(c)) => format!("'{}'", c),
            None => "end of input".to_string(),
        }
    }
}
