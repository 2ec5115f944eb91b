//! Lexical helpers for stage and module arguments.
//!
//! The scanner here is deliberately forgiving: it never fails on malformed
//! input. An unterminated quote simply consumes the rest of the line, and an
//! unknown `$name` reference is kept verbatim.

use crate::env::Environment;
use std::collections::HashMap;

/// Mapping from argument key to value handed to the module runtime.
///
/// Later assignments to the same key overwrite earlier ones.
pub type ArgumentMap = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Between tokens, skipping commas and whitespace.
    Separator,
    /// Inside an unquoted token.
    Word,
    /// Inside a literal run opened by the given quote character.
    Quoted(char),
}

struct ArgumentFSM<'a> {
    input: Vec<char>,
    pos: usize,
    state: ScanState,
    buffer: String,
    // A quoted run opens a token even when it turns out empty (`""`).
    opened: bool,
    env: &'a Environment,
}

impl<'a> ArgumentFSM<'a> {
    fn new(line: &str, env: &'a Environment) -> Self {
        ArgumentFSM {
            input: line.chars().collect(),
            pos: 0,
            state: ScanState::Separator,
            buffer: String::new(),
            opened: false,
            env,
        }
    }

    fn make_tokens(mut self) -> Vec<String> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                ScanState::Separator => self.handle_separator(ch),
                ScanState::Word => self.handle_word(ch, &mut out),
                ScanState::Quoted(quote) => self.handle_quoted(ch, quote),
            }
        }

        self.finish_token(&mut out);
        out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_separator(&mut self, ch: char) {
        if is_separator(ch) {
            return;
        }
        self.state = ScanState::Word;
        // Re-dispatch the first character of the token through the word rules.
        self.pos -= 1;
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<String>) {
        match ch {
            c if is_separator(c) => {
                self.finish_token(out);
                self.state = ScanState::Separator;
            }
            '"' | '\'' => {
                self.opened = true;
                self.state = ScanState::Quoted(ch);
            }
            '$' if self.peek_char().is_some_and(is_ident_char) => {
                let name = self.collect_identifier();
                let value = self.env.resolve(&name).unwrap_or_else(|| format!("${name}"));
                self.buffer.push_str(&value);
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_quoted(&mut self, ch: char, quote: char) {
        match ch {
            c if c == quote => self.state = ScanState::Word,
            '\\' => match self.read_char() {
                Some(escaped) => self.buffer.push(escaped),
                None => self.buffer.push('\\'),
            },
            c => self.buffer.push(c),
        }
    }

    fn collect_identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(ch) = self.peek_char().filter(|c| is_ident_char(*c)) {
            name.push(ch);
            self.pos += 1;
        }
        name
    }

    fn finish_token(&mut self, out: &mut Vec<String>) {
        if self.opened || !self.buffer.is_empty() {
            out.push(std::mem::take(&mut self.buffer));
        }
        self.opened = false;
    }
}

fn is_separator(ch: char) -> bool {
    ch == ',' || ch.is_whitespace()
}

/// Characters allowed in a `$name` reference.
pub fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Returns true if `s` is a non-empty identifier that does not start with a digit.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => chars.all(is_ident_char),
        _ => false,
    }
}

/// Splits a raw argument string into tokens.
///
/// Commas and whitespace both separate tokens; runs of separators never yield
/// empty tokens. Quoted runs (`"..."` or `'...'`) are copied verbatim with
/// backslash escapes honored, and `$name` references outside quotes are
/// resolved against the ambient variables, then the process environment.
///
/// # Arguments
/// * `line` - the argument text, e.g. `key="a,b" other=$HOME`.
/// * `env` - the variable store used for `$name` expansion.
pub fn split_arguments(line: &str, env: &Environment) -> Vec<String> {
    ArgumentFSM::new(line, env).make_tokens()
}

/// Finds the `)` matching the `(` at byte index `open`.
///
/// Parentheses inside quoted regions do not count. A quote character preceded
/// by a backslash does not open or close a region. Returns `None` when `open`
/// is not a `(` or the nesting never returns to zero.
pub fn find_matching_paren(s: &str, open: usize) -> Option<usize> {
    if s.as_bytes().get(open) != Some(&b'(') {
        return None;
    }

    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut prev = '(';

    for (idx, ch) in s[open + 1..].char_indices() {
        if (ch == '"' || ch == '\'') && prev != '\\' {
            match quote {
                None => quote = Some(ch),
                Some(q) if q == ch => quote = None,
                Some(_) => {}
            }
        }

        if quote.is_none() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + 1 + idx);
                    }
                }
                _ => {}
            }
        }
        prev = ch;
    }

    None
}

/// Expands `\n`, `\t`, `\r` and `\\` in a string literal. Other escapes are kept as-is.
pub fn unescape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.next();
    }
    out
}

/// Wraps text in double quotes so that [`split_arguments`] yields it back unchanged.
pub fn quote_argument(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Builds an [`ArgumentMap`] from tokens.
///
/// `key=value` tokens become entries; any other token is bound positionally
/// as `arg1`, `arg2`, ...
pub fn argument_map(tokens: &[String]) -> ArgumentMap {
    let mut map = ArgumentMap::new();
    let mut positional = 0;
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) if is_identifier(key.trim()) => {
                map.insert(key.trim().to_string(), value.to_string());
            }
            _ => {
                positional += 1;
                map.insert(format!("arg{positional}"), token.clone());
            }
        }
    }
    map
}
