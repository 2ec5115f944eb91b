use crate::lexer::{
    find_matching_paren, is_ident_char, is_identifier, quote_argument, unescape_literal,
};
use regex::{Captures, Regex};
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

/// Separator between pipeline stages.
pub const PIPE_MARKER: &str = "|>";

/// Errors that can occur while parsing loop headers and pipeline stages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsingError {
    /// The line starts with `for` but does not have the loop shape.
    #[error("malformed loop, expected: for <var> [in] <source> -> <command>")]
    MalformedLoop,
    /// A loop command template that is blank after the arrow.
    #[error("loop body is empty")]
    EmptyLoopBody,
    /// A `|>` with nothing between it and its neighbour (1-based stage position).
    #[error("stage {0} is empty")]
    EmptyStage(usize),
    /// A call-shaped stage whose parentheses never balance.
    #[error("unbalanced parentheses in '{0}'")]
    UnbalancedCall(String),
    /// Text after the closing parenthesis of a call.
    #[error("unexpected text after call in '{0}'")]
    TrailingText(String),
}

static LOOP_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^for\s+\$?(\w+)\s+(?:in\s+)?(.+?)\s*(?:[-=]{1,2}>|→)\s*(.*)$")
        .expect("loop header regex")
});

static CAT_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\$cat\(\s*["']([^"']+)["']\s*\)$"#).expect("cat source regex")
});

static VARIABLE_ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s,])([A-Za-z_]\w*)=\$(\{[A-Za-z_]\w*\}|[A-Za-z_]\w*)([\s,]|$)")
        .expect("variable argument regex")
});

/// Where a loop's items come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSource {
    /// A range specification, resolved by [`crate::range::parse_range`].
    Range(String),
    /// `$cat("path")`: records loaded from a data file.
    Data(PathBuf),
}

/// A parsed `for <var> [in] <source> -> <template>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopHeader {
    pub var: String,
    pub source: LoopSource,
    pub template: String,
}

/// Cheap check used for classification: a leading `for` word and an arrow.
///
/// Lines such as `for f in *; do ...; done` have no arrow and stay with the shell.
pub fn looks_like_loop(line: &str) -> bool {
    let mut words = line.split_whitespace();
    words.next().is_some_and(|w| w.eq_ignore_ascii_case("for"))
        && words
            .next()
            .is_some_and(|w| w.trim_start_matches('$').starts_with(is_ident_char))
        && (line.contains("->") || line.contains("=>") || line.contains('→'))
}

/// Parses a loop line. The line must already satisfy [`looks_like_loop`].
pub fn parse_loop(line: &str) -> Result<LoopHeader, ParsingError> {
    let caps = LOOP_HEADER
        .captures(line.trim())
        .ok_or(ParsingError::MalformedLoop)?;

    let var = caps[1].to_string();
    let source_text = caps[2].trim();
    let template = caps[3].trim().to_string();
    if template.is_empty() {
        return Err(ParsingError::EmptyLoopBody);
    }

    let source = match CAT_SOURCE.captures(source_text) {
        Some(path) => LoopSource::Data(PathBuf::from(&path[1])),
        None => LoopSource::Range(source_text.to_string()),
    };

    Ok(LoopHeader {
        var,
        source,
        template,
    })
}

/// Splits a pipeline line on [`PIPE_MARKER`], ignoring markers inside quotes.
///
/// Every stage is trimmed; an empty stage is an error naming its position.
pub fn split_pipeline(line: &str) -> Result<Vec<String>, ParsingError> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut prev = '\0';
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) if ch == q && prev != '\\' => quote = None,
            None if (ch == '"' || ch == '\'') && prev != '\\' => quote = Some(ch),
            None if ch == '|' && chars.peek() == Some(&'>') => {
                chars.next();
                stages.push(std::mem::take(&mut current));
                prev = '\0';
                continue;
            }
            _ => {}
        }
        current.push(ch);
        prev = ch;
    }
    stages.push(current);

    stages
        .into_iter()
        .enumerate()
        .map(|(idx, stage)| {
            let stage = stage.trim();
            if stage.is_empty() {
                Err(ParsingError::EmptyStage(idx + 1))
            } else {
                Ok(stage.to_string())
            }
        })
        .collect()
}

/// One unit of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// A quoted string, already unescaped.
    Literal(String),
    /// `name(args)`, with the raw text between the parentheses.
    Call { name: String, args: String },
    /// `name [key=value ...]`, with the raw text after the name.
    Module { name: String, args: String },
}

impl Stage {
    /// Parses a single, trimmed stage.
    pub fn parse(text: &str) -> Result<Stage, ParsingError> {
        let text = text.trim();
        if let Some(literal) = quoted_literal(text) {
            return Ok(Stage::Literal(unescape_literal(literal)));
        }

        if let Some(open) = text.find('(') {
            let name = text[..open].trim_end();
            if is_identifier(name) {
                let close = find_matching_paren(text, open)
                    .ok_or_else(|| ParsingError::UnbalancedCall(text.to_string()))?;
                if !text[close + 1..].trim().is_empty() {
                    return Err(ParsingError::TrailingText(text.to_string()));
                }
                return Ok(Stage::Call {
                    name: name.to_string(),
                    args: text[open + 1..close].trim().to_string(),
                });
            }
        }

        let (name, args) = match text.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (text, ""),
        };
        Ok(Stage::Module {
            name: name.to_string(),
            args: args.to_string(),
        })
    }

    /// Threads the previous stage's output into this stage.
    ///
    /// Literals get the input prepended. Calls get it as a trailing quoted
    /// argument. Modules get it in place of the first `key=$var` argument, or
    /// as a new `input="..."` argument when there is none. Empty input leaves
    /// the stage untouched.
    pub fn with_input(self, input: &str) -> Stage {
        if input.is_empty() {
            return self;
        }
        let quoted = quote_argument(input);
        match self {
            Stage::Literal(text) => Stage::Literal(format!("{input}{text}")),
            Stage::Call { name, args } => {
                let args = if args.is_empty() {
                    quoted
                } else {
                    format!("{args}, {quoted}")
                };
                Stage::Call { name, args }
            }
            Stage::Module { name, args } => {
                let args = if VARIABLE_ARGUMENT.is_match(&args) {
                    VARIABLE_ARGUMENT
                        .replacen(&args, 1, |caps: &Captures| {
                            format!("{}{}={}{}", &caps[1], &caps[2], quoted, &caps[4])
                        })
                        .into_owned()
                } else if args.is_empty() {
                    format!("input={quoted}")
                } else {
                    format!("{args} input={quoted}")
                };
                Stage::Module { name, args }
            }
        }
    }
}

fn quoted_literal(text: &str) -> Option<&str> {
    let first = text.chars().next()?;
    if text.len() < 2 || !(first == '"' || first == '\'') || !text.ends_with(first) {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    // `"a" x "b"` only looks quoted at both ends.
    let mut prev = '\0';
    for ch in inner.chars() {
        if ch == first && prev != '\\' {
            return None;
        }
        prev = ch;
    }
    Some(inner)
}
