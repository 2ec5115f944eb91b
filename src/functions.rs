//! In-process functions available to `name(args)` pipeline stages.
//!
//! Every function receives its tokenized arguments (the piped input, if any,
//! is the last one) and returns the text handed to the next stage.

use crate::console::{Color, Console};
use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;

/// Signature shared by all pipeline functions.
pub type Function = fn(&[String], &mut Console) -> Result<String>;

/// Name of the write-to-file function; a chain ending in it is not echoed.
pub const WRITE_TO_FILE: &str = "file";

const FUNCTIONS: &[(&str, Function)] = &[
    ("echo", echo),
    ("cat", cat),
    ("upper", upper),
    ("lower", lower),
    ("trim", trim),
    ("len", len),
    ("reverse", reverse),
    ("wc", wc),
    ("grep", grep),
    ("base64", encode_base64),
    ("sha256", sha256),
    ("whoami", whoami),
    (WRITE_TO_FILE, file),
];

/// Looks up a function by name.
pub fn lookup(name: &str) -> Option<Function> {
    FUNCTIONS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, f)| *f)
}

/// Names of all functions, in registration order.
pub fn names() -> impl Iterator<Item = &'static str> {
    FUNCTIONS.iter().map(|(name, _)| *name)
}

fn text(args: &[String]) -> String {
    args.join(" ")
}

fn echo(args: &[String], _console: &mut Console) -> Result<String> {
    Ok(text(args))
}

fn cat(args: &[String], _console: &mut Console) -> Result<String> {
    let [path] = args else {
        bail!("cat expects exactly one path, got {}", args.len());
    };
    fs::read_to_string(path).with_context(|| format!("cat: {}", path))
}

fn upper(args: &[String], _console: &mut Console) -> Result<String> {
    Ok(text(args).to_uppercase())
}

fn lower(args: &[String], _console: &mut Console) -> Result<String> {
    Ok(text(args).to_lowercase())
}

fn trim(args: &[String], _console: &mut Console) -> Result<String> {
    Ok(text(args).trim().to_string())
}

/// Length in characters, not bytes.
fn len(args: &[String], _console: &mut Console) -> Result<String> {
    Ok(text(args).chars().count().to_string())
}

fn reverse(args: &[String], _console: &mut Console) -> Result<String> {
    Ok(text(args).chars().rev().collect())
}

fn encode_base64(args: &[String], _console: &mut Console) -> Result<String> {
    Ok(STANDARD.encode(text(args)))
}

fn wc(args: &[String], _console: &mut Console) -> Result<String> {
    let s = text(args);
    let lines = s.lines().count();
    let words = s.split_whitespace().count();
    let bytes = s.len();
    Ok(format!("{} {} {}", lines, words, bytes))
}

/// `grep(pattern, text...)`: keeps the lines of `text` matching `pattern`.
fn grep(args: &[String], _console: &mut Console) -> Result<String> {
    let Some((pattern, rest)) = args.split_first() else {
        bail!("grep expects a pattern");
    };
    let re = Regex::new(pattern).with_context(|| format!("Invalid regex pattern: {}", pattern))?;
    let haystack = text(rest);
    let matched: Vec<&str> = haystack.lines().filter(|line| re.is_match(line)).collect();
    Ok(matched.join("\n"))
}

fn sha256(args: &[String], _console: &mut Console) -> Result<String> {
    let digest = Sha256::digest(text(args).as_bytes());
    Ok(format!("{:x}", digest))
}

fn whoami(_args: &[String], _console: &mut Console) -> Result<String> {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    Ok(user)
}

/// `file(path, text...)`: writes `text` to `path` and reports it.
fn file(args: &[String], console: &mut Console) -> Result<String> {
    let Some((path, rest)) = args.split_first() else {
        bail!("file expects a path");
    };
    let content = text(rest);
    fs::write(path, &content).with_context(|| format!("file: can't write {}", path))?;
    let shown = console.paint(Color::Cyan, path);
    console.success(format!("Wrote {} bytes to {}", content.len(), shown));
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::buffer_text;
    use tempfile::TempDir;

    fn call(name: &str, args: &[&str]) -> Result<String> {
        let (mut console, _) = Console::captured();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        lookup(name).expect("registered function")(&args, &mut console)
    }

    #[test]
    fn test_text_functions() {
        assert_eq!(call("upper", &["abc"]).unwrap(), "ABC");
        assert_eq!(call("lower", &["AbC"]).unwrap(), "abc");
        assert_eq!(call("trim", &["  x  "]).unwrap(), "x");
        assert_eq!(call("len", &["héllo"]).unwrap(), "5");
        assert_eq!(call("reverse", &["abc"]).unwrap(), "cba");
        assert_eq!(call("echo", &["hello", "world"]).unwrap(), "hello world");
        assert_eq!(call("echo", &[]).unwrap(), "");
    }

    #[test]
    fn test_wc_counts_lines_words_bytes() {
        assert_eq!(call("wc", &["one two\nthree"]).unwrap(), "2 3 13");
    }

    #[test]
    fn test_grep_filters_lines() {
        let out = call("grep", &["^10\\.", "10.0.0.1\n192.168.0.1\n10.0.0.2"]).unwrap();
        assert_eq!(out, "10.0.0.1\n10.0.0.2");
        assert!(call("grep", &["("]).is_err());
        assert!(call("grep", &[]).is_err());
    }

    #[test]
    fn test_encodings() {
        assert_eq!(call("base64", &["hello"]).unwrap(), "aGVsbG8=");
        assert_eq!(
            call("sha256", &["abc"]).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cat_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "remember").unwrap();

        let path = path.to_string_lossy().into_owned();
        assert_eq!(call("cat", &[path.as_str()]).unwrap(), "remember");
        assert!(call("cat", &[]).is_err());
    }

    #[test]
    fn test_file_writes_and_reports() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt").to_string_lossy().into_owned();
        let (mut console, out) = Console::captured();

        let result = file(&[path.clone(), "a".to_string(), "b".to_string()], &mut console).unwrap();

        assert_eq!(result, "a b");
        assert_eq!(fs::read_to_string(&path).unwrap(), "a b");
        assert_eq!(buffer_text(&out), format!("[+] Wrote 3 bytes to {}\n", path));
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(lookup("nope").is_none());
        assert!(names().any(|n| n == WRITE_TO_FILE));
    }
}
