//! `for <var> [in] <source> -> <template>` execution.

use crate::console::Console;
use crate::data::{DataError, Record, load_records};
use crate::parser::{LoopHeader, LoopSource, PIPE_MARKER, ParsingError, parse_loop};
use crate::range::{ClosingSequence, RangeError, Sequence, parse_range};
use regex::{Captures, NoExpand, Regex};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Usage shown when a loop line cannot be parsed.
pub const LOOP_USAGE: &str = concat!(
    "Examples:\n",
    "  for $x in 1..100 -> echo $x\n",
    "  for ip in 192.168.1.1..50 -> ping $ip\n",
    "  for url in $cat(\"urls.txt\") -> curl $url",
);

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Invalid for-loop syntax: {0}")]
    Syntax(#[from] ParsingError),
    #[error("Cannot parse range '{spec}'")]
    Range {
        spec: String,
        #[source]
        source: RangeError,
    },
    #[error("Failed to load data from {}", path.display())]
    Data {
        path: PathBuf,
        #[source]
        source: DataError,
    },
    #[error("invalid loop variable")]
    Template(#[from] regex::Error),
}

/// What the loop hands each expanded command to.
pub trait LoopBody {
    /// Runs a piped expansion; failures yield an empty string.
    fn piped(&mut self, line: &str) -> String;

    /// Runs any other expansion as a full interpreter line.
    fn dispatch(&mut self, line: &str);

    fn console(&mut self) -> &mut Console;
}

/// What a finished loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: usize,
    pub results: Vec<String>,
}

/// Items of either source kind, yielded in production order.
enum Items {
    Range(ClosingSequence),
    Records(std::vec::IntoIter<Record>),
}

impl Iterator for Items {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        match self {
            Items::Range(seq) => seq.next().map(Record::Scalar),
            Items::Records(records) => records.next(),
        }
    }
}

/// A parsed loop, ready to run.
pub struct ForLoop {
    header: LoopHeader,
    value: Regex,
    field: Regex,
}

impl ForLoop {
    pub fn parse(line: &str) -> Result<Self, LoopError> {
        Self::new(parse_loop(line)?)
    }

    pub fn new(header: LoopHeader) -> Result<Self, LoopError> {
        let var = regex::escape(&header.var);
        let value = Regex::new(&format!(r"\$\{{{var}\}}|\${var}"))?;
        let field = Regex::new(&format!(r"\$\({var}->([A-Za-z_][A-Za-z0-9_]*)\)"))?;
        Ok(Self {
            header,
            value,
            field,
        })
    }

    /// Replaces `$var` and `${var}` in the template with `value`.
    pub fn substitute(&self, value: &str) -> String {
        self.value
            .replace_all(&self.header.template, NoExpand(value))
            .into_owned()
    }

    /// Replaces `$(var->field)` placeholders; missing fields become empty.
    pub fn substitute_fields(&self, record: &Record) -> String {
        match record {
            Record::Scalar(value) => self.substitute(value),
            Record::Fields(fields) => self
                .field
                .replace_all(&self.header.template, |caps: &Captures| {
                    fields.get(&caps[1]).cloned().unwrap_or_default()
                })
                .into_owned(),
        }
    }

    /// Builds the item source. Nothing runs if this fails.
    fn items(&self) -> Result<(Items, usize, String), LoopError> {
        match &self.header.source {
            LoopSource::Range(spec) => {
                let seq = parse_range(spec).map_err(|source| LoopError::Range {
                    spec: spec.clone(),
                    source,
                })?;
                let seq = ClosingSequence::new(seq);
                let total = seq.estimated_len();
                Ok((Items::Range(seq), total, spec.clone()))
            }
            LoopSource::Data(path) => {
                let path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
                let records = load_records(&path).map_err(|source| LoopError::Data {
                    path: path.clone(),
                    source,
                })?;
                let total = records.len();
                Ok((Items::Records(records.into_iter()), total, "$cat(...)".to_string()))
            }
        }
    }

    /// Runs the template once per item and prints the collected pipeline results.
    pub fn run(&self, body: &mut dyn LoopBody) -> Result<LoopSummary, LoopError> {
        let (items, total, shown_source) = self.items()?;
        let mut summary = LoopSummary::default();

        if total == 0 {
            let warning = match self.header.source {
                LoopSource::Range(_) => "Empty range - nothing to do",
                LoopSource::Data(_) => "No data loaded - nothing to do",
            };
            body.console().warning(warning);
            return Ok(summary);
        }

        let console = body.console();
        console.blank();
        console.info(format!(
            "Loop: {} ∈ {}  ({} items)",
            self.header.var, shown_source, total
        ));
        console.blank();

        for item in items {
            summary.iterations += 1;
            let expanded = self.substitute_fields(&item);
            debug!(iteration = summary.iterations, expanded, "loop item");

            if expanded.contains(PIPE_MARKER) {
                let result = body.piped(&expanded);
                let result = result.trim();
                if !result.is_empty() {
                    summary.results.push(result.to_string());
                }
            } else {
                body.dispatch(&expanded);
            }
        }

        if !summary.results.is_empty() {
            let console = body.console();
            console.blank();
            console.success(format!("Collected results ({}):", summary.results.len()));
            for (idx, result) in summary.results.iter().enumerate() {
                console.line(format!("  [{:2}] {}", idx + 1, result));
            }
            console.blank();
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{SharedBuffer, buffer_text};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    struct RecordingBody {
        console: Console,
        piped: Vec<String>,
        dispatched: Vec<String>,
    }

    impl RecordingBody {
        fn new() -> (Self, SharedBuffer) {
            let (console, out) = Console::captured();
            let body = Self {
                console,
                piped: Vec::new(),
                dispatched: Vec::new(),
            };
            (body, out)
        }
    }

    impl LoopBody for RecordingBody {
        /// Upper-cases the line, or fails on anything mentioning `bad`.
        fn piped(&mut self, line: &str) -> String {
            self.piped.push(line.to_string());
            if line.contains("bad") {
                String::new()
            } else {
                format!(" {} ", line.to_uppercase())
            }
        }

        fn dispatch(&mut self, line: &str) {
            self.dispatched.push(line.to_string());
        }

        fn console(&mut self) -> &mut Console {
            &mut self.console
        }
    }

    #[test]
    fn test_range_loop_dispatches_each_value() {
        let (mut body, out) = RecordingBody::new();
        let summary = ForLoop::parse("for x in 1..3 -> scan host=$x tag=${x}x")
            .unwrap()
            .run(&mut body)
            .unwrap();

        assert_eq!(summary.iterations, 3);
        assert_eq!(
            body.dispatched,
            vec!["scan host=1 tag=1x", "scan host=2 tag=2x", "scan host=3 tag=3x"]
        );
        assert!(body.piped.is_empty());
        assert_eq!(buffer_text(&out), "\n[*] Loop: x ∈ 1..3  (3 items)\n\n");
    }

    #[test]
    fn test_empty_range_warns_without_dispatch() {
        let (mut body, out) = RecordingBody::new();
        let summary = ForLoop::parse("for x in 5..1 -> echo $x")
            .unwrap()
            .run(&mut body)
            .unwrap();

        assert_eq!(summary, LoopSummary::default());
        assert!(body.dispatched.is_empty());
        assert_eq!(buffer_text(&out), "[~] Empty range - nothing to do\n");
    }

    #[test]
    fn test_piped_results_are_collected_in_order() {
        let (mut body, out) = RecordingBody::new();
        let summary = ForLoop::parse(r#"for w in ok|bad|fine -> "$w" |> upper()"#)
            .unwrap()
            .run(&mut body)
            .unwrap();

        assert_eq!(summary.iterations, 3);
        assert_eq!(body.piped.len(), 3);
        assert_eq!(
            summary.results,
            vec![r#""OK" |> UPPER()"#, r#""FINE" |> UPPER()"#]
        );
        let text = buffer_text(&out);
        assert!(text.contains("[+] Collected results (2):\n"));
        assert!(text.contains("  [ 1] \"OK\" |> UPPER()\n  [ 2] \"FINE\" |> UPPER()\n"));
    }

    #[test]
    fn test_bad_range_fails_before_any_output() {
        let (mut body, out) = RecordingBody::new();
        let err = ForLoop::parse("for x in 1..3+zz -> echo $x")
            .unwrap()
            .run(&mut body)
            .unwrap_err();

        assert!(matches!(err, LoopError::Range { .. }));
        assert!(body.dispatched.is_empty());
        assert_eq!(buffer_text(&out), "");
    }

    #[test]
    fn test_json_records_expand_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.json");
        fs::write(&path, r#"[{"host": "a.local", "port": 22}, {"host": "b.local"}, "plain"]"#)
            .unwrap();

        let line = format!(
            "for h in $cat(\"{}\") -> recon $(h->host):$(h->port) $h",
            path.display()
        );
        let (mut body, out) = RecordingBody::new();
        let summary = ForLoop::parse(&line).unwrap().run(&mut body).unwrap();

        assert_eq!(summary.iterations, 3);
        assert_eq!(
            body.dispatched,
            vec![
                "recon a.local:22 $h",
                "recon b.local: $h",
                "recon $(h->host):$(h->port) plain",
            ]
        );
        assert!(buffer_text(&out).contains("[*] Loop: h ∈ $cat(...)  (3 items)"));
    }

    #[test]
    fn test_missing_data_file_is_an_error() {
        let (mut body, _) = RecordingBody::new();
        let err = ForLoop::parse(r#"for h in $cat("/nonexistent/lmv.txt") -> echo $h"#)
            .unwrap()
            .run(&mut body)
            .unwrap_err();
        assert!(matches!(err, LoopError::Data { .. }));
    }

    #[test]
    fn test_substitution_is_literal() {
        let looped = ForLoop::parse("for v in 1..1 -> echo $v ${v}").unwrap();
        assert_eq!(looped.substitute("$1 ${2}"), "echo $1 ${2} $1 ${2}");

        let mut fields = HashMap::new();
        fields.insert("name".to_string(), "$x".to_string());
        assert_eq!(
            ForLoop::parse("for v in 1..1 -> hi $(v->name)$(v->none)")
                .unwrap()
                .substitute_fields(&Record::Fields(fields)),
            "hi $x"
        );
    }
}
