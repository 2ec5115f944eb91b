//! Lazy value sequences that drive `for` loops.
//!
//! A range specification is resolved into one of a handful of sequence kinds:
//!
//! - `a|b|c`: explicit list
//! - `1..10`: inclusive numeric range
//! - `a..z`: inclusive byte range
//! - `10.0.0.1..10.0.1.5`: full IPv4 range
//! - `192.168.1.10..20`: last-octet IPv4 range
//! - `1..3+a..c`: chain of the single forms above
//!
//! All ranges are ascending only: a start past the end yields an empty sequence.

use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while resolving a range specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// None of the known forms matched.
    #[error("unsupported range format: {0}")]
    Unsupported(String),
    /// The end of a last-octet IP range is not a number in `0..=255`.
    #[error("invalid end octet '{0}'")]
    InvalidEndOctet(String),
    /// One member of a `+` chain failed to resolve.
    #[error("invalid part {part:?}")]
    InvalidPart {
        part: String,
        #[source]
        source: Box<RangeError>,
    },
}

/// A finite, forward-only producer of string values.
///
/// Once `next` returns `None` it keeps returning `None`.
pub trait Sequence: Iterator<Item = String> {
    /// Number of values still expected. A hint for progress display only.
    fn estimated_len(&self) -> usize;

    /// Releases any held resource. Safe to call repeatedly, even after exhaustion.
    fn close(&mut self) {}
}

/// Values given explicitly as `a|b|c`.
pub struct ListSequence {
    items: std::vec::IntoIter<String>,
}

impl ListSequence {
    pub fn new(items: Vec<String>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    /// Splits on `|`, trimming each segment and dropping blank ones.
    fn from_spec(spec: &str) -> Self {
        Self::new(
            spec.split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl Iterator for ListSequence {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.items.next()
    }
}

impl Sequence for ListSequence {
    fn estimated_len(&self) -> usize {
        self.items.len()
    }
}

/// Inclusive ascending integer range.
pub struct NumericRange {
    current: i64,
    end: i64,
    done: bool,
}

impl NumericRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            current: start,
            end,
            done: start > end,
        }
    }
}

impl Iterator for NumericRange {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let value = self.current;
        if value == self.end {
            self.done = true;
        } else {
            self.current += 1;
        }
        Some(value.to_string())
    }
}

impl Sequence for NumericRange {
    fn estimated_len(&self) -> usize {
        if self.done {
            return 0;
        }
        let remaining = i128::from(self.end) - i128::from(self.current) + 1;
        usize::try_from(remaining).unwrap_or(usize::MAX)
    }
}

/// Inclusive ascending range over single bytes, e.g. `a..e`.
pub struct CharRange {
    current: u8,
    end: u8,
    done: bool,
}

impl CharRange {
    pub fn new(start: u8, end: u8) -> Self {
        Self {
            current: start,
            end,
            done: start > end,
        }
    }
}

impl Iterator for CharRange {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let value = self.current;
        if value == self.end {
            self.done = true;
        } else {
            self.current += 1;
        }
        Some(char::from(value).to_string())
    }
}

impl Sequence for CharRange {
    fn estimated_len(&self) -> usize {
        if self.done {
            0
        } else {
            usize::from(self.end - self.current) + 1
        }
    }
}

/// Dotted-quad range where the address is counted as a big-endian `u32`,
/// carrying from one octet into the next.
pub struct IpRange {
    current: u32,
    end: u32,
    done: bool,
}

impl IpRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        let (current, end) = (u32::from(start), u32::from(end));
        Self {
            current,
            end,
            done: current > end,
        }
    }
}

impl Iterator for IpRange {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let value = Ipv4Addr::from(self.current);
        // Stops at the end address instead of wrapping past 255.255.255.255.
        if self.current == self.end {
            self.done = true;
        } else {
            self.current += 1;
        }
        Some(value.to_string())
    }
}

impl Sequence for IpRange {
    fn estimated_len(&self) -> usize {
        if self.done {
            0
        } else {
            usize::try_from(self.end - self.current)
                .map_or(usize::MAX, |n| n.saturating_add(1))
        }
    }
}

/// Fixed dotted prefix plus an inclusive last-octet range, e.g. `192.168.1.10..20`.
pub struct PartialIpRange {
    prefix: String,
    octets: NumericRange,
}

impl PartialIpRange {
    pub fn new(prefix: impl Into<String>, start: u8, end: u8) -> Self {
        Self {
            prefix: prefix.into(),
            octets: NumericRange::new(i64::from(start), i64::from(end)),
        }
    }
}

impl Iterator for PartialIpRange {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.octets
            .next()
            .map(|octet| format!("{}{}", self.prefix, octet))
    }
}

impl Sequence for PartialIpRange {
    fn estimated_len(&self) -> usize {
        self.octets.estimated_len()
    }
}

/// Ordered union of sequences. Member `n` is exhausted before member `n + 1` starts.
pub struct ChainSequence {
    members: Vec<Box<dyn Sequence>>,
    current: usize,
}

impl ChainSequence {
    pub fn new(members: Vec<Box<dyn Sequence>>) -> Self {
        Self {
            members,
            current: 0,
        }
    }
}

impl Iterator for ChainSequence {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while let Some(member) = self.members.get_mut(self.current) {
            if let Some(value) = member.next() {
                return Some(value);
            }
            self.current += 1;
        }
        None
    }
}

impl Sequence for ChainSequence {
    fn estimated_len(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.estimated_len())
            .fold(0, usize::saturating_add)
    }

    fn close(&mut self) {
        for member in &mut self.members {
            member.close();
        }
    }
}

/// Owns a sequence and closes it when dropped, on every exit path.
pub struct ClosingSequence {
    inner: Box<dyn Sequence>,
}

impl ClosingSequence {
    pub fn new(inner: Box<dyn Sequence>) -> Self {
        Self { inner }
    }
}

impl Iterator for ClosingSequence {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }
}

impl Sequence for ClosingSequence {
    fn estimated_len(&self) -> usize {
        self.inner.estimated_len()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

impl Drop for ClosingSequence {
    fn drop(&mut self) {
        self.inner.close();
    }
}

type RangeResult = Result<Box<dyn Sequence>, RangeError>;

/// A single-range constructor. Returns `None` when the form does not apply.
type RangeForm = fn(&str, &str) -> Option<RangeResult>;

/// Single-range forms in priority order; the first applicable one wins.
///
/// Keeps `1..9` numeric rather than a byte range, and lets an address start
/// claim the range before the numeric form sees it.
const RANGE_FORMS: &[(&str, RangeForm)] = &[
    ("ip", ip_form),
    ("numeric", numeric_form),
    ("character", char_form),
];

fn ip_form(start: &str, end: &str) -> Option<RangeResult> {
    let first: Ipv4Addr = start.parse().ok()?;
    if let Ok(last) = end.parse::<Ipv4Addr>() {
        return Some(Ok(Box::new(IpRange::new(first, last))));
    }

    let dot = start.rfind('.')?;
    let (prefix, start_octet) = (&start[..=dot], first.octets()[3]);
    Some(match end.parse::<u8>() {
        Ok(end_octet) => Ok(Box::new(PartialIpRange::new(prefix, start_octet, end_octet))),
        Err(_) => Err(RangeError::InvalidEndOctet(end.to_string())),
    })
}

fn numeric_form(start: &str, end: &str) -> Option<RangeResult> {
    let (first, last) = (start.parse::<i64>().ok()?, end.parse::<i64>().ok()?);
    Some(Ok(Box::new(NumericRange::new(first, last))))
}

fn char_form(start: &str, end: &str) -> Option<RangeResult> {
    match (start.as_bytes(), end.as_bytes()) {
        ([first], [last]) => Some(Ok(Box::new(CharRange::new(*first, *last)))),
        _ => None,
    }
}

/// Resolves a single `start..end` range.
pub fn parse_single_range(spec: &str) -> RangeResult {
    let Some((start, end)) = spec.split_once("..") else {
        return Err(RangeError::Unsupported(spec.to_string()));
    };
    let (start, end) = (start.trim(), end.trim());

    for (name, form) in RANGE_FORMS {
        if let Some(result) = form(start, end) {
            debug!(form = *name, spec, "resolved range");
            return result;
        }
    }

    Err(RangeError::Unsupported(spec.to_string()))
}

/// Resolves a range specification into a sequence.
///
/// `|` takes precedence over everything else: any spec containing it is an
/// explicit list. Otherwise `+` joins single ranges into a chain, and any part
/// that fails aborts the whole construction.
///
/// # Arguments
/// * `spec` - the range text, e.g. `1..5`, `a..c+x|y`, `10.0.0.1..20`.
///
/// # Returns
/// The sequence, or a `RangeError` naming the offending input. Nothing usable
/// is returned on error.
pub fn parse_range(spec: &str) -> RangeResult {
    let spec = spec.trim();

    if spec.contains('|') {
        return Ok(Box::new(ListSequence::from_spec(spec)));
    }

    if spec.contains('+') {
        let members = spec
            .split('+')
            .map(|part| {
                parse_single_range(part.trim()).map_err(|e| RangeError::InvalidPart {
                    part: part.to_string(),
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Box::new(ChainSequence::new(members)));
    }

    parse_single_range(spec)
}
