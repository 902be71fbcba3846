//! Search-pattern locators.
//!
//! A locator is preferably the whole source line as an anchored search
//! pattern, which survives edits elsewhere in the file.  A pattern that would
//! match several lines of the file is useless for jumping, so those symbols
//! fall back to a line number.

use std::collections::HashMap;
use std::fs;

use ustr::Ustr;

use crate::file_format::tagfile::Locator;

/// Escape one source line for use between `/` delimiters, including the `^`
/// and `$` anchors.  Backslashes and slashes are escaped, as are a `^` at the
/// start and a `$` at the end which would otherwise read as anchors.  A
/// trailing carriage return is dropped.
pub fn escape_pattern(line: &str) -> String {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut escaped = String::with_capacity(line.len() + 4);
    escaped.push('^');
    for (i, c) in line.char_indices() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '/' => escaped.push_str("\\/"),
            '^' if i == 0 => escaped.push_str("\\^"),
            '$' if i + 1 == line.len() => escaped.push_str("\\$"),
            _ => escaped.push(c),
        }
    }
    escaped.push('$');
    escaped
}

/// The lines of one source file plus how often each distinct line occurs.
/// Lines are kept as bytes; one that is not valid UTF-8 can still be counted
/// but never becomes a pattern, since a lossy pattern would not match it.
#[derive(Debug)]
pub struct SourceText {
    lines: Vec<Vec<u8>>,
    occurrences: HashMap<Vec<u8>, usize>,
}

impl SourceText {
    pub fn new(text: &str) -> SourceText {
        SourceText::from_bytes(text.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> SourceText {
        let lines: Vec<Vec<u8>> = bytes
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .collect();
        let mut occurrences = HashMap::with_capacity(lines.len());
        for line in &lines {
            *occurrences.entry(line.clone()).or_insert(0) += 1;
        }
        SourceText { lines, occurrences }
    }

    /// The 1-based line `lineno`, without its line terminator, if it is text.
    pub fn line(&self, lineno: u32) -> Option<&str> {
        let index = (lineno as usize).checked_sub(1)?;
        std::str::from_utf8(self.lines.get(index)?).ok()
    }

    pub fn is_unique(&self, line: &str) -> bool {
        self.occurrences.get(line.as_bytes()).copied() == Some(1)
    }

    /// Pattern locator for `lineno` if its text is non-blank and unique within
    /// the file, otherwise the line number itself.
    pub fn locator(&self, lineno: u32) -> Locator {
        match self.line(lineno) {
            Some(line) if !line.trim().is_empty() && self.is_unique(line) => {
                Locator::Pattern(escape_pattern(line))
            }
            _ => Locator::Line(lineno),
        }
    }
}

/// Source text for every file a translation unit touched, loaded lazily.
/// Files that cannot be read are remembered as such and get line-number
/// locators.
#[derive(Debug, Default)]
pub struct LineCache {
    files: HashMap<Ustr, Option<SourceText>>,
}

impl LineCache {
    pub fn new() -> LineCache {
        LineCache::default()
    }

    /// Seed the cache with the bytes the front end already read.
    pub fn insert(&mut self, file: Ustr, bytes: &[u8]) {
        self.files.insert(file, Some(SourceText::from_bytes(bytes)));
    }

    pub fn source(&mut self, file: Ustr) -> Option<&SourceText> {
        self.files
            .entry(file)
            .or_insert_with(|| match fs::read(file.as_str()) {
                Ok(bytes) => Some(SourceText::from_bytes(&bytes)),
                Err(e) => {
                    debug!("Using line numbers for '{}': {}", file, e);
                    None
                }
            })
            .as_ref()
    }

    pub fn locator(&mut self, file: Ustr, lineno: u32) -> Locator {
        match self.source(file) {
            Some(source) => source.locator(lineno),
            None => Locator::Line(lineno),
        }
    }
}
