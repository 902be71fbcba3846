//! Deduplicated tag collections, sorting, and incremental merging with an
//! existing tagfile.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::io;

use crate::errors::{Result, TagsError};
use crate::file_format::tagfile::{parse_tag_line_bytes, TagEntry, TagKey, TagLine};
use crate::file_utils::normalize_path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputLine {
    Entry(TagEntry),
    /// A line from an existing tagfile that could not be parsed.  Its bytes
    /// are kept as-is since we cannot tell which file it belongs to.
    Passthrough(Vec<u8>),
}

impl OutputLine {
    /// The raw first two columns, which is what the sort order looks at.
    fn name_and_file(&self) -> (&[u8], &[u8]) {
        let line = match self {
            OutputLine::Entry(entry) => match entry.verbatim() {
                Some(line) => line,
                None => return (entry.name.as_bytes(), entry.file.as_str().as_bytes()),
            },
            OutputLine::Passthrough(line) => line,
        };
        let mut parts = line.splitn(3, |&b| b == b'\t');
        (parts.next().unwrap_or(&[]), parts.next().unwrap_or(&[]))
    }
}

/// Total order on output lines: tag name, then file, then locator, all
/// compared bytewise.  Unparsed lines sort after entries that share their
/// name and file.
fn compare_lines(a: &OutputLine, b: &OutputLine) -> Ordering {
    let (a_name, a_file) = a.name_and_file();
    let (b_name, b_file) = b.name_and_file();
    a_name
        .cmp(b_name)
        .then_with(|| a_file.cmp(b_file))
        .then_with(|| match (a, b) {
            (OutputLine::Entry(x), OutputLine::Entry(y)) => x.locator.cmp(&y.locator),
            (OutputLine::Entry(_), OutputLine::Passthrough(_)) => Ordering::Less,
            (OutputLine::Passthrough(_), OutputLine::Entry(_)) => Ordering::Greater,
            (OutputLine::Passthrough(x), OutputLine::Passthrough(y)) => x.cmp(y),
        })
}

/// Whether `name` can be written as the first column of a tag line.
pub fn is_valid_tag_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(|c| c == '\t' || c == '\n' || c == '\r')
}

/// An insertion-ordered set of output lines.  Entries are unique by
/// (name, file, locator); the first one inserted wins.
#[derive(Debug, Default)]
pub struct TagSet {
    lines: Vec<OutputLine>,
    keys: HashSet<TagKey>,
    passthrough: HashSet<Vec<u8>>,
}

impl TagSet {
    pub fn new() -> TagSet {
        TagSet::default()
    }

    /// Add `entry` unless an entry with the same key is already present.
    /// Returns whether it was added.
    pub fn insert(&mut self, entry: TagEntry) -> bool {
        if !is_valid_tag_name(&entry.name) {
            debug!("Dropping tag with unusable name {:?} in {}", entry.name, entry.file);
            return false;
        }
        if !self.keys.insert(entry.key()) {
            return false;
        }
        self.lines.push(OutputLine::Entry(entry));
        true
    }

    pub fn insert_passthrough<L: Into<Vec<u8>>>(&mut self, line: L) -> bool {
        let line = line.into();
        if !self.passthrough.insert(line.clone()) {
            return false;
        }
        self.lines.push(OutputLine::Passthrough(line));
        true
    }

    pub fn insert_line(&mut self, line: OutputLine) -> bool {
        match line {
            OutputLine::Entry(entry) => self.insert(entry),
            OutputLine::Passthrough(text) => self.insert_passthrough(text),
        }
    }

    /// Insert every entry, returning how many were new.
    pub fn extend<I: IntoIterator<Item = TagEntry>>(&mut self, entries: I) -> usize {
        entries.into_iter().filter(|entry| self.insert(entry.clone())).count()
    }

    pub fn contains(&self, key: &TagKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn entries(&self) -> impl Iterator<Item = &TagEntry> {
        self.lines.iter().filter_map(|line| match line {
            OutputLine::Entry(entry) => Some(entry),
            OutputLine::Passthrough(_) => None,
        })
    }

    pub fn sort(&mut self) {
        self.lines.sort_by(compare_lines);
    }
}

/// The contents of an existing tagfile, minus its pseudo-tag header.
#[derive(Debug, Default)]
pub struct PriorTagfile {
    pub lines: Vec<OutputLine>,
    pub malformed: usize,
}

/// Read the tagfile at `path`.  A missing file is an empty tagfile; any other
/// read failure ends the run.
pub fn read_tagfile(path: &str) -> Result<PriorTagfile> {
    match fs::read(path) {
        Ok(bytes) => Ok(parse_tagfile(&bytes, path)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No existing tagfile at '{}', starting from scratch", path);
            Ok(PriorTagfile::default())
        }
        Err(e) => Err(TagsError::io(path, e)),
    }
}

/// Split a tagfile into lines.  Lines are handled as bytes so that whatever
/// is not ours, including text in other encodings, survives unchanged.
pub fn parse_tagfile(text: &[u8], origin: &str) -> PriorTagfile {
    let mut prior = PriorTagfile::default();
    for (i, line) in text.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match parse_tag_line_bytes(line) {
            Ok(TagLine::Header(_)) => {}
            Ok(TagLine::Entry(entry)) => prior.lines.push(OutputLine::Entry(entry)),
            Err(reason) => {
                warn!("Keeping unparsable line {} of '{}' as-is: {}", i + 1, origin, reason);
                prior.malformed += 1;
                prior.lines.push(OutputLine::Passthrough(line.to_vec()));
            }
        }
    }
    prior
}

/// Combines freshly generated entries with the parts of an existing tagfile
/// that describe files this run did not regenerate.
pub struct IncrementalMerge {
    prior: PriorTagfile,
    regenerated: HashSet<String>,
}

impl IncrementalMerge {
    /// `regenerated` lists every file whose entries this run produced anew;
    /// paths are compared in normalized form.
    pub fn new<I: IntoIterator<Item = String>>(
        prior: PriorTagfile,
        regenerated: I,
    ) -> IncrementalMerge {
        IncrementalMerge {
            prior,
            regenerated: regenerated
                .into_iter()
                .map(|file| normalize_path(&file))
                .collect(),
        }
    }

    pub fn is_regenerated(&self, file: &str) -> bool {
        self.regenerated.contains(&normalize_path(file))
    }

    /// Entries of regenerated files are dropped from the prior tagfile, the
    /// remaining prior lines are kept in their original order, and the fresh
    /// lines follow.  Returns the merged set and the number of prior lines
    /// retained.
    pub fn merge(self, fresh: TagSet) -> (TagSet, usize) {
        let mut merged = TagSet::new();
        let mut dropped = 0;
        for line in self.prior.lines.iter() {
            if let OutputLine::Entry(entry) = line {
                if self.is_regenerated(&entry.file) {
                    dropped += 1;
                    continue;
                }
            }
            merged.insert_line(line.clone());
        }
        let retained = merged.len();
        debug!(
            "Incremental merge: retained {} prior lines, replaced {}",
            retained, dropped
        );
        for line in fresh.lines {
            merged.insert_line(line);
        }
        (merged, retained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_format::tagfile::Locator;

    fn tag(name: &str, file: &str, line: u32) -> TagEntry {
        TagEntry::new(name, file, Locator::Line(line), "function-def")
    }

    fn names(set: &TagSet) -> Vec<String> {
        set.lines()
            .iter()
            .map(|line| match line {
                OutputLine::Entry(entry) => format!("{}@{}:{}", entry.name, entry.file, entry.locator),
                OutputLine::Passthrough(text) => String::from_utf8_lossy(text).into_owned(),
            })
            .collect()
    }

    #[test]
    fn first_insert_wins() {
        let mut set = TagSet::new();
        assert!(set.insert(tag("f", "a.cpp", 1)));
        let mut variant = tag("f", "a.cpp", 1);
        variant.kind = Some(ustr::ustr("method"));
        assert!(!set.insert(variant));
        assert!(set.insert(tag("f", "a.cpp", 2)));
        assert!(set.insert(tag("f", "b.cpp", 1)));
        assert_eq!(set.len(), 3);
        assert_eq!(set.entries().next().and_then(|e| e.kind()), Some("function-def"));
    }

    #[test]
    fn unusable_names_are_rejected() {
        let mut set = TagSet::new();
        assert!(!set.insert(tag("", "a.cpp", 1)));
        assert!(!set.insert(tag("a\tb", "a.cpp", 1)));
        assert!(!set.insert(tag("a\nb", "a.cpp", 1)));
        assert!(set.is_empty());
    }

    #[test]
    fn sort_is_bytewise_by_name_file_locator() {
        let mut set = TagSet::new();
        set.insert(tag("b", "a.cpp", 1));
        set.insert(tag("a", "z.cpp", 1));
        set.insert(tag("a", "b.cpp", 9));
        set.insert(TagEntry::new("a", "b.cpp", Locator::Pattern("^x$".to_string()), "var-decl"));
        set.insert(tag("a", "b.cpp", 3));
        set.insert(tag("B", "a.cpp", 1));
        set.insert(tag("_a", "a.cpp", 1));
        set.insert_passthrough("a\tb.cpp\tgarbage");
        set.sort();
        assert_eq!(
            names(&set),
            vec![
                "B@a.cpp:1",
                "_a@a.cpp:1",
                "a@b.cpp:3",
                "a@b.cpp:9",
                "a@b.cpp:/^x$/",
                "a\tb.cpp\tgarbage",
                "a@z.cpp:1",
                "b@a.cpp:1",
            ]
        );
    }

    #[test]
    fn incremental_merge_replaces_regenerated_files() {
        let prior = parse_tagfile(
            "!_TAG_FILE_SORTED\t1\t/0=unsorted/\n\
             old_a\ta.cpp\t1;\"\tfunction-def\n\
             keep_b\tb.cpp\t2;\"\tfunction-def\n\
             this line is not a tag\n\
             old_h\t./inc/../a.h\t3;\"\tfunction-def\n"
                .as_bytes(),
            "tags",
        );
        assert_eq!(prior.malformed, 1);
        assert_eq!(prior.lines.len(), 4);

        let mut fresh = TagSet::new();
        fresh.insert(tag("new_a", "a.cpp", 1));
        fresh.insert(tag("keep_b", "b.cpp", 2));

        let merge = IncrementalMerge::new(prior, vec!["a.cpp".to_string(), "a.h".to_string()]);
        let (merged, retained) = merge.merge(fresh);
        assert_eq!(retained, 2);
        assert_eq!(
            names(&merged),
            vec!["keep_b@b.cpp:2", "this line is not a tag", "new_a@a.cpp:1"]
        );
    }

    #[test]
    fn missing_tagfile_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags");
        let prior = read_tagfile(path.to_str().unwrap()).unwrap();
        assert!(prior.lines.is_empty());

        let err = read_tagfile(dir.path().to_str().unwrap());
        assert!(matches!(err, Err(TagsError::Io { .. })));
    }
}
