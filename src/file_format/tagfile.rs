//! The extended ctags tagfile format.
//!
//! Each entry is one line:
//!
//! ```text
//! name<TAB>file<TAB>address;"<TAB>kind[<TAB>key:value]...
//! ```
//!
//! where the address is either a line number or a `/^...$/` search pattern.
//! Lines starting with `!_TAG_` are pseudo-tags carrying file metadata.

use std::fmt;
use std::io::{self, Write};

use ustr::{ustr, Ustr};

use crate::classify::KIND_TABLE_VERSION;

pub const PSEUDO_TAG_PREFIX: &str = "!_TAG_";
pub const PROGRAM_NAME: &str = "cpptags";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Locator {
    /// 1-based line number.
    Line(u32),
    /// Already escaped pattern text between the delimiters, anchors included.
    Pattern(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Locator::Line(line) => write!(formatter, "{}", line),
            Locator::Pattern(pattern) => write!(formatter, "/{}/", pattern),
        }
    }
}

/// Identity of an entry for deduplication purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TagKey {
    pub name: String,
    pub file: Ustr,
    pub locator: Locator,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagEntry {
    pub name: String,
    pub file: Ustr,
    pub locator: Locator,
    pub kind: Option<Ustr>,
    /// `key:value` extension fields in output order.
    pub fields: Vec<(String, String)>,
    /// The bytes of the line this entry was read from, if it came from an
    /// existing tagfile.  Retained entries are written back exactly as they
    /// were, even when the line is not valid UTF-8.
    verbatim: Option<Vec<u8>>,
}

impl TagEntry {
    pub fn new(name: &str, file: &str, locator: Locator, kind: &str) -> TagEntry {
        TagEntry {
            name: name.to_string(),
            file: ustr(file),
            locator,
            kind: Some(ustr(kind)),
            fields: vec![],
            verbatim: None,
        }
    }

    pub fn with_field(mut self, key: &str, value: &str) -> TagEntry {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    pub fn key(&self) -> TagKey {
        TagKey {
            name: self.name.clone(),
            file: self.file,
            locator: self.locator.clone(),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_ref().map(|kind| kind.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn verbatim(&self) -> Option<&[u8]> {
        self.verbatim.as_deref()
    }

    /// Write the entry without a line terminator.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        match &self.verbatim {
            Some(line) => out.write_all(line),
            None => write!(out, "{}", self),
        }
    }
}

impl fmt::Display for TagEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if let Some(line) = &self.verbatim {
            return formatter.write_str(&String::from_utf8_lossy(line));
        }
        write!(formatter, "{}\t{}\t{};\"", self.name, self.file, self.locator)?;
        if let Some(kind) = &self.kind {
            write!(formatter, "\t{}", kind)?;
        }
        for (key, value) in &self.fields {
            write!(formatter, "\t{}:{}", key, value)?;
        }
        Ok(())
    }
}

/// The pseudo-tag lines that open every tagfile we write.
pub fn header_lines(sorted: bool) -> Vec<String> {
    vec![
        "!_TAG_FILE_FORMAT\t2\t/extended format; --format=1 will not append ;\" to lines/".to_string(),
        format!(
            "!_TAG_FILE_SORTED\t{}\t/0=unsorted, 1=sorted, 2=foldcase/",
            if sorted { 1 } else { 0 }
        ),
        format!("!_TAG_KIND_TABLE_VERSION\t{}\t//", KIND_TABLE_VERSION),
        format!("!_TAG_PROGRAM_NAME\t{}\t//", PROGRAM_NAME),
        format!("!_TAG_PROGRAM_VERSION\t{}\t//", env!("CARGO_PKG_VERSION")),
    ]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagLine {
    /// A `!_TAG_` pseudo-tag.
    Header(String),
    Entry(TagEntry),
}

/// Why a line could not be read as a tag entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MalformedLine(pub &'static str);

impl fmt::Display for MalformedLine {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.0)
    }
}

/// Parse one tagfile line, which must not include its line terminator.
pub fn parse_tag_line(line: &str) -> Result<TagLine, MalformedLine> {
    if line.starts_with(PSEUDO_TAG_PREFIX) {
        return Ok(TagLine::Header(line.to_string()));
    }

    let (name, rest) = line.split_once('\t').ok_or(MalformedLine("missing file column"))?;
    if name.is_empty() {
        return Err(MalformedLine("empty tag name"));
    }
    let (file, rest) = rest.split_once('\t').ok_or(MalformedLine("missing address"))?;
    if file.is_empty() {
        return Err(MalformedLine("empty file name"));
    }
    let (locator, rest) = parse_address(rest)?;

    let mut kind = None;
    let mut fields = vec![];
    if !rest.is_empty() {
        let rest = rest
            .strip_prefix(";\"")
            .ok_or(MalformedLine("unexpected text after address"))?;
        if !rest.is_empty() {
            let rest = rest
                .strip_prefix('\t')
                .ok_or(MalformedLine("unexpected text after address"))?;
            for (i, field) in rest.split('\t').enumerate() {
                match field.split_once(':') {
                    Some(("kind", value)) => kind = Some(ustr(value)),
                    Some((key, value)) => fields.push((key.to_string(), value.to_string())),
                    None if i == 0 && !field.is_empty() => kind = Some(ustr(field)),
                    None => return Err(MalformedLine("extension field without a key")),
                }
            }
        }
    }

    Ok(TagLine::Entry(TagEntry {
        name: name.to_string(),
        file: ustr(file),
        locator,
        kind,
        fields,
        verbatim: Some(line.as_bytes().to_vec()),
    }))
}

/// Parse one raw tagfile line.  A line that is not valid UTF-8 is parsed from
/// its lossy decoding but keeps its original bytes for writing back.
pub fn parse_tag_line_bytes(line: &[u8]) -> Result<TagLine, MalformedLine> {
    if let Ok(text) = std::str::from_utf8(line) {
        return parse_tag_line(text);
    }
    let mut parsed = parse_tag_line(&String::from_utf8_lossy(line))?;
    if let TagLine::Entry(entry) = &mut parsed {
        entry.verbatim = Some(line.to_vec());
    }
    Ok(parsed)
}

/// Split the address off the front of `text`, returning what follows it.
fn parse_address(text: &str) -> Result<(Locator, &str), MalformedLine> {
    if let Some(body) = text.strip_prefix('/') {
        let mut escaped = false;
        for (i, c) in body.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '/' => return Ok((Locator::Pattern(body[..i].to_string()), &body[i + 1..])),
                _ => {}
            }
        }
        return Err(MalformedLine("unterminated search pattern"));
    }

    let digits = text.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(MalformedLine("unsupported address"));
    }
    let line = text[..digits]
        .parse()
        .map_err(|_| MalformedLine("line number out of range"))?;
    Ok((Locator::Line(line), &text[digits..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(line: &str) -> TagEntry {
        match parse_tag_line(line) {
            Ok(TagLine::Entry(entry)) => entry,
            other => panic!("expected an entry for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn renders_extended_format() {
        let tag = TagEntry::new("bar", "foo.h", Locator::Pattern("^  void bar();$".to_string()), "method")
            .with_field("class", "ns::Foo");
        assert_eq!(tag.to_string(), "bar\tfoo.h\t/^  void bar();$/;\"\tmethod\tclass:ns::Foo");

        let file_tag = TagEntry::new("foo.h", "src/foo.h", Locator::Line(1), "file");
        assert_eq!(file_tag.to_string(), "foo.h\tsrc/foo.h\t1;\"\tfile");
    }

    #[test]
    fn parses_what_it_renders() {
        let tag = TagEntry::new("path", "a.h", Locator::Pattern("^char *path = \"a\\/b\";$".to_string()), "var-decl")
            .with_field("namespace", "io");
        let parsed = entry(&tag.to_string());
        assert_eq!(parsed.key(), tag.key());
        assert_eq!(parsed.kind(), Some("var-decl"));
        assert_eq!(parsed.field("namespace"), Some("io"));
        assert_eq!(parsed.verbatim(), Some(tag.to_string().as_bytes()));
    }

    #[test]
    fn parses_foreign_ctags_output() {
        let parsed = entry("MAX\tutil.h\t/^#define MAX(/;\"\td\tfile:");
        assert_eq!(parsed.name, "MAX");
        assert_eq!(parsed.locator, Locator::Pattern("^#define MAX(".to_string()));
        assert_eq!(parsed.kind(), Some("d"));
        assert_eq!(parsed.field("file"), Some(""));

        let parsed = entry("main\tmain.c\t12;\"\tkind:function\tline:12");
        assert_eq!(parsed.locator, Locator::Line(12));
        assert_eq!(parsed.kind(), Some("function"));
        assert_eq!(parsed.field("line"), Some("12"));

        // Format 1 has no trailing `;"`.
        let parsed = entry("old\told.c\t/^int old;$/");
        assert_eq!(parsed.kind(), None);
        assert_eq!(parsed.to_string(), "old\told.c\t/^int old;$/");
    }

    #[test]
    fn headers_and_garbage() {
        assert_eq!(
            parse_tag_line("!_TAG_FILE_SORTED\t1\t/0=unsorted/"),
            Ok(TagLine::Header("!_TAG_FILE_SORTED\t1\t/0=unsorted/".to_string()))
        );
        assert!(parse_tag_line("no tabs at all").is_err());
        assert!(parse_tag_line("\tfile\t1").is_err());
        assert!(parse_tag_line("name\tfile\t/^unterminated").is_err());
        assert!(parse_tag_line("name\tfile\t?^backward$?").is_err());
        assert!(parse_tag_line("name\tfile\t12garbage").is_err());
    }

    #[test]
    fn latin1_lines_keep_their_bytes() {
        let line = b"greet\tb.cpp\t/^const char *s = \"caf\xe9\";$/;\"\tvar-decl";
        let parsed = match parse_tag_line_bytes(line) {
            Ok(TagLine::Entry(entry)) => entry,
            other => panic!("expected an entry, got {:?}", other),
        };
        assert_eq!(parsed.name, "greet");
        assert_eq!(parsed.file.as_str(), "b.cpp");
        assert_eq!(parsed.kind(), Some("var-decl"));
        assert_eq!(parsed.verbatim(), Some(&line[..]));

        let mut written = vec![];
        parsed.write_to(&mut written).unwrap();
        assert_eq!(written, line.to_vec());

        assert!(parse_tag_line_bytes(b"note \xff hand edited").is_err());
    }

    #[test]
    fn header_advertises_sorting_and_kind_table() {
        let sorted = header_lines(true);
        assert!(sorted[0].starts_with("!_TAG_FILE_FORMAT\t2\t"));
        assert!(sorted[1].starts_with("!_TAG_FILE_SORTED\t1\t"));
        assert_eq!(sorted[2], "!_TAG_KIND_TABLE_VERSION\t1\t//");
        assert!(header_lines(false)[1].starts_with("!_TAG_FILE_SORTED\t0\t"));
        assert!(sorted.iter().all(|line| line.starts_with(PSEUDO_TAG_PREFIX)));
    }
}
