//! Serializes a tag set as a tagfile.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::errors::{Result, TagsError};
use crate::file_format::merger::{OutputLine, TagSet};
use crate::file_format::tagfile::header_lines;

/// Write the header and then every line of `tags` in their current order.
/// `sorted` only controls what the header claims; sorting is the caller's
/// business.
pub fn render_tagfile<W: Write>(tags: &TagSet, sorted: bool, mut out: W) -> io::Result<()> {
    for header in header_lines(sorted) {
        writeln!(out, "{}", header)?;
    }
    for line in tags.lines() {
        match line {
            OutputLine::Entry(entry) => entry.write_to(&mut out)?,
            OutputLine::Passthrough(bytes) => out.write_all(bytes)?,
        }
        out.write_all(b"\n")?;
    }
    out.flush()
}

pub fn render_to_string(tags: &TagSet, sorted: bool) -> String {
    let mut buffer = vec![];
    // Writing to a Vec cannot fail.
    let _ = render_tagfile(tags, sorted, &mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Write the tagfile to `destination`, or to standard output when there is
/// none.  Files are written to a temporary file in the same directory and
/// renamed into place, so readers never see a partial tagfile.
pub fn write_tagfile(tags: &TagSet, sorted: bool, destination: Option<&str>) -> Result<()> {
    let path = match destination {
        Some(path) => path,
        None => {
            let stdout = io::stdout();
            return render_tagfile(tags, sorted, BufWriter::new(stdout.lock()))
                .map_err(|e| TagsError::io("<stdout>", e));
        }
    };

    let dir = match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| TagsError::io(dir, e))?;
    render_tagfile(tags, sorted, BufWriter::new(temp.as_file_mut()))
        .map_err(|e| TagsError::io(temp.path(), e))?;

    // Temporary files are created private; give the tagfile the permissions
    // of the file it replaces, or the usual ones for a new file.
    match fs::metadata(path) {
        Ok(metadata) => fs::set_permissions(temp.path(), metadata.permissions())
            .map_err(|e| TagsError::io(temp.path(), e))?,
        Err(_) => set_default_permissions(temp.path()).map_err(|e| TagsError::io(temp.path(), e))?,
    }

    temp.persist(path).map_err(|e| TagsError::io(path, e.error))?;
    debug!("Wrote {} lines to {}", tags.len(), path);
    Ok(())
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_format::merger::{read_tagfile, IncrementalMerge};
    use crate::file_format::tagfile::{Locator, TagEntry};

    fn sample() -> TagSet {
        let mut tags = TagSet::new();
        tags.insert(TagEntry::new("main", "main.cpp", Locator::Pattern("^int main() {$".to_string()), "function-def"));
        tags.insert_passthrough("legacy line");
        tags
    }

    #[test]
    fn writes_header_then_lines() {
        let text = render_to_string(&sample(), false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), header_lines(false).len() + 2);
        assert!(lines[1].starts_with("!_TAG_FILE_SORTED\t0\t"));
        assert_eq!(lines[lines.len() - 2], "main\tmain.cpp\t/^int main() {$/;\"\tfunction-def");
        assert_eq!(lines[lines.len() - 1], "legacy line");
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags");
        fs::write(&path, "old contents\n").unwrap();
        let path = path.to_str().unwrap();

        write_tagfile(&sample(), true, Some(path)).unwrap();
        let written = fs::read_to_string(path).unwrap();
        assert_eq!(written, render_to_string(&sample(), true));

        // Nothing but the tagfile is left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn retained_lines_in_other_encodings_are_written_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags");
        let latin1 = b"greet\tb.cpp\t/^const char *s = \"caf\xe9\";$/;\"\tvar-decl".to_vec();
        let junk = b"note \xff hand edited".to_vec();
        let mut prior = vec![];
        for line in [&b"old\ta.cpp\t1;\"\tfunction-def"[..], &latin1[..], &junk[..]] {
            prior.extend_from_slice(line);
            prior.push(b'\n');
        }
        fs::write(&path, &prior).unwrap();
        let path = path.to_str().unwrap();

        let prior = read_tagfile(path).unwrap();
        assert_eq!(prior.malformed, 1);
        let (merged, retained) = IncrementalMerge::new(prior, vec!["a.cpp".to_string()]).merge(TagSet::new());
        assert_eq!(retained, 2);
        write_tagfile(&merged, false, Some(path)).unwrap();

        let written = fs::read(path).unwrap();
        let lines: Vec<&[u8]> = written.split(|&b| b == b'\n').collect();
        assert!(lines.contains(&&latin1[..]));
        assert!(lines.contains(&&junk[..]));
        assert!(!lines.iter().any(|line| line.starts_with(b"old\t")));
    }
}
