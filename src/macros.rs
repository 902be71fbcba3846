//! Preprocessor macro definitions.
//!
//! The declaration tree never contains macros, so they come from a separate
//! extractor and are folded into the tag set after all translation units have
//! been indexed.

use std::fs;
use std::process::Command;

use regex::Regex;

use crate::classify::TagKind;
use crate::config::{CompileOptions, MacroExtractorKind, Settings};
use crate::errors::MacroExtractorError;
use crate::file_format::merger::TagSet;
use crate::file_format::tagfile::{parse_tag_line_bytes, Locator, TagEntry, TagLine};
use crate::pattern::SourceText;

/// A macro definition as reported by an extractor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMacroEntry {
    pub name: String,
    pub file: String,
    pub locator: Locator,
}

impl RawMacroEntry {
    pub fn to_tag(&self) -> TagEntry {
        TagEntry::new(&self.name, &self.file, self.locator.clone(), TagKind::Macro.code())
    }
}

pub trait MacroExtractor: Send + Sync {
    fn name(&self) -> &str;
    /// Every macro defined in `file` itself (not in the files it includes).
    fn extract(
        &self,
        file: &str,
        options: &CompileOptions,
    ) -> Result<Vec<RawMacroEntry>, MacroExtractorError>;
}

lazy_static! {
    static ref DEFINE_RE: Regex = Regex::new(r"^\s*#\s*define\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

/// Finds `#define` lines by scanning the source text.
#[derive(Clone, Debug, Default)]
pub struct BuiltinMacroExtractor;

impl BuiltinMacroExtractor {
    pub fn extract_from_text(&self, file: &str, text: &str) -> Vec<RawMacroEntry> {
        self.extract_from_bytes(file, text.as_bytes())
    }

    /// Lines in other encodings are still searched; their macros get line
    /// number locators.
    pub fn extract_from_bytes(&self, file: &str, bytes: &[u8]) -> Vec<RawMacroEntry> {
        let source = SourceText::from_bytes(bytes);
        bytes
            .split(|&b| b == b'\n')
            .enumerate()
            .filter_map(|(i, line)| {
                let line = String::from_utf8_lossy(line);
                let name = DEFINE_RE.captures(&line)?.get(1)?.as_str();
                let lineno = (i + 1) as u32;
                Some(RawMacroEntry {
                    name: name.to_string(),
                    file: file.to_string(),
                    locator: source.locator(lineno),
                })
            })
            .collect()
    }
}

impl MacroExtractor for BuiltinMacroExtractor {
    fn name(&self) -> &str {
        "builtin"
    }

    fn extract(
        &self,
        file: &str,
        _options: &CompileOptions,
    ) -> Result<Vec<RawMacroEntry>, MacroExtractorError> {
        let bytes = fs::read(file).map_err(|source| MacroExtractorError::Read {
            path: file.to_string(),
            source,
        })?;
        Ok(self.extract_from_bytes(file, &bytes))
    }
}

/// Runs an external ctags restricted to macro definitions and reads its
/// output as a tagfile.
#[derive(Clone, Debug)]
pub struct CtagsMacroExtractor {
    program: String,
}

impl CtagsMacroExtractor {
    pub fn new(program: &str) -> CtagsMacroExtractor {
        CtagsMacroExtractor {
            program: program.to_string(),
        }
    }

    fn command(&self, file: &str, options: &CompileOptions) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--language-force=C++")
            .arg("--c++-kinds=d")
            .arg("--fields=+n")
            .arg("--sort=no");
        for (name, value) in options.macro_definitions() {
            command.arg("-D").arg(format!("{}={}", name, value));
        }
        command.arg("-o").arg("-").arg(file);
        command
    }
}

/// Macro entries from ctags output for `file`.  ctags reports macros with
/// kind `d` (or `macro` in long form); anything else is ignored.  A pattern
/// copied from a line that is not valid UTF-8 is replaced by the entry's
/// `line:` field.
pub fn parse_ctags_output(output: &[u8], file: &str) -> Vec<RawMacroEntry> {
    output
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let entry = match parse_tag_line_bytes(line) {
                Ok(TagLine::Entry(entry)) => entry,
                Ok(TagLine::Header(_)) => return None,
                Err(reason) => {
                    let line = String::from_utf8_lossy(line);
                    debug!("Ignoring ctags output line {:?}: {}", line, reason);
                    return None;
                }
            };
            if !matches!(entry.kind(), Some("d") | Some("macro")) {
                return None;
            }
            let locator = if std::str::from_utf8(line).is_ok() {
                entry.locator.clone()
            } else {
                Locator::Line(entry.field("line")?.parse().ok()?)
            };
            Some(RawMacroEntry {
                name: entry.name,
                file: file.to_string(),
                locator,
            })
        })
        .collect()
}

impl MacroExtractor for CtagsMacroExtractor {
    fn name(&self) -> &str {
        &self.program
    }

    fn extract(
        &self,
        file: &str,
        options: &CompileOptions,
    ) -> Result<Vec<RawMacroEntry>, MacroExtractorError> {
        let output = self
            .command(file, options)
            .output()
            .map_err(|source| MacroExtractorError::Unavailable {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MacroExtractorError::Failed {
                path: file.to_string(),
                status: output.status.to_string(),
            });
        }
        Ok(parse_ctags_output(&output.stdout, file))
    }
}

/// The extractor selected by `settings`, or none if macros are disabled.
pub fn extractor_for(settings: &Settings) -> Option<Box<dyn MacroExtractor>> {
    if !settings.macros {
        return None;
    }
    Some(match settings.macro_extractor {
        MacroExtractorKind::Builtin => Box::new(BuiltinMacroExtractor),
        MacroExtractorKind::Ctags => Box::new(CtagsMacroExtractor::new(&settings.ctags_program)),
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MacroSummary {
    pub added: usize,
    pub failed_files: usize,
}

/// Run `extractor` over `files` and add the macros to `tags`.  A failure for
/// one file is logged and does not stop the others.  If the extractor cannot
/// be run at all, the remaining files are not tried.
pub fn fold_macros(
    tags: &mut TagSet,
    extractor: &dyn MacroExtractor,
    files: &[String],
    options: &CompileOptions,
) -> MacroSummary {
    let mut summary = MacroSummary::default();
    for (i, file) in files.iter().enumerate() {
        match extractor.extract(file, options) {
            Ok(macros) => {
                summary.added += tags.extend(macros.iter().map(RawMacroEntry::to_tag));
            }
            Err(e @ MacroExtractorError::Unavailable { .. }) => {
                warn!("{}; skipping macro definitions", e);
                summary.failed_files += files.len() - i;
                break;
            }
            Err(e) => {
                warn!("{}", e);
                summary.failed_files += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_finds_defines() {
        let text = "#ifndef UTIL_H\n\
                    #define UTIL_H\n\
                    #define MAX(a, b) ((a) > (b) ? (a) : (b))\n\
                    #  define  INDENTED 1\n\
                    // #define COMMENTED 1\n\
                    #define 9BAD\n\
                    #endif\n";
        let macros = BuiltinMacroExtractor.extract_from_text("util.h", text);
        let names: Vec<&str> = macros.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["UTIL_H", "MAX", "INDENTED"]);
        assert_eq!(
            macros[1].locator,
            Locator::Pattern("^#define MAX(a, b) ((a) > (b) ? (a) : (b))$".to_string())
        );
        assert_eq!(macros[1].to_tag().to_string(), format!("MAX\tutil.h\t{};\"\tmacro", macros[1].locator));
    }

    #[test]
    fn ctags_output_keeps_only_macros() {
        let output = "MAX\tutil.h\t/^#define MAX(a, b) (a)$/;\"\td\n\
                      helper\tutil.h\t/^int helper();$/;\"\tp\n\
                      LIMIT\tutil.h\t7;\"\tmacro\n";
        let macros = parse_ctags_output(output.as_bytes(), "src/util.h");
        assert_eq!(
            macros,
            vec![
                RawMacroEntry {
                    name: "MAX".to_string(),
                    file: "src/util.h".to_string(),
                    locator: Locator::Pattern("^#define MAX(a, b) (a)$".to_string()),
                },
                RawMacroEntry {
                    name: "LIMIT".to_string(),
                    file: "src/util.h".to_string(),
                    locator: Locator::Line(7),
                },
            ]
        );
    }

    #[test]
    fn latin1_macros_use_line_numbers() {
        let text = b"#define CAFE \"caf\xe9\"\n#define OK 1\n";
        let macros = BuiltinMacroExtractor.extract_from_bytes("l.h", text);
        assert_eq!(macros[0].name, "CAFE");
        assert_eq!(macros[0].locator, Locator::Line(1));
        assert_eq!(macros[1].locator, Locator::Pattern("^#define OK 1$".to_string()));

        let output = b"CAFE\tl.h\t/^#define CAFE \"caf\xe9\"$/;\"\td\tline:1\n\
                       NOLINE\tl.h\t/^#define NOLINE \xff$/;\"\td\n";
        let macros = parse_ctags_output(output, "l.h");
        assert_eq!(
            macros,
            vec![RawMacroEntry {
                name: "CAFE".to_string(),
                file: "l.h".to_string(),
                locator: Locator::Line(1),
            }]
        );
    }

    #[test]
    fn ctags_receives_defines() {
        let options = CompileOptions {
            defines: vec!["USE_A".to_string(), "LEVEL=2".to_string()],
            ..CompileOptions::default()
        };
        let command = CtagsMacroExtractor::new("ctags").command("a.h", &options);
        let args: Vec<String> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        let defines: Vec<&str> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| flag.as_str() == "-D")
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(defines, vec!["USE_A=1", "LEVEL=2"]);
        assert_eq!(args.last().map(|a| a.as_str()), Some("a.h"));
    }

    struct FailingExtractor;

    impl MacroExtractor for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }

        fn extract(
            &self,
            file: &str,
            _options: &CompileOptions,
        ) -> Result<Vec<RawMacroEntry>, MacroExtractorError> {
            if file == "bad.h" {
                return Err(MacroExtractorError::Failed {
                    path: file.to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
            Ok(vec![RawMacroEntry {
                name: "OK".to_string(),
                file: file.to_string(),
                locator: Locator::Line(1),
            }])
        }
    }

    #[test]
    fn one_failing_file_does_not_stop_the_rest() {
        let mut tags = TagSet::new();
        let files = vec!["bad.h".to_string(), "good.h".to_string()];
        let summary = fold_macros(&mut tags, &FailingExtractor, &files, &CompileOptions::default());
        assert_eq!(summary, MacroSummary { added: 1, failed_files: 1 });
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn missing_ctags_binary() {
        let extractor = CtagsMacroExtractor::new("/nonexistent/bin/ctags");
        let mut tags = TagSet::new();
        let files = vec!["a.h".to_string(), "b.h".to_string()];
        let summary = fold_macros(&mut tags, &extractor, &files, &CompileOptions::default());
        assert_eq!(summary, MacroSummary { added: 0, failed_files: 2 });
        assert!(tags.is_empty());
    }
}
