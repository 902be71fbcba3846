use std::fs;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TagsError};
use crate::file_utils::normalize_path;

/// Which collaborator discovers preprocessor macro definitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MacroExtractorKind {
    /// Scan the source text for `#define` lines ourselves.
    Builtin,
    /// Shell out to an external `ctags` binary.
    Ctags,
}

impl Default for MacroExtractorKind {
    fn default() -> Self {
        MacroExtractorKind::Builtin
    }
}

/// Schema for the optional JSON settings file.  Every field has a default so a
/// settings file only needs to mention what it changes; command line flags are
/// applied on top of whatever was loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sort the output by tag name, file name and locator.
    pub sort: bool,
    /// Compilation flags without their leading dash, e.g. `std=c++14`.
    pub cxx_flags: Vec<String>,
    /// Preprocessor defines, e.g. `TRACE` or `MT_FLAG=1`.
    pub defines: Vec<String>,
    pub user_includes: Vec<String>,
    pub system_includes: Vec<String>,
    /// When false, symbols declared in files under `system_includes` are not
    /// emitted.
    pub include_system_includes: bool,
    /// Fold in macro definitions from the macro extractor.
    pub macros: bool,
    pub macro_extractor: MacroExtractorKind,
    /// Program invoked by the ctags macro extractor.
    pub ctags_program: String,
    /// Emit one `file` tag for every file that contributed a symbol.
    pub file_tags: bool,
    /// Treat front end error diagnostics as parse failures.
    pub strict: bool,
    /// Destination tagfile; standard output when absent.
    pub output: Option<String>,
    /// Existing tagfile to merge with; enables incremental mode.
    pub update: Option<String>,
    /// Number of translation units parsed concurrently; defaults to the CPU
    /// count.
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    /// On cancellation, write whatever was completed instead of leaving the
    /// output untouched.
    pub flush_partial: bool,
    pub inputs: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sort: true,
            cxx_flags: vec![],
            defines: vec![],
            user_includes: vec![],
            system_includes: vec![],
            include_system_includes: true,
            macros: true,
            macro_extractor: MacroExtractorKind::Builtin,
            ctags_program: "ctags".to_string(),
            file_tags: true,
            strict: false,
            output: None,
            update: None,
            jobs: None,
            timeout_secs: None,
            flush_partial: false,
            inputs: vec![],
        }
    }
}

impl Settings {
    /// Read a JSON settings file.  Any problem here is a configuration error.
    pub fn load(path: &str) -> Result<Settings> {
        let input = fs::read_to_string(path).map_err(|e| {
            TagsError::Config(format!("cannot read settings file '{}': {}", path, e))
        })?;
        serde_json::from_str(&input).map_err(|e| {
            TagsError::Config(format!("invalid settings file '{}': {}", path, e))
        })
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            flags: self.cxx_flags.clone(),
            defines: self.defines.clone(),
            user_includes: self.user_includes.iter().map(|d| normalize_path(d)).collect(),
            system_includes: self.system_includes.iter().map(|d| normalize_path(d)).collect(),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.unwrap_or_else(num_cpus::get)
    }

    /// Reject settings that cannot lead to a successful run.  This happens
    /// before any translation unit is touched so that a bad invocation never
    /// costs a full parse.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(TagsError::Config("no input files given".to_string()));
        }
        if self.jobs == Some(0) {
            return Err(TagsError::Config("job count must be at least 1".to_string()));
        }
        if self.timeout_secs == Some(0) {
            return Err(TagsError::Config("timeout must be at least 1 second".to_string()));
        }
        if self.macros
            && self.macro_extractor == MacroExtractorKind::Ctags
            && self.ctags_program.is_empty()
        {
            return Err(TagsError::Config("empty ctags program name".to_string()));
        }
        if let Some(output) = &self.output {
            let path = Path::new(output);
            if path.is_dir() {
                return Err(TagsError::Config(format!("output '{}' is a directory", output)));
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    return Err(TagsError::Config(format!(
                        "output directory '{}' does not exist",
                        parent.display()
                    )));
                }
            }
        }
        if let Some(update) = &self.update {
            if Path::new(update).is_dir() {
                return Err(TagsError::Config(format!("tagfile '{}' is a directory", update)));
            }
        }
        Ok(())
    }
}

/// What the front end and the macro extractor get to know about how a file is
/// compiled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub flags: Vec<String>,
    pub defines: Vec<String>,
    pub user_includes: Vec<String>,
    pub system_includes: Vec<String>,
}

impl CompileOptions {
    /// The `std=` flag, if one was given.
    pub fn language_standard(&self) -> Option<&str> {
        self.flags.iter().rev().find_map(|f| f.strip_prefix("std="))
    }

    /// The value of `__cplusplus` for the selected standard.  Without a
    /// `std=` flag this is C++17.
    pub fn cplusplus_value(&self) -> &'static str {
        let standard = self.language_standard().unwrap_or("c++17");
        let version = standard
            .strip_prefix("gnu++")
            .or_else(|| standard.strip_prefix("c++"))
            .unwrap_or("17");
        match version {
            "98" | "03" => "199711L",
            "11" | "0x" => "201103L",
            "14" | "1y" => "201402L",
            "20" | "2a" => "202002L",
            "23" | "2b" => "202302L",
            "26" | "2c" => "202400L",
            _ => "201703L",
        }
    }

    /// Flags the bundled front end has no use for; everything but `std=`.
    pub fn ignored_flags(&self) -> impl Iterator<Item = &String> {
        self.flags.iter().filter(|flag| !flag.starts_with("std="))
    }

    /// `(name, replacement)` for every define, using the `-D` conventions:
    /// `NAME` defines it as `1`, `NAME=` as empty.
    pub fn macro_definitions(&self) -> Vec<(String, String)> {
        self.defines
            .iter()
            .filter(|define| !define.is_empty())
            .map(|define| match define.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (define.to_string(), "1".to_string()),
            })
            .collect()
    }

    /// Include directories in search order.
    pub fn include_dirs(&self) -> impl Iterator<Item = &String> {
        self.user_includes.iter().chain(self.system_includes.iter())
    }
}
