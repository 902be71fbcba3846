//! Front ends turn one translation unit into a declaration tree.

use crate::config::CompileOptions;
use crate::decl_tree::{DeclTree, SourceLocation};
use crate::errors::ParseError;

pub mod cpp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: SourceLocation,
    pub message: String,
}

/// A file the translation unit pulled in, the main file first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisitedFile {
    /// Normalized path.
    pub path: String,
    /// The bytes the front end parsed, if it kept them.  Locators are built
    /// from these instead of reading the file again.
    pub text: Option<Vec<u8>>,
}

pub struct TranslationUnit {
    pub path: String,
    pub tree: Box<dyn DeclTree + Send>,
    pub files: Vec<VisitedFile>,
    pub diagnostics: Vec<Diagnostic>,
}

impl TranslationUnit {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

pub trait FrontEnd: Send + Sync {
    /// Parse the translation unit rooted at `path`.  Recoverable problems are
    /// reported as diagnostics; an `Err` means no tree could be produced.
    fn parse(&self, path: &str, options: &CompileOptions) -> Result<TranslationUnit, ParseError>;
}
