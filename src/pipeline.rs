//! Drives a whole run: translation units are indexed concurrently, their
//! entries are reduced into one deduplicated tag set, macros and the prior
//! tagfile are folded in, and the result is written out.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use ustr::Ustr;

use crate::classify::{tag_entry, TagKind};
use crate::config::{CompileOptions, Settings};
use crate::errors::{ParseError, Result, TagsError};
use crate::file_format::merger::{read_tagfile, IncrementalMerge, TagSet};
use crate::file_format::tagfile::{Locator, TagEntry};
use crate::file_utils::{basename, is_under_any_root, normalize_path};
use crate::front_end::{FrontEnd, Severity, TranslationUnit};
use crate::macros::{extractor_for, fold_macros, MacroExtractor};
use crate::pattern::LineCache;
use crate::walker::{walk, WalkOptions};
use crate::writer::write_tagfile;

pub const EXIT_OK: i32 = 0;
pub const EXIT_PARSE_FAILURES: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

/// The per-file part of the settings, shared by all workers.
#[derive(Clone, Debug)]
pub struct IndexOptions {
    pub walk: WalkOptions,
    pub file_tags: bool,
    pub strict: bool,
}

impl IndexOptions {
    pub fn from_settings(settings: &Settings, compile: &CompileOptions) -> IndexOptions {
        IndexOptions {
            walk: WalkOptions {
                system_includes: compile.system_includes.clone(),
                include_system_includes: settings.include_system_includes,
            },
            file_tags: settings.file_tags,
            strict: settings.strict,
        }
    }
}

/// Everything one translation unit contributed.
#[derive(Debug)]
pub struct FileTags {
    pub input: String,
    /// Every file the translation unit visited, the input first.
    pub files: Vec<String>,
    pub entries: Vec<TagEntry>,
}

/// Turn a parsed translation unit into tag entries, in declaration order.
/// With file tags enabled, each file's `file` entry follows the first symbol
/// found in it.
pub fn tags_for_translation_unit(tu: TranslationUnit, options: &IndexOptions) -> FileTags {
    let mut lines = LineCache::new();
    for file in &tu.files {
        if let Some(text) = &file.text {
            lines.insert(ustr::ustr(&file.path), text);
        }
    }

    let mut entries = vec![];
    let mut files_with_symbols: HashSet<Ustr> = HashSet::new();
    for symbol in walk(&*tu.tree, &options.walk) {
        let locator = lines.locator(symbol.file, symbol.line);
        let entry = match tag_entry(&symbol, locator) {
            Some(entry) => entry,
            None => continue,
        };
        entries.push(entry);
        if options.file_tags && files_with_symbols.insert(symbol.file) {
            entries.push(file_tag(&symbol.file));
        }
    }

    FileTags {
        input: tu.path,
        files: tu.files.into_iter().map(|file| file.path).collect(),
        entries,
    }
}

fn file_tag(file: &str) -> TagEntry {
    TagEntry::new(basename(file), file, Locator::Line(1), TagKind::File.code())
}

/// Parse and index a single input file.
pub fn index_file(
    front_end: &dyn FrontEnd,
    input: &str,
    compile: &CompileOptions,
    options: &IndexOptions,
) -> std::result::Result<FileTags, ParseError> {
    let span = info_span!("index_file", input);
    let _entered = span.enter();

    let tu = front_end.parse(input, compile)?;
    for diagnostic in &tu.diagnostics {
        match diagnostic.severity {
            Severity::Warning => debug!("{}: {}", diagnostic.location, diagnostic.message),
            Severity::Error => warn!("{}: {}", diagnostic.location, diagnostic.message),
        }
    }
    if options.strict && tu.has_errors() {
        let errors = tu
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        return Err(ParseError::new(
            input,
            format!("{} error diagnostics, first at {}", errors, first_error_location(&tu)),
        ));
    }

    let tags = tags_for_translation_unit(tu, options);
    debug!("{} entries from {}", tags.entries.len(), input);
    Ok(tags)
}

fn first_error_location(tu: &TranslationUnit) -> String {
    tu.diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
        .map(|d| format!("{} ({})", d.location, d.message))
        .unwrap_or_default()
}

/// What happened during a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub inputs: usize,
    pub indexed: usize,
    pub failures: Vec<ParseError>,
    pub macro_failures: usize,
    /// Lines kept from the prior tagfile in incremental mode.
    pub retained: usize,
    pub written: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if !self.failures.is_empty() {
            EXIT_PARSE_FAILURES
        } else {
            EXIT_OK
        }
    }
}

/// Per-input results in input order; `None` for inputs that never ran.
pub type Outcomes = Vec<Option<std::result::Result<FileTags, ParseError>>>;

pub struct Indexer {
    settings: Settings,
    compile: Arc<CompileOptions>,
    options: Arc<IndexOptions>,
    front_end: Arc<dyn FrontEnd>,
    macro_extractor: Option<Arc<dyn MacroExtractor>>,
}

impl Indexer {
    /// Settings are expected to have been validated.
    pub fn new(settings: Settings, front_end: Arc<dyn FrontEnd>) -> Indexer {
        let compile = settings.compile_options();
        let options = IndexOptions::from_settings(&settings, &compile);
        let macro_extractor: Option<Arc<dyn MacroExtractor>> =
            extractor_for(&settings).map(Arc::from);
        Indexer {
            settings,
            compile: Arc::new(compile),
            options: Arc::new(options),
            front_end,
            macro_extractor,
        }
    }

    pub fn with_macro_extractor(mut self, extractor: Option<Arc<dyn MacroExtractor>>) -> Indexer {
        self.macro_extractor = extractor;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run until done, interrupted by Ctrl-C, or timed out.
    pub async fn run(&self) -> Result<RunSummary> {
        let timeout = self.settings.timeout_secs;
        self.run_until(async move {
            tokio::select! {
                _ = interrupted() => warn!("Interrupted"),
                _ = expired(timeout) => {
                    warn!("Timed out after {} seconds", timeout.unwrap_or_default());
                }
            }
        })
        .await
    }

    /// Run until done or until `cancel` completes, whichever comes first.
    ///
    /// On cancellation nothing is written unless partial flushing is enabled,
    /// in which case the completed translation units are written as if they
    /// were all there was.
    pub async fn run_until<F: Future<Output = ()>>(&self, cancel: F) -> Result<RunSummary> {
        let (outcomes, cancelled) = self.collect(cancel).await;
        if cancelled && !self.settings.flush_partial {
            return Err(TagsError::Cancelled);
        }

        let mut summary = RunSummary {
            inputs: self.settings.inputs.len(),
            cancelled,
            ..RunSummary::default()
        };
        let tags = self.reduce(outcomes, &mut summary)?;
        write_tagfile(&tags, self.settings.sort, self.settings.output.as_deref())?;
        summary.written = tags.len();
        info!(
            "Indexed {}/{} files, {} failed, wrote {} lines",
            summary.indexed,
            summary.inputs,
            summary.failures.len(),
            summary.written
        );
        Ok(summary)
    }

    /// Index every input with at most `jobs` translation units in flight.
    /// Returns per-input outcomes and whether `cancel` fired first.
    pub async fn collect<F: Future<Output = ()>>(&self, cancel: F) -> (Outcomes, bool) {
        let inputs = &self.settings.inputs;
        let semaphore = Arc::new(Semaphore::new(self.settings.job_count()));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for (index, input) in inputs.iter().enumerate() {
            let semaphore = semaphore.clone();
            let stop = stop.clone();
            let tx = tx.clone();
            let front_end = self.front_end.clone();
            let compile = self.compile.clone();
            let options = self.options.clone();
            let input = input.clone();
            tokio::spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                let worker_input = input.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    index_file(&*front_end, &worker_input, &compile, &options)
                })
                .await;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(e) => Err(ParseError::new(&input, format!("indexing task failed: {}", e))),
                };
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        let mut outcomes: Outcomes = inputs.iter().map(|_| None).collect();
        let mut cancelled = false;
        tokio::pin!(cancel);
        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some((index, outcome)) => outcomes[index] = Some(outcome),
                    None => break,
                },
                _ = &mut cancel => {
                    stop.store(true, Ordering::SeqCst);
                    semaphore.close();
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            let finished = outcomes.iter().filter(|o| o.is_some()).count();
            warn!("Cancelled with {} of {} files finished", finished, inputs.len());
        }
        (outcomes, cancelled)
    }

    /// Fold per-file outcomes in input order into the final tag set.
    pub fn reduce(&self, outcomes: Outcomes, summary: &mut RunSummary) -> Result<TagSet> {
        let mut fresh = TagSet::new();
        let mut regenerated: Vec<String> = vec![];
        let mut seen_files: HashSet<String> = HashSet::new();

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(file_tags) => {
                    summary.indexed += 1;
                    fresh.extend(file_tags.entries);
                    for file in file_tags.files {
                        if seen_files.insert(normalize_path(&file)) {
                            regenerated.push(file);
                        }
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    summary.failures.push(e);
                }
            }
        }

        if let Some(extractor) = &self.macro_extractor {
            let files: Vec<String> = regenerated
                .iter()
                .filter(|file| {
                    self.options.walk.include_system_includes
                        || !is_under_any_root(file, &self.options.walk.system_includes)
                })
                .cloned()
                .collect();
            let macros = fold_macros(&mut fresh, &**extractor, &files, &self.compile);
            debug!("Added {} macros using {}", macros.added, extractor.name());
            summary.macro_failures = macros.failed_files;
        }

        let mut tags = match &self.settings.update {
            Some(path) => {
                let prior = read_tagfile(path)?;
                let (merged, retained) = IncrementalMerge::new(prior, regenerated).merge(fresh);
                summary.retained = retained;
                merged
            }
            None => fresh,
        };
        if self.settings.sort {
            tags.sort();
        }
        Ok(tags)
    }
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handling available; never report an interrupt.
        std::future::pending::<()>().await;
    }
}

async fn expired(timeout: Option<u64>) {
    match timeout {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl_tree::{DeclArena, DeclKind, DeclTree, SourceLocation};
    use crate::front_end::{Diagnostic, VisitedFile};

    /// Serves a prebuilt tree for `a.cpp` and fails for anything else.
    struct OneFile;

    impl FrontEnd for OneFile {
        fn parse(&self, path: &str, _options: &CompileOptions) -> std::result::Result<TranslationUnit, ParseError> {
            if path != "a.cpp" {
                return Err(ParseError::new(path, "no such file"));
            }
            let mut arena = DeclArena::new();
            let root = arena.root();
            let class = arena.add(root, DeclKind::Class, "A", Some(SourceLocation::new("a.cpp", 1, 7)), true);
            arena.add(class, DeclKind::Method, "run", Some(SourceLocation::new("a.cpp", 2, 8)), false);
            arena.add(root, DeclKind::Function, "helper", Some(SourceLocation::new("a.h", 3, 6)), true);
            Ok(TranslationUnit {
                path: path.to_string(),
                tree: Box::new(arena),
                files: vec![
                    VisitedFile {
                        path: "a.cpp".to_string(),
                        text: Some(b"class A {\n  void run();\n};\n".to_vec()),
                    },
                    VisitedFile {
                        path: "a.h".to_string(),
                        text: Some(b"\n\nvoid helper() {}\n".to_vec()),
                    },
                ],
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    location: SourceLocation::new("a.cpp", 3, 1),
                    message: "expected ';'".to_string(),
                }],
            })
        }
    }

    fn options(file_tags: bool, strict: bool) -> IndexOptions {
        IndexOptions {
            walk: WalkOptions::default(),
            file_tags,
            strict,
        }
    }

    #[test]
    fn file_tags_follow_first_symbol_of_each_file() {
        let tags = index_file(&OneFile, "a.cpp", &CompileOptions::default(), &options(true, false)).unwrap();
        let lines: Vec<String> = tags.entries.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "A\ta.cpp\t/^class A {$/;\"\tclass-def",
                "a.cpp\ta.cpp\t1;\"\tfile",
                "run\ta.cpp\t/^  void run();$/;\"\tmethod\tclass:A",
                "helper\ta.h\t/^void helper() {}$/;\"\tfunction-def",
                "a.h\ta.h\t1;\"\tfile",
            ]
        );
        assert_eq!(tags.files, vec!["a.cpp".to_string(), "a.h".to_string()]);

        let tags = index_file(&OneFile, "a.cpp", &CompileOptions::default(), &options(false, false)).unwrap();
        assert_eq!(tags.entries.len(), 3);
    }

    #[test]
    fn strict_mode_rejects_error_diagnostics() {
        let err = index_file(&OneFile, "a.cpp", &CompileOptions::default(), &options(true, true)).unwrap_err();
        assert_eq!(err.path, "a.cpp");
        assert!(err.message.contains("a.cpp:3:1"));
    }

    #[test]
    fn exit_codes() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.exit_code(), EXIT_OK);
        summary.failures.push(ParseError::new("b.cpp", "boom"));
        assert_eq!(summary.exit_code(), EXIT_PARSE_FAILURES);
        summary.cancelled = true;
        assert_eq!(summary.exit_code(), EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let settings = Settings {
            inputs: vec!["missing.cpp".to_string(), "a.cpp".to_string()],
            jobs: Some(2),
            macros: false,
            ..Settings::default()
        };
        let indexer = Indexer::new(settings, Arc::new(OneFile));
        let (outcomes, cancelled) = indexer.collect(std::future::pending::<()>()).await;
        assert!(!cancelled);
        assert!(matches!(outcomes[0], Some(Err(_))));
        assert!(matches!(outcomes[1], Some(Ok(_))));

        let mut summary = RunSummary::default();
        let tags = indexer.reduce(outcomes, &mut summary).unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.failures.len(), 1);
        let names: Vec<&str> = tags.entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "a.cpp", "a.h", "helper", "run"]);
    }
}
