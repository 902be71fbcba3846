use std::process;
use std::sync::Arc;

use clap::Parser;
use itertools::Itertools;

#[macro_use]
extern crate tracing;

extern crate cpptags;
use cpptags::config::{MacroExtractorKind, Settings};
use cpptags::errors::{Result, TagsError};
use cpptags::front_end::cpp::TreeSitterFrontEnd;
use cpptags::logging::init_logging;
use cpptags::pipeline::{Indexer, EXIT_CANCELLED, EXIT_FATAL};

/// Generate an extended-format tagfile for C++ sources so that editors can
/// jump to definitions.
#[derive(Debug, Parser)]
#[clap(name = "cpptags", version, about)]
struct Cli {
    /// Do not sort the output; entries stay in generation order.
    #[clap(short = 'S', long, value_parser)]
    no_sort: bool,

    /// Compilation flag without its leading dash, e.g. `std=c++14`.
    #[clap(short = 'c', value_name = "FLAG", value_parser)]
    cxx_flags: Vec<String>,

    /// Preprocessor define, e.g. `TRACE` or `MT_FLAG=1`.
    #[clap(short = 'd', value_name = "DEFINE", value_parser)]
    defines: Vec<String>,

    /// User include directory.
    #[clap(short = 'I', value_name = "DIR", value_parser)]
    user_includes: Vec<String>,

    /// System include directory.
    #[clap(short = 'i', value_name = "DIR", value_parser)]
    system_includes: Vec<String>,

    /// Do not emit tags for declarations under the system include
    /// directories.
    #[clap(short = 'Y', long, value_parser)]
    no_include_system_includes: bool,

    /// Do not add tags for preprocessor macros.
    #[clap(short = 'C', long, value_parser)]
    no_macros: bool,

    /// How macro definitions are found.
    #[clap(long, value_enum)]
    macro_extractor: Option<MacroExtractorKind>,

    /// The ctags program used by the ctags macro extractor.
    #[clap(long = "ctags", value_name = "PATH", value_parser)]
    ctags_program: Option<String>,

    /// Do not emit a `file` tag for each file that contributed symbols.
    #[clap(long, value_parser)]
    no_file_tags: bool,

    /// Treat files with syntax errors as parse failures.
    #[clap(long, value_parser)]
    strict: bool,

    /// Output tagfile; standard output if absent, or the `--update` tagfile.
    #[clap(short = 'o', value_name = "FILE", value_parser)]
    output: Option<String>,

    /// Existing tagfile to update: entries for files that are not being
    /// regenerated are kept.
    #[clap(short = 'u', long, value_name = "TAGFILE", value_parser)]
    update: Option<String>,

    /// Number of files parsed concurrently.
    #[clap(short = 'j', long, value_parser)]
    jobs: Option<usize>,

    /// Give up after this many seconds.
    #[clap(long, value_name = "SECS", value_parser)]
    timeout: Option<u64>,

    /// When interrupted or timed out, write the files completed so far.
    #[clap(long, value_parser)]
    flush_partial: bool,

    /// JSON settings file; command line options are applied on top of it.
    #[clap(long, value_name = "SETTINGS", value_parser)]
    config: Option<String>,

    /// C++ translation units to index.
    #[clap(value_name = "FILE", value_parser)]
    inputs: Vec<String>,
}

impl Cli {
    fn into_settings(self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        if self.no_sort {
            settings.sort = false;
        }
        settings.cxx_flags.extend(self.cxx_flags);
        settings.defines.extend(self.defines);
        settings.user_includes.extend(self.user_includes);
        settings.system_includes.extend(self.system_includes);
        if self.no_include_system_includes {
            settings.include_system_includes = false;
        }
        if self.no_macros {
            settings.macros = false;
        }
        if let Some(extractor) = self.macro_extractor {
            settings.macro_extractor = extractor;
        }
        if let Some(program) = self.ctags_program {
            settings.ctags_program = program;
        }
        if self.no_file_tags {
            settings.file_tags = false;
        }
        if self.strict {
            settings.strict = true;
        }
        if self.update.is_some() {
            settings.update = self.update;
        }
        if self.output.is_some() {
            settings.output = self.output;
        }
        // Updating without an explicit output rewrites the tagfile in place.
        if settings.output.is_none() {
            settings.output = settings.update.clone();
        }
        if self.jobs.is_some() {
            settings.jobs = self.jobs;
        }
        if self.timeout.is_some() {
            settings.timeout_secs = self.timeout;
        }
        if self.flush_partial {
            settings.flush_partial = true;
        }
        settings.inputs.extend(self.inputs);

        settings.validate()?;
        Ok(settings)
    }
}

fn run(settings: Settings) -> i32 {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start the runtime: {}", e);
            return EXIT_FATAL;
        }
    };

    let options = settings.compile_options();
    let ignored = options.ignored_flags().join(" ");
    if !ignored.is_empty() {
        warn!("Ignoring compilation flags other than std=: {}", ignored);
    }

    let indexer = Indexer::new(settings, Arc::new(TreeSitterFrontEnd));
    let result = runtime.block_on(indexer.run());
    // Parses still running after a cancellation are abandoned.
    runtime.shutdown_background();

    match result {
        Ok(summary) => {
            if !summary.failures.is_empty() {
                let failed = summary.failures.len();
                error!("{} of {} files could not be indexed", failed, summary.inputs);
            }
            summary.exit_code()
        }
        Err(TagsError::Cancelled) => {
            error!("Cancelled; the output was not written");
            EXIT_CANCELLED
        }
        Err(e) => {
            error!("{}", e);
            EXIT_FATAL
        }
    }
}

fn main() {
    init_logging();

    let code = match Cli::parse().into_settings() {
        Ok(settings) => run(settings),
        Err(e) => {
            error!("{}", e);
            EXIT_FATAL
        }
    };
    process::exit(code);
}
