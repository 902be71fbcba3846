extern crate serde;
extern crate serde_json;

extern crate itertools;
#[macro_use]
extern crate lazy_static;
extern crate regex;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;

pub mod classify;
pub mod config;
pub mod decl_tree;
pub mod errors;
pub mod file_format;
pub mod file_utils;
pub mod front_end;
pub mod logging;
pub mod macros;
pub mod pattern;
pub mod pipeline;
pub mod walker;
pub mod writer;
