pub mod merger;
pub mod tagfile;
