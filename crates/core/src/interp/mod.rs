//! Content-stream interpretation and rewriting.

pub mod interpreter;

pub use interpreter::{RewriteMode, RewriteOutcome, StreamRewriter};
