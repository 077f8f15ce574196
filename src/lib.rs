//! nlfs - natural-language filesystem assistant
//!
//! Turns plain-English requests into shell commands, refuses anything that
//! could escape a fixed sandbox layout, and runs the rest inside a
//! container with the user's Desktop, Documents and Downloads mounted
//! read-only.
//!
//! - `safety`: tokenizer, path normalizer and command validator
//! - `sandbox`: container and local execution backends
//! - `generator`: HTTP command generators (Ollama, OpenAI-compatible)
//! - `pipeline`: generate, validate, approve, execute, record
//! - `oplog`: bounded JSONL operation history

pub mod concurrency;
pub mod config;
pub mod generator;
pub mod layout;
pub mod oplog;
pub mod paths;
pub mod pipeline;
pub mod safety;
pub mod sandbox;

pub use config::Config;
pub use pipeline::{Approval, Pipeline};
