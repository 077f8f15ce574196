//! Command safety: tokenization, path normalization and validation.

pub mod commands;
pub mod normalize;
pub mod patterns;
pub mod tokenizer;
mod validator;

pub use commands::{CommandClass, TargetStrategy};
pub use normalize::{PathNormalizer, normalize_command};
pub use validator::{CommandValidator, Rejection, ValidationOutcome, ValidationResult};
