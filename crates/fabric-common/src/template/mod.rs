//! Template rendering for per-node configuration files
//!
//! Configuration files are rendered from minijinja templates with strict
//! undefined handling, so a missing variable fails the render instead of
//! silently producing an empty value in a config file.

mod engine;
mod error;

pub use engine::{MiniJinjaRenderer, TemplateRenderer};
pub use error::TemplateError;
