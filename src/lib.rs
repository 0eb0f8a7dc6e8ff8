//! Typed OpenAPI client generation.
//!
//! A run is a strict pipeline over one document:
//! [`resolve`] → [`synth`] → [`bind`] → [`tree`] → [`emit`], driven by
//! [`generate::generate`]. [`client`] holds the runtime interfaces a
//! generated client is wired to.
pub mod bind;
pub mod cli;
pub mod client;
pub mod document;
pub mod emit;
pub mod error;
pub mod generate;
pub mod jq_exec;
pub mod path_de;
pub mod resolve;
pub mod synth;
pub mod tree;
pub mod types;
pub mod untyped;

pub use error::{BindingError, Diagnostic, DocumentParseError, DuplicatePathError, GenerateError};
pub use generate::{generate, GeneratorConfig, Generation};
pub use types::{TypeArena, TypeDescriptor};
