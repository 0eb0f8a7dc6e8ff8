//! Pipeline driver: document → schema table → type arena → operation
//! descriptors → request-builder tree → artifact set.
//!
//! Stages run strictly one after another. A fatal error stops the run at the
//! stage that found it and nothing is emitted.
use std::path::Path;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::bind::{MediaPreference, OperationBinder};
use crate::document::{LoadOptions, OpenApiDocument, PathItem};
use crate::emit::{ArtifactSet, Emitter};
use crate::error::{BindingError, Diagnostic, GenerateError};
use crate::path_de;
use crate::tree::RequestBuilderTree;
use crate::types::TypeArena;

// ————————————————————————————————————————————————————————————————————————————
// CONFIG
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Name of the root navigation unit.
    pub client_name: String,
    /// Glob patterns over declared path templates; empty keeps everything.
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    /// Preference order when an operation declares several media types.
    pub structured_media_types: Vec<String>,
    pub parallel: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            client_name: "ApiClient".to_string(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            structured_media_types: vec![
                "application/json".to_string(),
                "text/plain".to_string(),
                "application/x-www-form-urlencoded".to_string(),
                "multipart/form-data".to_string(),
            ],
            parallel: true,
        }
    }
}

impl GeneratorConfig {
    /// Read a JSON or YAML config file (by extension; JSON otherwise).
    pub fn load_file(path: &Path) -> Result<Self, GenerateError> {
        let config_error = |message: String| GenerateError::Config { path: path.to_path_buf(), message };
        let source = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let parsed = if is_yaml {
            path_de::from_yaml_with_path::<Self>(&source)
        } else {
            path_de::from_str_with_path::<Self>(&source)
        };
        parsed.map_err(|e| config_error(e.to_string()))
    }

    fn path_filter(&self) -> Result<PathFilter, GenerateError> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| GenerateError::InvalidPattern {
                        pattern: p.clone(),
                        message: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(PathFilter {
            include: compile(&self.include_paths)?,
            exclude: compile(&self.exclude_paths)?,
        })
    }
}

struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    fn keeps(&self, path: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(path));
        included && !self.exclude.iter().any(|p| p.matches(path))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RUN
// ————————————————————————————————————————————————————————————————————————————

/// Everything one run produced. Nothing here outlives the run's inputs.
#[derive(Debug, Clone)]
pub struct Generation {
    pub arena: TypeArena,
    pub tree: RequestBuilderTree,
    pub artifacts: ArtifactSet,
    pub binding_errors: Vec<BindingError>,
}

impl Generation {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.artifacts.diagnostics
    }

    pub fn has_binding_errors(&self) -> bool {
        !self.binding_errors.is_empty()
    }
}

pub fn generate(doc: &OpenApiDocument, config: &GeneratorConfig) -> Result<Generation, GenerateError> {
    let _span = tracing::info_span!("generate", origin = doc.origin()).entered();
    let filter = config.path_filter()?;

    let table = {
        let _span = tracing::info_span!("resolve").entered();
        crate::resolve::resolve(doc)?
    };
    let arena = {
        let _span = tracing::info_span!("synthesize").entered();
        crate::synth::synthesize(&table)
    };

    let paths: Vec<(&String, &PathItem)> = doc
        .spec()
        .paths
        .iter()
        .filter(|(path, _)| {
            let keep = filter.keeps(path);
            if !keep {
                tracing::debug!(path = %path, "path filtered out");
            }
            keep
        })
        .collect();

    let bound = {
        let _span = tracing::info_span!("bind").entered();
        let media = MediaPreference::new(config.structured_media_types.iter().cloned());
        OperationBinder::new(doc, &arena, &media).bind_paths(paths.iter().copied())
    };

    let tree = {
        let _span = tracing::info_span!("assemble").entered();
        crate::tree::assemble(paths.iter().map(|(path, _)| path.as_str()), bound.operations)?
    };

    let mut diagnostics = table.warnings.clone();
    diagnostics.extend(bound.errors.iter().map(Diagnostic::from));

    let artifacts = Emitter::new(&arena, config.client_name.clone())
        .parallel(config.parallel)
        .emit(doc, &tree, diagnostics);

    tracing::info!(
        models = artifacts.models.len(),
        operations = tree.operation_count(),
        binding_errors = bound.errors.len(),
        "generation finished"
    );
    Ok(Generation {
        arena,
        tree,
        artifacts,
        binding_errors: bound.errors,
    })
}

/// Load a document from disk and run [`generate`] on it.
pub fn generate_file(path: &Path, options: &LoadOptions, config: &GeneratorConfig) -> Result<Generation, GenerateError> {
    let doc = OpenApiDocument::from_path(path, options)?;
    generate(&doc, config)
}
