//! Loading an OpenAPI document and the typed view the pipeline walks.
//!
//! The raw tree is kept next to the typed view: schemas stay raw
//! (`serde_json::Value`, key order preserved) so the resolver can follow
//! `$ref` pointers into any part of the document.
use std::borrow::Cow;
use std::path::Path;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BindingErrorKind, DocumentParseError};
use crate::path_de;

/// Upper bound on `$ref` → `$ref` hops when dereferencing components.
const MAX_REF_HOPS: usize = 32;

// ————————————————————————————————————————————————————————————————————————————
// TYPED VIEW
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub paths: IndexMap<String, PathItem>,
    #[serde(default)]
    pub components: Components,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub url: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(default)]
    pub schemas: IndexMap<String, Value>,
    #[serde(default)]
    pub parameters: IndexMap<String, RefOr<Parameter>>,
    #[serde(default)]
    pub request_bodies: IndexMap<String, RefOr<RequestBody>>,
    #[serde(default)]
    pub responses: IndexMap<String, RefOr<Response>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathItem {
    #[serde(default)]
    pub parameters: Vec<RefOr<Parameter>>,
    pub get: Option<Operation>,
    pub put: Option<Operation>,
    pub post: Option<Operation>,
    pub delete: Option<Operation>,
    pub options: Option<Operation>,
    pub head: Option<Operation>,
    pub patch: Option<Operation>,
    pub trace: Option<Operation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub parameters: Vec<RefOr<Parameter>>,
    pub request_body: Option<RefOr<RequestBody>>,
    #[serde(default)]
    pub responses: IndexMap<String, RefOr<Response>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub deprecated: bool,
    pub description: Option<String>,
    pub schema: Option<Value>,
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    pub description: Option<String>,
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaType {
    pub schema: Option<Value>,
}

/// Either an inline component or a `$ref` to one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RefOr<T> {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Item(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Key of this method inside a path item.
    pub fn key(self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Put => "put",
            HttpMethod::Post => "post",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Patch => "patch",
            HttpMethod::Trace => "trace",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown HTTP method `{s}`"))
    }
}

impl PathItem {
    /// Operations in canonical OpenAPI method order.
    pub fn operations(&self) -> impl Iterator<Item = (HttpMethod, &Operation)> {
        [
            (HttpMethod::Get, &self.get),
            (HttpMethod::Put, &self.put),
            (HttpMethod::Post, &self.post),
            (HttpMethod::Delete, &self.delete),
            (HttpMethod::Options, &self.options),
            (HttpMethod::Head, &self.head),
            (HttpMethod::Patch, &self.patch),
            (HttpMethod::Trace, &self.trace),
        ]
        .into_iter()
        .filter_map(|(method, op)| op.as_ref().map(|op| (method, op)))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// POINTERS
// ————————————————————————————————————————————————————————————————————————————

pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// `join_pointer("#/paths", "/books")` → `#/paths/~1books`
pub fn join_pointer(base: &str, token: &str) -> String {
    format!("{base}/{}", escape_token(token))
}

/// A local `$ref` with URI percent-escapes decoded, so
/// `#/components/schemas/Foo%20Bar` names the same target as the pointer
/// built from the key `Foo Bar`. Invalid UTF-8 leaves the reference as is.
pub fn decode_reference(reference: &str) -> Cow<'_, str> {
    match percent_encoding::percent_decode_str(reference).decode_utf8() {
        Ok(decoded) => decoded,
        Err(_) => Cow::Borrowed(reference),
    }
}

/// Last token of a pointer, unescaped.
pub fn last_token(pointer: &str) -> String {
    let token = pointer.rsplit('/').next().unwrap_or(pointer);
    token.replace("~1", "/").replace("~0", "~")
}

fn content_sites(content: &IndexMap<String, MediaType>, base: &str, out: &mut Vec<String>) {
    for (media, entry) in content {
        if entry.schema.is_some() {
            out.push(join_pointer(&join_pointer(&join_pointer(base, "content"), media), "schema"));
        }
    }
}

impl Parameter {
    fn schema_sites(&self, base: &str, out: &mut Vec<String>) {
        if self.schema.is_some() {
            out.push(join_pointer(base, "schema"));
        }
        content_sites(&self.content, base, out);
    }
}

// ————————————————————————————————————————————————————————————————————————————
// DOCUMENT
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Yaml,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(SourceFormat::Json),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Some(SourceFormat::Yaml)
            }
            _ => None,
        }
    }
}

/// Pre-processing applied right after parsing.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// JSON Pointer selecting an embedded document (e.g. `/data/spec`).
    pub json_pointer: Option<String>,
    /// jq filter; its first output replaces the document.
    pub jq_expr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenApiDocument {
    origin: String,
    version: String,
    raw: Value,
    spec: Spec,
}

impl OpenApiDocument {
    pub fn from_path(path: &Path, options: &LoadOptions) -> Result<Self, DocumentParseError> {
        let source = std::fs::read_to_string(path).map_err(|source| DocumentParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.to_string_lossy().to_string();
        Self::parse_str(&source, SourceFormat::from_path(path), origin, options)
    }

    pub fn parse_str(
        source: &str,
        format: Option<SourceFormat>,
        origin: impl Into<String>,
        options: &LoadOptions,
    ) -> Result<Self, DocumentParseError> {
        let origin = origin.into();
        let json = |origin: &str| {
            serde_json::from_str::<Value>(source).map_err(|e| DocumentParseError::Json {
                origin: origin.to_string(),
                message: e.to_string(),
            })
        };
        let yaml = |origin: &str| {
            serde_yaml::from_str::<Value>(source).map_err(|e| DocumentParseError::Yaml {
                origin: origin.to_string(),
                message: e.to_string(),
            })
        };
        let mut raw = match format {
            Some(SourceFormat::Json) => json(&origin)?,
            Some(SourceFormat::Yaml) => yaml(&origin)?,
            None => match json(&origin) {
                Ok(value) => value,
                Err(error) => {
                    let trimmed = source.trim_start();
                    if trimmed.starts_with('{') || trimmed.starts_with('[') {
                        return Err(error);
                    }
                    yaml(&origin)?
                }
            },
        };

        if let Some(pointer) = options.json_pointer.as_deref() {
            raw = raw
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| DocumentParseError::PointerNotFound {
                    origin: origin.clone(),
                    pointer: pointer.to_string(),
                })?;
        }

        if let Some(jq_expr) = options.jq_expr.as_deref() {
            let outputs = crate::jq_exec::apply_filter(jq_expr, &raw).map_err(|e| {
                DocumentParseError::Filter {
                    origin: origin.clone(),
                    message: format!("{e:#}"),
                }
            })?;
            raw = outputs.into_iter().next().ok_or_else(|| DocumentParseError::Filter {
                origin: origin.clone(),
                message: "filter produced no output".to_string(),
            })?;
        }

        Self::from_value(raw, origin)
    }

    pub fn from_value(raw: Value, origin: impl Into<String>) -> Result<Self, DocumentParseError> {
        let origin = origin.into();
        if let Some(version) = raw.get("swagger") {
            return Err(DocumentParseError::UnsupportedVersion {
                origin,
                version: format!("swagger {}", version.as_str().unwrap_or("?")),
            });
        }
        let version = match raw.get("openapi") {
            Some(Value::String(v)) => v.clone(),
            Some(other) => other.to_string(),
            None => return Err(DocumentParseError::MissingVersion { origin }),
        };
        if !version.starts_with("3.") {
            return Err(DocumentParseError::UnsupportedVersion { origin, version });
        }
        let spec = path_de::from_value_with_path::<Spec>(&raw).map_err(|e| {
            DocumentParseError::Structure {
                origin: origin.clone(),
                location: e.path,
                message: e.message,
            }
        })?;
        tracing::debug!(%origin, paths = spec.paths.len(), schemas = spec.components.schemas.len(), "loaded document");
        Ok(Self { origin, version, raw, spec })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The declared `openapi` version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    /// Look up a local reference (`#/components/schemas/Doc`).
    pub fn lookup(&self, reference: &str) -> Option<&Value> {
        let fragment = reference.strip_prefix('#')?;
        if fragment.is_empty() {
            return Some(&self.raw);
        }
        self.raw
            .pointer(&decode_reference(fragment))
            .or_else(|| self.raw.pointer(fragment))
    }

    /// Follow a component `$ref` chain to the concrete item.
    ///
    /// Returns the item and the pointer it lives at, which is the base for
    /// the pointers of any schemas it holds.
    pub fn deref<'a, T>(
        &'a self,
        item: &'a RefOr<T>,
        location: String,
    ) -> Result<(Cow<'a, T>, String), BindingErrorKind>
    where
        T: DeserializeOwned + Clone,
    {
        let mut current = match item {
            RefOr::Item(inner) => return Ok((Cow::Borrowed(inner), location)),
            RefOr::Ref { reference } => reference.clone(),
        };
        for _ in 0..MAX_REF_HOPS {
            let value = self.lookup(&current).ok_or_else(|| BindingErrorKind::UnresolvedReference {
                reference: current.clone(),
            })?;
            if let Some(next) = value.get("$ref").and_then(Value::as_str) {
                current = next.to_string();
                continue;
            }
            let resolved = path_de::from_value_with_path::<T>(value).map_err(|e| {
                BindingErrorKind::MalformedComponent {
                    location: current.clone(),
                    message: e.to_string(),
                }
            })?;
            return Ok((Cow::Owned(resolved), current));
        }
        Err(BindingErrorKind::UnresolvedReference { reference: current })
    }

    /// Pointers of every inline schema position outside `components/schemas`,
    /// in document order.
    pub fn schema_sites(&self) -> Vec<String> {
        let mut out = Vec::new();
        let components = &self.spec.components;

        let base = "#/components/parameters";
        for (name, parameter) in &components.parameters {
            if let RefOr::Item(parameter) = parameter {
                parameter.schema_sites(&join_pointer(base, name), &mut out);
            }
        }
        let base = "#/components/requestBodies";
        for (name, body) in &components.request_bodies {
            if let RefOr::Item(body) = body {
                content_sites(&body.content, &join_pointer(base, name), &mut out);
            }
        }
        let base = "#/components/responses";
        for (name, response) in &components.responses {
            if let RefOr::Item(response) = response {
                content_sites(&response.content, &join_pointer(base, name), &mut out);
            }
        }

        for (path, item) in &self.spec.paths {
            let item_ptr = join_pointer("#/paths", path);
            for (i, parameter) in item.parameters.iter().enumerate() {
                if let RefOr::Item(parameter) = parameter {
                    let base = join_pointer(&join_pointer(&item_ptr, "parameters"), &i.to_string());
                    parameter.schema_sites(&base, &mut out);
                }
            }
            for (method, op) in item.operations() {
                let op_ptr = join_pointer(&item_ptr, method.key());
                for (i, parameter) in op.parameters.iter().enumerate() {
                    if let RefOr::Item(parameter) = parameter {
                        let base = join_pointer(&join_pointer(&op_ptr, "parameters"), &i.to_string());
                        parameter.schema_sites(&base, &mut out);
                    }
                }
                if let Some(RefOr::Item(body)) = &op.request_body {
                    content_sites(&body.content, &join_pointer(&op_ptr, "requestBody"), &mut out);
                }
                for (status, response) in &op.responses {
                    if let RefOr::Item(response) = response {
                        let base = join_pointer(&join_pointer(&op_ptr, "responses"), status);
                        content_sites(&response.content, &base, &mut out);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> OpenApiDocument {
        OpenApiDocument::from_value(value, "test.json").unwrap()
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        assert_eq!(join_pointer("#/paths", "/books/{id}"), "#/paths/~1books~1{id}");
        assert_eq!(escape_token("a~b"), "a~0b");
        assert_eq!(last_token("#/components/schemas/Doc"), "Doc");
        assert_eq!(last_token("#/paths/~1books"), "/books");
        assert_eq!(decode_reference("#/components/schemas/Foo%20Bar"), "#/components/schemas/Foo Bar");
        assert_eq!(decode_reference("#/a/%FF"), "#/a/%FF");
    }

    #[test]
    fn lookup_decodes_percent_escapes() {
        let doc = OpenApiDocument::from_value(
            json!({"openapi": "3.1.0", "components": {"schemas": {"Foo Bar": {"type": "string"}, "100%": {}}}}),
            "x",
        )
        .unwrap();
        assert_eq!(doc.lookup("#/components/schemas/Foo%20Bar"), Some(&json!({"type": "string"})));
        assert_eq!(doc.lookup("#/components/schemas/100%25"), Some(&json!({})));
        assert!(doc.lookup("#/components/schemas/Missing").is_none());
    }

    #[test]
    fn version_gate_rejects_swagger_and_missing_versions() {
        let err = OpenApiDocument::from_value(json!({"swagger": "2.0"}), "x").unwrap_err();
        assert!(matches!(err, DocumentParseError::UnsupportedVersion { .. }));
        let err = OpenApiDocument::from_value(json!({"paths": {}}), "x").unwrap_err();
        assert!(matches!(err, DocumentParseError::MissingVersion { .. }));
        let err = OpenApiDocument::from_value(json!({"openapi": "4.0.0"}), "x").unwrap_err();
        assert!(matches!(err, DocumentParseError::UnsupportedVersion { .. }));
    }

    #[test]
    fn structural_errors_name_the_location() {
        let err = OpenApiDocument::from_value(
            json!({"openapi": "3.0.3", "paths": {"/a": {"get": {"parameters": [{"name": 3}]}}}}),
            "x",
        )
        .unwrap_err();
        match err {
            DocumentParseError::Structure { location, .. } => {
                assert!(location.starts_with("paths./a.get.parameters[0]"), "{location}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_sources_fail_fast() {
        let opts = LoadOptions::default();
        let err = OpenApiDocument::parse_str("{\"openapi\": ", None, "x", &opts).unwrap_err();
        assert!(matches!(err, DocumentParseError::Json { .. }));
        let err = OpenApiDocument::parse_str("a: [b", Some(SourceFormat::Yaml), "x", &opts).unwrap_err();
        assert!(matches!(err, DocumentParseError::Yaml { .. }));
    }

    #[test]
    fn yaml_sources_are_accepted_and_keep_declaration_order() {
        let src = "openapi: 3.0.0\npaths:\n  /z: {}\n  /a: {}\n";
        let document = OpenApiDocument::parse_str(src, None, "x.yaml", &LoadOptions::default()).unwrap();
        let keys: Vec<_> = document.spec().paths.keys().cloned().collect();
        assert_eq!(keys, ["/z", "/a"]);
    }

    #[test]
    fn json_pointer_selects_embedded_document() {
        let src = r#"{"payload": {"spec": {"openapi": "3.1.0"}}}"#;
        let opts = LoadOptions { json_pointer: Some("/payload/spec".into()), jq_expr: None };
        let document = OpenApiDocument::parse_str(src, Some(SourceFormat::Json), "x", &opts).unwrap();
        assert_eq!(document.version(), "3.1.0");

        let opts = LoadOptions { json_pointer: Some("/nope".into()), jq_expr: None };
        let err = OpenApiDocument::parse_str(src, Some(SourceFormat::Json), "x", &opts).unwrap_err();
        assert!(matches!(err, DocumentParseError::PointerNotFound { .. }));
    }

    #[test]
    fn deref_follows_component_chains() {
        let document = doc(json!({
            "openapi": "3.0.0",
            "components": {"parameters": {
                "Alias": {"$ref": "#/components/parameters/Limit"},
                "Limit": {"name": "limit", "in": "query", "schema": {"type": "integer"}}
            }}
        }));
        let item: RefOr<Parameter> = RefOr::Ref { reference: "#/components/parameters/Alias".into() };
        let (parameter, at) = document.deref(&item, "#/paths/~1x/get/parameters/0".into()).unwrap();
        assert_eq!(parameter.name, "limit");
        assert_eq!(at, "#/components/parameters/Limit");

        let missing: RefOr<Parameter> = RefOr::Ref { reference: "#/components/parameters/Nope".into() };
        assert!(matches!(
            document.deref(&missing, String::new()),
            Err(BindingErrorKind::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn schema_sites_cover_parameters_bodies_and_responses() {
        let document = doc(json!({
            "openapi": "3.0.0",
            "paths": {"/books/{id}": {
                "parameters": [{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}],
                "post": {
                    "requestBody": {"content": {"application/json": {"schema": {}}}},
                    "responses": {"200": {"description": "ok", "content": {"application/json": {"schema": {}}}}}
                }
            }}
        }));
        assert_eq!(
            document.schema_sites(),
            [
                "#/paths/~1books~1{id}/parameters/0/schema",
                "#/paths/~1books~1{id}/post/requestBody/content/application~1json/schema",
                "#/paths/~1books~1{id}/post/responses/200/content/application~1json/schema",
            ]
        );
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("PATCH".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("fetch".parse::<HttpMethod>().is_err());
    }
}
