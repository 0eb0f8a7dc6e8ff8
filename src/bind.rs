//! Operation binding: one [`OperationDescriptor`] per (path, method).
//!
//! Binding failures are per-operation. A bad operation is reported and left
//! out; the rest of the API surface still binds.
use std::borrow::Cow;
use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::document::{join_pointer, HttpMethod, MediaType, OpenApiDocument, Operation, Parameter, PathItem, RefOr};
use crate::error::{BindingError, BindingErrorKind};
use crate::resolve::SchemaRef;
use crate::types::{TypeArena, TypeDescriptor};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParameterLocation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            "cookie" => Some(ParameterLocation::Cookie),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Query => "query",
            ParameterLocation::Header => "header",
            ParameterLocation::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBinding {
    pub name: String,
    pub location: ParameterLocation,
    pub ty: TypeDescriptor,
    pub required: bool,
    pub deprecated: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodyBinding {
    pub media_type: Option<String>,
    pub ty: TypeDescriptor,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBinding {
    pub status: String,
    pub media_type: Option<String>,
    /// `None` when the response declares no body at all.
    pub ty: Option<TypeDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Path template as declared, e.g. `/authors/{olid}`.
    pub path: String,
    pub method: HttpMethod,
    /// Location in the document, e.g. `#/paths/~1authors~1{olid}/get`.
    pub pointer: String,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
    /// Declaration order; path-level parameters first.
    pub parameters: Vec<ParameterBinding>,
    pub request_body: Option<RequestBodyBinding>,
    pub responses: IndexMap<String, ResponseBinding>,
    primary_status: Option<String>,
}

impl OperationDescriptor {
    /// The response that defines the return type: `200`, else `201`, else
    /// the first declared 2xx.
    pub fn primary_response(&self) -> Option<&ResponseBinding> {
        self.primary_status.as_ref().and_then(|s| self.responses.get(s))
    }

    pub fn primary_type(&self) -> Option<&TypeDescriptor> {
        self.primary_response().and_then(|r| r.ty.as_ref())
    }

    pub fn parameter(&self, name: &str, location: ParameterLocation) -> Option<&ParameterBinding> {
        self.parameters
            .iter()
            .find(|p| p.name == name && p.location == location)
    }

    pub fn parameters_in(&self, location: ParameterLocation) -> impl Iterator<Item = &ParameterBinding> {
        self.parameters.iter().filter(move |p| p.location == location)
    }
}

fn primary_status<'a>(statuses: impl Iterator<Item = &'a String> + Clone) -> Option<String> {
    for preferred in ["200", "201"] {
        if statuses.clone().any(|s| s == preferred) {
            return Some(preferred.to_string());
        }
    }
    statuses.into_iter().find(|s| s.starts_with('2')).cloned()
}

// ————————————————————————————————————————————————————————————————————————————
// MEDIA TYPES
// ————————————————————————————————————————————————————————————————————————————

/// Preference order for picking one content entry out of several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPreference {
    preferred: Vec<String>,
}

impl MediaPreference {
    pub fn new<I, S>(preferred: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            preferred: preferred.into_iter().map(|s| s.into().to_ascii_lowercase()).collect(),
        }
    }

    /// Best declared entry; the first one when nothing preferred is present.
    pub fn select<'c>(&self, content: &'c IndexMap<String, MediaType>) -> Option<(&'c String, &'c MediaType)> {
        for preferred in &self.preferred {
            if let Some(hit) = content.iter().find(|(declared, _)| media_matches(declared, preferred)) {
                return Some(hit);
            }
        }
        content.iter().next()
    }
}

impl Default for MediaPreference {
    fn default() -> Self {
        Self::new([
            "application/json",
            "text/plain",
            "application/x-www-form-urlencoded",
            "multipart/form-data",
        ])
    }
}

fn media_matches(declared: &str, preferred: &str) -> bool {
    let essence = declared.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    essence == preferred || (preferred == "application/json" && essence.ends_with("+json"))
}

// ————————————————————————————————————————————————————————————————————————————
// BINDER
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default)]
pub struct Bound {
    pub operations: Vec<OperationDescriptor>,
    pub errors: Vec<BindingError>,
}

pub struct OperationBinder<'a> {
    doc: &'a OpenApiDocument,
    arena: &'a TypeArena,
    media: &'a MediaPreference,
}

impl<'a> OperationBinder<'a> {
    pub fn new(doc: &'a OpenApiDocument, arena: &'a TypeArena, media: &'a MediaPreference) -> Self {
        Self { doc, arena, media }
    }

    pub fn bind_paths<'p, I>(&self, paths: I) -> Bound
    where
        I: IntoIterator<Item = (&'p String, &'p PathItem)>,
    {
        let mut bound = Bound::default();
        for (path, item) in paths {
            for (method, op) in item.operations() {
                match self.bind_operation(path, item, method, op) {
                    Ok(descriptor) => {
                        tracing::debug!(%method, path = %path, params = descriptor.parameters.len(), "bound operation");
                        bound.operations.push(descriptor);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "operation excluded");
                        bound.errors.push(error);
                    }
                }
            }
        }
        bound
    }

    pub fn bind_operation(
        &self,
        path: &str,
        item: &PathItem,
        method: HttpMethod,
        op: &Operation,
    ) -> Result<OperationDescriptor, BindingError> {
        let item_ptr = join_pointer("#/paths", path);
        let op_ptr = join_pointer(&item_ptr, method.key());
        let fail = |kind: BindingErrorKind| BindingError { pointer: op_ptr.clone(), kind };

        // 1) parameters: path level, then operation level overriding in place
        let mut parameters: Vec<ParameterBinding> = Vec::new();
        let levels = [
            ("path item", join_pointer(&item_ptr, "parameters"), &item.parameters),
            ("operation", join_pointer(&op_ptr, "parameters"), &op.parameters),
        ];
        for (level, base, declared) in levels {
            let mut seen = HashSet::new();
            for (i, parameter) in declared.iter().enumerate() {
                let binding = self.bind_parameter(parameter, join_pointer(&base, &i.to_string()))
                    .map_err(&fail)?;
                if !seen.insert((binding.name.clone(), binding.location)) {
                    return Err(fail(BindingErrorKind::DuplicateParameter {
                        name: binding.name,
                        location: level.to_string(),
                    }));
                }
                let existing = parameters
                    .iter()
                    .position(|p| p.name == binding.name && p.location == binding.location);
                match existing {
                    Some(index) => parameters[index] = binding,
                    None => parameters.push(binding),
                }
            }
        }

        // 2) path parameters against template placeholders
        let placeholders = crate::tree::placeholders(path);
        for parameter in parameters.iter().filter(|p| p.location == ParameterLocation::Path) {
            if !placeholders.iter().any(|name| name == &parameter.name) {
                return Err(fail(BindingErrorKind::UnmatchedPathParameter {
                    name: parameter.name.clone(),
                }));
            }
        }
        for name in &placeholders {
            if !parameters.iter().any(|p| p.location == ParameterLocation::Path && &p.name == name) {
                return Err(fail(BindingErrorKind::UndeclaredPlaceholder { name: name.clone() }));
            }
        }

        // 3) request body
        let request_body = match &op.request_body {
            None => None,
            Some(body) => {
                let (body, at) = self.doc.deref(body, join_pointer(&op_ptr, "requestBody")).map_err(&fail)?;
                let (media_type, ty) = self.content_type(&body.content, &at);
                Some(RequestBodyBinding {
                    media_type,
                    ty: ty.unwrap_or(TypeDescriptor::Untyped),
                    required: body.required,
                })
            }
        };

        // 4) responses
        let mut responses = IndexMap::new();
        let responses_ptr = join_pointer(&op_ptr, "responses");
        for (status, response) in &op.responses {
            let (response, at) = self.doc.deref(response, join_pointer(&responses_ptr, status)).map_err(&fail)?;
            let (media_type, ty) = self.content_type(&response.content, &at);
            responses.insert(status.clone(), ResponseBinding { status: status.clone(), media_type, ty });
        }
        let primary_status = primary_status(responses.keys());

        Ok(OperationDescriptor {
            path: path.to_string(),
            method,
            pointer: op_ptr.clone(),
            operation_id: op.operation_id.clone(),
            summary: op.summary.clone(),
            tags: op.tags.clone(),
            deprecated: op.deprecated,
            parameters,
            request_body,
            responses,
            primary_status,
        })
    }

    fn bind_parameter(&self, parameter: &RefOr<Parameter>, at: String) -> Result<ParameterBinding, BindingErrorKind> {
        let (parameter, at): (Cow<'_, Parameter>, String) = self.doc.deref(parameter, at)?;
        let location = ParameterLocation::parse(&parameter.location).ok_or_else(|| {
            BindingErrorKind::UnknownLocation {
                name: parameter.name.clone(),
                location: parameter.location.clone(),
            }
        })?;
        let ty = if parameter.schema.is_some() {
            self.site(&join_pointer(&at, "schema"))
        } else {
            self.content_type(&parameter.content, &at).1.unwrap_or(TypeDescriptor::Untyped)
        };
        Ok(ParameterBinding {
            name: parameter.name.clone(),
            location,
            ty,
            required: parameter.required || location == ParameterLocation::Path,
            deprecated: parameter.deprecated,
            description: parameter.description.clone(),
        })
    }

    /// Media type and body type of a content map. `(None, None)` when the map
    /// is empty; a chosen entry without `schema` is untyped.
    fn content_type(&self, content: &IndexMap<String, MediaType>, at: &str) -> (Option<String>, Option<TypeDescriptor>) {
        match self.media.select(content) {
            None => (None, None),
            Some((media, entry)) => {
                let ty = match entry.schema {
                    Some(_) => {
                        let pointer = join_pointer(&join_pointer(&join_pointer(at, "content"), media), "schema");
                        self.site(&pointer)
                    }
                    None => TypeDescriptor::Untyped,
                };
                (Some(media.clone()), Some(ty))
            }
        }
    }

    fn site(&self, pointer: &str) -> TypeDescriptor {
        let reference = SchemaRef::new(self.doc.origin(), pointer);
        match self.arena.site(&reference) {
            Some(ty) => ty.clone(),
            None => {
                tracing::debug!(pointer, "schema position not collected, treating as untyped");
                TypeDescriptor::Untyped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveKind;
    use serde_json::{json, Value};

    fn bind(value: Value) -> (Bound, TypeArena) {
        let doc = OpenApiDocument::from_value(value, "test.json").unwrap();
        let table = crate::resolve::resolve(&doc).unwrap();
        let arena = crate::synth::synthesize(&table);
        let media = MediaPreference::default();
        let bound = OperationBinder::new(&doc, &arena, &media).bind_paths(&doc.spec().paths);
        (bound, arena)
    }

    fn ok(status: &str) -> Value {
        json!({status: {"description": "ok"}})
    }

    #[test]
    fn parameters_keep_declaration_order_and_override_in_place() {
        let (bound, _) = bind(json!({
            "openapi": "3.0.0",
            "paths": {"/authors/{olid}/works": {
                "parameters": [
                    {"name": "olid", "in": "path", "required": true, "schema": {"type": "string"}},
                    {"name": "limit", "in": "query", "schema": {"type": "string"}}
                ],
                "get": {
                    "parameters": [
                        {"name": "offset", "in": "query", "schema": {"type": "integer"}},
                        {"name": "limit", "in": "query", "required": true, "schema": {"type": "integer"}}
                    ],
                    "responses": ok("200")
                }
            }}
        }));
        assert!(bound.errors.is_empty(), "{:?}", bound.errors);
        let op = &bound.operations[0];
        let names: Vec<_> = op.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["olid", "limit", "offset"]);
        let limit = op.parameter("limit", ParameterLocation::Query).unwrap();
        assert!(limit.required);
        assert_eq!(limit.ty, TypeDescriptor::Primitive(PrimitiveKind::Integer));
    }

    #[test]
    fn placeholder_mismatches_exclude_only_that_operation() {
        let (bound, _) = bind(json!({
            "openapi": "3.0.0",
            "paths": {
                "/books/{id}": {
                    "get": {"responses": ok("200")},
                    "delete": {
                        "parameters": [
                            {"name": "id", "in": "path", "required": true, "schema": {"type": "string"}},
                            {"name": "isbn", "in": "path", "required": true, "schema": {"type": "string"}}
                        ],
                        "responses": ok("204")
                    }
                },
                "/books": {"get": {"responses": ok("200")}}
            }
        }));
        assert_eq!(bound.operations.len(), 1);
        assert_eq!(bound.operations[0].path, "/books");
        assert_eq!(bound.errors.len(), 2);
        assert_eq!(bound.errors[0].pointer, "#/paths/~1books~1{id}/get");
        assert_eq!(
            bound.errors[0].kind,
            BindingErrorKind::UndeclaredPlaceholder { name: "id".into() }
        );
        assert_eq!(
            bound.errors[1].kind,
            BindingErrorKind::UnmatchedPathParameter { name: "isbn".into() }
        );
    }

    #[test]
    fn duplicate_and_unknown_parameters_are_binding_errors() {
        let (bound, _) = bind(json!({
            "openapi": "3.0.0",
            "paths": {
                "/a": {"get": {"parameters": [
                    {"name": "q", "in": "query"},
                    {"name": "q", "in": "query"}
                ], "responses": ok("200")}},
                "/b": {"get": {"parameters": [{"name": "q", "in": "body"}], "responses": ok("200")}}
            }
        }));
        assert!(bound.operations.is_empty());
        assert!(matches!(bound.errors[0].kind, BindingErrorKind::DuplicateParameter { .. }));
        assert!(matches!(bound.errors[1].kind, BindingErrorKind::UnknownLocation { .. }));
    }

    #[test]
    fn primary_response_prefers_200_then_201_then_first_2xx() {
        let (bound, _) = bind(json!({
            "openapi": "3.0.0",
            "paths": {
                "/a": {"get": {"responses": {"404": {"description": "no"}, "201": {"description": "c"}, "200": {"description": "ok"}}}},
                "/b": {"post": {"responses": {"default": {"description": "e"}, "201": {"description": "c"}}}},
                "/c": {"put": {"responses": {"400": {"description": "e"}, "2XX": {"description": "any"}}}},
                "/d": {"delete": {"responses": {"404": {"description": "e"}}}}
            }
        }));
        let primary: Vec<_> = bound
            .operations
            .iter()
            .map(|op| op.primary_response().map(|r| r.status.as_str()))
            .collect();
        assert_eq!(primary, [Some("200"), Some("201"), Some("2XX"), None]);
        // other codes are still recorded
        assert_eq!(bound.operations[0].responses.len(), 3);
    }

    #[test]
    fn empty_response_schema_is_untyped_and_absent_content_is_void() {
        let (bound, _) = bind(json!({
            "openapi": "3.0.0",
            "paths": {
                "/search.json": {"get": {"responses": {"200": {"description": "ok", "content": {"application/json": {"schema": {}}}}}}},
                "/raw": {"get": {"responses": {"200": {"description": "ok", "content": {"application/json": {}}}}}},
                "/void": {"delete": {"responses": {"204": {"description": "gone"}}}}
            }
        }));
        assert_eq!(bound.operations[0].primary_type(), Some(&TypeDescriptor::Untyped));
        assert_eq!(bound.operations[1].primary_type(), Some(&TypeDescriptor::Untyped));
        assert_eq!(bound.operations[2].primary_response().unwrap().status, "204");
        assert_eq!(bound.operations[2].primary_type(), None);
    }

    #[test]
    fn referenced_components_are_bound() {
        let (bound, arena) = bind(json!({
            "openapi": "3.0.0",
            "paths": {"/books": {"post": {
                "parameters": [{"$ref": "#/components/parameters/Trace"}],
                "requestBody": {"$ref": "#/components/requestBodies/NewBook"},
                "responses": {"201": {"$ref": "#/components/responses/Created"}}
            }}},
            "components": {
                "schemas": {"Book": {"type": "object", "properties": {"title": {"type": "string"}}}},
                "parameters": {"Trace": {"name": "X-Trace", "in": "header", "schema": {"type": "string", "format": "uuid"}}},
                "requestBodies": {"NewBook": {"required": true, "content": {
                    "text/plain": {"schema": {"type": "string"}},
                    "application/vnd.books+json": {"schema": {"$ref": "#/components/schemas/Book"}}
                }}},
                "responses": {"Created": {"description": "made", "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Book"}}}}}
            }
        }));
        assert!(bound.errors.is_empty(), "{:?}", bound.errors);
        let op = &bound.operations[0];
        let trace = op.parameter("X-Trace", ParameterLocation::Header).unwrap();
        assert_eq!(trace.ty, TypeDescriptor::Primitive(PrimitiveKind::Uuid));

        let body = op.request_body.as_ref().unwrap();
        assert!(body.required);
        assert_eq!(body.media_type.as_deref(), Some("application/vnd.books+json"));
        let book = arena.resolve(&body.ty).as_object().unwrap();
        assert!(book.field("title").is_some());
        assert_eq!(op.primary_type(), Some(&body.ty));
    }

    #[test]
    fn unresolvable_parameter_reference_is_reported() {
        let (bound, _) = bind(json!({
            "openapi": "3.0.0",
            "paths": {"/a": {"get": {
                "parameters": [{"$ref": "#/components/parameters/Missing"}],
                "responses": ok("200")
            }}}
        }));
        assert!(bound.operations.is_empty());
        assert_eq!(
            bound.errors[0].kind,
            BindingErrorKind::UnresolvedReference { reference: "#/components/parameters/Missing".into() }
        );
    }

    #[test]
    fn media_preference_matches_suffixes_and_parameters() {
        let media = MediaPreference::default();
        let mut content = IndexMap::new();
        content.insert("text/html".to_string(), MediaType::default());
        content.insert("application/json; charset=utf-8".to_string(), MediaType::default());
        assert_eq!(media.select(&content).unwrap().0, "application/json; charset=utf-8");

        let mut content = IndexMap::new();
        content.insert("image/png".to_string(), MediaType::default());
        assert_eq!(media.select(&content).unwrap().0, "image/png");
    }
}
