//! Emission: the in-memory artifact set a renderer turns into source text.
//!
//! Names are claimed sequentially in declaration order before any unit is
//! built, so building units in parallel cannot change the output.
use std::collections::HashSet;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;

use crate::bind::{OperationDescriptor, ParameterLocation};
use crate::document::{last_token, HttpMethod, OpenApiDocument};
use crate::error::Diagnostic;
use crate::tree::{PathSegment, RequestBuilderTree, SegmentKind};
use crate::types::{NamedType, ObjectType, PrimitiveKind, TypeArena, TypeDescriptor, TypeId};

// ————————————————————————————————————————————————————————————————————————————
// ARTIFACTS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSet {
    pub client_name: String,
    pub title: String,
    pub api_version: String,
    pub base_url: Option<String>,
    pub models: Vec<ModelUnit>,
    /// Tree pre-order; the first unit is the client root.
    pub navigation: Vec<NavigationUnit>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ArtifactSet {
    /// Pretty JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn model(&self, name: &str) -> Option<&ModelUnit> {
        self.models.iter().find(|m| m.name() == name)
    }

    pub fn navigation_unit(&self, path: &str) -> Option<&NavigationUnit> {
        self.navigation.iter().find(|n| n.path == path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ModelUnit {
    Object {
        name: String,
        pointer: String,
        fields: Vec<FieldUnit>,
    },
    Enum {
        name: String,
        pointer: String,
        values: Vec<String>,
    },
    /// A self-referential type that is neither an object nor an enum,
    /// e.g. an array of itself.
    Alias {
        name: String,
        pointer: String,
        target: TypeRef,
    },
}

impl ModelUnit {
    pub fn name(&self) -> &str {
        match self {
            ModelUnit::Object { name, .. } | ModelUnit::Enum { name, .. } | ModelUnit::Alias { name, .. } => name,
        }
    }

    pub fn fields(&self) -> &[FieldUnit] {
        match self {
            ModelUnit::Object { fields, .. } => fields,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldUnit {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    pub required: bool,
}

/// A type at a use site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TypeRef {
    Primitive { primitive: PrimitiveKind },
    Array { items: Box<TypeRef> },
    /// Reference to a [`ModelUnit`] by name.
    Model { name: String },
    InlineObject { fields: Vec<FieldUnit> },
    InlineEnum { values: Vec<String> },
    Untyped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationUnit {
    pub name: String,
    /// Normalized template from the root, e.g. `/authors/{olid}`.
    pub path: String,
    pub segment: String,
    pub segment_kind: &'static str,
    pub params: Vec<String>,
    pub depth: usize,
    /// Names of child units in declaration order.
    pub children: Vec<String>,
    pub operations: Vec<OperationUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationUnit {
    pub method: HttpMethod,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub deprecated: bool,
    pub tags: Vec<String>,
    pub parameters: Vec<ParameterUnit>,
    pub request_body: Option<BodyUnit>,
    /// Status of the response that defines `returns`.
    pub return_status: Option<String>,
    /// `None` means the operation returns nothing.
    pub returns: Option<TypeRef>,
    pub responses: Vec<ResponseUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterUnit {
    pub name: String,
    pub location: ParameterLocation,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    pub required: bool,
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyUnit {
    pub media_type: Option<String>,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseUnit {
    pub status: String,
    pub media_type: Option<String>,
    #[serde(rename = "type")]
    pub ty: Option<TypeRef>,
}

// ————————————————————————————————————————————————————————————————————————————
// NAMING
// ————————————————————————————————————————————————————————————————————————————

/// `search.json` → `SearchJson`, `{olid}` → `Olid`, `book_list` → `BookList`.
pub fn pascal_case(raw: &str) -> String {
    let mut out = String::new();
    for word in raw.split(|c: char| !c.is_ascii_alphanumeric()).filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    out
}

/// Unique identifiers, first come first served; clashes get `2`, `3`, ...
#[derive(Debug, Default)]
struct NameTable {
    taken: HashSet<String>,
}

impl NameTable {
    fn claim(&mut self, base: &str) -> String {
        let base = match base.chars().next() {
            None => "Model".to_string(),
            Some(c) if c.is_ascii_digit() => format!("Model{base}"),
            Some(_) => base.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}{n}");
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

// ————————————————————————————————————————————————————————————————————————————
// EMITTER
// ————————————————————————————————————————————————————————————————————————————

struct NodeEntry<'t> {
    segment: &'t PathSegment,
    name: String,
    path: String,
    depth: usize,
    children: Vec<String>,
}

pub struct Emitter<'a> {
    arena: &'a TypeArena,
    client_name: String,
    parallel: bool,
    names: NameTable,
    model_names: IndexMap<TypeId, String>,
}

impl<'a> Emitter<'a> {
    pub fn new(arena: &'a TypeArena, client_name: impl Into<String>) -> Self {
        Self {
            arena,
            client_name: client_name.into(),
            parallel: true,
            names: NameTable::default(),
            model_names: IndexMap::new(),
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn emit(mut self, doc: &OpenApiDocument, tree: &RequestBuilderTree, diagnostics: Vec<Diagnostic>) -> ArtifactSet {
        let _span = tracing::info_span!("emit").entered();
        let client_name = self.client_name.clone();
        self.names.claim(&client_name);

        // 1) names, sequentially
        let emitted: Vec<&NamedType> = self.arena.named().filter(|n| n.is_emitted()).collect();
        for named in &emitted {
            let name = self.names.claim(&pascal_case(&last_token(&named.reference.pointer)));
            self.model_names.insert(named.id, name);
        }
        let mut nodes = Vec::new();
        self.collect_nodes(tree.root(), "", "/", 0, &mut nodes);

        // 2) units
        let this = &self;
        let models = map_ordered(&emitted, self.parallel, |named| this.model_unit(named));
        let navigation = map_ordered(&nodes, self.parallel, |entry| this.navigation_unit(entry));
        tracing::info!(models = models.len(), navigation = navigation.len(), "emitted artifact set");

        let spec = doc.spec();
        ArtifactSet {
            client_name,
            title: spec.info.title.clone(),
            api_version: spec.info.version.clone(),
            base_url: spec.servers.first().map(|s| s.url.clone()),
            models,
            navigation,
            diagnostics,
        }
    }

    fn collect_nodes<'t>(
        &mut self,
        segment: &'t PathSegment,
        stem: &str,
        path: &str,
        depth: usize,
        out: &mut Vec<NodeEntry<'t>>,
    ) -> String {
        let name = match segment.kind() {
            SegmentKind::Root => self.client_name.clone(),
            _ => self.names.claim(&format!("{stem}RequestBuilder")),
        };
        let index = out.len();
        out.push(NodeEntry {
            segment,
            name: name.clone(),
            path: path.to_string(),
            depth,
            children: Vec::new(),
        });
        for child in segment.children() {
            let child_stem = format!("{stem}{}", pascal_case(child.text()));
            let child_path = match path {
                "/" => format!("/{}", child.text()),
                _ => format!("{path}/{}", child.text()),
            };
            let child_name = self.collect_nodes(child, &child_stem, &child_path, depth + 1, out);
            out[index].children.push(child_name);
        }
        name
    }

    fn model_unit(&self, named: &NamedType) -> ModelUnit {
        let name = self.model_names.get(&named.id).cloned().unwrap_or_default();
        let pointer = named.reference.pointer.clone();
        match &named.ty {
            TypeDescriptor::Object(obj) => ModelUnit::Object { name, pointer, fields: self.fields(obj, 0) },
            TypeDescriptor::Enum(values) => ModelUnit::Enum { name, pointer, values: values.clone() },
            other => ModelUnit::Alias { name, pointer, target: self.type_ref(other, 0) },
        }
    }

    fn fields(&self, obj: &ObjectType, depth: usize) -> Vec<FieldUnit> {
        obj.fields
            .iter()
            .map(|(name, ty)| FieldUnit {
                name: name.clone(),
                ty: self.type_ref(ty, depth),
                required: obj.is_required(name),
            })
            .collect()
    }

    /// `depth` counts inlined named types; it only matters for alias chains.
    fn type_ref(&self, ty: &TypeDescriptor, depth: usize) -> TypeRef {
        match ty {
            TypeDescriptor::Primitive(primitive) => TypeRef::Primitive { primitive: *primitive },
            TypeDescriptor::Array(items) => TypeRef::Array { items: Box::new(self.type_ref(items, depth)) },
            TypeDescriptor::Object(obj) => TypeRef::InlineObject { fields: self.fields(obj, depth) },
            TypeDescriptor::Enum(values) => TypeRef::InlineEnum { values: values.clone() },
            TypeDescriptor::Untyped => TypeRef::Untyped,
            TypeDescriptor::Named(id) => match (self.model_names.get(id), self.arena.get(*id)) {
                (Some(name), _) => TypeRef::Model { name: name.clone() },
                (None, Some(named)) if depth <= self.arena.len() => self.type_ref(&named.ty, depth + 1),
                _ => TypeRef::Untyped,
            },
        }
    }

    fn navigation_unit(&self, entry: &NodeEntry<'_>) -> NavigationUnit {
        let segment = entry.segment;
        let segment_kind = match segment.kind() {
            SegmentKind::Root => "root",
            SegmentKind::Literal => "literal",
            SegmentKind::Template { .. } => "template",
        };
        NavigationUnit {
            name: entry.name.clone(),
            path: entry.path.clone(),
            segment: segment.text().to_string(),
            segment_kind,
            params: segment.params().to_vec(),
            depth: entry.depth,
            children: entry.children.clone(),
            operations: segment.operations().iter().map(|op| self.operation_unit(op)).collect(),
        }
    }

    fn operation_unit(&self, op: &OperationDescriptor) -> OperationUnit {
        OperationUnit {
            method: op.method,
            operation_id: op.operation_id.clone(),
            summary: op.summary.clone(),
            deprecated: op.deprecated,
            tags: op.tags.clone(),
            parameters: op
                .parameters
                .iter()
                .map(|p| ParameterUnit {
                    name: p.name.clone(),
                    location: p.location,
                    ty: self.type_ref(&p.ty, 0),
                    required: p.required,
                    deprecated: p.deprecated,
                })
                .collect(),
            request_body: op.request_body.as_ref().map(|body| BodyUnit {
                media_type: body.media_type.clone(),
                ty: self.type_ref(&body.ty, 0),
                required: body.required,
            }),
            return_status: op.primary_response().map(|r| r.status.clone()),
            returns: op.primary_type().map(|ty| self.type_ref(ty, 0)),
            responses: op
                .responses
                .values()
                .map(|r| ResponseUnit {
                    status: r.status.clone(),
                    media_type: r.media_type.clone(),
                    ty: r.ty.as_ref().map(|ty| self.type_ref(ty, 0)),
                })
                .collect(),
        }
    }
}

/// Order-preserving map, on the rayon pool when `parallel` is set.
fn map_ordered<T, U, F>(items: &[T], parallel: bool, f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}
