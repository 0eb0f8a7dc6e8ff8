//! Schema resolution.
//!
//! Every schema position the pipeline cares about is normalized into a
//! compact [`SchemaNode`] tree, with `$ref`s replaced by the identity of their
//! target. Targets are normalized once and stored in a flat table keyed by
//! their pointer; a `$ref` that re-enters a target still being normalized
//! becomes a [`SchemaNode::BackRef`] instead of recursing.
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::{decode_reference, join_pointer, OpenApiDocument};
use crate::error::{Diagnostic, DocumentParseError};

/// Keywords that give a schema a shape. A node with none of them is empty.
/// `required` alone still matters inside `allOf`, where it tightens the
/// fields of the other members.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "type", "properties", "required", "items", "enum", "const", "allOf", "oneOf", "anyOf",
];

/// Resolved pointer identity: source document plus JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SchemaRef {
    pub document: String,
    pub pointer: String,
}

impl SchemaRef {
    pub fn new(document: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self { document: document.into(), pointer: pointer.into() }
    }
}

impl std::fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pointer)
    }
}

/// Canonical schema after `$ref` resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// `{}`, `null`, boolean schemas, or nodes without structural keywords.
    Empty,
    /// Points at an entry of [`SchemaTable::targets`].
    Ref(SchemaRef),
    /// Points at a target that was still on the resolution stack.
    BackRef(SchemaRef),
    /// A `$ref` that leads nowhere, or outside this document.
    Unresolved(String),
    Shape(Box<Shape>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shape {
    /// Declared `type`s, `"null"` removed.
    pub types: Vec<String>,
    pub nullable: bool,
    pub format: Option<String>,
    pub properties: IndexMap<String, SchemaNode>,
    pub required: Vec<String>,
    pub items: Option<SchemaNode>,
    pub enum_values: Option<Vec<Value>>,
    pub all_of: Vec<SchemaNode>,
    pub one_of: Vec<SchemaNode>,
    pub any_of: Vec<SchemaNode>,
    pub description: Option<String>,
}

impl Shape {
    /// `{"type": "null"}` and friends.
    pub fn is_null_only(&self) -> bool {
        self.nullable
            && self.types.is_empty()
            && self.properties.is_empty()
            && self.items.is_none()
            && self.enum_values.is_none()
            && self.all_of.is_empty()
            && self.one_of.is_empty()
            && self.any_of.is_empty()
    }
}

/// Output of resolution; read-only from here on.
#[derive(Debug, Clone, Default)]
pub struct SchemaTable {
    /// `$ref` targets (and every `components/schemas` entry), first-seen order.
    pub targets: IndexMap<SchemaRef, SchemaNode>,
    /// Inline schema positions (parameters, bodies, responses), document order.
    pub sites: IndexMap<SchemaRef, SchemaNode>,
    pub warnings: Vec<Diagnostic>,
}

impl SchemaTable {
    pub fn target(&self, reference: &SchemaRef) -> Option<&SchemaNode> {
        self.targets.get(reference)
    }

    pub fn site(&self, reference: &SchemaRef) -> Option<&SchemaNode> {
        self.sites.get(reference)
    }
}

pub fn resolve(doc: &OpenApiDocument) -> Result<SchemaTable, DocumentParseError> {
    SchemaResolver::new(doc).resolve()
}

pub struct SchemaResolver<'d> {
    doc: &'d OpenApiDocument,
    table: SchemaTable,
    stack: Vec<SchemaRef>,
}

impl<'d> SchemaResolver<'d> {
    pub fn new(doc: &'d OpenApiDocument) -> Self {
        Self { doc, table: SchemaTable::default(), stack: Vec::new() }
    }

    pub fn resolve(mut self) -> Result<SchemaTable, DocumentParseError> {
        let doc = self.doc;
        for name in doc.spec().components.schemas.keys() {
            let pointer = join_pointer("#/components/schemas", name);
            let reference = SchemaRef::new(doc.origin(), pointer.clone());
            self.resolve_target(&reference, &pointer)?;
        }
        for pointer in doc.schema_sites() {
            let node = match doc.lookup(&pointer) {
                Some(value) => self.normalize(value, &pointer)?,
                None => SchemaNode::Empty,
            };
            self.table.sites.insert(SchemaRef::new(doc.origin(), pointer), node);
        }
        tracing::debug!(
            targets = self.table.targets.len(),
            sites = self.table.sites.len(),
            warnings = self.table.warnings.len(),
            "resolved schemas"
        );
        Ok(self.table)
    }

    fn resolve_target(&mut self, reference: &SchemaRef, at: &str) -> Result<SchemaNode, DocumentParseError> {
        if self.stack.contains(reference) {
            tracing::debug!(%reference, "cycle broken with back-reference");
            return Ok(SchemaNode::BackRef(reference.clone()));
        }
        if self.table.targets.contains_key(reference) {
            return Ok(SchemaNode::Ref(reference.clone()));
        }
        let doc = self.doc;
        let Some(value) = doc.lookup(&reference.pointer) else {
            return Ok(self.unresolved(&reference.pointer, at));
        };
        // reserve the slot so first-seen order is declaration order
        self.table.targets.insert(reference.clone(), SchemaNode::Empty);
        self.stack.push(reference.clone());
        let node = self.normalize(value, &reference.pointer);
        self.stack.pop();
        self.table.targets.insert(reference.clone(), node?);
        Ok(SchemaNode::Ref(reference.clone()))
    }

    fn unresolved(&mut self, reference: &str, at: &str) -> SchemaNode {
        tracing::warn!(reference, at, "unresolvable reference, falling back to untyped");
        self.table
            .warnings
            .push(Diagnostic::warning(at, format!("unresolvable reference `{reference}`")));
        SchemaNode::Unresolved(reference.to_string())
    }

    fn structure(&self, at: &str, message: impl Into<String>) -> DocumentParseError {
        DocumentParseError::Structure {
            origin: self.doc.origin().to_string(),
            location: at.to_string(),
            message: message.into(),
        }
    }

    fn normalize(&mut self, value: &Value, at: &str) -> Result<SchemaNode, DocumentParseError> {
        match value {
            Value::Null | Value::Bool(_) => Ok(SchemaNode::Empty),
            Value::Object(map) => self.normalize_object(map, at),
            _ => Err(self.structure(at, "schema must be an object or a boolean")),
        }
    }

    fn normalize_object(&mut self, map: &Map<String, Value>, at: &str) -> Result<SchemaNode, DocumentParseError> {
        if let Some(reference) = map.get("$ref") {
            let Some(reference) = reference.as_str() else {
                return Err(self.structure(at, "`$ref` must be a string"));
            };
            if !reference.starts_with('#') {
                return Ok(self.unresolved(reference, at));
            }
            let target = SchemaRef::new(self.doc.origin(), decode_reference(reference));
            return self.resolve_target(&target, at);
        }

        if !STRUCTURAL_KEYWORDS.iter().any(|k| map.contains_key(*k)) {
            return Ok(SchemaNode::Empty);
        }

        let mut shape = Shape::default();

        // 1) type: a string, or a 3.1-style list
        match map.get("type") {
            None => {}
            Some(Value::String(ty)) => shape.types.push(ty.clone()),
            Some(Value::Array(tys)) => {
                for ty in tys {
                    match ty.as_str() {
                        Some(ty) => shape.types.push(ty.to_string()),
                        None => return Err(self.structure(at, "`type` entries must be strings")),
                    }
                }
            }
            Some(_) => return Err(self.structure(at, "`type` must be a string or an array")),
        }
        let had_null = shape.types.iter().any(|t| t == "null");
        shape.types.retain(|t| t != "null");
        shape.nullable = had_null || map.get("nullable").and_then(Value::as_bool).unwrap_or(false);
        shape.format = map.get("format").and_then(Value::as_str).map(str::to_string);
        shape.description = map.get("description").and_then(Value::as_str).map(str::to_string);

        // 2) object members
        if let Some(props) = map.get("properties") {
            let Some(props) = props.as_object() else {
                return Err(self.structure(at, "`properties` must be an object"));
            };
            let base = join_pointer(at, "properties");
            for (name, prop) in props {
                let node = self.normalize(prop, &join_pointer(&base, name))?;
                shape.properties.insert(name.clone(), node);
            }
        }
        if let Some(required) = map.get("required").and_then(Value::as_array) {
            shape.required = required
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }

        // 3) array items; tuple-form `items` is not modeled
        match map.get("items") {
            None => {}
            Some(Value::Array(_)) => shape.items = Some(SchemaNode::Empty),
            Some(items) => shape.items = Some(self.normalize(items, &join_pointer(at, "items"))?),
        }

        // 4) enumerations
        if let Some(values) = map.get("enum") {
            let Some(values) = values.as_array() else {
                return Err(self.structure(at, "`enum` must be an array"));
            };
            shape.enum_values = Some(values.clone());
        } else if let Some(value) = map.get("const") {
            shape.enum_values = Some(vec![value.clone()]);
        }

        // 5) composition
        shape.all_of = self.normalize_list(map, "allOf", at)?;
        shape.one_of = self.normalize_list(map, "oneOf", at)?;
        shape.any_of = self.normalize_list(map, "anyOf", at)?;

        Ok(SchemaNode::Shape(Box::new(shape)))
    }

    fn normalize_list(
        &mut self,
        map: &Map<String, Value>,
        key: &str,
        at: &str,
    ) -> Result<Vec<SchemaNode>, DocumentParseError> {
        let Some(list) = map.get(key) else {
            return Ok(Vec::new());
        };
        let Some(list) = list.as_array() else {
            return Err(self.structure(at, format!("`{key}` must be an array")));
        };
        let base = join_pointer(at, key);
        list.iter()
            .enumerate()
            .map(|(i, member)| self.normalize(member, &join_pointer(&base, &i.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(value: Value) -> SchemaTable {
        let doc = OpenApiDocument::from_value(value, "test.json").unwrap();
        resolve(&doc).unwrap()
    }

    fn target<'a>(table: &'a SchemaTable, pointer: &str) -> &'a SchemaNode {
        table.target(&SchemaRef::new("test.json", pointer)).unwrap()
    }

    #[test]
    fn components_are_seeded_in_declaration_order() {
        let t = table(json!({
            "openapi": "3.0.0",
            "components": {"schemas": {
                "Zeta": {"type": "string"},
                "Alpha": {"type": "object", "properties": {"z": {"$ref": "#/components/schemas/Zeta"}}}
            }}
        }));
        let keys: Vec<_> = t.targets.keys().map(|r| r.pointer.as_str()).collect();
        assert_eq!(keys, ["#/components/schemas/Zeta", "#/components/schemas/Alpha"]);

        let SchemaNode::Shape(alpha) = target(&t, "#/components/schemas/Alpha") else {
            panic!("expected a shape");
        };
        assert_eq!(
            alpha.properties["z"],
            SchemaNode::Ref(SchemaRef::new("test.json", "#/components/schemas/Zeta"))
        );
    }

    #[test]
    fn self_reference_becomes_back_reference() {
        let t = table(json!({
            "openapi": "3.0.0",
            "components": {"schemas": {
                "A": {"type": "object", "properties": {"self": {"$ref": "#/components/schemas/A"}}}
            }}
        }));
        let SchemaNode::Shape(a) = target(&t, "#/components/schemas/A") else {
            panic!("expected a shape");
        };
        assert_eq!(
            a.properties["self"],
            SchemaNode::BackRef(SchemaRef::new("test.json", "#/components/schemas/A"))
        );
    }

    #[test]
    fn mutual_recursion_terminates() {
        let t = table(json!({
            "openapi": "3.0.0",
            "components": {"schemas": {
                "A": {"type": "object", "properties": {"b": {"$ref": "#/components/schemas/B"}}},
                "B": {"type": "object", "properties": {"a": {"$ref": "#/components/schemas/A"}}}
            }}
        }));
        let SchemaNode::Shape(b) = target(&t, "#/components/schemas/B") else {
            panic!("expected a shape");
        };
        assert!(matches!(b.properties["a"], SchemaNode::BackRef(_)));
    }

    #[test]
    fn percent_encoded_references_share_the_seeded_target() {
        let t = table(json!({
            "openapi": "3.0.0",
            "components": {"schemas": {
                "Open Book": {"type": "object", "properties": {"key": {"type": "string"}}},
                "Shelf": {"type": "array", "items": {"$ref": "#/components/schemas/Open%20Book"}}
            }}
        }));
        assert!(t.warnings.is_empty());
        assert_eq!(t.targets.len(), 2);
        let SchemaNode::Shape(shelf) = target(&t, "#/components/schemas/Shelf") else {
            panic!("shelf should be a shape");
        };
        assert_eq!(
            shelf.items,
            Some(SchemaNode::Ref(SchemaRef::new("test.json", "#/components/schemas/Open Book")))
        );
    }

    #[test]
    fn empty_and_annotation_only_nodes_are_empty() {
        let t = table(json!({
            "openapi": "3.0.0",
            "components": {"schemas": {
                "Blank": {},
                "Described": {"description": "anything goes"},
                "Nothing": null
            }}
        }));
        for name in ["Blank", "Described", "Nothing"] {
            assert_eq!(target(&t, &format!("#/components/schemas/{name}")), &SchemaNode::Empty);
        }
    }

    #[test]
    fn unresolvable_references_warn_instead_of_failing() {
        let t = table(json!({
            "openapi": "3.0.0",
            "components": {"schemas": {
                "Ext": {"$ref": "other.yaml#/components/schemas/X"},
                "Gone": {"$ref": "#/components/schemas/Missing"}
            }}
        }));
        assert_eq!(
            target(&t, "#/components/schemas/Ext"),
            &SchemaNode::Unresolved("other.yaml#/components/schemas/X".into())
        );
        assert_eq!(
            target(&t, "#/components/schemas/Gone"),
            &SchemaNode::Unresolved("#/components/schemas/Missing".into())
        );
        assert_eq!(t.warnings.len(), 2);
    }

    #[test]
    fn nullable_forms_are_stripped_from_types() {
        let t = table(json!({
            "openapi": "3.1.0",
            "components": {"schemas": {
                "Maybe": {"type": ["string", "null"]},
                "Legacy": {"type": "integer", "nullable": true}
            }}
        }));
        let SchemaNode::Shape(maybe) = target(&t, "#/components/schemas/Maybe") else {
            panic!("expected a shape");
        };
        assert_eq!(maybe.types, ["string"]);
        assert!(maybe.nullable);
        let SchemaNode::Shape(legacy) = target(&t, "#/components/schemas/Legacy") else {
            panic!("expected a shape");
        };
        assert!(legacy.nullable);
    }

    #[test]
    fn malformed_schema_nodes_are_fatal() {
        let doc = OpenApiDocument::from_value(
            json!({"openapi": "3.0.0", "components": {"schemas": {"Bad": {"type": 7}}}}),
            "test.json",
        )
        .unwrap();
        let err = resolve(&doc).unwrap_err();
        match err {
            DocumentParseError::Structure { location, .. } => {
                assert_eq!(location, "#/components/schemas/Bad")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sites_are_collected_for_operations() {
        let t = table(json!({
            "openapi": "3.0.0",
            "paths": {"/search.json": {"get": {
                "parameters": [{"name": "q", "in": "query", "schema": {"type": "string"}}],
                "responses": {"200": {"description": "ok", "content": {"application/json": {"schema": {}}}}}
            }}}
        }));
        assert_eq!(t.sites.len(), 2);
        let response = t
            .site(&SchemaRef::new(
                "test.json",
                "#/paths/~1search.json/get/responses/200/content/application~1json/schema",
            ))
            .unwrap();
        assert_eq!(response, &SchemaNode::Empty);
    }
}
