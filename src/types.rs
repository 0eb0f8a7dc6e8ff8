// Target type descriptors. No serde_json::Value here.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::resolve::SchemaRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PrimitiveKind {
    String,
    DateTime,
    Date,
    Time,
    Duration,
    Uuid,
    Base64,
    Binary,
    Integer,
    Int32,
    Int64,
    Number,
    Float,
    Double,
    Decimal,
    Boolean,
}

impl PrimitiveKind {
    /// Map a JSON Schema `type` plus optional `format` hint. Unknown formats
    /// fall back to the plain kind for that type.
    pub fn from_type_format(ty: &str, format: Option<&str>) -> Option<Self> {
        let kind = match (ty, format.unwrap_or_default()) {
            ("string", "date-time") => PrimitiveKind::DateTime,
            ("string", "date") => PrimitiveKind::Date,
            ("string", "time") => PrimitiveKind::Time,
            ("string", "duration") => PrimitiveKind::Duration,
            ("string", "uuid") => PrimitiveKind::Uuid,
            ("string", "byte") => PrimitiveKind::Base64,
            ("string", "binary") => PrimitiveKind::Binary,
            ("string", _) => PrimitiveKind::String,
            ("integer", "int32") => PrimitiveKind::Int32,
            ("integer", "int64") => PrimitiveKind::Int64,
            ("integer", _) => PrimitiveKind::Integer,
            ("number", "float") => PrimitiveKind::Float,
            ("number", "double") => PrimitiveKind::Double,
            ("number", "decimal") => PrimitiveKind::Decimal,
            ("number", _) => PrimitiveKind::Number,
            ("boolean", _) => PrimitiveKind::Boolean,
            _ => return None,
        };
        Some(kind)
    }

    /// The JSON type this kind refines.
    pub fn json_type(self) -> &'static str {
        match self {
            PrimitiveKind::String
            | PrimitiveKind::DateTime
            | PrimitiveKind::Date
            | PrimitiveKind::Time
            | PrimitiveKind::Duration
            | PrimitiveKind::Uuid
            | PrimitiveKind::Base64
            | PrimitiveKind::Binary => "string",
            PrimitiveKind::Integer | PrimitiveKind::Int32 | PrimitiveKind::Int64 => "integer",
            PrimitiveKind::Number
            | PrimitiveKind::Float
            | PrimitiveKind::Double
            | PrimitiveKind::Decimal => "number",
            PrimitiveKind::Boolean => "boolean",
        }
    }
}

/// Index of a named type in the [`TypeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(pub(crate) usize);

impl TypeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    Array(Box<TypeDescriptor>),
    Object(ObjectType),
    /// Values in declaration order.
    Enum(Vec<String>),
    /// No shape known: consumers get a dynamic value.
    Untyped,
    /// A named type living in the arena. Self-references stay as this
    /// marker instead of expanding their fields.
    Named(TypeId),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectType {
    pub fields: IndexMap<String, TypeDescriptor>,
    pub required: IndexSet<String>,
}

impl ObjectType {
    pub fn field(&self, name: &str) -> Option<&TypeDescriptor> {
        self.fields.get(name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }
}

impl TypeDescriptor {
    pub fn is_untyped(&self) -> bool {
        matches!(self, TypeDescriptor::Untyped)
    }

    pub fn as_object(&self) -> Option<&ObjectType> {
        match self {
            TypeDescriptor::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Only objects and enums become standalone model units.
    pub fn is_nameable(&self) -> bool {
        matches!(self, TypeDescriptor::Object(_) | TypeDescriptor::Enum(_))
    }
}

/// One `$ref` target, synthesized once.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedType {
    pub id: TypeId,
    pub reference: SchemaRef,
    pub ty: TypeDescriptor,
    /// Reached itself while being synthesized.
    pub recursive: bool,
}

impl NamedType {
    /// Whether this entry becomes a model unit at emission.
    pub fn is_emitted(&self) -> bool {
        self.recursive || self.ty.is_nameable()
    }
}

/// Arena of synthesized types for one run.
///
/// `named` holds `$ref` targets keyed by their resolved pointer, so every
/// reference to the same pointer shares one entry. `sites` holds the
/// descriptor of each inline schema position (parameters, bodies, responses).
#[derive(Debug, Clone, Default)]
pub struct TypeArena {
    pub(crate) named: IndexMap<SchemaRef, NamedType>,
    pub(crate) sites: IndexMap<SchemaRef, TypeDescriptor>,
}

impl TypeArena {
    pub fn get(&self, id: TypeId) -> Option<&NamedType> {
        self.named.get_index(id.0).map(|(_, named)| named)
    }

    pub fn lookup(&self, reference: &SchemaRef) -> Option<TypeId> {
        self.named.get_index_of(reference).map(TypeId)
    }

    pub fn named(&self) -> impl Iterator<Item = &NamedType> {
        self.named.values()
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }

    /// Descriptor for an inline schema position.
    pub fn site(&self, reference: &SchemaRef) -> Option<&TypeDescriptor> {
        self.sites.get(reference)
    }

    /// Follow `Named` links to the underlying shape. Cycles of pure aliases
    /// stop at the last link.
    pub fn resolve<'a>(&'a self, ty: &'a TypeDescriptor) -> &'a TypeDescriptor {
        let mut current = ty;
        for _ in 0..=self.named.len() {
            match current {
                TypeDescriptor::Named(id) => match self.get(*id) {
                    Some(named) => current = &named.ty,
                    None => return current,
                },
                _ => return current,
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_refines_kind_but_not_json_type() {
        let kind = PrimitiveKind::from_type_format("string", Some("date-time")).unwrap();
        assert_eq!(kind, PrimitiveKind::DateTime);
        assert_eq!(kind.json_type(), "string");
        let kind = PrimitiveKind::from_type_format("integer", Some("int64")).unwrap();
        assert_eq!(kind.json_type(), "integer");
        assert_eq!(
            PrimitiveKind::from_type_format("integer", Some("weird")),
            Some(PrimitiveKind::Integer)
        );
        assert_eq!(PrimitiveKind::from_type_format("object", None), None);
    }

    #[test]
    fn resolve_follows_named_links() {
        let mut arena = TypeArena::default();
        let a = SchemaRef::new("doc", "#/components/schemas/A");
        let b = SchemaRef::new("doc", "#/components/schemas/B");
        arena.named.insert(a.clone(), NamedType {
            id: TypeId(0),
            reference: a,
            ty: TypeDescriptor::Named(TypeId(1)),
            recursive: false,
        });
        arena.named.insert(b.clone(), NamedType {
            id: TypeId(1),
            reference: b,
            ty: TypeDescriptor::Enum(vec!["x".into()]),
            recursive: false,
        });
        let ty = TypeDescriptor::Named(TypeId(0));
        assert_eq!(arena.resolve(&ty), &TypeDescriptor::Enum(vec!["x".into()]));
        assert!(!arena.get(TypeId(0)).unwrap().is_emitted());
        assert!(arena.get(TypeId(1)).unwrap().is_emitted());
    }
}
