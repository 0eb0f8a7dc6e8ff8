//! Type synthesis: one [`TypeDescriptor`] per resolved schema node.
//!
//! Policy, in order of precedence:
//! - empty, absent or unresolvable → `Untyped`
//! - `allOf` → field union of the members, later members win on collisions
//! - `oneOf`/`anyOf` → the branch type if a single non-null branch remains,
//!   the shared shape if every branch is the same object, else `Untyped`
//! - `enum`/`const` → `Enum` in declared order
//! - `type: object` (or bare `properties`) → `Object`
//! - `type: array` (or bare `items`) → `Array`, items default to `Untyped`
//! - `string`/`integer`/`number`/`boolean` → `Primitive`, refined by `format`
use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;

use crate::resolve::{SchemaNode, SchemaRef, SchemaTable, Shape};
use crate::types::{NamedType, ObjectType, PrimitiveKind, TypeArena, TypeDescriptor, TypeId};

/// Synthesize every target and site of `table`.
pub fn synthesize(table: &SchemaTable) -> TypeArena {
    let mut synth = TypeSynthesizer::new(table);
    for reference in table.targets.keys() {
        synth.named(reference);
    }
    for (reference, node) in &table.sites {
        let ty = synth.node(node);
        synth.arena.sites.insert(reference.clone(), ty);
    }
    tracing::debug!(
        named = synth.arena.named.len(),
        emitted = synth.arena.named().filter(|n| n.is_emitted()).count(),
        "synthesized types"
    );
    synth.arena
}

pub struct TypeSynthesizer<'t> {
    table: &'t SchemaTable,
    arena: TypeArena,
    pending: HashSet<TypeId>,
}

impl<'t> TypeSynthesizer<'t> {
    pub fn new(table: &'t SchemaTable) -> Self {
        Self { table, arena: TypeArena::default(), pending: HashSet::new() }
    }

    /// Descriptor for a `$ref` target; synthesizes it on first use.
    pub fn named(&mut self, reference: &SchemaRef) -> TypeDescriptor {
        if let Some(index) = self.arena.named.get_index_of(reference) {
            let id = TypeId(index);
            if self.pending.contains(&id) {
                self.arena.named[index].recursive = true;
                return TypeDescriptor::Named(id);
            }
            return self.reference_to(id);
        }

        let (index, _) = self.arena.named.insert_full(reference.clone(), NamedType {
            id: TypeId(self.arena.named.len()),
            reference: reference.clone(),
            ty: TypeDescriptor::Untyped,
            recursive: false,
        });
        let id = TypeId(index);
        self.pending.insert(id);
        let table = self.table;
        let ty = match table.target(reference) {
            Some(node) => self.node(node),
            None => TypeDescriptor::Untyped,
        };
        self.pending.remove(&id);
        tracing::trace!(%reference, ?ty, "named type");
        self.arena.named[index].ty = ty;
        self.reference_to(id)
    }

    /// Objects, enums and recursive types are referenced by id; anything else
    /// is inlined at the use site.
    fn reference_to(&self, id: TypeId) -> TypeDescriptor {
        let named = &self.arena.named[id.0];
        if named.is_emitted() {
            TypeDescriptor::Named(id)
        } else {
            named.ty.clone()
        }
    }

    pub fn node(&mut self, node: &SchemaNode) -> TypeDescriptor {
        match node {
            SchemaNode::Empty | SchemaNode::Unresolved(_) => TypeDescriptor::Untyped,
            SchemaNode::Ref(reference) | SchemaNode::BackRef(reference) => self.named(reference),
            SchemaNode::Shape(shape) => self.shape(shape),
        }
    }

    fn shape(&mut self, shape: &Shape) -> TypeDescriptor {
        if !shape.all_of.is_empty() {
            return self.all_of(shape);
        }
        if !shape.one_of.is_empty() || !shape.any_of.is_empty() {
            return self.union(shape);
        }
        if let Some(values) = &shape.enum_values {
            let values = enum_strings(values);
            if !values.is_empty() {
                return TypeDescriptor::Enum(values);
            }
        }

        let ty = match shape.types.as_slice() {
            [ty] => ty.as_str(),
            [] if !shape.properties.is_empty() => "object",
            [] if shape.items.is_some() => "array",
            // no type at all, or several non-null types at once
            _ => return TypeDescriptor::Untyped,
        };

        match ty {
            "object" => TypeDescriptor::Object(self.object(shape)),
            "array" => {
                let item = match &shape.items {
                    Some(items) => self.node(items),
                    None => TypeDescriptor::Untyped,
                };
                TypeDescriptor::Array(Box::new(item))
            }
            other => match PrimitiveKind::from_type_format(other, shape.format.as_deref()) {
                Some(kind) => TypeDescriptor::Primitive(kind),
                None => TypeDescriptor::Untyped,
            },
        }
    }

    fn object(&mut self, shape: &Shape) -> ObjectType {
        let mut obj = ObjectType::default();
        for (name, prop) in &shape.properties {
            let ty = self.node(prop);
            obj.fields.insert(name.clone(), ty);
        }
        for name in &shape.required {
            if obj.fields.contains_key(name) {
                obj.required.insert(name.clone());
            }
        }
        obj
    }

    fn all_of(&mut self, shape: &Shape) -> TypeDescriptor {
        let mut members: Vec<TypeDescriptor> = shape.all_of.iter().map(|m| self.node(m)).collect();
        let has_own_members = !shape.properties.is_empty();
        if has_own_members {
            members.push(TypeDescriptor::Object(self.object(shape)));
        }
        // required names declared beside the members, e.g. `{required: [name]}`
        let extra_required: Vec<&String> = shape
            .all_of
            .iter()
            .filter_map(|m| match m {
                SchemaNode::Shape(member) => Some(&member.required),
                _ => None,
            })
            .flatten()
            .chain(&shape.required)
            .collect();
        if members.len() == 1 && extra_required.is_empty() {
            return members.remove(0);
        }

        let mut merged: Option<ObjectType> = None;
        for member in &members {
            let Some(obj) = self.expanded(member).and_then(TypeDescriptor::as_object) else {
                continue;
            };
            let out = merged.get_or_insert_with(ObjectType::default);
            for (name, ty) in &obj.fields {
                // IndexMap::insert keeps the first position, replaces the value
                out.fields.insert(name.clone(), ty.clone());
            }
            for name in &obj.required {
                out.required.insert(name.clone());
            }
        }
        match merged {
            Some(mut obj) => {
                for name in extra_required {
                    if obj.fields.contains_key(name) {
                        obj.required.insert(name.clone());
                    }
                }
                TypeDescriptor::Object(obj)
            }
            None if members.windows(2).all(|w| w[0] == w[1]) => members.remove(0),
            None => TypeDescriptor::Untyped,
        }
    }

    fn union(&mut self, shape: &Shape) -> TypeDescriptor {
        let table = self.table;
        let mut branches = Vec::new();
        for branch in shape.one_of.iter().chain(shape.any_of.iter()) {
            if is_null_branch(table, branch) {
                continue;
            }
            branches.push(self.node(branch));
        }
        match branches.len() {
            0 => TypeDescriptor::Untyped,
            1 => branches.remove(0),
            _ => {
                let first = self.expanded(&branches[0]);
                let agree = matches!(first, Some(TypeDescriptor::Object(_)))
                    && branches[1..].iter().all(|b| self.expanded(b) == first);
                if agree { branches.remove(0) } else { TypeDescriptor::Untyped }
            }
        }
    }

    /// Shape behind a descriptor, or `None` while its target is still pending.
    fn expanded<'a>(&'a self, ty: &'a TypeDescriptor) -> Option<&'a TypeDescriptor> {
        if let TypeDescriptor::Named(id) = ty {
            if self.pending.contains(id) {
                return None;
            }
        }
        let resolved = self.arena.resolve(ty);
        match resolved {
            TypeDescriptor::Named(id) if self.pending.contains(id) => None,
            other => Some(other),
        }
    }
}

fn is_null_branch(table: &SchemaTable, node: &SchemaNode) -> bool {
    match node {
        SchemaNode::Shape(shape) => shape.is_null_only(),
        SchemaNode::Ref(reference) | SchemaNode::BackRef(reference) => match table.target(reference) {
            Some(SchemaNode::Shape(shape)) => shape.is_null_only(),
            _ => false,
        },
        _ => false,
    }
}

/// Stringified enum values: order kept, `null` dropped, duplicates dropped.
fn enum_strings(values: &[Value]) -> Vec<String> {
    let mut seen = IndexMap::<String, ()>::new();
    for value in values {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        seen.entry(text).or_insert(());
    }
    seen.into_keys().collect()
}
