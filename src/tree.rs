//! Request-builder tree: the declared paths folded segment by segment into
//! one navigation tree rooted at the API base URL.
use std::fmt::Write as _;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::bind::OperationDescriptor;
use crate::document::HttpMethod;
use crate::error::DuplicatePathError;

pub(crate) static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}/]+)\}").expect("placeholder pattern is valid"));

/// Placeholder names of a path template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Non-empty segments of a path; leading, trailing and doubled slashes are
/// dropped, so `/books/` and `/books` give the same sequence.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

// ————————————————————————————————————————————————————————————————————————————
// NODES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    Root,
    Literal,
    /// Segment text holds one or more `{name}` placeholders, e.g. `{id}` or
    /// `{id}.json`.
    Template { params: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    text: String,
    kind: SegmentKind,
    children: Vec<PathSegment>,
    operations: Vec<OperationDescriptor>,
    declared_path: Option<String>,
}

impl PathSegment {
    fn root() -> Self {
        Self::new(String::new(), SegmentKind::Root)
    }

    fn new(text: String, kind: SegmentKind) -> Self {
        Self {
            text,
            kind,
            children: Vec::new(),
            operations: Vec::new(),
            declared_path: None,
        }
    }

    fn from_text(text: &str) -> Self {
        let params = placeholders(text);
        let kind = if params.is_empty() {
            SegmentKind::Literal
        } else {
            SegmentKind::Template { params }
        };
        Self::new(text.to_string(), kind)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    pub fn is_template(&self) -> bool {
        matches!(self.kind, SegmentKind::Template { .. })
    }

    /// Placeholder names bound by this segment; empty for literals.
    pub fn params(&self) -> &[String] {
        match &self.kind {
            SegmentKind::Template { params } => params,
            _ => &[],
        }
    }

    /// Children in declaration order.
    pub fn children(&self) -> &[PathSegment] {
        &self.children
    }

    pub fn child(&self, text: &str) -> Option<&PathSegment> {
        self.children.iter().find(|c| c.text == text)
    }

    /// The templated child navigation steps into by default: the bare
    /// `{name}` segment when there is one, else the first templated child.
    pub fn template_child(&self) -> Option<&PathSegment> {
        self.template_children()
            .find(|c| c.is_bare_template())
            .or_else(|| self.template_children().next())
    }

    /// Templated children in declaration order. They all bind the same
    /// placeholder names and differ only in literal affixes, e.g. `{olid}`
    /// and `{olid}.json`.
    pub fn template_children(&self) -> impl Iterator<Item = &PathSegment> {
        self.children.iter().filter(|c| c.is_template())
    }

    fn is_bare_template(&self) -> bool {
        PLACEHOLDER.find(&self.text).is_some_and(|m| m.start() == 0 && m.end() == self.text.len())
    }

    /// Length of the literal text around the placeholders.
    fn affix_len(&self) -> usize {
        self.text.len() - PLACEHOLDER.find_iter(&self.text).map(|m| m.end() - m.start()).sum::<usize>()
    }

    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    pub fn operation(&self, method: HttpMethod) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| op.method == method)
    }

    /// The path declaration that ends at this node.
    pub fn declared_path(&self) -> Option<&str> {
        self.declared_path.as_deref()
    }

    /// Match one concrete segment against this node's text, capturing
    /// placeholder values for templates.
    fn capture(&self, concrete: &str) -> Option<Vec<(String, String)>> {
        match &self.kind {
            SegmentKind::Root => None,
            SegmentKind::Literal => (self.text == concrete).then(Vec::new),
            SegmentKind::Template { params } => {
                let mut pattern = String::from("^");
                let mut last = 0;
                for found in PLACEHOLDER.find_iter(&self.text) {
                    pattern.push_str(&regex::escape(&self.text[last..found.start()]));
                    pattern.push_str("(.+)");
                    last = found.end();
                }
                pattern.push_str(&regex::escape(&self.text[last..]));
                pattern.push('$');
                let caps = Regex::new(&pattern).ok()?.captures(concrete)?;
                let values = params
                    .iter()
                    .zip(caps.iter().skip(1))
                    .filter_map(|(name, value)| Some((name.clone(), value?.as_str().to_string())))
                    .collect();
                Some(values)
            }
        }
    }

    fn child_mut_or_insert(&mut self, text: &str, path: &str) -> Result<&mut PathSegment, DuplicatePathError> {
        if let Some(index) = self.children.iter().position(|c| c.text == text) {
            return Ok(&mut self.children[index]);
        }
        let child = PathSegment::from_text(text);
        if child.is_template() {
            if let Some(existing) = self.template_children().find(|c| c.params() != child.params()) {
                return Err(DuplicatePathError::TemplateConflict {
                    path: path.to_string(),
                    existing: existing.text.clone(),
                    segment: text.to_string(),
                });
            }
        }
        self.children.push(child);
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TREE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBuilderTree {
    root: PathSegment,
}

/// Result of [`RequestBuilderTree::match_path`].
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch<'t> {
    pub segment: &'t PathSegment,
    /// Captured placeholder values, outermost segment first.
    pub params: IndexMap<String, String>,
}

/// One node of a pre-order walk.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'t> {
    pub depth: usize,
    pub segment: &'t PathSegment,
}

impl RequestBuilderTree {
    pub fn root(&self) -> &PathSegment {
        &self.root
    }

    /// Node for a path template, e.g. `authors/{olid}`. Slashes are
    /// normalized the same way as at assembly.
    pub fn find(&self, template: &str) -> Option<&PathSegment> {
        split_path(template).try_fold(&self.root, |node, text| node.child(text))
    }

    /// Node for a concrete request path such as `authors/OL1A`. Literal
    /// children win over the templated child when both match.
    pub fn match_path(&self, concrete: &str) -> Option<PathMatch<'_>> {
        let segments: Vec<&str> = split_path(concrete).collect();
        let mut params = Vec::new();
        let segment = match_from(&self.root, &segments, &mut params)?;
        Some(PathMatch {
            segment,
            params: params.into_iter().collect(),
        })
    }

    /// Every node in pre-order, root first.
    pub fn walk(&self) -> Vec<Visit<'_>> {
        let mut out = Vec::new();
        let mut stack = vec![(0, &self.root)];
        while let Some((depth, segment)) = stack.pop() {
            out.push(Visit { depth, segment });
            for child in segment.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    pub fn operation_count(&self) -> usize {
        self.walk().iter().map(|v| v.segment.operations.len()).sum()
    }

    /// Indented outline of the tree, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for Visit { depth, segment } in self.walk() {
            let label = match segment.kind {
                SegmentKind::Root => "/",
                _ => segment.text.as_str(),
            };
            let _ = write!(out, "{}{}", "  ".repeat(depth), label);
            if !segment.operations.is_empty() {
                let methods: Vec<&str> = segment.operations.iter().map(|op| op.method.as_str()).collect();
                let _ = write!(out, "  [{}]", methods.join(", "));
            }
            out.push('\n');
        }
        out
    }
}

fn match_from<'t>(
    node: &'t PathSegment,
    rest: &[&str],
    params: &mut Vec<(String, String)>,
) -> Option<&'t PathSegment> {
    let Some((head, tail)) = rest.split_first() else {
        return Some(node);
    };
    if let Some(literal) = node.children.iter().find(|c| !c.is_template() && c.text == *head) {
        if let Some(found) = match_from(literal, tail, params) {
            return Some(found);
        }
    }
    // most literal text first, so `{id}.json` claims `42.json` before `{id}`
    let mut templates: Vec<&PathSegment> = node.template_children().collect();
    templates.sort_by_key(|t| std::cmp::Reverse(t.affix_len()));
    for template in templates {
        let Some(captured) = template.capture(head) else {
            continue;
        };
        let mark = params.len();
        params.extend(captured);
        if let Some(found) = match_from(template, tail, params) {
            return Some(found);
        }
        params.truncate(mark);
    }
    None
}

/// Fold declared paths into a tree and attach each operation to the node of
/// its path.
///
/// Every declared path is inserted, including ones whose operations all
/// failed to bind, so ambiguity is detected over the whole document.
pub fn assemble<'p, P>(declared: P, operations: Vec<OperationDescriptor>) -> Result<RequestBuilderTree, DuplicatePathError>
where
    P: IntoIterator<Item = &'p str>,
{
    let mut root = PathSegment::root();
    for path in declared {
        let mut node = &mut root;
        for text in split_path(path) {
            node = node.child_mut_or_insert(text, path)?;
        }
        if let Some(first) = &node.declared_path {
            return Err(DuplicatePathError::SamePath {
                first: first.clone(),
                second: path.to_string(),
            });
        }
        tracing::debug!(path, "inserted path");
        node.declared_path = Some(path.to_string());
    }

    for op in operations {
        let mut node = &mut root;
        for text in split_path(&op.path) {
            node = node.child_mut_or_insert(text, &op.path)?;
        }
        node.operations.push(op);
    }
    Ok(RequestBuilderTree { root })
}
