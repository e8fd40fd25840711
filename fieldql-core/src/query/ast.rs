//! Query tree definitions
//!
//! A `QueryNode` is the parsed form of one brace-delimited selector list.
//! Nodes are built once by the parser and are read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One level of a field-selection query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryNode {
    /// Whether `*` was given at this level
    #[serde(default)]
    wildcard: bool,
    /// Fields removed with `-name`
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    excluded: BTreeSet<String>,
    /// Fields named without a sub-query, first occurrence order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    flat: Vec<String>,
    /// Fields named with a sub-query, query order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    nested: Vec<NestedField>,
}

/// A relation field together with its sub-query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedField {
    pub name: String,
    pub query: QueryNode,
}

/// A field picked for output once a node is resolved against a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected<'a> {
    /// Relation expanded with a sub-query
    Nested { name: &'a str, query: &'a QueryNode },
    /// Field rendered as a plain value
    Flat(&'a str),
}

impl<'a> Selected<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Selected::Nested { name, .. } => name,
            Selected::Flat(name) => name,
        }
    }
}

/// Reason a selector cannot be added to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelectorConflict {
    DuplicateWildcard,
    FlatAndNested(String),
    NestedTwice(String),
}

impl QueryNode {
    /// Empty node: selects nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// The `{*}` node: selects every schema field
    pub fn all() -> Self {
        Self {
            wildcard: true,
            ..Self::default()
        }
    }

    /// Set the wildcard
    pub fn with_wildcard(mut self) -> Self {
        self.wildcard = true;
        self
    }

    /// Add a flat field; ignored when the name is already selected
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.contains_flat(&name) && self.get_nested(&name).is_none() {
            self.flat.push(name);
        }
        self
    }

    /// Add a nested field, replacing any earlier selector for the name
    pub fn with_nested(mut self, name: impl Into<String>, query: QueryNode) -> Self {
        let name = name.into();
        self.flat.retain(|field| *field != name);
        match self.nested.iter_mut().find(|nested| nested.name == name) {
            Some(existing) => existing.query = query,
            None => self.nested.push(NestedField { name, query }),
        }
        self
    }

    /// Exclude a field
    pub fn with_excluded(mut self, name: impl Into<String>) -> Self {
        self.excluded.insert(name.into());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    pub fn flat(&self) -> &[String] {
        &self.flat
    }

    pub fn nested(&self) -> &[NestedField] {
        &self.nested
    }

    /// Sub-query for a nested field
    pub fn get_nested(&self, name: &str) -> Option<&QueryNode> {
        self.nested
            .iter()
            .find(|nested| nested.name == name)
            .map(|nested| &nested.query)
    }

    fn contains_flat(&self, name: &str) -> bool {
        self.flat.iter().any(|field| field == name)
    }

    /// Whether the node can select nothing regardless of schema
    pub fn is_empty(&self) -> bool {
        !self.wildcard && self.flat.is_empty() && self.nested.is_empty()
    }

    /// Depth of the tree; a node without nested selectors has depth 1
    pub fn depth(&self) -> usize {
        1 + self
            .nested
            .iter()
            .map(|nested| nested.query.depth())
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn try_set_wildcard(&mut self) -> Result<(), SelectorConflict> {
        if self.wildcard {
            return Err(SelectorConflict::DuplicateWildcard);
        }
        self.wildcard = true;
        Ok(())
    }

    pub(crate) fn add_excluded(&mut self, name: &str) {
        self.excluded.insert(name.to_string());
    }

    pub(crate) fn try_add_flat(&mut self, name: &str) -> Result<(), SelectorConflict> {
        if self.get_nested(name).is_some() {
            return Err(SelectorConflict::FlatAndNested(name.to_string()));
        }
        if !self.contains_flat(name) {
            self.flat.push(name.to_string());
        }
        Ok(())
    }

    pub(crate) fn try_add_nested(
        &mut self,
        name: &str,
        query: QueryNode,
    ) -> Result<(), SelectorConflict> {
        if self.get_nested(name).is_some() {
            return Err(SelectorConflict::NestedTwice(name.to_string()));
        }
        if self.contains_flat(name) {
            return Err(SelectorConflict::FlatAndNested(name.to_string()));
        }
        self.nested.push(NestedField {
            name: name.to_string(),
            query,
        });
        Ok(())
    }

    /// Resolve the node against a schema's ordered field list.
    ///
    /// Nested selectors come first in query order. Plain fields follow: the
    /// schema order when the wildcard is set, then explicitly named fields
    /// not already covered, in query order. Excluded names never appear.
    pub fn resolve<'a>(&'a self, schema_fields: &'a [String]) -> Vec<Selected<'a>> {
        let mut selected: Vec<Selected<'a>> = self
            .nested
            .iter()
            .filter(|nested| !self.is_excluded(&nested.name))
            .map(|nested| Selected::Nested {
                name: &nested.name,
                query: &nested.query,
            })
            .collect();

        if self.wildcard {
            selected.extend(
                schema_fields
                    .iter()
                    .filter(|field| !self.is_excluded(field) && self.get_nested(field).is_none())
                    .map(|field| Selected::Flat(field.as_str())),
            );
            selected.extend(
                self.flat
                    .iter()
                    .filter(|field| !self.is_excluded(field) && !schema_fields.contains(field))
                    .map(|field| Selected::Flat(field.as_str())),
            );
        } else {
            selected.extend(
                self.flat
                    .iter()
                    .filter(|field| !self.is_excluded(field))
                    .map(|field| Selected::Flat(field.as_str())),
            );
        }

        selected
    }
}

impl fmt::Display for QueryNode {
    /// Canonical query text: `*`, flat fields, nested fields, exclusions
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if first {
                first = false;
                Ok(())
            } else {
                f.write_str(",")
            }
        };

        if self.wildcard {
            sep(f)?;
            f.write_str("*")?;
        }
        for field in &self.flat {
            sep(f)?;
            f.write_str(field)?;
        }
        for nested in &self.nested {
            sep(f)?;
            write!(f, "{}{}", nested.name, nested.query)?;
        }
        for field in &self.excluded {
            sep(f)?;
            write!(f, "-{}", field)?;
        }

        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn names<'a>(selected: &[Selected<'a>]) -> Vec<&'a str> {
        selected.iter().map(Selected::name).collect()
    }

    #[test]
    fn test_all_selects_schema_order() {
        let schema = fields(&["id", "name", "email"]);
        let node = QueryNode::all();
        assert_eq!(names(&node.resolve(&schema)), vec!["id", "name", "email"]);
    }

    #[test]
    fn test_empty_node_selects_nothing() {
        let schema = fields(&["id", "name"]);
        let node = QueryNode::new();
        assert!(node.is_empty());
        assert!(node.resolve(&schema).is_empty());
    }

    #[test]
    fn test_nested_before_flat() {
        let schema = fields(&["id", "name", "parent_id"]);
        let node = QueryNode::new()
            .with_field("name")
            .with_nested("parent_id", QueryNode::new().with_field("id"));
        let resolved = node.resolve(&schema);
        assert_eq!(names(&resolved), vec!["parent_id", "name"]);
        assert!(matches!(resolved[0], Selected::Nested { .. }));
    }

    #[test]
    fn test_wildcard_with_nested_does_not_repeat_field() {
        let schema = fields(&["id", "parent_id", "name"]);
        let node = QueryNode::all().with_nested("parent_id", QueryNode::all());
        assert_eq!(
            names(&node.resolve(&schema)),
            vec!["parent_id", "id", "name"]
        );
    }

    #[test]
    fn test_exclusion_wins() {
        let schema = fields(&["id", "name", "parent_id"]);
        let node = QueryNode::all()
            .with_field("name")
            .with_nested("parent_id", QueryNode::all())
            .with_excluded("name")
            .with_excluded("parent_id");
        assert_eq!(names(&node.resolve(&schema)), vec!["id"]);
    }

    #[test]
    fn test_wildcard_keeps_extra_names_for_lookup() {
        let schema = fields(&["id", "name"]);
        let node = QueryNode::all().with_field("nickname").with_field("name");
        assert_eq!(
            names(&node.resolve(&schema)),
            vec!["id", "name", "nickname"]
        );
    }

    #[test]
    fn test_with_field_collapses_duplicates() {
        let node = QueryNode::new()
            .with_field("name")
            .with_field("id")
            .with_field("name");
        assert_eq!(node.flat(), &["name".to_string(), "id".to_string()]);
    }

    #[test]
    fn test_try_add_conflicts() {
        let mut node = QueryNode::new();
        node.try_add_flat("name").unwrap();
        assert_eq!(
            node.try_add_nested("name", QueryNode::all()),
            Err(SelectorConflict::FlatAndNested("name".to_string()))
        );

        node.try_add_nested("parent_id", QueryNode::all()).unwrap();
        assert_eq!(
            node.try_add_nested("parent_id", QueryNode::new()),
            Err(SelectorConflict::NestedTwice("parent_id".to_string()))
        );
        assert_eq!(
            node.try_add_flat("parent_id"),
            Err(SelectorConflict::FlatAndNested("parent_id".to_string()))
        );

        node.try_set_wildcard().unwrap();
        assert_eq!(node.try_set_wildcard(), Err(SelectorConflict::DuplicateWildcard));
    }

    #[test]
    fn test_display_canonical_form() {
        let node = QueryNode::new()
            .with_excluded("email")
            .with_nested("child_ids", QueryNode::new().with_field("name"))
            .with_field("name")
            .with_wildcard();
        assert_eq!(node.to_string(), "{*,name,child_ids{name},-email}");
        assert_eq!(QueryNode::new().to_string(), "{}");
    }

    #[test]
    fn test_depth() {
        let node = QueryNode::all().with_nested(
            "child_ids",
            QueryNode::new().with_nested("parent_id", QueryNode::all()),
        );
        assert_eq!(node.depth(), 3);
        assert_eq!(QueryNode::all().depth(), 1);
    }

    #[test]
    fn test_serde_shape() {
        let node = QueryNode::all().with_nested("parent_id", QueryNode::new().with_field("id"));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "wildcard": true,
                "nested": [{"name": "parent_id", "query": {"wildcard": false, "flat": ["id"]}}]
            })
        );
        let back: QueryNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
