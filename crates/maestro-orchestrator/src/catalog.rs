//! Capability fusion: merge N node manifests into one command catalog.
//!
//! The build is deterministic (nodes iterated in declaration order, tokens
//! in manifest order) and has no side effects; it is simply re-run whenever
//! a node (re)connects.

use std::collections::HashMap;

use maestro_types::Manifest;

/// A point-in-time view of one configured node, detached from the live
/// connection so catalog construction and validation never block on I/O.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub alias: String,
    pub connected: bool,
    pub manifest: Option<Manifest>,
}

impl NodeSnapshot {
    pub fn connected(alias: &str, manifest: Manifest) -> Self {
        Self {
            alias: alias.to_string(),
            connected: true,
            manifest: Some(manifest),
        }
    }

    pub fn offline(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            connected: false,
            manifest: None,
        }
    }
}

/// How a bare token maps onto the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Exactly one node owns the token; it may be addressed without a
    /// target.
    Unique(&'a str),
    /// Two or more nodes own the token; a plan step must carry an explicit
    /// target.
    Ambiguous(&'a [String]),
    /// No connected node owns the token.
    Unknown,
}

/// Fused token → owning-aliases multi-map over the connected fleet.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Upper-cased token → aliases in declaration order.
    owners: HashMap<String, Vec<String>>,
    /// Tokens in first-seen order, for deterministic iteration.
    order: Vec<String>,
}

impl Catalog {
    /// Build the catalog from the connected nodes' manifests. Disconnected
    /// or manifest-less nodes contribute nothing.
    pub fn build(nodes: &[NodeSnapshot]) -> Self {
        let mut owners: HashMap<String, Vec<String>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for node in nodes {
            let Some(manifest) = node.manifest.as_ref().filter(|_| node.connected) else {
                continue;
            };
            for command in &manifest.commands {
                let token = command.token.to_uppercase();
                if !owners.contains_key(&token) {
                    order.push(token.clone());
                }
                let entry = owners.entry(token).or_default();
                if !entry.iter().any(|alias| alias == &node.alias) {
                    entry.push(node.alias.clone());
                }
            }
        }
        Catalog { owners, order }
    }

    /// All aliases owning `token`, declaration order. Empty when unknown.
    pub fn owners(&self, token: &str) -> &[String] {
        self.owners
            .get(&token.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn resolve(&self, token: &str) -> Resolution<'_> {
        match self.owners(token) {
            [] => Resolution::Unknown,
            [only] => Resolution::Unique(only),
            many => Resolution::Ambiguous(many),
        }
    }

    pub fn is_ambiguous(&self, token: &str) -> bool {
        self.owners(token).len() > 1
    }

    /// Tokens in first-seen order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
