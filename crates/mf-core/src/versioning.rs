//! Message versioning and conversion.
//!
//! Every [`crate::message::Envelope`] carries a version number in its
//! metadata under [`VERSION_METADATA_KEY`]; absence means version 1. A
//! [`ConverterRegistry`] holds `from -> to` converters between adjacent
//! versions and resolves a multi-hop upgrade path between two versions via
//! breadth-first search over the registered edges, the same "path search
//! over registered converters" the versioned-messages design calls for.
//! Circular edges are legal to register (nothing here forbids `2 -> 1`
//! alongside `1 -> 2`) but a path that would revisit a version is never
//! selected, so a registry with only circular edges and no forward path
//! simply reports no route.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub const VERSION_METADATA_KEY: &str = "_mf_version";

pub type MessageVersion = u16;

type ConvertFn = dyn Fn(Arc<dyn Any + Send + Sync>) -> Result<Arc<dyn Any + Send + Sync>, String> + Send + Sync;

struct Edge {
    to_version: MessageVersion,
    to_type: TypeId,
    convert: Arc<ConvertFn>,
}

/// Registers typed converters between payload versions and resolves
/// multi-hop conversion paths between them.
#[derive(Default)]
pub struct ConverterRegistry {
    // keyed by (type, version) node -> outgoing edges
    edges: HashMap<(TypeId, MessageVersion), Vec<Edge>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a converter from `From` at `from_version` to `To` at
    /// `to_version`. Both directions of a bidirectional migration must be
    /// registered separately.
    pub fn register<From, To, F>(&mut self, from_version: MessageVersion, to_version: MessageVersion, convert: F)
    where
        From: Send + Sync + 'static,
        To: Send + Sync + 'static,
        F: Fn(Arc<From>) -> To + Send + Sync + 'static,
    {
        let boxed: Arc<ConvertFn> = Arc::new(move |input: Arc<dyn Any + Send + Sync>| {
            let from = input
                .downcast::<From>()
                .map_err(|_| "converter input type mismatch".to_string())?;
            let output = convert(from);
            Ok(Arc::new(output) as Arc<dyn Any + Send + Sync>)
        });

        self.edges
            .entry((TypeId::of::<From>(), from_version))
            .or_default()
            .push(Edge {
                to_version,
                to_type: TypeId::of::<To>(),
                convert: boxed,
            });
    }

    /// Converts `value` of version `from_version` to `To` at
    /// `target_version`, following whatever path of registered converters
    /// connects them. Returns `None` if no path exists (including the
    /// degenerate case where `from_version == target_version` but the
    /// concrete type already matches `To` — callers should short-circuit
    /// that case themselves before calling `convert`).
    pub fn convert<From, To>(&self, value: From, from_version: MessageVersion, target_version: MessageVersion) -> Option<To>
    where
        From: Send + Sync + 'static,
        To: Clone + Send + Sync + 'static,
    {
        let start = (TypeId::of::<From>(), from_version);
        let target_type = TypeId::of::<To>();

        let path = self.shortest_path(start, target_type, target_version)?;

        let mut current: Arc<dyn Any + Send + Sync> = Arc::new(value);
        for edge in path {
            current = (edge.convert)(current).ok()?;
        }
        current.downcast_ref::<To>().cloned()
    }

    fn shortest_path(&self, start: (TypeId, MessageVersion), target_type: TypeId, target_version: MessageVersion) -> Option<Vec<&Edge>> {
        let mut visited = std::collections::HashSet::new();
        let mut queue: VecDeque<(TypeId, MessageVersion)> = VecDeque::new();
        let mut came_from: HashMap<(TypeId, MessageVersion), ((TypeId, MessageVersion), &Edge)> = HashMap::new();

        visited.insert(start);
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            if node == (target_type, target_version) {
                return Some(self.reconstruct_path(start, node, &came_from));
            }
            if let Some(edges) = self.edges.get(&node) {
                for edge in edges {
                    let next = (edge.to_type, edge.to_version);
                    if visited.insert(next) {
                        came_from.insert(next, (node, edge));
                        queue.push_back(next);
                    }
                }
            }
        }
        None
    }

    fn reconstruct_path<'a>(
        &self,
        start: (TypeId, MessageVersion),
        mut node: (TypeId, MessageVersion),
        came_from: &HashMap<(TypeId, MessageVersion), ((TypeId, MessageVersion), &'a Edge)>,
    ) -> Vec<&'a Edge> {
        let mut path = Vec::new();
        while node != start {
            let (prev, edge) = came_from[&node];
            path.push(edge);
            node = prev;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Clone)]
    struct V1 {
        name: String,
    }

    #[derive(Debug, PartialEq, Clone)]
    struct V2 {
        full_name: String,
    }

    #[derive(Debug, PartialEq, Clone)]
    struct V3 {
        full_name: String,
        normalized: bool,
    }

    #[test]
    fn direct_conversion() {
        let mut registry = ConverterRegistry::new();
        registry.register::<V1, V2, _>(1, 2, |v1| V2 { full_name: v1.name.clone() });

        let out: V2 = registry.convert(V1 { name: "ada".into() }, 1, 2).unwrap();
        assert_eq!(out.full_name, "ada");
    }

    #[test]
    fn multi_hop_conversion_resolves_automatically() {
        let mut registry = ConverterRegistry::new();
        registry.register::<V1, V2, _>(1, 2, |v1| V2 { full_name: v1.name.clone() });
        registry.register::<V2, V3, _>(2, 3, |v2| V3 {
            full_name: v2.full_name.clone(),
            normalized: true,
        });

        let out: V3 = registry.convert(V1 { name: "grace".into() }, 1, 3).unwrap();
        assert_eq!(out.full_name, "grace");
        assert!(out.normalized);
    }

    #[test]
    fn missing_path_returns_none() {
        let registry = ConverterRegistry::new();
        let out: Option<V2> = registry.convert(V1 { name: "x".into() }, 1, 2);
        assert!(out.is_none());
    }

    #[test]
    fn circular_edges_do_not_infinite_loop() {
        let mut registry = ConverterRegistry::new();
        registry.register::<V1, V1, _>(1, 1, |v1| V1 { name: v1.name.clone() });
        let out: Option<V2> = registry.convert(V1 { name: "x".into() }, 1, 2);
        assert!(out.is_none());
    }
}
