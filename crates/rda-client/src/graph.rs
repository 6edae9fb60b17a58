//! The template graph model: a DAG of image-processing operators.
//!
//! Decoding validates the structure (unique node ids, resolvable edge
//! endpoints, no directed cycles) and picks a default node; encoding
//! re-serializes to the wire format with synthetic edge ids.

use std::collections::BTreeMap;
use std::collections::HashMap;

use rda_common::{RdaError, RdaResult};
use serde::{Deserialize, Serialize};

/// The wire representation the RDA API uses for a graph/template.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireGraph {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_node_id: Option<String>,
    edges: Vec<WireEdge>,
    nodes: Vec<WireNode>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireEdge {
    /// Never consumed by us, but the API expects it.
    id: String,
    /// The order in which this edge feeds its destination node.
    index: i64,
    source: String,
    destination: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireNode {
    id: String,
    operator: String,
    parameters: BTreeMap<String, String>,
}

/// A node in a template graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub operator: String,
    pub parameters: BTreeMap<String, String>,
}

/// An outgoing edge in the adjacency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Index of the destination node.
    pub dest: usize,
    /// Order in which this edge feeds the destination node.
    pub input_index: i64,
}

/// A validated RDA template graph.
#[derive(Debug, Clone)]
pub struct TemplateGraph {
    nodes: Vec<Node>,

    /// Adjacency list keyed by source node index. Within each destination,
    /// incoming edges are ordered by `input_index`.
    edges: Vec<Vec<Edge>>,

    /// Index of the node evaluated when no node id is given.
    default_node: usize,
}

impl TemplateGraph {
    /// Decode and validate a template graph from its JSON wire form.
    pub fn from_json(s: &str) -> RdaResult<TemplateGraph> {
        let wire: WireGraph = serde_json::from_str(s)?;
        Self::from_wire(wire)
    }

    /// Serialize back to the JSON wire form.
    pub fn to_json(&self) -> RdaResult<String> {
        serde_json::to_string_pretty(self).map_err(RdaError::from)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn default_node(&self) -> &Node {
        &self.nodes[self.default_node]
    }

    /// Outgoing edges of the node at `idx`.
    pub fn edges_from(&self, idx: usize) -> &[Edge] {
        &self.edges[idx]
    }

    pub fn num_edges(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    fn from_wire(mut wire: WireGraph) -> RdaResult<TemplateGraph> {
        // Edges sharing a destination must be ordered by their input index
        // in the adjacency list.
        wire.edges
            .sort_by(|a, b| (&a.destination, a.index).cmp(&(&b.destination, b.index)));

        let mut nodes = Vec::with_capacity(wire.nodes.len());
        let mut id_to_idx: HashMap<String, usize> = HashMap::with_capacity(wire.nodes.len());
        for (i, n) in wire.nodes.into_iter().enumerate() {
            id_to_idx.insert(n.id.clone(), i);
            nodes.push(Node {
                id: n.id,
                operator: n.operator,
                parameters: n.parameters,
            });
        }
        if id_to_idx.len() != nodes.len() {
            return Err(RdaError::DuplicateNode {
                unique: id_to_idx.len(),
                total: nodes.len(),
            });
        }

        let mut edges: Vec<Vec<Edge>> = vec![Vec::new(); nodes.len()];
        for e in &wire.edges {
            let src = *id_to_idx
                .get(&e.source)
                .ok_or_else(|| RdaError::UnknownEndpoint(e.source.clone()))?;
            let dest = *id_to_idx
                .get(&e.destination)
                .ok_or_else(|| RdaError::UnknownEndpoint(e.destination.clone()))?;
            edges[src].push(Edge {
                dest,
                input_index: e.index,
            });
        }

        let mut graph = TemplateGraph {
            nodes,
            edges,
            default_node: 0,
        };

        // Cycle check and longest-path default selection in one DFS.
        let default_node = graph.find_default_node()?;

        // An explicit default node id from the body wins.
        graph.default_node = match wire.default_node_id.as_deref() {
            Some(id) if !id.is_empty() => *id_to_idx
                .get(id)
                .ok_or_else(|| RdaError::UnknownEndpoint(id.to_string()))?,
            _ => default_node,
        };

        Ok(graph)
    }

    /// Verify the graph is a DAG and return the index of the terminal node
    /// with the longest path from any source, ties broken by insertion
    /// order.
    fn find_default_node(&self) -> RdaResult<usize> {
        let mut dfs = Dfs::new(self.nodes.len());
        for idx in 0..self.nodes.len() {
            if dfs.cycle.is_some() {
                break;
            }
            if dfs.marked[idx] {
                continue;
            }
            dfs.visit(&self.edges, idx);
        }
        if let Some(cycle) = dfs.cycle {
            let ids = cycle.iter().map(|&i| self.nodes[i].id.clone()).collect();
            return Err(RdaError::Cycle(ids));
        }

        // Walking the post-order in reverse visits every node before its
        // successors, so one pass cascades longest-path distances.
        let mut dist = vec![0usize; self.nodes.len()];
        for i in (0..dfs.post_order.len()).rev() {
            let idx = dfs.post_order[i];
            for e in &self.edges[idx] {
                dist[e.dest] = dist[e.dest].max(dist[idx] + 1);
            }
        }

        let mut max_node = 0;
        let mut max_dist = 0;
        for (i, &d) in dist.iter().enumerate() {
            if !self.edges[i].is_empty() || max_dist >= d {
                continue;
            }
            max_dist = d;
            max_node = i;
        }
        Ok(max_node)
    }
}

impl Serialize for TemplateGraph {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut wire = WireGraph {
            id: None,
            default_node_id: Some(self.nodes[self.default_node].id.clone()),
            edges: Vec::with_capacity(self.num_edges()),
            nodes: Vec::with_capacity(self.nodes.len()),
        };
        for n in &self.nodes {
            wire.nodes.push(WireNode {
                id: n.id.clone(),
                operator: n.operator.clone(),
                parameters: n.parameters.clone(),
            });
        }
        let mut edge_num = 0;
        for (src, edge_list) in self.edges.iter().enumerate() {
            for e in edge_list {
                wire.edges.push(WireEdge {
                    id: edge_num.to_string(),
                    index: e.input_index,
                    source: self.nodes[src].id.clone(),
                    destination: self.nodes[e.dest].id.clone(),
                });
                edge_num += 1;
            }
        }
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TemplateGraph {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = WireGraph::deserialize(deserializer)?;
        TemplateGraph::from_wire(wire).map_err(serde::de::Error::custom)
    }
}

/// DFS state for cycle detection and post-order recording.
struct Dfs {
    on_stack: Vec<bool>,
    marked: Vec<bool>,
    edge_to: Vec<usize>,
    cycle: Option<Vec<usize>>,
    post_order: Vec<usize>,
}

impl Dfs {
    fn new(num_nodes: usize) -> Dfs {
        Dfs {
            on_stack: vec![false; num_nodes],
            marked: vec![false; num_nodes],
            edge_to: vec![0; num_nodes],
            cycle: None,
            post_order: Vec::with_capacity(num_nodes),
        }
    }

    fn visit(&mut self, edges: &[Vec<Edge>], idx: usize) {
        self.on_stack[idx] = true;
        self.marked[idx] = true;
        for e in &edges[idx] {
            if self.cycle.is_some() {
                break;
            }
            if !self.marked[e.dest] {
                self.edge_to[e.dest] = idx;
                self.visit(edges, e.dest);
            } else if self.on_stack[e.dest] {
                // Back edge: reconstruct the ring by walking the
                // predecessor chain from here back to the re-encountered
                // node.
                let mut ring = vec![idx];
                let mut x = idx;
                while x != e.dest {
                    x = self.edge_to[x];
                    ring.push(x);
                }
                ring.reverse();
                ring.push(ring[0]);
                self.cycle = Some(ring);
            }
        }
        self.on_stack[idx] = false;
        self.post_order.push(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_json() -> &'static str {
        r#"{
            "defaultNodeId": null,
            "edges": [
                {"id": "e2", "index": 1, "source": "b", "destination": "c"},
                {"id": "e1", "index": 1, "source": "a", "destination": "b"}
            ],
            "nodes": [
                {"id": "a", "operator": "DigitalGlobeStrip",
                 "parameters": {"catalogId": "103001000EBC3C00", "bands": "MS"}},
                {"id": "b", "operator": "Orthorectify", "parameters": {}},
                {"id": "c", "operator": "HistogramDRA", "parameters": {}}
            ]
        }"#
    }

    #[test]
    fn test_decode_chain() {
        let g = TemplateGraph::from_json(chain_json()).unwrap();
        assert_eq!(g.nodes().len(), 3);
        assert_eq!(g.num_edges(), 2);
        assert_eq!(g.default_node().id, "c");
        assert_eq!(
            g.nodes()[0].parameters.get("bands").map(String::as_str),
            Some("MS")
        );
    }

    #[test]
    fn test_explicit_default_node_wins() {
        let with_default = chain_json().replace(r#""defaultNodeId": null"#, r#""defaultNodeId": "b""#);
        let g = TemplateGraph::from_json(&with_default).unwrap();
        assert_eq!(g.default_node().id, "b");
    }

    #[test]
    fn test_unknown_default_node() {
        let with_default =
            chain_json().replace(r#""defaultNodeId": null"#, r#""defaultNodeId": "zzz""#);
        let err = TemplateGraph::from_json(&with_default).unwrap_err();
        assert!(matches!(err, RdaError::UnknownEndpoint(id) if id == "zzz"));
    }

    #[test]
    fn test_duplicate_node_ids() {
        let g = TemplateGraph::from_json(
            r#"{
                "nodes": [
                    {"id": "a", "operator": "X", "parameters": {}},
                    {"id": "a", "operator": "Y", "parameters": {}}
                ],
                "edges": []
            }"#,
        );
        assert!(matches!(
            g,
            Err(RdaError::DuplicateNode { unique: 1, total: 2 })
        ));
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let g = TemplateGraph::from_json(
            r#"{
                "nodes": [{"id": "a", "operator": "X", "parameters": {}}],
                "edges": [{"id": "0", "index": 1, "source": "a", "destination": "ghost"}]
            }"#,
        );
        assert!(matches!(g, Err(RdaError::UnknownEndpoint(id)) if id == "ghost"));
    }

    #[test]
    fn test_cycle_is_reported_in_order() {
        let g = TemplateGraph::from_json(
            r#"{
                "nodes": [
                    {"id": "a", "operator": "X", "parameters": {}},
                    {"id": "b", "operator": "Y", "parameters": {}},
                    {"id": "c", "operator": "Z", "parameters": {}}
                ],
                "edges": [
                    {"id": "0", "index": 1, "source": "a", "destination": "b"},
                    {"id": "1", "index": 1, "source": "b", "destination": "c"},
                    {"id": "2", "index": 1, "source": "c", "destination": "a"}
                ]
            }"#,
        );
        match g {
            Err(RdaError::Cycle(ids)) => {
                assert_eq!(ids.len(), 4);
                assert_eq!(ids.first(), ids.last());
                // All three nodes participate in the ring.
                for id in ["a", "b", "c"] {
                    assert!(ids.iter().any(|i| i == id), "missing {} in {:?}", id, ids);
                }
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    /// A nontrivial DAG: node 12 is the terminal reachable through the
    /// longest chain (8 -> 7 -> 6 -> 9 -> 11 -> 12) and must win over the
    /// other terminals (1, 4, 10).
    #[test]
    fn test_longest_path_default_node() {
        let mut nodes = Vec::new();
        for i in 0..13 {
            nodes.push(serde_json::json!({
                "id": format!("n{}", i), "operator": "Op", "parameters": {}
            }));
        }
        let edge_pairs = [
            (0, 1),
            (0, 6),
            (2, 0),
            (2, 3),
            (3, 5),
            (5, 4),
            (6, 4),
            (6, 9),
            (7, 6),
            (8, 7),
            (9, 10),
            (9, 11),
            (9, 12),
            (11, 12),
        ];
        let edges: Vec<_> = edge_pairs
            .iter()
            .enumerate()
            .map(|(i, (s, d))| {
                serde_json::json!({
                    "id": i.to_string(), "index": 1,
                    "source": format!("n{}", s), "destination": format!("n{}", d)
                })
            })
            .collect();

        let doc = serde_json::json!({"nodes": nodes, "edges": edges});
        let g = TemplateGraph::from_json(&doc.to_string()).unwrap();
        assert_eq!(g.default_node().id, "n12");
    }

    #[test]
    fn test_incoming_edges_ordered_by_input_index() {
        // Edges arrive with indices out of order; the adjacency list must
        // feed the destination in index order.
        let g = TemplateGraph::from_json(
            r#"{
                "nodes": [
                    {"id": "left", "operator": "X", "parameters": {}},
                    {"id": "right", "operator": "Y", "parameters": {}},
                    {"id": "merge", "operator": "Mosaic", "parameters": {}}
                ],
                "edges": [
                    {"id": "0", "index": 2, "source": "right", "destination": "merge"},
                    {"id": "1", "index": 1, "source": "left", "destination": "merge"}
                ]
            }"#,
        )
        .unwrap();

        // Re-encode and verify the serialized edge order per destination.
        let encoded = g.to_json().unwrap();
        let wire: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        let indices: Vec<i64> = wire["edges"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["index"].as_i64().unwrap())
            .collect();
        let sources: Vec<&str> = wire["edges"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["source"].as_str().unwrap())
            .collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(sources, vec!["left", "right"]);
    }

    #[test]
    fn test_round_trip() {
        let g = TemplateGraph::from_json(chain_json()).unwrap();
        let encoded = g.to_json().unwrap();
        let g2 = TemplateGraph::from_json(&encoded).unwrap();

        assert_eq!(g.nodes(), g2.nodes());
        assert_eq!(g.default_node().id, g2.default_node().id);
        for i in 0..g.nodes().len() {
            assert_eq!(g.edges_from(i), g2.edges_from(i));
        }

        // Synthetic edge ids are monotonically increasing strings.
        let wire: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        let ids: Vec<&str> = wire["edges"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["0", "1"]);
    }
}
