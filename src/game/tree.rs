use std::collections::{BTreeSet, HashMap, HashSet};

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::game::node::{DialogueNode, Quality, Target, Utterance};

pub const MIN_CHOICES: usize = 2;
pub const MAX_CHOICES: usize = 3;

/// Authoring mistakes found while building a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("initial node '{0}' does not exist")]
    MissingInitialNode(String),
    #[error("node '{0}' is defined more than once")]
    DuplicateNode(String),
    #[error("node '{node}' has {count} choices (expected 2 to 3)")]
    ChoiceCount { node: String, count: usize },
    #[error("node '{node}' repeats choice id '{choice}'")]
    DuplicateChoice { node: String, choice: String },
    #[error("choice '{choice}' in node '{node}' points at unknown node '{target}'")]
    DanglingTarget {
        node: String,
        choice: String,
        target: String,
    },
    #[error("choice '{choice}' in node '{node}' has damage {damage} out of order for quality {quality}")]
    DamageOrder {
        node: String,
        choice: String,
        quality: Quality,
        damage: u32,
    },
    #[error("node '{0}' has an empty milestone tag")]
    EmptyMilestone(String),
    #[error("required milestone '{0}' is not awarded by any node")]
    UnawardedMilestone(String),
}

/// The full scenario graph: a map of node-id -> DialogueNode.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "GraphDocument")]
pub struct DialogueGraph {
    nodes: HashMap<String, DialogueNode>,
    initial_node_id: String,
    required_milestones: BTreeSet<String>,
    success: Utterance,
}

/// On-disk shape: nodes as a list so ids are authored next to their content.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphDocument {
    pub initial_node: String,
    #[serde(default)]
    pub required_milestones: BTreeSet<String>,
    pub success: Utterance,
    pub nodes: Vec<DialogueNode>,
}

impl TryFrom<GraphDocument> for DialogueGraph {
    type Error = GraphError;

    fn try_from(doc: GraphDocument) -> Result<Self, Self::Error> {
        Self::new(doc.initial_node, doc.nodes, doc.required_milestones, doc.success)
    }
}

impl DialogueGraph {
    /// Build and validate a graph. A `DialogueGraph` value is always valid.
    pub fn new(
        initial_node_id: impl Into<String>,
        nodes: impl IntoIterator<Item = DialogueNode>,
        required_milestones: impl IntoIterator<Item = impl Into<String>>,
        success: Utterance,
    ) -> Result<Self, GraphError> {
        let mut map = HashMap::new();
        for node in nodes {
            if map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            map.insert(node.id.clone(), node);
        }

        let graph = Self {
            nodes: map,
            initial_node_id: initial_node_id.into(),
            required_milestones: required_milestones.into_iter().map(Into::into).collect(),
            success,
        };
        graph.validate()?;
        Ok(graph)
    }

    pub fn get(&self, id: &str) -> Option<&DialogueNode> {
        self.nodes.get(id)
    }

    pub fn initial_node_id(&self) -> &str {
        &self.initial_node_id
    }

    pub fn required_milestones(&self) -> &BTreeSet<String> {
        &self.required_milestones
    }

    /// NPC narration shown once the graph ends with every milestone earned.
    pub fn success(&self) -> &Utterance {
        &self.success
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn validate(&self) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&self.initial_node_id) {
            return Err(GraphError::MissingInitialNode(self.initial_node_id.clone()));
        }

        let mut awarded = HashSet::new();
        for node in self.nodes.values() {
            self.validate_node(node)?;
            if let Some(tag) = &node.milestone {
                awarded.insert(tag.as_str());
            }
        }

        if let Some(tag) = self
            .required_milestones
            .iter()
            .find(|tag| !awarded.contains(tag.as_str()))
        {
            return Err(GraphError::UnawardedMilestone(tag.clone()));
        }

        let reachable = self.reachable();
        let mut orphans: Vec<&str> = self
            .nodes
            .keys()
            .filter(|id| !reachable.contains(id.as_str()))
            .map(String::as_str)
            .collect();
        if !orphans.is_empty() {
            orphans.sort_unstable();
            warn!("Unreachable nodes from '{}': {:?}", self.initial_node_id, orphans);
        }

        Ok(())
    }

    fn validate_node(&self, node: &DialogueNode) -> Result<(), GraphError> {
        let count = node.choices.len();
        if !(MIN_CHOICES..=MAX_CHOICES).contains(&count) {
            return Err(GraphError::ChoiceCount {
                node: node.id.clone(),
                count,
            });
        }

        if matches!(&node.milestone, Some(tag) if tag.trim().is_empty()) {
            return Err(GraphError::EmptyMilestone(node.id.clone()));
        }

        let mut seen = HashSet::new();
        for choice in &node.choices {
            if !seen.insert(choice.id.as_str()) {
                return Err(GraphError::DuplicateChoice {
                    node: node.id.clone(),
                    choice: choice.id.clone(),
                });
            }
            if let Target::Node(target) = &choice.next {
                if !self.nodes.contains_key(target) {
                    return Err(GraphError::DanglingTarget {
                        node: node.id.clone(),
                        choice: choice.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // best => 0, poor => > 0, and no better tier may hurt more than a worse one.
        for choice in &node.choices {
            let out_of_order = match choice.quality {
                Quality::Best => choice.damage != 0,
                Quality::Poor => choice.damage == 0,
                Quality::Acceptable => false,
            } || node
                .choices
                .iter()
                .any(|other| other.quality > choice.quality && other.damage < choice.damage);

            if out_of_order {
                return Err(GraphError::DamageOrder {
                    node: node.id.clone(),
                    choice: choice.id.clone(),
                    quality: choice.quality,
                    damage: choice.damage,
                });
            }
        }

        Ok(())
    }

    fn reachable(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.initial_node_id.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                for choice in &node.choices {
                    if let Target::Node(next) = &choice.next {
                        stack.push(next.as_str());
                    }
                }
            }
        }
        seen
    }

    /// Count the number of turns on the longest acyclic path from the
    /// initial node to `END` (the most choices a player can make).
    pub fn total_steps(&self) -> usize {
        let mut path = HashSet::new();
        self.longest_path(&self.initial_node_id, &mut path)
    }

    fn longest_path<'a>(&'a self, node_id: &'a str, path: &mut HashSet<&'a str>) -> usize {
        let node = match self.nodes.get(node_id) {
            Some(n) => n,
            None => return 0,
        };
        if !path.insert(node_id) {
            return 0;
        }
        let max_child = node
            .choices
            .iter()
            .map(|choice| match &choice.next {
                Target::End => 0,
                Target::Node(next) => self.longest_path(next, path),
            })
            .max()
            .unwrap_or(0);
        path.remove(node_id);
        1 + max_child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::node::Choice;

    fn two_step_nodes() -> Vec<DialogueNode> {
        vec![
            DialogueNode::new("a", "パスポートを見せてください。")
                .with_milestone("passport")
                .with_choice(Choice::new("a-best", "はい、どうぞ。", Quality::Best).with_next("b"))
                .with_choice(
                    Choice::new("a-poor", "なに？", Quality::Poor)
                        .with_damage(15)
                        .with_next("b"),
                ),
            DialogueNode::new("b", "ようこそ。")
                .with_choice(Choice::new("b-best", "ありがとうございます。", Quality::Best))
                .with_choice(
                    Choice::new("b-ok", "どうも。", Quality::Acceptable).with_damage(5),
                ),
        ]
    }

    #[test]
    fn test_valid_graph() {
        let graph =
            DialogueGraph::new("a", two_step_nodes(), ["passport"], Utterance::plain("done"))
                .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.initial_node_id(), "a");
        assert!(graph.required_milestones().contains("passport"));
        assert_eq!(graph.total_steps(), 2);
    }

    #[test]
    fn test_missing_initial_node() {
        let err = DialogueGraph::new("zzz", two_step_nodes(), ["passport"], Utterance::default())
            .unwrap_err();
        assert_eq!(err, GraphError::MissingInitialNode("zzz".into()));
    }

    #[test]
    fn test_dangling_target() {
        let mut nodes = two_step_nodes();
        nodes[1].choices[0].next = Target::Node("nowhere".into());
        let err = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap_err();
        assert!(matches!(err, GraphError::DanglingTarget { ref target, .. } if target == "nowhere"));
    }

    #[test]
    fn test_damage_order_violations() {
        let mut nodes = two_step_nodes();
        nodes[0].choices[0].damage = 5;
        let err = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap_err();
        assert!(matches!(err, GraphError::DamageOrder { quality: Quality::Best, .. }));

        let mut nodes = two_step_nodes();
        nodes[0].choices[1].damage = 0;
        let err = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap_err();
        assert!(matches!(err, GraphError::DamageOrder { quality: Quality::Poor, .. }));

        // acceptable hurting more than poor
        let mut nodes = two_step_nodes();
        nodes[0].choices.push(
            Choice::new("a-ok", "はい", Quality::Acceptable)
                .with_damage(20)
                .with_next("b"),
        );
        let err = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap_err();
        assert!(matches!(err, GraphError::DamageOrder { .. }));
    }

    #[test]
    fn test_choice_count_and_duplicates() {
        let mut nodes = two_step_nodes();
        nodes[1].choices.truncate(1);
        let err = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap_err();
        assert_eq!(err, GraphError::ChoiceCount { node: "b".into(), count: 1 });

        let mut nodes = two_step_nodes();
        nodes[1].choices[1].id = "b-best".into();
        let err = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateChoice { .. }));

        let mut nodes = two_step_nodes();
        nodes.push(nodes[1].clone());
        let err = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("b".into()));
    }

    #[test]
    fn test_required_milestone_must_be_awarded() {
        let err = DialogueGraph::new("a", two_step_nodes(), ["passport", "purpose"], Utterance::default())
            .unwrap_err();
        assert_eq!(err, GraphError::UnawardedMilestone("purpose".into()));
    }

    #[test]
    fn test_total_steps_survives_cycles() {
        let mut nodes = two_step_nodes();
        // b loops back to a on the acceptable answer
        nodes[1].choices[1].next = Target::Node("a".into());
        let graph = DialogueGraph::new("a", nodes, ["passport"], Utterance::default()).unwrap();
        assert_eq!(graph.total_steps(), 2);
    }

    #[test]
    fn test_deserialize_document() {
        let json = r#"{
            "initial_node": "a",
            "required_milestones": ["greet"],
            "success": {"text": "またどうぞ", "translation": "Come again"},
            "nodes": [
                {"id": "a", "npc": {"text": "いらっしゃいませ"}, "milestone": "greet",
                 "choices": [
                    {"id": "a1", "text": "こんにちは", "quality": "best", "next": "END"},
                    {"id": "a2", "text": "…", "quality": "bad", "damage": 10, "next": "END"}
                 ]}
            ]
        }"#;
        let graph: DialogueGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.success().translation, "Come again");
        assert_eq!(graph.total_steps(), 1);

        let broken = json.replace(r#""initial_node": "a""#, r#""initial_node": "x""#);
        assert!(serde_json::from_str::<DialogueGraph>(&broken).is_err());
    }
}
