use log::{debug, info};
use thiserror::Error;

use crate::game::node::{DialogueNode, Emotion, Target};
use crate::game::session::{Grade, Message, SessionConfig, SessionState, Status};
use crate::game::tree::DialogueGraph;

/// Caller misuse. The presentation layer should never trigger these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("session has already ended")]
    SessionTerminated,
    #[error("choice '{choice}' is not offered by node '{node}'")]
    UnknownChoice { node: String, choice: String },
    #[error("node '{0}' is not part of this graph")]
    MissingNode(String),
}

/// Result of one accepted choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The conversation moved on to this node.
    Continue(String),
    /// Health reached zero.
    Failed,
    /// The graph ended with every required milestone earned.
    Cleared,
    /// The graph ended without these required milestones.
    Incomplete { missing: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintOutcome {
    /// Feedback text of the best choice at the current node.
    Granted(String),
    Denied,
}

/// Drives sessions over one dialogue graph.
#[derive(Debug, Clone)]
pub struct Engine<'g> {
    scenario_id: String,
    graph: &'g DialogueGraph,
    config: SessionConfig,
}

impl<'g> Engine<'g> {
    pub fn new(scenario_id: impl Into<String>, graph: &'g DialogueGraph, config: SessionConfig) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            graph,
            config,
        }
    }

    pub fn graph(&self) -> &'g DialogueGraph {
        self.graph
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Begin a session at the initial node with full health and hints.
    pub fn start(&self) -> SessionState {
        let initial = self.graph.initial_node_id();
        let mut state = SessionState::new(&self.scenario_id, initial, self.config);
        if let Some(node) = self.graph.get(initial) {
            state.push(Message::npc(node.npc.clone(), node.emotion));
        }
        info!(
            "Session started: scenario={} node={} health={} hints={}",
            self.scenario_id, initial, state.health, state.hints
        );
        state
    }

    /// Throw away `state` and begin again. Same as [`Engine::start`].
    pub fn reset(&self) -> SessionState {
        info!("Session reset: scenario={}", self.scenario_id);
        self.start()
    }

    /// The node the session is waiting on.
    pub fn current_node(&self, state: &SessionState) -> Result<&'g DialogueNode, EngineError> {
        if state.is_terminal() {
            return Err(EngineError::SessionTerminated);
        }
        let graph: &'g DialogueGraph = self.graph;
        let id = state
            .current_node_id()
            .ok_or(EngineError::SessionTerminated)?;
        graph
            .get(id)
            .ok_or_else(|| EngineError::MissingNode(id.to_string()))
    }

    /// Apply the user's choice. On error the state is left untouched.
    pub fn select_choice(
        &self,
        state: &mut SessionState,
        choice_id: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let node = self.current_node(state)?;
        let choice = node.choice(choice_id).ok_or_else(|| EngineError::UnknownChoice {
            node: node.id.clone(),
            choice: choice_id.to_string(),
        })?;
        let graph: &'g DialogueGraph = self.graph;
        let next = match &choice.next {
            Target::Node(next_id) => Some(
                graph
                    .get(next_id)
                    .ok_or_else(|| EngineError::MissingNode(next_id.clone()))?,
            ),
            Target::End => None,
        };

        state.push(Message::user(
            choice.line.clone(),
            Grade {
                choice_id: choice.id.clone(),
                quality: choice.quality,
                damage: choice.damage,
                feedback: choice.feedback.clone(),
            },
        ));

        let before = state.health;
        state.health = state.health.saturating_sub(choice.damage);
        debug!(
            "Choice {} ({}) at {}: health {} -> {}",
            choice.id, choice.quality, node.id, before, state.health
        );
        if state.health == 0 {
            info!("Session failed at node {} via {}", node.id, choice.id);
            state.terminate(Status::Failed);
            return Ok(TurnOutcome::Failed);
        }

        if let Some(tag) = &node.milestone {
            if choice.quality.earns_milestone() && state.milestones.insert(tag.clone()) {
                debug!("Milestone earned: {tag}");
            }
        }

        match next {
            Some(next) => {
                state.current_node_id = Some(next.id.clone());
                state.push(Message::npc(next.npc.clone(), choice.reaction));
                info!("Transition: {} -> {} (via {})", node.id, next.id, choice.id);
                Ok(TurnOutcome::Continue(next.id.clone()))
            }
            None => Ok(self.finish(state)),
        }
    }

    fn finish(&self, state: &mut SessionState) -> TurnOutcome {
        let missing: Vec<String> = self
            .graph
            .required_milestones()
            .difference(&state.milestones)
            .cloned()
            .collect();

        if missing.is_empty() {
            state.push(Message::npc(self.graph.success().clone(), Emotion::Happy));
            state.terminate(Status::Cleared);
            info!("Session cleared: scenario={}", self.scenario_id);
            TurnOutcome::Cleared
        } else {
            state.push(Message::system(format!(
                "The conversation ended before every objective was met. Missing: {}",
                missing.join(", ")
            )));
            state.terminate(Status::Incomplete {
                missing: missing.clone(),
            });
            info!(
                "Session ended incomplete: scenario={} missing={:?}",
                self.scenario_id, missing
            );
            TurnOutcome::Incomplete { missing }
        }
    }

    /// Spend one hint on the current node. Only the hint budget changes.
    pub fn use_hint(&self, state: &mut SessionState) -> HintOutcome {
        if state.hints == 0 {
            debug!("Hint denied: budget exhausted");
            return HintOutcome::Denied;
        }
        let node = match self.current_node(state) {
            Ok(node) => node,
            Err(err) => {
                debug!("Hint denied: {err}");
                return HintOutcome::Denied;
            }
        };
        let text = node
            .best_choice()
            .map(|c| c.feedback.clone())
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| "Pick the most natural expression.".to_string());

        state.hints -= 1;
        debug!("Hint used at {}: {} left", node.id, state.hints);
        HintOutcome::Granted(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::node::{Choice, Quality, Utterance};
    use crate::game::session::Role;

    /// purpose -> duration -> farewell -> END, with a recovery node after a
    /// poor purpose answer.
    fn immigration_graph() -> DialogueGraph {
        let nodes = vec![
            DialogueNode::new("purpose", "入国の目的は何ですか？")
                .with_milestone("purpose")
                .with_emotion(Emotion::Encouraging)
                .with_choice(
                    Choice::new("purpose-best", "観光です。", Quality::Best)
                        .with_feedback("'観光です' is the standard answer.")
                        .with_reaction(Emotion::Happy)
                        .with_next("duration"),
                )
                .with_choice(
                    Choice::new("purpose-ok", "旅行。", Quality::Acceptable)
                        .with_damage(5)
                        .with_next("duration"),
                )
                .with_choice(
                    Choice::new("purpose-poor", "えっと…", Quality::Poor)
                        .with_damage(15)
                        .with_reaction(Emotion::Confused)
                        .with_next("purpose-recovery"),
                ),
            DialogueNode::new("purpose-recovery", "目的は？観光ですか？")
                .with_choice(
                    Choice::new("recovery-best", "はい、観光です。", Quality::Best)
                        .with_next("duration"),
                )
                .with_choice(
                    Choice::new("recovery-poor", "…", Quality::Poor)
                        .with_damage(15)
                        .with_next("duration"),
                ),
            DialogueNode::new("duration", "何日間滞在しますか？")
                .with_milestone("duration")
                .with_choice(
                    Choice::new("duration-best", "一週間です。", Quality::Best)
                        .with_next("farewell"),
                )
                .with_choice(
                    Choice::new("duration-poor", "たくさん。", Quality::Poor)
                        .with_damage(20)
                        .with_next("farewell"),
                ),
            DialogueNode::new("farewell", "どうぞ。")
                .with_choice(Choice::new("farewell-best", "ありがとうございます。", Quality::Best))
                .with_choice(
                    Choice::new("farewell-poor", "（無言）", Quality::Poor).with_damage(10),
                ),
        ];
        DialogueGraph::new(
            "purpose",
            nodes,
            ["purpose", "duration"],
            Utterance::new("良い旅を！", "Have a good trip!", "yoi tabi wo"),
        )
        .unwrap()
    }

    /// Four chained nodes whose only poor option costs `damage`.
    fn gauntlet(damage: u32) -> DialogueGraph {
        let nodes = (1..=4).map(|i| {
            let next = if i == 4 { "END".to_string() } else { format!("n{}", i + 1) };
            DialogueNode::new(format!("n{i}"), "…")
                .with_choice(Choice::new(format!("n{i}-best"), "はい", Quality::Best).with_next(next.as_str()))
                .with_choice(
                    Choice::new(format!("n{i}-poor"), "いいえ", Quality::Poor)
                        .with_damage(damage)
                        .with_next(next.as_str()),
                )
        });
        DialogueGraph::new("n1", nodes, Vec::<String>::new(), Utterance::plain("おわり")).unwrap()
    }

    #[test]
    fn test_start_emits_initial_line() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let state = engine.start();

        assert_eq!(state.current_node_id(), Some("purpose"));
        assert_eq!(state.health(), 100);
        assert_eq!(state.hints(), 3);
        assert!(state.milestones().is_empty());
        assert_eq!(state.transcript().len(), 1);
        assert_eq!(state.transcript()[0].role, Role::Npc);
        assert_eq!(state.transcript()[0].line.text, "入国の目的は何ですか？");
        assert_eq!(state.transcript()[0].emotion, Some(Emotion::Encouraging));
    }

    #[test]
    fn test_reset_matches_fresh_start() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();
        engine.select_choice(&mut state, "purpose-poor").unwrap();
        engine.use_hint(&mut state);

        let reset = engine.reset();
        assert_eq!(reset, engine.start());
        assert_eq!(reset.transcript().len(), 1);
    }

    #[test]
    fn test_best_path_clears() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();

        assert_eq!(
            engine.select_choice(&mut state, "purpose-best").unwrap(),
            TurnOutcome::Continue("duration".into())
        );
        assert!(state.milestones().contains("purpose"));
        assert_eq!(state.health(), 100);

        engine.select_choice(&mut state, "duration-best").unwrap();
        let outcome = engine.select_choice(&mut state, "farewell-best").unwrap();
        assert_eq!(outcome, TurnOutcome::Cleared);
        assert!(state.is_cleared());
        assert_eq!(state.current_node_id(), None);

        let last = state.transcript().last().unwrap();
        assert_eq!(last.line.text, "良い旅を！");
        assert_eq!(last.emotion, Some(Emotion::Happy));

        let summary = state.summary();
        assert_eq!(summary.turns, 3);
        assert_eq!(summary.best_responses, 3);

        let before = state.clone();
        assert_eq!(
            engine.select_choice(&mut state, "farewell-best"),
            Err(EngineError::SessionTerminated)
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_npc_line_carries_choice_reaction() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();
        engine.select_choice(&mut state, "purpose-poor").unwrap();

        let transcript = state.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].role, Role::User);
        let grade = transcript[1].grade.as_ref().unwrap();
        assert_eq!(grade.quality, Quality::Poor);
        assert_eq!(grade.damage, 15);
        assert_eq!(transcript[2].emotion, Some(Emotion::Confused));
        assert_eq!(state.current_node_id(), Some("purpose-recovery"));
    }

    #[test]
    fn test_acceptable_earns_milestone_poor_does_not() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());

        let mut state = engine.start();
        engine.select_choice(&mut state, "purpose-ok").unwrap();
        assert!(state.milestones().contains("purpose"));
        assert_eq!(state.health(), 95);

        let mut state = engine.start();
        engine.select_choice(&mut state, "purpose-poor").unwrap();
        assert!(state.milestones().is_empty());
        // recovery node is not a checkpoint, even the best answer earns nothing
        engine.select_choice(&mut state, "recovery-best").unwrap();
        assert!(state.milestones().is_empty());
    }

    #[test]
    fn test_end_without_milestones_is_incomplete() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();

        engine.select_choice(&mut state, "purpose-best").unwrap();
        engine.select_choice(&mut state, "duration-poor").unwrap();
        let outcome = engine.select_choice(&mut state, "farewell-best").unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Incomplete {
                missing: vec!["duration".into()]
            }
        );
        assert!(state.is_terminal());
        assert!(!state.is_cleared());
        assert!(!state.is_failed());
        let last = state.transcript().last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.line.text.contains("duration"));

        assert_eq!(
            engine.select_choice(&mut state, "farewell-best"),
            Err(EngineError::SessionTerminated)
        );
    }

    #[test]
    fn test_fails_when_damage_reaches_max() {
        let graph = gauntlet(30);
        let engine = Engine::new("gauntlet", &graph, SessionConfig::default());
        let mut state = engine.start();

        for (i, expected) in [70, 40, 10].into_iter().enumerate() {
            let outcome = engine
                .select_choice(&mut state, &format!("n{}-poor", i + 1))
                .unwrap();
            assert!(matches!(outcome, TurnOutcome::Continue(_)));
            assert_eq!(state.health(), expected);
        }

        let before = state.transcript().len();
        let outcome = engine.select_choice(&mut state, "n4-poor").unwrap();
        assert_eq!(outcome, TurnOutcome::Failed);
        assert!(state.is_failed());
        assert_eq!(state.health(), 0);
        // only the user's line was recorded on the fatal turn
        assert_eq!(state.transcript().len(), before + 1);
        assert_eq!(state.current_node_id(), None);
    }

    #[test]
    fn test_failure_interrupts_before_end() {
        let graph = gauntlet(35);
        let engine = Engine::new("gauntlet", &graph, SessionConfig::default());
        let mut state = engine.start();

        engine.select_choice(&mut state, "n1-poor").unwrap();
        engine.select_choice(&mut state, "n2-poor").unwrap();
        assert_eq!(engine.select_choice(&mut state, "n3-poor").unwrap(), TurnOutcome::Failed);
        assert_eq!(
            engine.select_choice(&mut state, "n4-best"),
            Err(EngineError::SessionTerminated)
        );
        assert_eq!(state.health(), 0);
    }

    #[test]
    fn test_fatal_turn_grants_no_milestone() {
        let graph = immigration_graph();
        let config = SessionConfig {
            max_health: 5,
            max_hints: 1,
        };
        let engine = Engine::new("airport", &graph, config);
        let mut state = engine.start();
        assert_eq!(engine.select_choice(&mut state, "purpose-ok").unwrap(), TurnOutcome::Failed);
        assert!(state.milestones().is_empty());
    }

    #[test]
    fn test_health_and_milestones_are_monotonic() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();

        let mut health = state.health();
        let mut milestones = state.milestones().clone();
        for choice in ["purpose-ok", "duration-poor", "farewell-poor"] {
            engine.select_choice(&mut state, choice).unwrap();
            assert!(state.health() <= health);
            assert!(state.health() <= state.max_health());
            assert!(state.milestones().is_superset(&milestones));
            health = state.health();
            milestones = state.milestones().clone();
        }
        assert_eq!(state.health(), 65);
    }

    #[test]
    fn test_unknown_choice_leaves_state_untouched() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();
        let before = state.clone();

        let err = engine.select_choice(&mut state, "duration-best").unwrap_err();
        assert_eq!(
            err,
            EngineError::UnknownChoice {
                node: "purpose".into(),
                choice: "duration-best".into()
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_hint_only_spends_budget() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();
        let before = state.clone();

        let outcome = engine.use_hint(&mut state);
        assert_eq!(
            outcome,
            HintOutcome::Granted("'観光です' is the standard answer.".into())
        );
        assert_eq!(state.hints(), 2);
        assert_eq!(state.health(), before.health());
        assert_eq!(state.milestones(), before.milestones());
        assert_eq!(state.current_node_id(), before.current_node_id());
        assert_eq!(state.transcript(), before.transcript());
    }

    #[test]
    fn test_hint_denied_when_exhausted() {
        let graph = immigration_graph();
        let config = SessionConfig {
            max_health: 100,
            max_hints: 0,
        };
        let engine = Engine::new("airport", &graph, config);
        let mut state = engine.start();
        let before = state.clone();

        assert_eq!(engine.use_hint(&mut state), HintOutcome::Denied);
        assert_eq!(state, before);
    }

    #[test]
    fn test_hint_denied_after_end() {
        let graph = gauntlet(50);
        let engine = Engine::new("gauntlet", &graph, SessionConfig::default());
        let mut state = engine.start();
        engine.select_choice(&mut state, "n1-poor").unwrap();
        engine.select_choice(&mut state, "n2-poor").unwrap();
        assert!(state.is_failed());

        assert_eq!(engine.use_hint(&mut state), HintOutcome::Denied);
        assert_eq!(state.hints(), 3);
    }

    #[test]
    fn test_hint_fallback_text() {
        let graph = immigration_graph();
        let engine = Engine::new("airport", &graph, SessionConfig::default());
        let mut state = engine.start();
        engine.select_choice(&mut state, "purpose-best").unwrap();
        // duration-best has no authored feedback
        assert_eq!(
            engine.use_hint(&mut state),
            HintOutcome::Granted("Pick the most natural expression.".into())
        );
    }
}
