use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::game::node::{Emotion, Quality, Utterance};

/// Limits applied to every new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_health: u32,
    pub max_hints: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_health: 100,
            max_hints: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Npc,
    User,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub line: Utterance,
    /// NPC lines only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    /// User lines only: the graded response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<Grade>,
}

/// How a user line was judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub choice_id: String,
    pub quality: Quality,
    pub damage: u32,
    pub feedback: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            line: Utterance::plain(text),
            emotion: None,
            grade: None,
        }
    }

    pub fn npc(line: Utterance, emotion: Emotion) -> Self {
        Self {
            role: Role::Npc,
            line,
            emotion: Some(emotion),
            grade: None,
        }
    }

    pub fn user(line: Utterance, grade: Grade) -> Self {
        Self {
            role: Role::User,
            line,
            emotion: None,
            grade: Some(grade),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::System => "system",
            Role::Npc => "npc",
            Role::User => "user",
        };
        write!(f, "[{}]: {}", role, self.line.text)
    }
}

/// Where the session stands. Every variant except `InProgress` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Status {
    InProgress,
    /// Health reached zero.
    Failed,
    /// The graph ended with every required milestone earned.
    Cleared,
    /// The graph ended but some required milestones were never earned.
    Incomplete { missing: Vec<String> },
}

/// Per-playthrough engine state. Only the engine mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub(crate) scenario_id: String,
    pub(crate) current_node_id: Option<String>,
    pub(crate) milestones: BTreeSet<String>,
    pub(crate) health: u32,
    pub(crate) max_health: u32,
    pub(crate) hints: u32,
    pub(crate) transcript: Vec<Message>,
    pub(crate) status: Status,
}

impl SessionState {
    pub(crate) fn new(scenario_id: &str, initial_node_id: &str, config: SessionConfig) -> Self {
        Self {
            scenario_id: scenario_id.to_string(),
            current_node_id: Some(initial_node_id.to_string()),
            milestones: BTreeSet::new(),
            health: config.max_health,
            max_health: config.max_health,
            hints: config.max_hints,
            transcript: Vec::new(),
            status: Status::InProgress,
        }
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    /// `None` once the session has terminated.
    pub fn current_node_id(&self) -> Option<&str> {
        self.current_node_id.as_deref()
    }

    pub fn milestones(&self) -> &BTreeSet<String> {
        &self.milestones
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn max_health(&self) -> u32 {
        self.max_health
    }

    pub fn hints(&self) -> u32 {
        self.hints
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status != Status::InProgress
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    pub fn is_cleared(&self) -> bool {
        self.status == Status::Cleared
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.transcript.push(message);
    }

    pub(crate) fn terminate(&mut self, status: Status) {
        self.current_node_id = None;
        self.status = status;
    }

    fn grades(&self) -> impl Iterator<Item = &Grade> {
        self.transcript.iter().filter_map(|m| m.grade.as_ref())
    }

    /// Choices made so far.
    pub fn turns(&self) -> usize {
        self.grades().count()
    }

    /// Completion record for the learning statistics store.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            scenario_id: self.scenario_id.clone(),
            status: self.status.clone(),
            turns: self.turns(),
            best_responses: self
                .grades()
                .filter(|grade| grade.quality == Quality::Best)
                .count(),
            milestones: self.milestones.iter().cloned().collect(),
            health: self.health,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub scenario_id: String,
    #[serde(flatten)]
    pub status: Status,
    pub turns: usize,
    pub best_responses: usize,
    pub milestones: Vec<String>,
    pub health: u32,
}
