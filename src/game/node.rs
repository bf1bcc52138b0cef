use std::fmt;

use serde::{Deserialize, Serialize};

/// Choice target that ends the graph instead of moving to another node.
pub const END: &str = "END";

/// One line of dialogue in the target language plus its learner aids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default)]
    pub transliteration: String,
}

impl Utterance {
    pub fn new(
        text: impl Into<String>,
        translation: impl Into<String>,
        transliteration: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            translation: translation.into(),
            transliteration: transliteration.into(),
        }
    }

    /// Plain text without translation, used for system notes.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// How the NPC looks while saying a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Confused,
    Angry,
    Encouraging,
}

impl Emotion {
    pub const ALL: [Self; 5] = [
        Self::Neutral,
        Self::Happy,
        Self::Confused,
        Self::Angry,
        Self::Encouraging,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Confused => "confused",
            Self::Angry => "angry",
            Self::Encouraging => "encouraging",
        }
    }

    /// Lenient lookup used for untrusted input.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

/// Correctness tier of a choice. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Best,
    #[serde(alias = "ok")]
    Acceptable,
    #[serde(alias = "bad")]
    Poor,
}

impl Quality {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" => Some(Self::Best),
            "acceptable" | "ok" => Some(Self::Acceptable),
            "poor" | "bad" => Some(Self::Poor),
            _ => None,
        }
    }

    /// Whether a choice of this tier earns the milestone of a checkpoint node.
    pub fn earns_milestone(self) -> bool {
        self != Self::Poor
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Best => "best",
            Self::Acceptable => "acceptable",
            Self::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Where a choice leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    Node(String),
    End,
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        if s == END {
            Self::End
        } else {
            Self::Node(s)
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        match t {
            Target::Node(id) => id,
            Target::End => END.to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => f.write_str(id),
            Self::End => f.write_str(END),
        }
    }
}

/// One selectable user response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    #[serde(flatten)]
    pub line: Utterance,
    pub quality: Quality,
    #[serde(default)]
    pub damage: u32,
    /// Explains why the response is (or is not) appropriate.
    #[serde(default)]
    pub feedback: String,
    /// The NPC's reaction to hearing this response.
    #[serde(default)]
    pub reaction: Emotion,
    pub next: Target,
}

impl Choice {
    pub fn new(id: impl Into<String>, text: impl Into<String>, quality: Quality) -> Self {
        Self {
            id: id.into(),
            line: Utterance::plain(text),
            quality,
            damage: 0,
            feedback: String::new(),
            reaction: Emotion::Neutral,
            next: Target::End,
        }
    }

    pub fn with_damage(mut self, damage: u32) -> Self {
        self.damage = damage;
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn with_reaction(mut self, reaction: Emotion) -> Self {
        self.reaction = reaction;
        self
    }

    pub fn with_next(mut self, next: impl Into<Target>) -> Self {
        self.next = next.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formality {
    Casual,
    Polite,
    Formal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExpression {
    pub pattern: String,
    pub translation: String,
    pub explanation: String,
    pub formality: Formality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub word: String,
    pub reading: String,
    #[serde(default)]
    pub transliteration: String,
    pub meaning: String,
}

/// A reading quiz for a kanji that appears in the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KanjiChallenge {
    pub kanji: String,
    pub correct_reading: String,
    pub wrong_readings: Vec<String>,
    pub meaning: String,
    #[serde(default)]
    pub hint: Option<String>,
}

impl KanjiChallenge {
    /// Every candidate reading, correct one first. Callers shuffle for display.
    pub fn options(&self) -> Vec<&str> {
        std::iter::once(self.correct_reading.as_str())
            .chain(self.wrong_readings.iter().map(String::as_str))
            .collect()
    }

    pub fn is_correct(&self, reading: &str) -> bool {
        reading.trim() == self.correct_reading
    }
}

/// Teaching material attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Education {
    pub key_expression: KeyExpression,
    #[serde(default)]
    pub vocabulary: Vec<VocabularyItem>,
    #[serde(default)]
    pub kanji_challenge: Option<KanjiChallenge>,
}

/// A single NPC utterance and the responses offered to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueNode {
    /// Unique within its graph (e.g. "imm-1", "imm-recovery-2").
    pub id: String,
    pub npc: Utterance,
    #[serde(default)]
    pub emotion: Emotion,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub education: Option<Education>,
    /// Milestone awarded here for any choice better than poor.
    #[serde(default)]
    pub milestone: Option<String>,
}

impl DialogueNode {
    pub fn new(id: impl Into<String>, npc_line: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            npc: Utterance::plain(npc_line),
            emotion: Emotion::Neutral,
            choices: Vec::new(),
            education: None,
            milestone: None,
        }
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choices.push(choice);
        self
    }

    pub fn with_milestone(mut self, tag: impl Into<String>) -> Self {
        self.milestone = Some(tag.into());
        self
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = emotion;
        self
    }

    pub fn is_checkpoint(&self) -> bool {
        self.milestone.is_some()
    }

    pub fn choice(&self, choice_id: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == choice_id)
    }

    /// The first best-tier choice, which hints draw their text from.
    pub fn best_choice(&self) -> Option<&Choice> {
        self.choices.iter().find(|c| c.quality == Quality::Best)
    }
}
