use std::fmt;
use std::sync::LazyLock;

use log::{debug, trace, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::content::Scenario;
use crate::game::node::{Emotion, Quality, Utterance};
use crate::game::session::Role;

/// Number of choices a remote turn must offer.
pub const REMOTE_CHOICES: usize = 3;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no JSON object found in collaborator output")]
    NoJson,
    #[error("collaborator output is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("collaborator request failed: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorMessage {
    pub role: Role,
    pub content: String,
}

/// What the collaborator is asked for on each turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRequest {
    pub scenario_id: String,
    pub prior_messages: Vec<PriorMessage>,
    pub is_initial_turn: bool,
    pub hint_requested: bool,
}

// ---------------------------------------------------------------------------
// Chat message helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.role, self.content)
    }
}

const FORMAT_INSTRUCTION: &str = "\
Reply with one JSON object only, no markdown:
{\"npc_reply\": \"<your Japanese line>\", \"npc_reply_translation\": \"<English>\", \
\"npc_reply_transliteration\": \"<romaji>\", \"npc_emotion\": \"neutral|happy|confused|angry|encouraging\", \
\"correction\": null | {\"was_correct\": true, \"explanation\": \"...\", \"better_expression\": \"...\", \
\"grammar_point\": \"...\"}, \"kanji_note\": null, \
\"choices\": [{\"text\": \"...\", \"translation\": \"...\", \"transliteration\": \"...\", \"quality\": \"best\"}, \
{... \"quality\": \"acceptable\"}, {... \"quality\": \"poor\"}], \"conversation_status\": \"ongoing|completed\"}
Always give exactly 3 choices in random order.";

const INITIAL_INSTRUCTION: &str =
    "Start the conversation: say your first line and offer 3 choices for the learner.";

const HINT_INSTRUCTION: &str = "The learner asked for help. In npc_reply_translation, explain the \
nuance of each current choice without saying which one is correct.";

/// Build the chat for one collaborator call.
///
///   [system] scenario role + response format
///   [assistant]/[user] prior conversation (system notes dropped)
///   [user] opening or hint instruction, when asked for
pub fn build_messages(scenario: &Scenario, request: &RemoteRequest) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(format!(
        "You are the {} ({}) in this situation: {}\nThe learner's mission: {}\nSpeak natural, polite Japanese.\n\n{FORMAT_INSTRUCTION}",
        scenario.npc_name, scenario.npc_role, scenario.description, scenario.mission
    ))];

    if request.is_initial_turn {
        messages.push(ChatMessage::user(INITIAL_INSTRUCTION));
    } else {
        messages.extend(request.prior_messages.iter().filter_map(|m| match m.role {
            Role::Npc => Some(ChatMessage::assistant(&m.content)),
            Role::User => Some(ChatMessage::user(&m.content)),
            Role::System => None,
        }));
    }

    if request.hint_requested {
        messages.push(ChatMessage::user(HINT_INSTRUCTION));
    }

    messages
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Ongoing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteChoice {
    pub line: Utterance,
    pub quality: Quality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub was_correct: bool,
    pub explanation: String,
    pub better_expression: Option<Utterance>,
    pub grammar_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KanjiNote {
    pub kanji: String,
    pub reading: String,
    #[serde(default, alias = "pronunciation")]
    pub transliteration: String,
    pub meaning: String,
    #[serde(default)]
    pub explanation: String,
}

/// A fully validated NPC turn. Every field has a usable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTurn {
    pub npc: Utterance,
    pub emotion: Emotion,
    pub choices: Vec<RemoteChoice>,
    pub status: ConversationStatus,
    pub correction: Option<Correction>,
    pub kanji_note: Option<KanjiNote>,
}

fn fallback_reply() -> Utterance {
    Utterance::new(
        "すみません、もう一度お願いします。",
        "Sorry, could you say that again?",
        "sumimasen, mou ichido onegai shimasu.",
    )
}

fn choice(text: &str, translation: &str, transliteration: &str, quality: Quality) -> RemoteChoice {
    RemoteChoice {
        line: Utterance::new(text, translation, transliteration),
        quality,
    }
}

/// Offered with the apology line when the whole payload is unusable.
fn fallback_choices() -> Vec<RemoteChoice> {
    vec![
        choice("はい、わかりました。", "Yes, understood.", "hai, wakarimashita.", Quality::Best),
        choice("えっと…", "Um...", "etto...", Quality::Acceptable),
        choice("何ですか？", "What?", "nan desu ka?", Quality::Poor),
    ]
}

/// Used when the reply is fine but its choices are missing or malformed.
fn default_choices() -> Vec<RemoteChoice> {
    vec![
        choice("はい。", "Yes.", "hai.", Quality::Best),
        choice("いいえ。", "No.", "iie.", Quality::Acceptable),
        choice(
            "もう一度お願いします。",
            "Once more, please.",
            "mou ichido onegai shimasu.",
            Quality::Poor,
        ),
    ]
}

#[derive(Deserialize)]
struct RawChoice {
    text: String,
    #[serde(default, alias = "text_ko", alias = "text_translation")]
    translation: String,
    #[serde(default, alias = "text_pronunciation", alias = "text_transliteration")]
    transliteration: String,
    quality: String,
}

#[derive(Deserialize)]
struct RawCorrection {
    was_correct: bool,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    better_expression: Option<String>,
    #[serde(default, alias = "better_expression_ko")]
    better_expression_translation: Option<String>,
    #[serde(default, alias = "better_expression_pronunciation")]
    better_expression_transliteration: Option<String>,
    #[serde(default)]
    grammar_point: Option<String>,
}

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think pattern"));
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?").expect("valid fence pattern"));
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid object pattern"));

/// Strip reasoning blocks and markdown fences, then take the outermost object.
pub fn extract_json(raw: &str) -> Option<String> {
    for cap in THINK_BLOCK.captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Collaborator thinking:\n{thought}");
        }
    }

    let cleaned = THINK_BLOCK.replace_all(raw, "");
    let cleaned = CODE_FENCE.replace_all(&cleaned, "");
    JSON_OBJECT.find(&cleaned).map(|m| m.as_str().to_string())
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl RemoteTurn {
    /// The apology turn used whenever nothing usable came back.
    pub fn fallback() -> Self {
        Self {
            npc: fallback_reply(),
            emotion: Emotion::Confused,
            choices: fallback_choices(),
            status: ConversationStatus::Ongoing,
            correction: None,
            kanji_note: None,
        }
    }

    /// Parse collaborator output. Only a missing or unparseable object is an
    /// error; individual bad fields are replaced with defaults.
    pub fn parse(raw: &str) -> Result<Self, RemoteError> {
        let json = extract_json(raw).ok_or(RemoteError::NoJson)?;
        debug!("Extracted JSON: {json}");
        let value: Value = serde_json::from_str(&json)?;
        let obj = value.as_object().ok_or(RemoteError::NoJson)?;
        Ok(Self::from_object(obj))
    }

    /// Like [`RemoteTurn::parse`] but never fails.
    pub fn parse_or_fallback(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|err| {
            warn!("Unusable collaborator output ({err}), using fallback turn");
            Self::fallback()
        })
    }

    fn from_object(obj: &Map<String, Value>) -> Self {
        let npc = match str_field(obj, &["npc_reply"]) {
            Some(text) => Utterance {
                text,
                translation: str_field(obj, &["npc_reply_translation", "npc_reply_ko"])
                    .unwrap_or_default(),
                transliteration: str_field(
                    obj,
                    &["npc_reply_transliteration", "npc_reply_pronunciation"],
                )
                .unwrap_or_default(),
            },
            None => {
                warn!("Collaborator sent an empty npc_reply");
                fallback_reply()
            }
        };

        let emotion = match str_field(obj, &["npc_emotion"]) {
            Some(s) => Emotion::parse(&s).unwrap_or_else(|| {
                warn!("Unknown npc_emotion '{s}'");
                Emotion::Neutral
            }),
            None => Emotion::Neutral,
        };

        let status = match str_field(obj, &["conversation_status"]).as_deref() {
            Some("completed") => ConversationStatus::Completed,
            _ => ConversationStatus::Ongoing,
        };

        Self {
            npc,
            emotion,
            choices: parse_choices(obj.get("choices")).unwrap_or_else(|| {
                warn!("Collaborator choices unusable, using defaults");
                default_choices()
            }),
            status,
            correction: obj.get("correction").and_then(parse_correction),
            kanji_note: obj
                .get("kanji_note")
                .filter(|v| !v.is_null())
                .and_then(|v| serde_json::from_value::<KanjiNote>(v.clone()).ok())
                .filter(|note| !note.kanji.trim().is_empty()),
        }
    }
}

fn parse_choices(value: Option<&Value>) -> Option<Vec<RemoteChoice>> {
    let items = value?.as_array()?;
    if items.len() != REMOTE_CHOICES {
        return None;
    }
    items
        .iter()
        .map(|item| {
            let raw: RawChoice = serde_json::from_value(item.clone()).ok()?;
            let quality = Quality::parse(&raw.quality)?;
            let text = raw.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(RemoteChoice {
                line: Utterance::new(text, raw.translation, raw.transliteration),
                quality,
            })
        })
        .collect()
}

fn parse_correction(value: &Value) -> Option<Correction> {
    if value.is_null() {
        return None;
    }
    let raw: RawCorrection = serde_json::from_value(value.clone()).ok()?;
    let better_expression = raw
        .better_expression
        .filter(|s| !s.trim().is_empty())
        .map(|text| Utterance {
            text,
            translation: raw.better_expression_translation.unwrap_or_default(),
            transliteration: raw.better_expression_transliteration.unwrap_or_default(),
        });
    Some(Correction {
        was_correct: raw.was_correct,
        explanation: raw.explanation,
        better_expression,
        grammar_point: raw.grammar_point.filter(|s| !s.trim().is_empty()),
    })
}

// ---------------------------------------------------------------------------
// Collaborator seam
// ---------------------------------------------------------------------------

/// An NPC-response source backed by a language model.
pub trait DialogueCollaborator {
    /// Return the model's raw text for this request.
    fn respond(&mut self, scenario: &Scenario, request: &RemoteRequest) -> Result<String, RemoteError>;
}

/// Ask the collaborator for a turn, degrading to the fallback on any failure.
pub fn fetch_turn<C: DialogueCollaborator + ?Sized>(
    collaborator: &mut C,
    scenario: &Scenario,
    request: &RemoteRequest,
) -> RemoteTurn {
    match collaborator.respond(scenario, request) {
        Ok(raw) => {
            trace!("=== COLLABORATOR RAW OUTPUT ===\n{raw}\n=== END OUTPUT ===");
            RemoteTurn::parse_or_fallback(&raw)
        }
        Err(err) => {
            warn!("Collaborator failed ({err}), using fallback turn");
            RemoteTurn::fallback()
        }
    }
}

/// Conversation history for the model-driven variant. Holds only validated
/// turns.
#[derive(Debug, Clone)]
pub struct RemoteConversation {
    scenario_id: String,
    history: Vec<PriorMessage>,
    status: ConversationStatus,
}

impl RemoteConversation {
    pub fn new(scenario_id: impl Into<String>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            history: Vec::new(),
            status: ConversationStatus::Ongoing,
        }
    }

    pub fn history(&self) -> &[PriorMessage] {
        &self.history
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    fn request(&self, is_initial_turn: bool, hint_requested: bool) -> RemoteRequest {
        RemoteRequest {
            scenario_id: self.scenario_id.clone(),
            prior_messages: self.history.clone(),
            is_initial_turn,
            hint_requested,
        }
    }

    fn record(&mut self, turn: &RemoteTurn) {
        self.history.push(PriorMessage {
            role: Role::Npc,
            content: turn.npc.text.clone(),
        });
        self.status = turn.status;
    }

    /// Fetch the NPC's opening line.
    pub fn open<C: DialogueCollaborator + ?Sized>(
        &mut self,
        collaborator: &mut C,
        scenario: &Scenario,
    ) -> RemoteTurn {
        self.history.clear();
        let turn = fetch_turn(collaborator, scenario, &self.request(true, false));
        self.record(&turn);
        turn
    }

    /// Send the learner's pick and fetch the NPC's answer.
    pub fn choose<C: DialogueCollaborator + ?Sized>(
        &mut self,
        collaborator: &mut C,
        scenario: &Scenario,
        choice: &RemoteChoice,
    ) -> RemoteTurn {
        self.history.push(PriorMessage {
            role: Role::User,
            content: choice.line.text.clone(),
        });
        let turn = fetch_turn(collaborator, scenario, &self.request(false, false));
        self.record(&turn);
        turn
    }

    /// Ask for an explanation of the current choices. Not added to history.
    pub fn hint<C: DialogueCollaborator + ?Sized>(
        &self,
        collaborator: &mut C,
        scenario: &Scenario,
    ) -> RemoteTurn {
        fetch_turn(collaborator, scenario, &self.request(false, true))
    }
}
