use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::session::{SessionSummary, Status};
use crate::game::tree::{DialogueGraph, GraphDocument, GraphError};

/// Scenario files compiled into the binary, in menu order.
const BUILTIN: &[(&str, &str)] = &[
    (
        "airport-immigration.json",
        include_str!("../content/airport-immigration.json"),
    ),
    (
        "convenience-store.json",
        include_str!("../content/convenience-store.json"),
    ),
    ("izakaya.json", include_str!("../content/izakaya.json")),
];

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("scenario '{0}' not found")]
    ScenarioNotFound(String),
    #[error("scenario '{0}' is defined more than once")]
    DuplicateScenario(String),
    #[error("failed to parse {source_name}: {source}")]
    Parse {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid dialogue in scenario '{scenario}': {source}")]
    InvalidGraph {
        scenario: String,
        #[source]
        source: GraphError,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Boss,
}

/// Display metadata for one practice unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    /// Name in the target language (e.g. "入国審査").
    #[serde(default)]
    pub native_name: String,
    pub description: String,
    pub mission: String,
    pub npc_name: String,
    pub npc_role: String,
    pub difficulty: Difficulty,
    /// 0 = no kanji, 3 = advanced.
    #[serde(default)]
    pub kanji_level: u8,
}

#[derive(Deserialize)]
struct ScenarioDocument {
    #[serde(flatten)]
    scenario: Scenario,
    dialogue: GraphDocument,
}

/// Read-only scenario catalogue, loaded once at startup.
#[derive(Debug, Default)]
pub struct ContentStore {
    order: Vec<String>,
    scenarios: HashMap<String, (Scenario, DialogueGraph)>,
}

impl ContentStore {
    /// The scenarios shipped with the crate.
    pub fn builtin() -> Result<Self, ContentError> {
        Self::from_documents(BUILTIN.iter().copied())
    }

    /// Build a store from `(source name, json)` pairs.
    pub fn from_documents<'a>(
        documents: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ContentError> {
        let mut store = Self::default();
        for (source_name, json) in documents {
            store.insert_json(source_name, json)?;
        }
        info!("Loaded {} scenarios", store.order.len());
        Ok(store)
    }

    /// Load every `*.json` file in `dir`, sorted by file name.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ContentError> {
        let dir = dir.as_ref();
        let io_err = |source| ContentError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut store = Self::default();
        for path in paths {
            let json = fs::read_to_string(&path).map_err(|source| ContentError::Io {
                path: path.clone(),
                source,
            })?;
            store.insert_json(&path.display().to_string(), &json)?;
        }
        info!("Loaded {} scenarios from {}", store.order.len(), dir.display());
        Ok(store)
    }

    fn insert_json(&mut self, source_name: &str, json: &str) -> Result<(), ContentError> {
        let doc: ScenarioDocument =
            serde_json::from_str(json).map_err(|source| ContentError::Parse {
                source_name: source_name.to_string(),
                source,
            })?;

        let id = doc.scenario.id.clone();
        if self.scenarios.contains_key(&id) {
            return Err(ContentError::DuplicateScenario(id));
        }
        let graph = DialogueGraph::try_from(doc.dialogue).map_err(|source| {
            ContentError::InvalidGraph {
                scenario: id.clone(),
                source,
            }
        })?;

        debug!("Scenario {} from {}: {} nodes", id, source_name, graph.len());
        self.order.push(id.clone());
        self.scenarios.insert(id, (doc.scenario, graph));
        Ok(())
    }

    /// Scenarios in menu order.
    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.order
            .iter()
            .filter_map(|id| self.scenarios.get(id).map(|(s, _)| s))
    }

    pub fn scenario(&self, scenario_id: &str) -> Result<&Scenario, ContentError> {
        self.scenarios
            .get(scenario_id)
            .map(|(s, _)| s)
            .ok_or_else(|| ContentError::ScenarioNotFound(scenario_id.to_string()))
    }

    pub fn get_graph(&self, scenario_id: &str) -> Result<&DialogueGraph, ContentError> {
        self.scenarios
            .get(scenario_id)
            .map(|(_, g)| g)
            .ok_or_else(|| ContentError::ScenarioNotFound(scenario_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Which scenarios the player may pick from the menu. Only the first
/// scenario in menu order starts open. Clearing a scenario opens the one
/// after it. Kept in memory for one run of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    order: Vec<String>,
    unlocked: BTreeSet<String>,
}

impl Progress {
    pub fn new(store: &ContentStore) -> Self {
        Self {
            order: store.order.clone(),
            unlocked: store.order.first().cloned().into_iter().collect(),
        }
    }

    pub fn is_unlocked(&self, scenario_id: &str) -> bool {
        self.unlocked.contains(scenario_id)
    }

    /// Record a finished round. Returns the scenario id this opened, if any.
    /// Only `Status::Cleared` counts.
    pub fn record(&mut self, summary: &SessionSummary) -> Option<&str> {
        if summary.status != Status::Cleared {
            return None;
        }
        let pos = self.order.iter().position(|id| *id == summary.scenario_id)?;
        let next = self.order.get(pos + 1)?;
        if !self.unlocked.insert(next.clone()) {
            return None;
        }
        info!("Unlocked scenario {next}");
        Some(next.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "id": "greeting",
        "name": "Greeting",
        "description": "Say hello.",
        "mission": "Greet the clerk",
        "npc_name": "Clerk",
        "npc_role": "店員",
        "difficulty": "easy",
        "dialogue": {
            "initial_node": "g-1",
            "required_milestones": ["hello"],
            "success": {"text": "ありがとうございました"},
            "nodes": [
                {"id": "g-1", "npc": {"text": "いらっしゃいませ"}, "milestone": "hello",
                 "choices": [
                    {"id": "g-1-best", "text": "こんにちは", "quality": "best", "next": "END"},
                    {"id": "g-1-bad", "text": "…", "quality": "bad", "damage": 10, "next": "END"}
                 ]}
            ]
        }
    }"#;

    #[test]
    fn test_builtin_content_is_valid() {
        let store = ContentStore::builtin().unwrap();
        let ids: Vec<&str> = store.scenarios().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["airport-immigration", "convenience-store", "izakaya"]);

        for scenario in store.scenarios() {
            let graph = store.get_graph(&scenario.id).unwrap();
            assert!(!graph.required_milestones().is_empty(), "{}", scenario.id);
            assert!(graph.total_steps() >= graph.required_milestones().len());
        }
    }

    #[test]
    fn test_unknown_scenario() {
        let store = ContentStore::builtin().unwrap();
        let err = store.get_graph("moon-base").unwrap_err();
        assert!(matches!(err, ContentError::ScenarioNotFound(ref id) if id == "moon-base"));
        assert!(store.scenario("moon-base").is_err());
    }

    #[test]
    fn test_from_documents() {
        let store = ContentStore::from_documents([("greeting.json", MINIMAL)]).unwrap();
        assert_eq!(store.len(), 1);
        let scenario = store.scenario("greeting").unwrap();
        assert_eq!(scenario.difficulty, Difficulty::Easy);
        assert_eq!(scenario.kanji_level, 0);
        assert_eq!(store.get_graph("greeting").unwrap().initial_node_id(), "g-1");
    }

    #[test]
    fn test_duplicate_scenario() {
        let err = ContentStore::from_documents([("a.json", MINIMAL), ("b.json", MINIMAL)])
            .unwrap_err();
        assert!(matches!(err, ContentError::DuplicateScenario(_)));
    }

    #[test]
    fn test_invalid_graph_is_reported() {
        let broken = MINIMAL.replace(r#""next": "END"}"#, r#""next": "g-9"}"#);
        let err = ContentStore::from_documents([("broken.json", broken.as_str())]).unwrap_err();
        match err {
            ContentError::InvalidGraph { scenario, source } => {
                assert_eq!(scenario, "greeting");
                assert!(matches!(source, GraphError::DanglingTarget { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_error_names_source() {
        let err = ContentStore::from_documents([("bad.json", "{ not json")]).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse bad.json"));
    }

    fn finished(scenario_id: &str, status: Status) -> SessionSummary {
        SessionSummary {
            scenario_id: scenario_id.to_string(),
            status,
            turns: 5,
            best_responses: 5,
            milestones: Vec::new(),
            health: 100,
        }
    }

    #[test]
    fn test_progress_opens_scenarios_in_order() {
        let store = ContentStore::builtin().unwrap();
        let mut progress = Progress::new(&store);
        assert!(progress.is_unlocked("airport-immigration"));
        assert!(!progress.is_unlocked("convenience-store"));
        assert!(!progress.is_unlocked("izakaya"));

        assert_eq!(
            progress.record(&finished("airport-immigration", Status::Cleared)),
            Some("convenience-store")
        );
        assert!(progress.is_unlocked("convenience-store"));
        assert!(!progress.is_unlocked("izakaya"));

        // clearing again opens nothing new
        assert_eq!(progress.record(&finished("airport-immigration", Status::Cleared)), None);
        // the last scenario has no successor
        assert_eq!(progress.record(&finished("izakaya", Status::Cleared)), None);
    }

    #[test]
    fn test_progress_ignores_rounds_that_did_not_clear() {
        let store = ContentStore::builtin().unwrap();
        let mut progress = Progress::new(&store);
        let missed = Status::Incomplete {
            missing: vec!["place".into()],
        };
        for status in [Status::Failed, missed, Status::InProgress] {
            assert_eq!(progress.record(&finished("airport-immigration", status)), None);
        }
        assert!(!progress.is_unlocked("convenience-store"));
    }

    #[test]
    fn test_progress_on_empty_store() {
        let progress = Progress::new(&ContentStore::default());
        assert!(!progress.is_unlocked("airport-immigration"));
    }
}
