//! Local dialogue-tree engine: graph model, session state and traversal.

pub mod engine;
pub mod node;
pub mod session;
pub mod tree;

pub use engine::{Engine, EngineError, HintOutcome, TurnOutcome};
pub use node::{Choice, DialogueNode, Emotion, Quality, Target, Utterance, END};
pub use session::{Message, Role, SessionConfig, SessionState, SessionSummary, Status};
pub use tree::{DialogueGraph, GraphError};
