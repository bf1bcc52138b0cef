//! Language-learning conversation simulator.
//!
//! A learner walks a scripted dialogue graph by picking one of a few
//! graded responses per NPC line. Poor answers cost health, adequate answers
//! on checkpoint nodes earn milestones, and the scenario is cleared only when
//! the graph ends with every required milestone collected.
//!
//! RUST_LOG controls logging through the `log` facade.

pub mod content;
pub mod game;
#[cfg(feature = "llm")]
pub mod llm;
pub mod remote;
pub mod terminal;
