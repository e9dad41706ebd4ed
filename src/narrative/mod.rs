//! The scripted story and the engine that plays it.

pub mod engine;
pub mod script;

pub use engine::{BeatEngine, BeatView, Prompt, StageHost};
pub use script::{Beat, Cue, Script, Trigger};
