pub mod candidate;
pub mod config;
pub mod context;
pub mod deps;
pub mod doctor;
pub mod orchestrator;
pub mod prompts;
pub mod runner;
pub mod selector;
pub mod stages;
pub mod triage;

pub use candidate::*;
pub use config::*;
pub use context::*;
pub use deps::*;
pub use doctor::*;
pub use orchestrator::*;
pub use runner::*;
pub use selector::*;
pub use stages::*;
