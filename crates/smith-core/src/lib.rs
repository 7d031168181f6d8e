#[macro_use]
mod closed_enum;

pub mod checklist;
pub mod error;
pub mod ids;
pub mod marker;
pub mod metrics;
pub mod model;
pub mod outcomes;
pub mod selection;

pub use checklist::*;
pub use error::*;
pub use ids::*;
pub use marker::*;
pub use metrics::*;
pub use model::*;
pub use outcomes::*;
pub use selection::*;
