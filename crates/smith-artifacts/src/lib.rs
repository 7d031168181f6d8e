pub mod difflog;
pub mod manifest;
pub mod store;

pub use difflog::*;
pub use manifest::*;
pub use store::*;
