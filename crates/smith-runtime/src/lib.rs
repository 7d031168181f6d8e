pub mod process;
pub mod python;
pub mod scripted;
pub mod traits;

pub use process::*;
pub use python::*;
pub use scripted::*;
pub use traits::*;
