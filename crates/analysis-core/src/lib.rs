pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod stats;
pub mod traits;
pub mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
