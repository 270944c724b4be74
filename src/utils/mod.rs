//! Utility functions and types shared by every pipeline stage.

pub mod error;
mod fs;
mod logging;
pub mod types;

pub use error::Error;
pub use fs::*;
pub use logging::{init_logging, init_test_logging};
pub use types::*;

/// Re-export of commonly used types
pub mod prelude {
    pub use super::{
        error::{Error, Result},
        logging::init_logging,
        types::*,
    };
}

/// Common result type for utility functions
pub type Result<T> = std::result::Result<T, Error>;
