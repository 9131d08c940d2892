pub mod config;
pub mod error;
pub mod types;

pub use config::MiaConfig;
pub use error::{MiaError, Result};
pub use types::{ChatId, MessageId};
