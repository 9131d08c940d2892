pub mod error;
pub mod settings;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use settings::SettingsStore;
pub use store::{ChatStore, ListChats, Order, SortBy};
pub use types::{Character, Chat, ChatMessage, Usage};
