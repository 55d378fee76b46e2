pub mod config;
pub mod contact;
pub mod domain;
pub mod errors;
pub mod session;

pub use config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions, SessionScope};
pub use domain::business::{BusinessConfig, BusinessId, BusinessRule};
pub use domain::chat::{
    ChatId, ChatLifecycle, ChatRecord, ChatSummary, ChatUpdate, ContactDetails, ContactStatus,
    NameInference, NewChat, Role, Turn,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use session::{InMemorySessionStore, SessionKey, SessionStore};
