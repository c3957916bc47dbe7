mod cache;
mod config;
mod error;
pub mod notification;
mod orchestrator;
pub mod profile;
pub mod time;

pub use cache::EventCache;
pub use config::FeedConfig;
pub use error::Error;
pub use notification::{Notification, NotificationReceiver, NotificationSender};
pub use orchestrator::{Identity, MergePolicy, Orchestrator, Published};
pub use profile::{Profile, ProfileMetadata};

pub type Result<T> = std::result::Result<T, error::Error>;
