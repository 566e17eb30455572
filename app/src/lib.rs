//! Reelbox core: short clip capture, the persisted gallery, playback and
//! accounts. The UI layer drives everything through `commands::Reelbox`.

pub mod account;
pub mod capture;
pub mod commands;
pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod gallery;
pub mod logging;
pub mod player;
pub mod state;
pub mod storage;

pub use commands::{bootstrap, Reelbox};
pub use config::{load_config, AppConfig};
pub use error::AppError;
pub use events::{AppEvent, EventBus};
pub use gallery::{GalleryCard, GalleryStore, VideoRecord};
pub use state::{AuthView, View};
