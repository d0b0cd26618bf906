//! The MuralChat client engine: event classification, timeline
//! reconciliation, room aggregation, and on-disk caching.
//!
//! The crate sits between a protocol backend (any [`client::ProtocolVerbs`]
//! implementation) and a UI layer. Sync output flows in as raw events and
//! directory updates; categorized room lists and reconciled per-room
//! timelines flow out through update channels and subscriber registries.

use std::{path::Path, sync::OnceLock};

use directories::ProjectDirs;

pub mod client;
pub mod errors;
pub mod ids;

// Event intake: raw events in, classified timeline effects out.
pub mod event_mapper;
pub mod events;

// Derived view state.
pub mod categories;
pub mod rooms;
pub mod timeline;

// On-disk caches.
pub mod app_cache;
pub mod media_cache;

pub mod subscription;
pub mod utils;

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORGANIZATION: &str = "muralchat";
pub const APP_NAME: &str = "muralchat";

pub fn project_dir() -> &'static ProjectDirs {
    static MURALCHAT_PROJECT_DIRS: OnceLock<ProjectDirs> = OnceLock::new();

    MURALCHAT_PROJECT_DIRS.get_or_init(|| {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .expect("Failed to obtain MuralChat project directory")
    })
}

/// The per-user directory for durable app data, e.g. the snapshot cache.
pub fn app_data_dir() -> &'static Path {
    project_dir().data_dir()
}

/// The per-user directory for rebuildable data, e.g. the media cache.
pub fn app_cache_dir() -> &'static Path {
    project_dir().cache_dir()
}

/// Initializes the global tracing subscriber from `RUST_LOG`, defaulting to
/// `info`. Call once at startup; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
