//! Batch engine settings stored as TOML under the application directory.

mod defaults;
mod errors;
mod io;
mod types;

/// Default filename used to store the engine settings.
pub const CONFIG_FILE_NAME: &str = "vidbatch.toml";

pub use defaults::DEFAULT_VIDEO_EXTENSIONS;
pub use errors::ConfigError;
pub(crate) use io::atomic_write;
pub use io::{config_path, load_from, load_or_default, save, save_to_path};
pub use types::{BatchSettings, WORKERS_ENV};
