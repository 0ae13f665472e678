//! Server configuration.
//!
//! Values are read from an optional `config/default` file (any format the
//! `config` crate understands) and then from `SSMP_`-prefixed environment
//! variables, with `__` separating nested keys: `SSMP_SERVER__PORT=7000`
//! sets `server.port`. Anything left unset falls back to
//! [`Settings::default`].

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LogSettings, ServerSettings, Settings};

const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as [`load_config`] with a different file. The extension may be
/// omitted; a missing file is not an error.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("SSMP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
