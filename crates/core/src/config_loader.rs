//! Configuration loading.
//!
//! TOML file merged with `CROSS_ARB_`-prefixed environment variables via
//! figment. Values of the form `${VAR}` are substituted from the
//! environment before parsing, so credentials never live in the file.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

/// Default config file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the default path, falling back to built-in
    /// defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let mut figment = Figment::new();

        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let substituted = substitute_env_vars(&raw);
            figment = figment.merge(Toml::string(&substituted));
            tracing::info!(path = %path.display(), "Loaded configuration file");
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        }

        let config: AppConfig = figment
            .merge(Env::prefixed("CROSS_ARB_").split("__"))
            .extract()
            .context("failed to parse configuration")?;

        Ok(config)
    }
}

/// Replaces every `${VAR}` occurrence with the value of the environment
/// variable `VAR`. Unset variables leave the placeholder untouched.
#[must_use]
pub fn substitute_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("CROSS_ARB_TEST_KEY", "secret123");
        let input = "api_key = \"${CROSS_ARB_TEST_KEY}\"\nother = \"${UNSET_VAR_XYZ}\"";
        let out = substitute_env_vars(input);
        assert!(out.contains("secret123"));
        assert!(out.contains("${UNSET_VAR_XYZ}"));
    }

    #[test]
    fn test_substitute_unterminated_placeholder() {
        assert_eq!(substitute_env_vars("foo ${BAR"), "foo ${BAR");
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let config = ConfigLoader::load_from("/nonexistent/Config.toml").unwrap();
        assert_eq!(config.arbitrage.min_spread_threshold, dec!(0.1));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[arbitrage]\n\
             min_spread_threshold = \"0.25\"\n\
             max_position_size = \"5000\"\n\
             min_profit_threshold = \"5\"\n\
             conservative_threshold = \"0.05\"\n\
             aggressive_threshold = \"0.2\"\n\
             test_threshold = \"0.5\"\n\
             \n\
             [exchanges.bybit.fees]\n\
             maker = \"0.0001\"\n\
             taker = \"0.00055\"\n"
        )
        .unwrap();

        let config = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(config.arbitrage.min_spread_threshold, dec!(0.25));
        assert_eq!(config.arbitrage.max_position_size, dec!(5000));
        assert_eq!(
            config
                .venue_fees(crate::types::VenueId::Bybit)
                .taker,
            dec!(0.00055)
        );
    }
}
