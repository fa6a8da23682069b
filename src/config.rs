use serde::Deserialize;

/// Process configuration, built once at startup from defaults layered under
/// environment variables and injected into `AppState` — nothing downstream
/// re-reads `std::env` directly.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_extensions_dir")]
    pub extensions_dir: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_pool_burst")]
    pub pool_burst: u32,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_sandbox_timeout_secs")]
    pub sandbox_timeout_secs: u64,
}

fn default_extensions_dir() -> String {
    "extensions".to_string()
}
fn default_pool_size() -> u32 {
    10
}
fn default_pool_burst() -> u32 {
    20
}
fn default_http_addr() -> String {
    "0.0.0.0:8787".to_string()
}
fn default_sandbox_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Load from environment, with the `TRACEHUB_` prefix for everything but
    /// the two variables the original source treats as bare (`DATABASE_URL`,
    /// `EXTENSIONS_DIR`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| config::ConfigError::NotFound("DATABASE_URL".into()))?;
        let extensions_dir =
            std::env::var("EXTENSIONS_DIR").unwrap_or_else(|_| default_extensions_dir());

        let builder = config::Config::builder()
            .set_default("pool_size", default_pool_size())?
            .set_default("pool_burst", default_pool_burst())?
            .set_default("http_addr", default_http_addr())?
            .set_default("sandbox_timeout_secs", default_sandbox_timeout_secs())?
            .add_source(
                config::Environment::with_prefix("TRACEHUB")
                    .try_parsing(true)
                    .prefix_separator("_"),
            )
            .set_override("database_url", database_url)?
            .set_override("extensions_dir", extensions_dir)?;

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_minimal() {
        std::env::set_var("DATABASE_URL", "test.db");
        std::env::remove_var("EXTENSIONS_DIR");
        std::env::remove_var("TRACEHUB_POOL_SIZE");
        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.extensions_dir, "extensions");
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.pool_burst, 20);
    }
}
