use anyhow::Context;
use std::env;

use lifeline_core::LifelineConfig;

/// Path to a TOML config file; environment variables still override it
pub const CONFIG_ENV: &str = "LIFELINE_CONFIG";

pub fn load() -> anyhow::Result<LifelineConfig> {
    let config = match env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            let mut config = LifelineConfig::from_file(&path)
                .with_context(|| format!("failed to load config from {path}"))?;
            config.apply_env().context("invalid environment override")?;
            config
        }
        _ => LifelineConfig::from_env().context("invalid environment configuration")?,
    };
    config.validate().context("configuration rejected")?;
    Ok(config)
}

pub fn bind_addr(config: &LifelineConfig) -> String {
    format!("{}:{}", config.server.host, config.server.port)
}
