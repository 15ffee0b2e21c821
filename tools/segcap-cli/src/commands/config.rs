//! Show or initialize the configuration file.

use std::path::PathBuf;

use segcap_common::config::AppConfig;

pub fn run(config: &AppConfig, path: Option<PathBuf>, init: bool) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if init {
        match path {
            Some(path) => {
                config.save_to(&path)?;
                println!("Configuration written to {}", path.display());
            }
            None => {
                config.save()?;
                println!("Configuration written to the standard location");
            }
        }
    }
    Ok(())
}
