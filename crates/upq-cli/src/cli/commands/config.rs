//! `upq config` – print the effective configuration.

use anyhow::Result;
use upq_core::config::{self, UpqConfig};

pub fn run_config(cfg: &UpqConfig) -> Result<()> {
    if let Ok(path) = config::config_path() {
        println!("# {}", path.display());
    }
    print!("{}", cfg.to_toml_string()?);
    Ok(())
}
