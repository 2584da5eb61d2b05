//! Show or initialize the configuration file.

use mdim_common::config::{config_file_path, AppConfig};

pub fn run(config: AppConfig, path_only: bool, init: bool) -> anyhow::Result<()> {
    let path = config_file_path();
    if path_only {
        println!("{}", path.display());
        return Ok(());
    }

    if init {
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            config.save()?;
            println!("Wrote default config: {}", path.display());
        }
        return Ok(());
    }

    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
