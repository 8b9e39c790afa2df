//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use muster_core::config;
use muster_core::{ClientConfig, HostConfig};

/// Which side's configuration a command acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSide {
    Host,
    Client,
}

impl ConfigSide {
    pub fn from_client_flag(client: bool) -> Self {
        if client {
            Self::Client
        } else {
            Self::Host
        }
    }

    /// The file this side reads when no `--config` is given
    pub fn resolve(self, config_path: Option<&PathBuf>) -> PathBuf {
        config_path.cloned().unwrap_or_else(|| match self {
            Self::Host => config::default_host_config_path(),
            Self::Client => config::default_client_config_path(),
        })
    }
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&PathBuf>, side: ConfigSide, force: bool) -> Result<()> {
    let path = side.resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    write_defaults(&path, side)?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

fn write_defaults(path: &Path, side: ConfigSide) -> Result<()> {
    match side {
        ConfigSide::Host => config::save_config(path, &HostConfig::default()),
        ConfigSide::Client => config::save_config(path, &ClientConfig::default()),
    }
    .with_context(|| format!("Failed to write config file: {:?}", path))
}

/// Show the configuration file as stored
pub fn config_show(config_path: Option<&PathBuf>, side: ConfigSide) -> Result<()> {
    let path = side.resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'muster config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}
