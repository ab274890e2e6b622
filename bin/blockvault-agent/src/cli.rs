//! Command line and configuration file handling
//!
//! Settings come from an optional TOML file; command line flags override
//! individual fields.

use anyhow::{Context, Result};
use blockvault_common::{AgentConfig, BackendConfig, LogFormat};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Memory,
    Fs,
}

#[derive(Parser, Debug)]
#[command(name = "blockvault-agent")]
#[command(about = "BlockVault block storage agent")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "BLOCKVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend type
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Root directory for the fs backend
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Target container (bucket)
    #[arg(long)]
    pub container: Option<String>,

    /// Path prefix for blocks and the usage ledger
    #[arg(long)]
    pub base_path: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl Args {
    /// Load the configuration file (if any) and apply flag overrides
    pub fn load_config(&self) -> Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => AgentConfig::default(),
        };
        self.apply(&mut config)?;
        config.store.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut AgentConfig) -> Result<()> {
        let backend = &mut config.store.backend;
        let container = self
            .container
            .clone()
            .unwrap_or_else(|| backend.container().to_string());

        match self.backend {
            Some(BackendKind::Memory) => *backend = BackendConfig::Memory { container },
            Some(BackendKind::Fs) => {
                let root = match (&self.root, &*backend) {
                    (Some(root), _) => root.clone(),
                    (None, BackendConfig::Fs { root, .. }) => root.clone(),
                    (None, BackendConfig::Memory { .. }) => {
                        anyhow::bail!("--backend fs requires --root or [store.backend] root")
                    }
                };
                *backend = BackendConfig::Fs { root, container };
            }
            None => match backend {
                BackendConfig::Memory { container: c } => *c = container,
                BackendConfig::Fs { root, container: c } => {
                    if let Some(r) = &self.root {
                        root.clone_from(r);
                    }
                    *c = container;
                }
            },
        }

        if let Some(base_path) = &self.base_path {
            config.store.base_path.clone_from(base_path);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<AgentConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("blockvault-agent").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults_without_config() {
        let config = parse(&[]).load_config().unwrap();
        assert_eq!(config.store.backend.provider(), "memory");
        assert_eq!(config.store.base_path, "blockvault");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
name = "agent-7"

[store]
base_path = "from-file"
delete_concurrency = 4

[store.backend]
type = "fs"
root = "/srv/blocks"
container = "pool-a"

[logging]
level = "debug"
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config = parse(&["--config", path]).load_config().unwrap();
        assert_eq!(config.agent.name, "agent-7");
        assert_eq!(config.store.delete_concurrency, 4);
        assert_eq!(
            config.store.backend,
            BackendConfig::Fs {
                root: "/srv/blocks".into(),
                container: "pool-a".into()
            }
        );

        let config = parse(&[
            "--config",
            path,
            "--container",
            "pool-b",
            "--base-path",
            "from-flag",
            "--log-format",
            "json",
        ])
        .load_config()
        .unwrap();
        assert_eq!(config.store.backend.container(), "pool-b");
        assert_eq!(config.store.base_path, "from-flag");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_fs_backend_needs_root() {
        assert!(parse(&["--backend", "fs"]).load_config().is_err());
        let config = parse(&["--backend", "fs", "--root", "/data"])
            .load_config()
            .unwrap();
        assert_eq!(config.store.backend.provider(), "fs");
    }

    #[test]
    fn test_bad_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store\nbroken").unwrap();
        let args = parse(&["--config", file.path().to_str().unwrap()]);
        assert!(args.load_config().is_err());
    }
}
