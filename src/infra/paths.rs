// src/infra/paths.rs — Path management
//
// All paths respect the SKILLFORGE_HOME environment variable for isolation.
// When SKILLFORGE_HOME is set, config, data and the workspace live under it.
// When unset, config uses ~/.skillforge/ and data uses XDG_DATA_HOME/skillforge.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the SKILLFORGE_HOME override, if set.
fn skillforge_home() -> Option<PathBuf> {
    std::env::var_os("SKILLFORGE_HOME").map(PathBuf::from)
}

/// Home directory, or the current directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $SKILLFORGE_HOME/ or ~/.skillforge/
pub fn config_dir() -> PathBuf {
    if let Some(home) = skillforge_home() {
        return home;
    }
    dirs_home().join(".skillforge")
}

/// Data directory: $SKILLFORGE_HOME/data/ or ~/.local/share/skillforge/
pub fn data_dir() -> PathBuf {
    if let Some(home) = skillforge_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "skillforge")
        .map(|d| d.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Database path
pub fn db_path() -> PathBuf {
    data_dir().join("skillforge.db")
}

/// Default project workspace (projects/, skills/, baselines/, analysis/)
pub fn workspace_dir() -> PathBuf {
    config_dir().join("workspace")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure all required directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir(), workspace_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_config_root() {
        let config = config_dir();
        assert!(config_file_path().starts_with(&config));
        assert!(workspace_dir().starts_with(&config));
        assert_eq!(config_file_path().file_name().unwrap(), "config.toml");
        assert_eq!(db_path().file_name().unwrap(), "skillforge.db");
    }
}
