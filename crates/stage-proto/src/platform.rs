use std::path::{Path, PathBuf};

/// Default session server port when none is configured.
pub const SERVER_TCP_PORT: u16 = 7650;

const SERVER_TCP_HOST: &str = "127.0.0.1";

const APP_DIR: &str = "stagehand";

/// Overrides both the data and config directories (one console per booth).
pub const HOME_ENV: &str = "STAGEHAND_HOME";

pub fn server_address() -> String {
    format!("{}:{}", SERVER_TCP_HOST, SERVER_TCP_PORT)
}

/// Log files and other runtime state.
pub fn data_dir() -> PathBuf {
    if let Some(home) = home_override() {
        return home;
    }
    #[cfg(unix)]
    {
        xdg_dir("XDG_DATA_HOME", &[".local", "share"])
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// `config.toml` and the default setlist document.
pub fn config_dir() -> PathBuf {
    if let Some(home) = home_override() {
        return home;
    }
    #[cfg(unix)]
    {
        xdg_dir("XDG_CONFIG_HOME", &[".config"])
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn log_path() -> PathBuf {
    data_dir().join("stagehand.log")
}

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `$VAR/stagehand`, falling back to `~/<fallback...>/stagehand`.
#[cfg(unix)]
fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    let base = std::env::var_os(var)
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
            join_all(&home, fallback)
        });
    base.join(APP_DIR)
}

#[cfg(unix)]
fn join_all(base: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(base.to_path_buf(), |acc, p| acc.join(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_join_all_builds_nested_fallback() {
        let path = join_all(Path::new("/home/av"), &[".local", "share"]);
        assert_eq!(path, PathBuf::from("/home/av/.local/share"));
    }

    #[test]
    fn test_log_file_lives_in_data_dir() {
        assert_eq!(log_path().parent(), Some(data_dir().as_path()));
        assert!(log_path().ends_with("stagehand.log"));
    }
}
