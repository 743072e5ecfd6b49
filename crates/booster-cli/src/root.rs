use std::path::{Path, PathBuf};

use booster_core::config::DEFAULT_CONFIG_PATH;

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` flag / `BOOSTER_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `config/config.yaml`
/// 3. Fall back to `cwd/config/config.yaml`, which may not exist
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_PATH))
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(DEFAULT_CONFIG_PATH))
        .find(|candidate| candidate.is_file())
}
