//! Environment constants and path utilities for CF Local.
//!
//! Centralizes the directory and file names used to locate configuration.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git, .vscode)
pub const CFLOCAL_DIR_NAME: &str = ".cflocal";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Project-local configuration file name
pub const LOCAL_CONFIG_FILE_NAME: &str = "cflocal.toml";

/// Environment variable that disables daemon-backed tests
pub const SKIP_CONTAINER_TESTS_VAR: &str = "SKIP_CONTAINER_TESTS";

/// Build the project-local config file path (`./cflocal.toml`)
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(CFLOCAL_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        assert_eq!(
            user_config_file_path(Path::new("/home/user")),
            Path::new("/home/user/.cflocal/config.toml")
        );
        assert_eq!(
            local_config_file_path(Path::new("/current/project")),
            Path::new("/current/project/cflocal.toml")
        );
    }
}
