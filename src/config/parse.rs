//! Castfile parsing and discovery

use crate::config::types::Config;
use crate::error::{CastError, ConfigError, ConfigResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Castfile names to search for, in order
pub const CONFIG_FILE_NAMES: &[&str] = &["castfile", "castfile.yaml", "castfile.yml", ".castfile"];

/// Find the castfile at or above `start_dir`
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Find a castfile directly inside `dir`, without walking upward
pub fn find_config_in_dir(dir: &Path) -> ConfigResult<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ConfigError::NotFound(
                CONFIG_FILE_NAMES
                    .iter()
                    .map(|name| dir.join(name).display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })
}

/// Parse a castfile from a path
pub fn parse_config_file(path: &Path) -> Result<Config, CastError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    parse_config(&contents)
}

/// Parse a castfile from a string
pub fn parse_config(yaml: &str) -> Result<Config, CastError> {
    if yaml.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(yaml)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SIMPLE: &str = r#"
tasks:
  test:
    run: echo "test"
"#;

    #[test]
    fn test_parse_simple_config() {
        let config = parse_config(SIMPLE).unwrap();
        assert_eq!(config.tasks.len(), 1);
        assert!(config.tasks.contains_key("test"));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = parse_config("").unwrap();
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_find_config_in_current_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("castfile.yaml");
        fs::write(&config_path, SIMPLE).unwrap();

        let found = find_config_file_from(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("castfile");
        let sub_dir = temp_dir.path().join("subdir");

        fs::create_dir(&sub_dir).unwrap();
        fs::write(&config_path, SIMPLE).unwrap();

        let found = find_config_file_from(sub_dir).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_find_config_prefers_plain_castfile() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("castfile.yml"), SIMPLE).unwrap();
        fs::write(temp_dir.path().join("castfile"), SIMPLE).unwrap();

        let found = find_config_in_dir(temp_dir.path()).unwrap();
        assert_eq!(found, temp_dir.path().join("castfile"));
    }

    #[test]
    fn test_config_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = find_config_in_dir(temp_dir.path());
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_parse_config_with_name() {
        let yaml = r#"
name: my-app
desc: My application
tasks:
  hello: echo "hello"
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.name, Some("my-app".to_string()));
        assert_eq!(config.desc, Some("My application".to_string()));
    }
}
