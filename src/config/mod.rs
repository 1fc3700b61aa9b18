use anyhow::{Context, Result};
use dirs::home_dir;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILE_NAME: &str = "skein.toml";

/// Application-wide defaults. Layered as built-in values, then an optional
/// `skein.toml`, then `SKEIN_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDefaults {
    pub data_dir: Option<PathBuf>,
    pub db_file: String,
    pub page_size: i64,
    pub max_page_size: i64,
    pub search_limit: i64,
    pub preview_lines: usize,
    pub subject_fallback: bool,
    pub insert_batch_size: usize,
}

impl Default for AppDefaults {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_file: "skein.db".to_string(),
            page_size: 50,
            max_page_size: 500,
            search_limit: 50,
            preview_lines: 20,
            subject_fallback: true,
            insert_batch_size: 500,
        }
    }
}

/// Shape of `skein.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    db_file: Option<String>,
    page_size: Option<i64>,
    max_page_size: Option<i64>,
    search_limit: Option<i64>,
    preview_lines: Option<usize>,
    subject_fallback: Option<bool>,
    insert_batch_size: Option<usize>,
}

impl AppDefaults {
    pub fn load() -> Result<Self> {
        let mut defaults = Self::default();

        if let Some(path) = config_file_path() {
            if path.exists() {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                defaults.apply_toml(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?;
                debug!(path = %path.display(), "Loaded config file");
            }
        }

        defaults.apply_env();
        defaults.normalize();
        Ok(defaults)
    }

    pub fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(raw)?;
        if file.data_dir.is_some() {
            self.data_dir = file.data_dir;
        }
        if let Some(v) = file.db_file {
            self.db_file = v;
        }
        if let Some(v) = file.page_size {
            self.page_size = v;
        }
        if let Some(v) = file.max_page_size {
            self.max_page_size = v;
        }
        if let Some(v) = file.search_limit {
            self.search_limit = v;
        }
        if let Some(v) = file.preview_lines {
            self.preview_lines = v;
        }
        if let Some(v) = file.subject_fallback {
            self.subject_fallback = v;
        }
        if let Some(v) = file.insert_batch_size {
            self.insert_batch_size = v;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = env::var("SKEIN_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(file) = env::var("SKEIN_DB_FILE") {
            self.db_file = file;
        }
        if let Some(v) = env_parse::<i64>("SKEIN_PAGE_SIZE") {
            self.page_size = v;
        }
        if let Some(v) = env_parse::<i64>("SKEIN_MAX_PAGE_SIZE") {
            self.max_page_size = v;
        }
        if let Some(v) = env_parse::<i64>("SKEIN_SEARCH_LIMIT") {
            self.search_limit = v;
        }
        if let Some(v) = env_parse::<usize>("SKEIN_PREVIEW_LINES") {
            self.preview_lines = v;
        }
        if let Ok(raw) = env::var("SKEIN_SUBJECT_FALLBACK") {
            self.subject_fallback = raw == "1" || raw.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env_parse::<usize>("SKEIN_INSERT_BATCH_SIZE") {
            self.insert_batch_size = v;
        }
    }

    /// Keeps the numeric knobs inside usable ranges.
    pub fn normalize(&mut self) {
        let fallback = Self::default();
        if self.max_page_size <= 0 {
            self.max_page_size = fallback.max_page_size;
        }
        if self.page_size <= 0 {
            self.page_size = fallback.page_size;
        }
        self.page_size = self.page_size.min(self.max_page_size);
        if self.search_limit <= 0 {
            self.search_limit = fallback.search_limit;
        }
        if self.preview_lines == 0 {
            self.preview_lines = fallback.preview_lines;
        }
        if self.insert_batch_size == 0 {
            self.insert_batch_size = fallback.insert_batch_size;
        }
    }

    /// Resolves the data directory, creating it when needed.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
            return Ok(dir.clone());
        }
        default_data_dir()
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join(&self.db_file))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("SKEIN_CONFIG") {
        return Some(PathBuf::from(custom));
    }
    if let Ok(dir) = env::var("SKEIN_DATA_DIR") {
        return Some(Path::new(&dir).join(CONFIG_FILE_NAME));
    }
    home_dir().map(|home| home.join("skein").join(CONFIG_FILE_NAME))
}

pub(crate) fn default_data_dir() -> Result<PathBuf> {
    if let Some(home) = home_dir() {
        let path = home.join("skein");
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        } else {
            warn!(
                "Unable to create {}/skein; falling back to workspace-local storage",
                home.display()
            );
        }
    }

    let cwd = env::current_dir().context("determining current directory")?;
    let path = cwd.join("skein-data");
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating fallback data directory {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_named_keys() {
        let mut defaults = AppDefaults::default();
        defaults
            .apply_toml("page_size = 25\nsubject_fallback = false\n")
            .unwrap();
        assert_eq!(defaults.page_size, 25);
        assert!(!defaults.subject_fallback);
        assert_eq!(defaults.max_page_size, 500);
        assert_eq!(defaults.db_file, "skein.db");
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let mut defaults = AppDefaults::default();
        assert!(defaults.apply_toml("pagesize = 10\n").is_err());
    }

    #[test]
    fn normalize_repairs_invalid_values() {
        let mut defaults = AppDefaults {
            page_size: 0,
            max_page_size: 20,
            search_limit: -3,
            preview_lines: 0,
            insert_batch_size: 0,
            ..AppDefaults::default()
        };
        defaults.normalize();
        assert_eq!(defaults.page_size, 20);
        assert_eq!(defaults.search_limit, 50);
        assert_eq!(defaults.preview_lines, 20);
        assert_eq!(defaults.insert_batch_size, 500);
    }
}
