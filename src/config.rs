use crate::search::SearchSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const APP_NAME: &str = "portfolio_buzz";
const CONFIG_NAME: &str = "config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub search_debounce_ms: u64,
    pub stock_min_query_len: usize,
    pub fund_min_query_len: usize,
    pub search_limit: usize,
    pub currency: String,
    pub refresh_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            request_timeout_secs: 30,
            search_debounce_ms: 300,
            stock_min_query_len: 1,
            fund_min_query_len: 2,
            search_limit: 10,
            currency: "INR".to_string(),
            refresh_interval_secs: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, confy::ConfyError> {
        let mut cfg: Config = confy::load(APP_NAME, CONFIG_NAME)?;
        cfg.apply_env(std::env::var("PB_API_URL").ok());
        Ok(cfg)
    }

    pub fn path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Directory next to the config file holding the sled state and TUI log.
    pub fn data_dir() -> Result<PathBuf, confy::ConfyError> {
        let path = Self::path()?;
        Ok(path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")))
    }

    fn apply_env(&mut self, api_url: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(5))
    }

    pub fn stock_search(&self) -> SearchSettings {
        SearchSettings {
            debounce: Duration::from_millis(self.search_debounce_ms),
            min_query_len: self.stock_min_query_len.max(1),
            limit: self.search_limit.max(1),
        }
    }

    pub fn fund_search(&self) -> SearchSettings {
        SearchSettings {
            min_query_len: self.fund_min_query_len.max(1),
            ..self.stock_search()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"api_base_url": "https://buzz.example"}"#).unwrap();
        assert_eq!(cfg.api_base_url, "https://buzz.example");
        assert_eq!(cfg.search_debounce_ms, 300);
        assert_eq!(cfg.fund_search().min_query_len, 2);
        assert_eq!(cfg.stock_search().min_query_len, 1);
    }

    #[test]
    fn test_env_override() {
        let mut cfg = Config::default();
        cfg.apply_env(Some("  ".to_string()));
        assert_eq!(cfg.api_base_url, "http://localhost:5000");
        cfg.apply_env(Some("https://api.example ".to_string()));
        assert_eq!(cfg.api_base_url, "https://api.example");
    }

    #[test]
    fn test_durations_have_floors() {
        let cfg = Config {
            request_timeout_secs: 0,
            refresh_interval_secs: 1,
            ..Config::default()
        };
        assert_eq!(cfg.request_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(5));
    }
}
