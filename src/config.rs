use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};

pub const DEMO_KEY: &str = "DEMO_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    /// Hosted store; `None` runs against the in-process store.
    pub store_url: Option<String>,
    pub store_api_key: String,
    /// File-backed cache when set, in-memory otherwise.
    pub cache_path: Option<PathBuf>,
    pub cache_max_age: Duration,
    pub community_limit: usize,
}

impl Config {
    /// Reads `.env` and the process environment. Unset or invalid values fall back to defaults.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let gemini_api_key = lookup("GEMINI_API_KEY").unwrap_or_else(|| {
            warn!("GEMINI_API_KEY not set, generation requests will fail");
            DEMO_KEY.to_string()
        });

        Self {
            port: try_load(&lookup, "PORT", 8080),
            gemini_api_key,
            gemini_base_url: lookup("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            gemini_model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            store_url: lookup("STORE_URL").filter(|s| !s.trim().is_empty()),
            store_api_key: lookup("STORE_API_KEY").unwrap_or_default(),
            cache_path: lookup("CACHE_PATH").filter(|s| !s.trim().is_empty()).map(PathBuf::from),
            cache_max_age: Duration::from_secs(try_load(&lookup, "CACHE_MAX_AGE_SECS", 86_400)),
            community_limit: try_load(&lookup, "COMMUNITY_LIMIT", 50),
        }
    }
}

fn try_load<T: FromStr + Display>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T::Err: Display,
{
    match lookup(key) {
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value '{raw}': {e}, using default: {default}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = config(&[]);
        assert_eq!(c.port, 8080);
        assert_eq!(c.gemini_api_key, DEMO_KEY);
        assert_eq!(c.gemini_model, DEFAULT_MODEL);
        assert_eq!(c.store_url, None);
        assert_eq!(c.cache_max_age, Duration::from_secs(86_400));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let c = config(&[("PORT", "eighty"), ("CACHE_MAX_AGE_SECS", "60"), ("STORE_URL", "  ")]);
        assert_eq!(c.port, 8080);
        assert_eq!(c.cache_max_age, Duration::from_secs(60));
        assert_eq!(c.store_url, None);
    }
}
