use std::time::Duration;

use anyhow::{Context, Result};
use leadsync_core::SyncConfig;
use leadsync_remote::RemoteConfig;

/// Settings read from `LEADSYNC_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub owner_id: Option<String>,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_url =
            non_empty("LEADSYNC_SUPABASE_URL").context("LEADSYNC_SUPABASE_URL is not set")?;
        let api_key =
            non_empty("LEADSYNC_SUPABASE_KEY").context("LEADSYNC_SUPABASE_KEY is not set")?;

        let mut sync = SyncConfig::default();
        if let Some(raw) = non_empty("LEADSYNC_RETRY_ATTEMPTS") {
            sync.max_fetch_attempts = raw
                .parse()
                .with_context(|| format!("Invalid LEADSYNC_RETRY_ATTEMPTS '{}'", raw))?;
        }
        if let Some(raw) = non_empty("LEADSYNC_RETRY_DELAY_MS") {
            let millis: u64 = raw
                .parse()
                .with_context(|| format!("Invalid LEADSYNC_RETRY_DELAY_MS '{}'", raw))?;
            sync.retry_delay = Duration::from_millis(millis);
        }

        Ok(Self {
            project_url,
            api_key,
            access_token: non_empty("LEADSYNC_ACCESS_TOKEN"),
            owner_id: non_empty("LEADSYNC_OWNER_ID"),
            sync,
        })
    }

    pub fn remote(&self) -> Result<RemoteConfig> {
        let remote = RemoteConfig::from_project_url(&self.project_url, self.api_key.clone())?;
        Ok(match &self.access_token {
            Some(token) => remote.with_access_token(token.clone()),
            None => remote,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_reads_required_and_optional_values() {
        let config = config_from(&[
            ("LEADSYNC_SUPABASE_URL", "https://abc.supabase.co"),
            ("LEADSYNC_SUPABASE_KEY", "anon"),
            ("LEADSYNC_OWNER_ID", "owner-1"),
            ("LEADSYNC_RETRY_ATTEMPTS", "5"),
            ("LEADSYNC_RETRY_DELAY_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.owner_id.as_deref(), Some("owner-1"));
        assert_eq!(config.access_token, None);
        assert_eq!(config.sync.max_fetch_attempts, 5);
        assert_eq!(config.sync.retry_delay, Duration::from_millis(250));
        assert_eq!(config.remote().unwrap().bearer(), "anon");
    }

    #[test]
    fn test_missing_url_is_an_error() {
        let err = config_from(&[("LEADSYNC_SUPABASE_KEY", "anon")]).unwrap_err();
        assert!(err.to_string().contains("LEADSYNC_SUPABASE_URL"));
    }

    #[test]
    fn test_bad_retry_count_is_an_error() {
        assert!(config_from(&[
            ("LEADSYNC_SUPABASE_URL", "https://abc.supabase.co"),
            ("LEADSYNC_SUPABASE_KEY", "anon"),
            ("LEADSYNC_RETRY_ATTEMPTS", "three"),
        ])
        .is_err());
    }
}
