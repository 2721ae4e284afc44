use std::time::Duration;

use crate::error::{RemoteClientError, Result};

/// Default timeout for REST requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Interval between realtime heartbeats.
const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Connection settings for a Supabase project.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// PostgREST base, e.g. `https://xyz.supabase.co/rest/v1`
    pub rest_url: String,
    /// Realtime websocket endpoint, e.g. `wss://xyz.supabase.co/realtime/v1/websocket`
    pub realtime_url: String,
    /// Project (anon) API key
    pub api_key: String,
    /// User JWT; requests run as the anonymous role without it
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl RemoteConfig {
    /// Derives both endpoints from the project URL.
    pub fn from_project_url(project_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let base = project_url.trim().trim_end_matches('/');
        let ws_base = if let Some(host) = base.strip_prefix("https://") {
            format!("wss://{}", host)
        } else if let Some(host) = base.strip_prefix("http://") {
            format!("ws://{}", host)
        } else {
            return Err(RemoteClientError::config(format!(
                "Project URL must start with http:// or https://, got '{}'",
                project_url
            )));
        };

        Ok(Self {
            rest_url: format!("{}/rest/v1", base),
            realtime_url: format!("{}/realtime/v1/websocket", ws_base),
            api_key: api_key.into(),
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Token sent as the bearer credential.
    pub fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    /// Realtime URL with the query parameters the server expects.
    pub fn realtime_endpoint(&self) -> String {
        format!(
            "{}?apikey={}&vsn=1.0.0",
            self.realtime_url,
            urlencoding::encode(&self.api_key)
        )
    }
}
