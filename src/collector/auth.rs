// =============================================================================
// Deribit OAuth2 — client-credentials token management
// =============================================================================
//
// Tokens live ~23 h and are refreshed once they come within one hour of
// expiry. Renewal happens between connections: the collector asks for a
// bearer right before each WebSocket connect and holds it for the session.
// Missing or rejected credentials degrade the session to unauthenticated
// mode instead of failing it.
// =============================================================================

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::Config;

/// Assumed token lifetime.
const TOKEN_TTL: Duration = Duration::from_secs(23 * 3600);
/// Refresh once remaining lifetime drops below this.
const REFRESH_MARGIN: Duration = Duration::from_secs(3600);

/// Cached OAuth2 access token for the collector.
pub struct AuthManager {
    http: reqwest::Client,
    rest_base: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    token: Option<String>,
    expires_at: Instant,
}

impl AuthManager {
    pub fn new(http: reqwest::Client, cfg: &Config) -> Self {
        Self {
            http,
            rest_base: cfg.deribit_rest.clone(),
            client_id: cfg.deribit_id.clone(),
            client_secret: cfg.deribit_secret.clone(),
            token: None,
            expires_at: Instant::now(),
        }
    }

    /// Return a bearer token for the next connection, refreshing if needed.
    /// `None` means the session runs unauthenticated.
    pub async fn bearer(&mut self) -> Option<String> {
        let (id, secret) = match (self.client_id.clone(), self.client_secret.clone()) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                warn!("Deribit credentials absent, running unauthenticated");
                return None;
            }
        };

        if let Some(token) = &self.token {
            let remaining = self.expires_at.saturating_duration_since(Instant::now());
            if remaining > REFRESH_MARGIN {
                return Some(token.clone());
            }
            info!("access token within refresh margin, renewing");
        }

        match self.fetch_token(&id, &secret).await {
            Ok(token) => {
                info!("Deribit auth OK");
                self.expires_at = Instant::now() + TOKEN_TTL;
                self.token = Some(token.clone());
                Some(token)
            }
            Err(e) => {
                error!(error = %e, "Deribit auth failed, running unauthenticated");
                self.token = None;
                None
            }
        }
    }

    async fn fetch_token(&self, id: &str, secret: &str) -> Result<String> {
        let url = format!("{}/public/auth", self.rest_base);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", id),
                ("client_secret", secret),
            ])
            .send()
            .await
            .context("auth request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("auth response not JSON")?;

        if !status.is_success() {
            anyhow::bail!("auth returned {status}: {body}");
        }
        if let Some(err) = body.get("error") {
            anyhow::bail!("auth rejected: {err}");
        }

        body.pointer("/result/access_token")
            .and_then(|t| t.as_str())
            .map(str::to_owned)
            .context("auth response missing access_token")
    }
}
