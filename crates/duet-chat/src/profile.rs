//! Seam to the external user-profile service. duet never owns account
//! records; it only resolves public profiles and contact addresses.

use async_trait::async_trait;
use tracing::debug;

use duet_types::models::UserProfile;

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Resolve a user's public profile. `Ok(None)` means the user is
    /// unknown to the profile service (or the service is not configured).
    async fn fetch(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>>;
}

/// Profile lookup over the profile service's REST API.
///
/// Without a configured base URL every lookup resolves to absent, which
/// keeps conversation lists usable and silently disables notifications in
/// development setups.
pub struct HttpProfileDirectory {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpProfileDirectory {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl ProfileDirectory for HttpProfileDirectory {
    async fn fetch(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
        let Some(base) = &self.base_url else {
            debug!("profile service not configured, treating {} as unknown", user_id);
            return Ok(None);
        };

        let url = format!("{}/users/{}", base, user_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let profile = response.error_for_status()?.json::<UserProfile>().await?;
        Ok(Some(profile))
    }
}
