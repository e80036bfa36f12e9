use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};
use url::Url;

use crate::config::SharingConfig;
use crate::profile::SharingEvent;
use crate::remote::RemoteStore;
use crate::state::HouseholdContext;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcceptOutcome {
    /// Not an invitation link; nothing happened.
    Ignored,
    Accepted { url: String },
}

/// Consumes invitation deep links. Records arrive through the platform's own
/// sync after acceptance, so nothing is imported here.
pub struct AcceptanceHandler {
    household: Arc<HouseholdContext>,
    remote: Arc<dyn RemoteStore>,
    sharing: SharingConfig,
}

impl AcceptanceHandler {
    pub fn new(
        household: Arc<HouseholdContext>,
        remote: Arc<dyn RemoteStore>,
        sharing: SharingConfig,
    ) -> Self {
        Self {
            household,
            remote,
            sharing,
        }
    }

    pub fn is_share_invitation(&self, url: &Url) -> bool {
        let host_matches = url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.sharing.invitation_host));
        let path_matches = url
            .path_segments()
            .is_some_and(|mut segments| {
                segments.any(|segment| segment == self.sharing.invitation_path_segment)
            });
        host_matches && path_matches
    }

    /// Accepts the invitation behind `raw`. Failures are returned as-is with
    /// local state untouched; there is no retry.
    pub async fn accept_share(&self, raw: &str) -> AppResult<AcceptOutcome> {
        let url = match Url::parse(raw.trim()) {
            Ok(url) if self.is_share_invitation(&url) => url,
            _ => {
                info!(target: "spichr", event = "accept_ignored_url", url = %raw);
                return Ok(AcceptOutcome::Ignored);
            }
        };

        let metadata = self.remote.share_metadata(&url).await.map_err(|err| {
            error!(target: "spichr", event = "accept_metadata_failed", url = %url, error = %err);
            AppError::from(err).with_context("operation", "share_metadata")
        })?;
        self.remote.accept_share(&metadata).await.map_err(|err| {
            error!(target: "spichr", event = "accept_failed", url = %url, error = %err);
            AppError::from(err).with_context("operation", "accept_share")
        })?;

        let profile = &self.household.profile;
        profile.mark_joined(&url);
        profile.emit(SharingEvent::ShareAccepted {
            url: url.to_string(),
        });
        info!(
            target: "spichr",
            event = "accept_complete",
            share = %metadata.share_id,
            owner = %metadata.owner.label()
        );
        Ok(AcceptOutcome::Accepted {
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::PrefsHandle;
    use crate::remote::InMemoryRemote;

    fn handler() -> AcceptanceHandler {
        AcceptanceHandler::new(
            Arc::new(HouseholdContext::new(PrefsHandle::in_memory())),
            Arc::new(InMemoryRemote::new()),
            SharingConfig::default(),
        )
    }

    #[test]
    fn recognizes_invitation_links_by_host_and_path() {
        let h = handler();
        let yes = Url::parse("https://www.icloud.com/share/0abc#Household").unwrap();
        let wrong_host = Url::parse("https://example.com/share/0abc").unwrap();
        let wrong_path = Url::parse("https://www.icloud.com/photos/0abc").unwrap();
        assert!(h.is_share_invitation(&yes));
        assert!(!h.is_share_invitation(&wrong_host));
        assert!(!h.is_share_invitation(&wrong_path));
    }

    #[tokio::test]
    async fn garbage_is_ignored_without_error() {
        let h = handler();
        assert_eq!(h.accept_share("not a url").await.unwrap(), AcceptOutcome::Ignored);
        assert_eq!(
            h.accept_share("spichr://open/item").await.unwrap(),
            AcceptOutcome::Ignored
        );
    }
}
