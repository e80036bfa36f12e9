use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::model::RecordId;
use crate::prefs::PrefsHandle;
use crate::remote::{Participant, ShareHandle};

pub const HOUSEHOLD_NAME_KEY: &str = "householdName";
pub const IS_SHARED_KEY: &str = "householdIsShared";
pub const IS_OWNER_KEY: &str = "householdIsOwner";
pub const MEMBERS_KEY: &str = "householdMembers";
pub const SHARE_URL_KEY: &str = "shareURL";
pub const SHARE_RECORD_KEY: &str = "shareRecordName";

/// Keys written by builds that talked to the remote store directly.
pub const LEGACY_SHARING_KEYS: [&str; 4] = [
    "cloudkit_share_record",
    "cloudkit_share_url",
    "cloudkit_zone_name",
    "cloudkit_is_sharing",
];

/// Every preference that caches sharing state.
pub const SHARING_CACHE_KEYS: [&str; 9] = [
    IS_SHARED_KEY,
    IS_OWNER_KEY,
    MEMBERS_KEY,
    SHARE_URL_KEY,
    SHARE_RECORD_KEY,
    LEGACY_SHARING_KEYS[0],
    LEGACY_SHARING_KEYS[1],
    LEGACY_SHARING_KEYS[2],
    LEGACY_SHARING_KEYS[3],
];

pub const DEFAULT_HOUSEHOLD_NAME: &str = "My Household";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharingState {
    pub household_name: String,
    pub is_shared: bool,
    /// Shared, and this device created the share.
    pub is_owner: bool,
    pub members: Vec<String>,
    pub participants: Vec<Participant>,
    pub share_url: Option<Url>,
    pub share_record: Option<RecordId>,
    #[serde(skip)]
    pub share: Option<ShareHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SharingEvent {
    ShareCreated { share: RecordId },
    ShareAccepted { url: String },
    SharingStopped,
    ParticipantsRefreshed { count: usize },
    CacheCleared { keys: usize },
}

/// Household display data plus the locally cached view of the remote share.
pub struct HouseholdProfile {
    prefs: PrefsHandle,
    state: RwLock<SharingState>,
    events: broadcast::Sender<SharingEvent>,
}

impl HouseholdProfile {
    pub fn load(prefs: PrefsHandle) -> Self {
        let share_url = prefs
            .get_string(SHARE_URL_KEY)
            .and_then(|raw| match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(target: "spichr", event = "profile_share_url_invalid", value = %raw, error = %err);
                    None
                }
            });
        let state = SharingState {
            household_name: prefs
                .get_string(HOUSEHOLD_NAME_KEY)
                .unwrap_or_else(|| DEFAULT_HOUSEHOLD_NAME.to_string()),
            is_shared: prefs.get_bool(IS_SHARED_KEY),
            is_owner: prefs.get_bool(IS_OWNER_KEY),
            members: prefs.get_string_list(MEMBERS_KEY),
            participants: Vec::new(),
            share_url,
            share_record: prefs.get_string(SHARE_RECORD_KEY).map(RecordId::new),
            share: None,
        };
        let (events, _) = broadcast::channel(32);
        Self {
            prefs,
            state: RwLock::new(state),
            events,
        }
    }

    pub fn snapshot(&self) -> SharingState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_shared(&self) -> bool {
        self.snapshot().is_shared
    }

    /// The in-memory share, only when it carries a URL.
    pub fn cached_share(&self) -> Option<ShareHandle> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.share.as_ref().filter(|s| s.url.is_some()).cloned()
    }

    /// Share record remembered from a previous run of this device as owner.
    pub fn remembered_owned_share(&self) -> Option<RecordId> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.is_owner {
            state.share_record.clone()
        } else {
            None
        }
    }

    pub fn rename(&self, name: &str) {
        let name = name.trim();
        let name = if name.is_empty() { DEFAULT_HOUSEHOLD_NAME } else { name };
        self.update(|state| state.household_name = name.to_string());
    }

    /// Records a share this device owns.
    pub fn adopt_owned_share(&self, share: &ShareHandle) {
        let participants = share.participants_excluding_owner();
        self.update(|state| {
            state.is_shared = true;
            state.is_owner = true;
            state.members = participants.iter().map(|p| p.label().to_string()).collect();
            state.participants = participants;
            state.share_url = share.url.clone();
            state.share_record = Some(share.id.clone());
            state.share = Some(share.clone());
        });
    }

    /// Records membership in someone else's share.
    pub fn mark_joined(&self, url: &Url) {
        self.update(|state| {
            state.is_shared = true;
            state.is_owner = false;
            state.share_url = Some(url.clone());
        });
    }

    pub fn set_participants(&self, participants: Vec<Participant>) {
        self.update(|state| {
            state.members = participants.iter().map(|p| p.label().to_string()).collect();
            state.participants = participants;
        });
    }

    /// Drops all sharing state, in memory and on disk; the household name stays.
    pub fn clear_sharing_cache(&self) -> Vec<String> {
        let removed: Vec<String> = SHARING_CACHE_KEYS
            .iter()
            .filter(|key| self.prefs.remove(key))
            .map(|key| key.to_string())
            .collect();
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let name = std::mem::take(&mut state.household_name);
            *state = SharingState {
                household_name: name,
                ..SharingState::default()
            };
        }
        self.prefs.persist_best_effort("profile_save_failed");
        info!(target: "spichr", event = "sharing_cache_cleared", keys = removed.len());
        self.emit(SharingEvent::CacheCleared {
            keys: removed.len(),
        });
        removed
    }

    /// Currently stored sharing keys, for diagnostics.
    pub fn cached_keys(&self) -> BTreeMap<String, Value> {
        self.prefs.snapshot(&SHARING_CACHE_KEYS)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SharingEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SharingEvent) {
        let _ = self.events.send(event);
    }

    fn update(&self, apply: impl FnOnce(&mut SharingState)) {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            apply(&mut state);
            state.clone()
        };
        self.save(&snapshot);
    }

    fn save(&self, state: &SharingState) {
        self.prefs.set_string(HOUSEHOLD_NAME_KEY, &state.household_name);
        self.prefs.set_bool(IS_SHARED_KEY, state.is_shared);
        self.prefs.set_bool(IS_OWNER_KEY, state.is_owner);
        self.prefs.set_string_list(MEMBERS_KEY, &state.members);
        match &state.share_url {
            Some(url) => self.prefs.set_string(SHARE_URL_KEY, url.as_str()),
            None => {
                self.prefs.remove(SHARE_URL_KEY);
            }
        }
        match &state.share_record {
            Some(id) => self.prefs.set_string(SHARE_RECORD_KEY, id.as_str()),
            None => {
                self.prefs.remove(SHARE_RECORD_KEY);
            }
        }
        self.prefs.persist_best_effort("profile_save_failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ParticipantRole, PermissionLevel};

    fn person(identity: &str, role: ParticipantRole) -> Participant {
        Participant {
            identity: identity.into(),
            role,
            display_name: None,
        }
    }

    fn share() -> ShareHandle {
        let owner = person("me", ParticipantRole::Owner);
        ShareHandle {
            id: RecordId::new("share-1"),
            root_record: Some(RecordId::new("FoodItem-1")),
            url: Url::parse("https://www.icloud.com/share/abc").ok(),
            title: None,
            share_type: None,
            public_permission: PermissionLevel::ReadWrite,
            owner: owner.clone(),
            participants: vec![owner, person("ana", ParticipantRole::Participant)],
        }
    }

    #[test]
    fn owned_share_survives_reload() {
        let prefs = PrefsHandle::in_memory();
        let profile = HouseholdProfile::load(prefs.clone());
        profile.adopt_owned_share(&share());

        let reloaded = HouseholdProfile::load(prefs);
        let state = reloaded.snapshot();
        assert!(state.is_shared && state.is_owner);
        assert_eq!(state.members, vec!["ana"]);
        assert_eq!(reloaded.remembered_owned_share(), Some(RecordId::new("share-1")));
        // The handle itself is never persisted.
        assert!(reloaded.cached_share().is_none());
    }

    #[test]
    fn clearing_cache_keeps_name_and_removes_legacy_keys() {
        let prefs = PrefsHandle::in_memory();
        prefs.set_string("cloudkit_zone_name", "zone");
        let profile = HouseholdProfile::load(prefs.clone());
        profile.rename("Flat 3");
        profile.adopt_owned_share(&share());

        let removed = profile.clear_sharing_cache();
        assert!(removed.contains(&"cloudkit_zone_name".to_string()));
        assert!(removed.contains(&SHARE_URL_KEY.to_string()));
        assert!(profile.cached_keys().is_empty());

        let state = profile.snapshot();
        assert_eq!(state.household_name, "Flat 3");
        assert!(!state.is_shared);
        assert!(state.share.is_none());
    }

    #[test]
    fn joining_marks_participant_not_owner() {
        let profile = HouseholdProfile::load(PrefsHandle::in_memory());
        let url = Url::parse("https://www.icloud.com/share/xyz").unwrap();
        profile.mark_joined(&url);
        let state = profile.snapshot();
        assert!(state.is_shared);
        assert!(!state.is_owner);
        assert_eq!(state.share_url, Some(url));
    }
}
