//! The multi-step protocol that turns the local household into a remote share.
//!
//! There is no atomic commit on the remote side, so each step is attributed in
//! errors and the session records every state it passed through.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::SharingConfig;
use crate::confirm::{Confirmation, DestructiveAction, Reversibility};
use crate::model::{HouseholdId, InventoryItem, ItemId, NewItem, RecordId, ITEM_RECORD_TYPE};
use crate::profile::SharingEvent;
use crate::remote::{Participant, PermissionLevel, RemoteRecord, RemoteStore, ShareHandle};
use crate::state::HouseholdContext;
use crate::store::{ItemFilter, ItemSort, ItemStore};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStep {
    CheckExisting,
    LoadItems,
    CreateShare,
    FetchShare,
    ConfigureShare,
    AttachItems,
}

impl fmt::Display for ShareStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShareStep::CheckExisting => "check existing share",
            ShareStep::LoadItems => "load household items",
            ShareStep::CreateShare => "create share",
            ShareStep::FetchShare => "fetch share",
            ShareStep::ConfigureShare => "configure share",
            ShareStep::AttachItems => "attach items",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum ShareState {
    NotStarted,
    Creating,
    Created,
    PropagatingItems,
    Complete,
    Failed(ShareStep),
}

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("a share operation is already in progress")]
    AlreadyInProgress,
    #[error("sharing failed while trying to {step}: {source}")]
    Step {
        step: ShareStep,
        #[source]
        source: AppError,
    },
    #[error("the saved share has no invitation URL")]
    MissingUrl,
}

impl ShareError {
    fn at(step: ShareStep, source: impl Into<AppError>) -> Self {
        ShareError::Step {
            step,
            source: source.into(),
        }
    }

    pub fn step(&self) -> Option<ShareStep> {
        match self {
            ShareError::Step { step, .. } => Some(*step),
            ShareError::MissingUrl => Some(ShareStep::ConfigureShare),
            ShareError::AlreadyInProgress => None,
        }
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::AlreadyInProgress => {
                AppError::new("SHARE/IN_PROGRESS", "A share operation is already in progress")
            }
            ShareError::MissingUrl => {
                AppError::new("SHARE/MISSING_URL", "The saved share has no invitation URL")
            }
            ShareError::Step { step, source } => {
                AppError::new("SHARE/STEP_FAILED", format!("Sharing failed: could not {step}"))
                    .with_context("step", step.to_string())
                    .with_cause(source)
            }
        }
    }
}

/// Transient record of one share attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ShareSession {
    pub household: Option<HouseholdId>,
    pub owner: Option<Participant>,
    pub target_items: Vec<ItemId>,
    pub share: Option<RecordId>,
    pub permission: PermissionLevel,
    pub state: ShareState,
    pub history: Vec<ShareState>,
}

impl ShareSession {
    fn new() -> Self {
        Self {
            household: None,
            owner: None,
            target_items: Vec::new(),
            share: None,
            permission: PermissionLevel::None,
            state: ShareState::NotStarted,
            history: vec![ShareState::NotStarted],
        }
    }

    fn advance(&mut self, next: ShareState) {
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: ShareError) -> ShareError {
        if let Some(step) = err.step() {
            self.advance(ShareState::Failed(step));
        }
        error!(
            target: "spichr",
            event = "share_failed",
            step = ?err.step(),
            history = ?self.history,
            error = %err
        );
        err
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum AttachOutcome {
    Attached,
    /// Remote attach failed; the item stays unshared.
    AttachFailed(String),
    /// Attached remotely, but the local back-reference was not written.
    ReferenceNotSaved(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareOutcome {
    pub share: ShareHandle,
    /// An existing share was returned and nothing was created.
    pub reused: bool,
    pub placeholder: Option<ItemId>,
    pub attached: Vec<(ItemId, AttachOutcome)>,
    pub session: ShareSession,
}

impl ShareOutcome {
    pub fn failed_items(&self) -> Vec<ItemId> {
        self.attached
            .iter()
            .filter(|(_, outcome)| *outcome != AttachOutcome::Attached)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    NotShared,
    /// The owner deleted the remote share.
    Stopped {
        share: Option<RecordId>,
        reversibility: Reversibility,
    },
    /// A participant dropped its local membership.
    Left,
}

pub struct ShareOrchestrator {
    household: Arc<HouseholdContext>,
    store: Arc<dyn ItemStore>,
    remote: Arc<dyn RemoteStore>,
    sharing: SharingConfig,
}

impl ShareOrchestrator {
    pub fn new(
        household: Arc<HouseholdContext>,
        store: Arc<dyn ItemStore>,
        remote: Arc<dyn RemoteStore>,
        sharing: SharingConfig,
    ) -> Self {
        Self {
            household,
            store,
            remote,
            sharing,
        }
    }

    pub async fn share_household(&self) -> Result<ShareOutcome, ShareError> {
        let _flight = self.household.begin_share()?;
        let mut session = ShareSession::new();
        let profile = &self.household.profile;

        // Step 1: an existing share is returned untouched.
        if let Some(share) = profile.cached_share() {
            info!(target: "spichr", event = "share_reused", share = %share.id);
            return Ok(Self::reused(share, session));
        }
        if let Some(remembered) = profile.remembered_owned_share() {
            match self.remote.fetch_share(&remembered).await {
                Ok(share) if share.url.is_some() => {
                    profile.adopt_owned_share(&share);
                    info!(target: "spichr", event = "share_rehydrated", share = %share.id);
                    return Ok(Self::reused(share, session));
                }
                Ok(_) => {
                    warn!(target: "spichr", event = "share_remembered_without_url", share = %remembered);
                }
                Err(err) if err.is_not_found() => {
                    warn!(target: "spichr", event = "share_remembered_missing", share = %remembered);
                }
                Err(err) => {
                    return Err(session.fail(ShareError::at(ShareStep::CheckExisting, err)));
                }
            }
        }

        // Step 2: household items, or a placeholder so the share has a root.
        let household = match self.household.identity.current() {
            Ok(id) => id,
            Err(err) => return Err(session.fail(ShareError::at(ShareStep::LoadItems, err))),
        };
        session.household = Some(household);
        let mut items = match self
            .store
            .fetch(&ItemFilter::household(household), ItemSort::Name)
            .await
        {
            Ok(items) => items,
            Err(err) => return Err(session.fail(ShareError::at(ShareStep::LoadItems, err))),
        };
        let mut placeholder = None;
        if items.is_empty() {
            let seed = NewItem::named(self.sharing.placeholder_name.clone()).in_stock(false);
            match self.store.insert(seed).await {
                Ok(item) => {
                    info!(target: "spichr", event = "share_placeholder_created", item_id = %item.id);
                    placeholder = Some(item.id);
                    items.push(item);
                }
                Err(err) => return Err(session.fail(ShareError::at(ShareStep::LoadItems, err))),
            }
        }
        session.target_items = items.iter().map(|item| item.id).collect();
        info!(
            target: "spichr",
            event = "share_started",
            household_id = %household,
            items = items.len()
        );

        // Steps 3-5 share one remote root and must all succeed.
        session.advance(ShareState::Creating);
        let root = &items[0];
        let root_record = RemoteRecord::new(root.record_id(), ITEM_RECORD_TYPE);
        let initial = match self.remote.create_share(&root_record).await {
            Ok(share) => share,
            Err(err) => return Err(session.fail(ShareError::at(ShareStep::CreateShare, err))),
        };
        session.share = Some(initial.id.clone());
        session.owner = Some(initial.owner.clone());

        let mut share = match self.remote.fetch_share(&initial.id).await {
            Ok(share) => share,
            Err(err) => return Err(session.fail(ShareError::at(ShareStep::FetchShare, err))),
        };

        share.public_permission = PermissionLevel::ReadWrite;
        share.title = Some(self.sharing.share_title.clone());
        share.share_type = Some(self.sharing.share_type.clone());
        let share = match self.remote.save_share(&share).await {
            Ok(saved) => saved,
            Err(err) => return Err(session.fail(ShareError::at(ShareStep::ConfigureShare, err))),
        };
        if share.url.is_none() {
            return Err(session.fail(ShareError::MissingUrl));
        }
        session.permission = share.public_permission;
        session.advance(ShareState::Created);

        // Step 6: best effort per item.
        session.advance(ShareState::PropagatingItems);
        let mut attached = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let outcome = if index == 0 {
                self.write_reference(item, &share.id).await
            } else {
                let record = RemoteRecord::new(item.record_id(), ITEM_RECORD_TYPE);
                match self.remote.attach_to_share(&share.id, &record).await {
                    Ok(()) => self.write_reference(item, &share.id).await,
                    Err(err) => {
                        warn!(
                            target: "spichr",
                            event = "share_attach_failed",
                            item_id = %item.id,
                            error = %err
                        );
                        AttachOutcome::AttachFailed(err.to_string())
                    }
                }
            };
            attached.push((item.id, outcome));
        }

        profile.adopt_owned_share(&share);
        profile.emit(SharingEvent::ShareCreated {
            share: share.id.clone(),
        });
        session.advance(ShareState::Complete);
        let failed = attached
            .iter()
            .filter(|(_, o)| *o != AttachOutcome::Attached)
            .count();
        info!(
            target: "spichr",
            event = "share_complete",
            share = %share.id,
            items = attached.len(),
            failed
        );

        Ok(ShareOutcome {
            share,
            reused: false,
            placeholder,
            attached,
            session,
        })
    }

    fn reused(share: ShareHandle, mut session: ShareSession) -> ShareOutcome {
        session.share = Some(share.id.clone());
        session.owner = Some(share.owner.clone());
        session.permission = share.public_permission;
        session.advance(ShareState::Complete);
        ShareOutcome {
            share,
            reused: true,
            placeholder: None,
            attached: Vec::new(),
            session,
        }
    }

    async fn write_reference(&self, item: &InventoryItem, share: &RecordId) -> AttachOutcome {
        match self.store.set_share_reference(item.id, Some(share)).await {
            Ok(_) => AttachOutcome::Attached,
            Err(err) => {
                warn!(
                    target: "spichr",
                    event = "share_reference_save_failed",
                    item_id = %item.id,
                    error = %err
                );
                AttachOutcome::ReferenceNotSaved(err.to_string())
            }
        }
    }

    /// Ends sharing. Owners delete the remote share; participants only drop
    /// their local membership. On a remote failure nothing local changes.
    pub async fn stop_sharing(&self, confirmation: &Confirmation) -> AppResult<StopOutcome> {
        confirmation.require(DestructiveAction::StopSharing)?;
        let _flight = self.household.begin_share()?;
        let profile = &self.household.profile;
        let state = profile.snapshot();
        if !state.is_shared {
            return Ok(StopOutcome::NotShared);
        }

        if !state.is_owner {
            profile.clear_sharing_cache();
            profile.emit(SharingEvent::SharingStopped);
            info!(target: "spichr", event = "share_left");
            return Ok(StopOutcome::Left);
        }

        let share = match state.share.as_ref().map(|s| s.id.clone()) {
            Some(id) => Some(id),
            None => self.resolve_share().await?.map(|s| s.id),
        };
        if let Some(id) = &share {
            match self.remote.delete_record(id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    warn!(target: "spichr", event = "share_already_gone", share = %id);
                }
                Err(err) => {
                    error!(target: "spichr", event = "share_stop_failed", share = %id, error = %err);
                    return Err(AppError::from(err).with_context("operation", "stop_sharing"));
                }
            }
        }

        profile.clear_sharing_cache();
        let cleared = self.store.clear_share_references().await?;
        profile.emit(SharingEvent::SharingStopped);
        info!(
            target: "spichr",
            event = "share_stopped",
            share = ?share.as_ref().map(RecordId::as_str),
            references_cleared = cleared
        );
        Ok(StopOutcome::Stopped {
            share,
            reversibility: DestructiveAction::StopSharing.reversibility(),
        })
    }

    /// Share of the first household item that resolves to one.
    async fn resolve_share(&self) -> AppResult<Option<ShareHandle>> {
        let filter = match self.household.identity.peek() {
            Some(household) => ItemFilter::household(household),
            None => ItemFilter::default(),
        };
        let items = self.store.fetch(&filter, ItemSort::Name).await?;
        match items.first() {
            Some(item) => Ok(self.remote.share_for_record(&item.record_id()).await?),
            None => Ok(None),
        }
    }

    /// Participants other than the owner. A share found through the local
    /// items is adopted as this device's own; on error nothing changes.
    pub async fn load_participants(&self) -> AppResult<Vec<Participant>> {
        let profile = &self.household.profile;
        let participants = match profile.snapshot().share {
            Some(share) => {
                let participants = share.participants_excluding_owner();
                profile.set_participants(participants.clone());
                participants
            }
            None => match self.resolve_share().await? {
                Some(share) => {
                    profile.adopt_owned_share(&share);
                    share.participants_excluding_owner()
                }
                None => {
                    profile.set_participants(Vec::new());
                    Vec::new()
                }
            },
        };
        profile.emit(SharingEvent::ParticipantsRefreshed {
            count: participants.len(),
        });
        Ok(participants)
    }
}
