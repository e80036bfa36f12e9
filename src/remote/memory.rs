//! Process-local remote store with fault injection, used by tests and the CLI.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{
    Participant, ParticipantRole, PermissionLevel, RemoteError, RemoteRecord, RemoteResult,
    RemoteStore, ShareHandle, ShareMetadata, SHARE_RECORD_TYPE,
};
use crate::model::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateShare,
    FetchShare,
    SaveShare,
    AttachToShare,
    ShareForRecord,
    FetchRecord,
    Query,
    ListShares,
    SaveRecords,
    DeleteRecords,
    ShareMetadata,
    AcceptShare,
}

#[derive(Default)]
struct State {
    records: BTreeMap<RecordId, RemoteRecord>,
    shares: BTreeMap<RecordId, ShareHandle>,
    invitations: HashMap<String, ShareMetadata>,
    accepted: Vec<RecordId>,
    op_failures: HashMap<RemoteOp, RemoteError>,
    record_failures: HashMap<RecordId, RemoteError>,
    created_shares: usize,
    next_share: u64,
}

pub struct InMemoryRemote {
    state: Mutex<State>,
    owner: Participant,
    invitation_base: String,
    latency: Option<Duration>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            owner: Participant {
                identity: "owner@device".into(),
                role: ParticipantRole::Owner,
                display_name: Some("Me".into()),
            },
            invitation_base: "https://www.icloud.com/share/".into(),
            latency: None,
        }
    }

    pub fn with_owner(mut self, identity: &str, display_name: &str) -> Self {
        self.owner = Participant {
            identity: identity.into(),
            role: ParticipantRole::Owner,
            display_name: Some(display_name.into()),
        };
        self
    }

    /// Every call sleeps this long first; makes interleavings observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self, op: RemoteOp) -> RemoteResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.lock().op_failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Makes every call of `op` fail with `err` until cleared.
    pub fn fail(&self, op: RemoteOp, err: RemoteError) {
        self.lock().op_failures.insert(op, err);
    }

    pub fn clear_failure(&self, op: RemoteOp) {
        self.lock().op_failures.remove(&op);
    }

    /// Makes per-record writes and deletes of `id` fail with `err`.
    pub fn fail_record(&self, id: RecordId, err: RemoteError) {
        self.lock().record_failures.insert(id, err);
    }

    pub fn insert_record(&self, record: RemoteRecord) {
        self.lock().records.insert(record.id.clone(), record);
    }

    pub fn insert_share(&self, share: ShareHandle) {
        self.lock().shares.insert(share.id.clone(), share);
    }

    /// Drops a record without touching anything that points at it.
    pub fn remove_record_silently(&self, id: &RecordId) -> bool {
        self.lock().records.remove(id).is_some()
    }

    pub fn add_participant(&self, share: &RecordId, participant: Participant) -> bool {
        match self.lock().shares.get_mut(share) {
            Some(handle) => {
                handle.participants.push(participant);
                true
            }
            None => false,
        }
    }

    /// Publishes an invitation link for a share owned by someone else.
    pub fn register_invitation(&self, url: Url, owner: Participant) -> ShareMetadata {
        let mut state = self.lock();
        state.next_share += 1;
        let metadata = ShareMetadata {
            share_id: RecordId::new(format!("invited-share-{}", state.next_share)),
            url: url.clone(),
            owner,
            title: Some("Household".into()),
        };
        state
            .invitations
            .insert(url.as_str().to_string(), metadata.clone());
        metadata
    }

    pub fn created_shares(&self) -> usize {
        self.lock().created_shares
    }

    pub fn share_count(&self) -> usize {
        self.lock().shares.len()
    }

    pub fn record(&self, id: &RecordId) -> Option<RemoteRecord> {
        self.lock().records.get(id).cloned()
    }

    pub fn records_of_type(&self, record_type: &str) -> Vec<RemoteRecord> {
        self.lock()
            .records
            .values()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect()
    }

    pub fn accepted(&self) -> Vec<RecordId> {
        self.lock().accepted.clone()
    }

    fn delete_one(state: &mut State, id: &RecordId) -> RemoteResult<()> {
        if let Some(err) = state.record_failures.get(id) {
            return Err(err.clone());
        }
        let share = state.shares.remove(id).is_some();
        let record = state.records.remove(id).is_some();
        if share || record {
            Ok(())
        } else {
            Err(RemoteError::NotFound(id.clone()))
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn create_share(&self, root: &RemoteRecord) -> RemoteResult<ShareHandle> {
        self.enter(RemoteOp::CreateShare).await?;
        let mut state = self.lock();
        if let Some(err) = state.record_failures.get(&root.id) {
            return Err(err.clone());
        }
        state.next_share += 1;
        state.created_shares += 1;
        let id = RecordId::new(format!("share-{}", state.next_share));
        let url = Url::parse(&format!("{}{:08x}", self.invitation_base, state.next_share))
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let handle = ShareHandle {
            id: id.clone(),
            root_record: Some(root.id.clone()),
            url: Some(url),
            title: None,
            share_type: None,
            public_permission: PermissionLevel::None,
            owner: self.owner.clone(),
            participants: vec![self.owner.clone()],
        };
        state
            .records
            .insert(root.id.clone(), root.clone().with_parent(id.clone()));
        state.shares.insert(id, handle.clone());
        Ok(handle)
    }

    async fn fetch_share(&self, id: &RecordId) -> RemoteResult<ShareHandle> {
        self.enter(RemoteOp::FetchShare).await?;
        self.lock()
            .shares
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.clone()))
    }

    async fn save_share(&self, share: &ShareHandle) -> RemoteResult<ShareHandle> {
        self.enter(RemoteOp::SaveShare).await?;
        let mut state = self.lock();
        match state.shares.get_mut(&share.id) {
            Some(stored) => {
                *stored = share.clone();
                Ok(stored.clone())
            }
            None => Err(RemoteError::NotFound(share.id.clone())),
        }
    }

    async fn attach_to_share(&self, share: &RecordId, record: &RemoteRecord) -> RemoteResult<()> {
        self.enter(RemoteOp::AttachToShare).await?;
        let mut state = self.lock();
        if let Some(err) = state.record_failures.get(&record.id) {
            return Err(err.clone());
        }
        if !state.shares.contains_key(share) {
            return Err(RemoteError::NotFound(share.clone()));
        }
        state
            .records
            .insert(record.id.clone(), record.clone().with_parent(share.clone()));
        Ok(())
    }

    async fn share_for_record(&self, record: &RecordId) -> RemoteResult<Option<ShareHandle>> {
        self.enter(RemoteOp::ShareForRecord).await?;
        let state = self.lock();
        Ok(state
            .records
            .get(record)
            .and_then(|r| r.parent.as_ref())
            .and_then(|parent| state.shares.get(parent))
            .cloned())
    }

    async fn fetch_record(&self, id: &RecordId) -> RemoteResult<RemoteRecord> {
        self.enter(RemoteOp::FetchRecord).await?;
        let state = self.lock();
        if let Some(record) = state.records.get(id) {
            return Ok(record.clone());
        }
        state
            .shares
            .get(id)
            .map(|share| RemoteRecord::new(share.id.clone(), SHARE_RECORD_TYPE))
            .ok_or_else(|| RemoteError::NotFound(id.clone()))
    }

    async fn query(&self, record_type: &str) -> RemoteResult<Vec<RemoteRecord>> {
        self.enter(RemoteOp::Query).await?;
        let state = self.lock();
        if record_type == SHARE_RECORD_TYPE {
            return Ok(state
                .shares
                .keys()
                .map(|id| RemoteRecord::new(id.clone(), SHARE_RECORD_TYPE))
                .collect());
        }
        Ok(state
            .records
            .values()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect())
    }

    async fn list_shares(&self) -> RemoteResult<Vec<ShareHandle>> {
        self.enter(RemoteOp::ListShares).await?;
        Ok(self.lock().shares.values().cloned().collect())
    }

    async fn save_records(&self, records: &[RemoteRecord]) -> Vec<(RecordId, RemoteResult<()>)> {
        if let Err(err) = self.enter(RemoteOp::SaveRecords).await {
            return records.iter().map(|r| (r.id.clone(), Err(err.clone()))).collect();
        }
        let mut state = self.lock();
        records
            .iter()
            .map(|record| {
                let outcome = match state.record_failures.get(&record.id) {
                    Some(err) => Err(err.clone()),
                    None => {
                        state.records.insert(record.id.clone(), record.clone());
                        Ok(())
                    }
                };
                (record.id.clone(), outcome)
            })
            .collect()
    }

    async fn delete_records(&self, ids: &[RecordId]) -> Vec<(RecordId, RemoteResult<()>)> {
        if let Err(err) = self.enter(RemoteOp::DeleteRecords).await {
            return ids.iter().map(|id| (id.clone(), Err(err.clone()))).collect();
        }
        let mut state = self.lock();
        ids.iter()
            .map(|id| (id.clone(), Self::delete_one(&mut state, id)))
            .collect()
    }

    async fn delete_record(&self, id: &RecordId) -> RemoteResult<()> {
        self.enter(RemoteOp::DeleteRecords).await?;
        Self::delete_one(&mut self.lock(), id)
    }

    async fn share_metadata(&self, url: &Url) -> RemoteResult<ShareMetadata> {
        self.enter(RemoteOp::ShareMetadata).await?;
        self.lock()
            .invitations
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(RecordId::new(url.as_str())))
    }

    async fn accept_share(&self, metadata: &ShareMetadata) -> RemoteResult<()> {
        self.enter(RemoteOp::AcceptShare).await?;
        let mut state = self.lock();
        if !state.invitations.contains_key(metadata.url.as_str()) {
            return Err(RemoteError::Rejected(format!(
                "no invitation for {}",
                metadata.url
            )));
        }
        state.accepted.push(metadata.share_id.clone());
        Ok(())
    }
}
