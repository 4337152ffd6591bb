use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cirrus_core::remote::{AuthApi, RemoteApi};
use cirrus_core::types::{
    unix_now, AuthInfo, AuthResponse, CreateFolderRequest, FolderPage, LinkDescriptor,
    MoveRequest, MutationOutcome, NodeKind, Pagination, RejectReason, Rejection, RenameRequest,
    ShareDescriptor, ShareSummary,
};
use cirrus_core::{DriveError, DriveResult};
use cirrus_crypto::encoding::{b64_decode, b64_encode};
use cirrus_crypto::{Registration, SrpGroup, SrpServer};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct RemoteState {
    shares: BTreeMap<String, ShareDescriptor>,
    links: HashMap<String, LinkDescriptor>,
    /// parent id → child ids in insertion order
    order: HashMap<String, Vec<String>>,
    accounts: HashMap<String, Registration>,
    /// session id → verifier-side state of a pending login
    logins: HashMap<String, SrpServer>,
    reject_next: HashMap<String, RejectReason>,
}

impl RemoteState {
    fn children(&self, parent_id: &str) -> impl Iterator<Item = &LinkDescriptor> {
        self.order
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.links.get(id))
    }

    fn name_taken(&self, parent_id: &str, name_hash: &str, except: &str) -> bool {
        self.children(parent_id)
            .any(|l| !l.trashed && l.id != except && l.name_hash == name_hash)
    }

    /// True when `id` is `target` or one of its ancestors.
    fn contains_target(&self, id: &str, target: &str) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(target.to_string());
        while let Some(cur) = current {
            if cur == id {
                return true;
            }
            if !seen.insert(cur.clone()) {
                return false;
            }
            current = self.links.get(&cur).and_then(|l| l.parent_id.clone());
        }
        false
    }

    fn adjust_sizes(&mut self, start: Option<&str>, delta: i64) {
        let mut seen = HashSet::new();
        let mut current = start.map(str::to_string);
        while let Some(id) = current {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(link) = self.links.get_mut(&id) else {
                break;
            };
            link.size = link.size.saturating_add_signed(delta);
            if link.trashed {
                break;
            }
            current = link.parent_id.clone();
        }
    }

    fn attach(&mut self, parent_id: &str, id: &str) {
        let siblings = self.order.entry(parent_id.to_string()).or_default();
        if !siblings.iter().any(|c| c == id) {
            siblings.push(id.to_string());
        }
    }

    fn detach(&mut self, parent_id: &str, id: &str) {
        if let Some(siblings) = self.order.get_mut(parent_id) {
            siblings.retain(|c| c != id);
        }
    }

    fn take_injected(&mut self, id: &str) -> Option<Rejection> {
        self.reject_next.remove(id).map(|reason| Rejection {
            id: id.to_string(),
            reason,
        })
    }
}

/// A remote that lives in memory.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    folder_fetches: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every folder listing by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert_share(&self, share: ShareDescriptor) {
        self.state.lock().shares.insert(share.link.id.clone(), share);
    }

    /// Store a link; a live link's size is added to its ancestors.
    pub fn insert_link(&self, link: LinkDescriptor) {
        let mut state = self.state.lock();
        if let Some(parent) = link.parent_id.clone() {
            state.attach(&parent, &link.id);
            if !link.trashed && link.kind == NodeKind::File {
                state.adjust_sizes(Some(&parent), link.size as i64);
            }
        }
        state.links.insert(link.id.clone(), link);
    }

    pub fn link(&self, id: &str) -> Option<LinkDescriptor> {
        self.state.lock().links.get(id).cloned()
    }

    /// Edit a stored link in place.
    pub fn tamper(&self, id: &str, edit: impl FnOnce(&mut LinkDescriptor)) -> bool {
        match self.state.lock().links.get_mut(id) {
            Some(link) => {
                edit(link);
                true
            }
            None => false,
        }
    }

    /// Number of folder listings served so far.
    pub fn folder_fetches(&self) -> usize {
        self.folder_fetches.load(Ordering::SeqCst)
    }

    /// Reject the next mutation touching `id` with `reason`.
    pub fn reject_next(&self, id: &str, reason: RejectReason) {
        self.state.lock().reject_next.insert(id.to_string(), reason);
    }

    pub fn register_account(&self, identity: &str, registration: Registration) {
        self.state
            .lock()
            .accounts
            .insert(identity.to_string(), registration);
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryRemote")
            .field("shares", &state.shares.len())
            .field("links", &state.links.len())
            .field("folder_fetches", &self.folder_fetches())
            .finish()
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn get_shares(&self) -> DriveResult<Vec<ShareSummary>> {
        Ok(self
            .state
            .lock()
            .shares
            .values()
            .map(|s| ShareSummary {
                share_id: s.link.id.clone(),
                root_link_id: s.root_link_id.clone(),
                is_primary: s.is_primary,
            })
            .collect())
    }

    async fn get_share_by_id(&self, share_id: &str) -> DriveResult<ShareDescriptor> {
        self.state
            .lock()
            .shares
            .get(share_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(share_id.to_string()))
    }

    async fn get_link_details(&self, node_id: &str, share_id: &str) -> DriveResult<LinkDescriptor> {
        self.state
            .lock()
            .links
            .get(node_id)
            .filter(|l| l.share_id == share_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(node_id.to_string()))
    }

    async fn get_folder_contents(
        &self,
        folder_id: &str,
        share_id: &str,
        offset: u64,
        limit: u64,
    ) -> DriveResult<FolderPage> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.folder_fetches.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock();
        let folder = state
            .links
            .get(folder_id)
            .filter(|l| l.share_id == share_id && l.kind == NodeKind::Folder)
            .ok_or_else(|| DriveError::NotFound(folder_id.to_string()))?;
        let live: Vec<&LinkDescriptor> = state.children(&folder.id).filter(|l| !l.trashed).collect();
        let items = live
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|l| (*l).clone())
            .collect();
        debug!(folder_id, offset, limit, total = live.len(), "listing folder");
        Ok(FolderPage {
            items,
            pagination: Pagination {
                offset,
                total_items: live.len() as u64,
            },
        })
    }

    async fn create_folder(&self, request: CreateFolderRequest) -> DriveResult<MutationOutcome> {
        let mut state = self.state.lock();
        let link = request.link;
        if let Some(rejection) = state.take_injected(&link.id) {
            return Ok(MutationOutcome::from_parts(vec![], vec![rejection]));
        }
        let reason = match link.parent_id.as_deref() {
            None => Some(RejectReason::Invalid("folder has no parent".into())),
            Some(parent) => match state.links.get(parent) {
                Some(p) if p.kind == NodeKind::Folder && p.share_id == request.share_id => {
                    if state.links.contains_key(&link.id) {
                        Some(RejectReason::Invalid("id already exists".into()))
                    } else if state.name_taken(parent, &link.name_hash, &link.id) {
                        Some(RejectReason::NameConflict)
                    } else {
                        None
                    }
                }
                _ => Some(RejectReason::NotFound),
            },
        };
        if let Some(reason) = reason {
            return Ok(MutationOutcome::from_parts(
                vec![],
                vec![Rejection {
                    id: link.id,
                    reason,
                }],
            ));
        }

        let id = link.id.clone();
        if let Some(parent) = &link.parent_id {
            state.attach(parent, &id);
        }
        state.links.insert(id.clone(), link);
        Ok(MutationOutcome::from_parts(vec![id], vec![]))
    }

    async fn update_name(&self, request: RenameRequest) -> DriveResult<MutationOutcome> {
        let mut state = self.state.lock();
        let id = request.link_id.clone();
        if let Some(rejection) = state.take_injected(&id) {
            return Ok(MutationOutcome::from_parts(vec![], vec![rejection]));
        }
        let Some(parent) = state.links.get(&id).map(|l| l.parent_id.clone()) else {
            return Ok(MutationOutcome::from_parts(
                vec![],
                vec![Rejection {
                    id,
                    reason: RejectReason::NotFound,
                }],
            ));
        };
        if let Some(parent) = parent {
            if state.name_taken(&parent, &request.name_hash, &id) {
                return Ok(MutationOutcome::from_parts(
                    vec![],
                    vec![Rejection {
                        id,
                        reason: RejectReason::NameConflict,
                    }],
                ));
            }
        }
        if let Some(link) = state.links.get_mut(&id) {
            link.encrypted_name = request.encrypted_name;
            link.name_hash = request.name_hash;
            link.modified_at = request.modified_at;
        }
        Ok(MutationOutcome::from_parts(vec![id], vec![]))
    }

    async fn move_items(&self, request: MoveRequest) -> DriveResult<MutationOutcome> {
        let mut state = self.state.lock();
        let target = request.target_id.as_str();
        if !state
            .links
            .get(target)
            .is_some_and(|l| l.kind == NodeKind::Folder && !l.trashed)
        {
            return Ok(MutationOutcome::Failure {
                reason: format!("destination {target} does not exist"),
            });
        }

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for moved in request.links {
            let id = moved.link_id.clone();
            if let Some(rejection) = state.take_injected(&id) {
                rejected.push(rejection);
                continue;
            }
            let Some((old_parent, size)) = state.links.get(&id).map(|l| (l.parent_id.clone(), l.size))
            else {
                rejected.push(Rejection {
                    id,
                    reason: RejectReason::NotFound,
                });
                continue;
            };
            let reason = if state.contains_target(&id, target) {
                Some(RejectReason::SelfReferential)
            } else if old_parent.as_deref() == Some(target) {
                Some(RejectReason::Invalid("already in the destination folder".into()))
            } else if state.name_taken(target, &moved.name_hash, &id) {
                Some(RejectReason::NameConflict)
            } else {
                None
            };
            if let Some(reason) = reason {
                rejected.push(Rejection { id, reason });
                continue;
            }

            let delta = size as i64;
            if let Some(old) = &old_parent {
                state.detach(old, &id);
                state.adjust_sizes(Some(old), -delta);
            }
            state.attach(target, &id);
            state.adjust_sizes(Some(target), delta);
            if let Some(link) = state.links.get_mut(&id) {
                link.parent_id = Some(target.to_string());
                link.node_passphrase = moved.node_passphrase;
                link.passphrase_signature = moved.passphrase_signature;
                link.encrypted_name = moved.encrypted_name;
                link.name_hash = moved.name_hash;
            }
            accepted.push(id);
        }
        Ok(MutationOutcome::from_parts(accepted, rejected))
    }

    async fn trash_items(
        &self,
        share_id: &str,
        parent_id: &str,
        ids: &[String],
    ) -> DriveResult<MutationOutcome> {
        let mut state = self.state.lock();
        let now = unix_now();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for id in ids {
            if let Some(rejection) = state.take_injected(id) {
                rejected.push(rejection);
                continue;
            }
            let reason = match state.links.get(id) {
                None => Some(RejectReason::NotFound),
                Some(l) if l.share_id != share_id || l.parent_id.as_deref() != Some(parent_id) => {
                    Some(RejectReason::Invalid("not in the given folder".into()))
                }
                Some(l) if l.trashed => Some(RejectReason::Invalid("already in the trash".into())),
                Some(_) => None,
            };
            if let Some(reason) = reason {
                rejected.push(Rejection {
                    id: id.clone(),
                    reason,
                });
                continue;
            }
            let mut size = 0;
            if let Some(link) = state.links.get_mut(id) {
                link.trashed = true;
                link.trashed_at = Some(now);
                size = link.size;
            }
            state.adjust_sizes(Some(parent_id), -(size as i64));
            accepted.push(id.clone());
        }
        Ok(MutationOutcome::from_parts(accepted, rejected))
    }

    async fn restore_items(&self, share_id: &str, ids: &[String]) -> DriveResult<MutationOutcome> {
        let mut state = self.state.lock();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for id in ids {
            if let Some(rejection) = state.take_injected(id) {
                rejected.push(rejection);
                continue;
            }
            let Some(link) = state.links.get(id).filter(|l| l.share_id == share_id).cloned() else {
                rejected.push(Rejection {
                    id: id.clone(),
                    reason: RejectReason::NotFound,
                });
                continue;
            };
            let parent = link.parent_id.clone().unwrap_or_default();
            let reason = if !link.trashed {
                Some(RejectReason::Invalid("not in the trash".into()))
            } else if !state.links.get(&parent).is_some_and(|p| !p.trashed) {
                Some(RejectReason::NotFound)
            } else if state.name_taken(&parent, &link.name_hash, id) {
                Some(RejectReason::NameConflict)
            } else {
                None
            };
            if let Some(reason) = reason {
                rejected.push(Rejection {
                    id: id.clone(),
                    reason,
                });
                continue;
            }
            if let Some(link) = state.links.get_mut(id) {
                link.trashed = false;
                link.trashed_at = None;
            }
            state.adjust_sizes(Some(&parent), link.size as i64);
            accepted.push(id.clone());
        }
        Ok(MutationOutcome::from_parts(accepted, rejected))
    }

    async fn delete_item(&self, share_id: &str, id: &str) -> DriveResult<MutationOutcome> {
        let mut state = self.state.lock();
        if let Some(rejection) = state.take_injected(id) {
            return Ok(MutationOutcome::from_parts(vec![], vec![rejection]));
        }
        let Some(link) = state.links.get(id).filter(|l| l.share_id == share_id).cloned() else {
            return Ok(MutationOutcome::from_parts(
                vec![],
                vec![Rejection {
                    id: id.to_string(),
                    reason: RejectReason::NotFound,
                }],
            ));
        };
        if let Some(parent) = &link.parent_id {
            if !link.trashed {
                state.adjust_sizes(Some(parent), -(link.size as i64));
            }
            state.detach(parent, id);
        }

        let mut queue = vec![id.to_string()];
        while let Some(current) = queue.pop() {
            if let Some(children) = state.order.remove(&current) {
                queue.extend(children);
            }
            state.links.remove(&current);
        }
        Ok(MutationOutcome::from_parts(vec![id.to_string()], vec![]))
    }

    async fn get_trash_items(&self, share_id: &str) -> DriveResult<Vec<LinkDescriptor>> {
        let state = self.state.lock();
        let mut items: Vec<LinkDescriptor> = state
            .links
            .values()
            .filter(|l| l.share_id == share_id && l.trashed)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.trashed_at.cmp(&a.trashed_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }
}

#[async_trait]
impl AuthApi for MemoryRemote {
    async fn auth_info(&self, identity: &str) -> DriveResult<AuthInfo> {
        let mut state = self.state.lock();
        let registration = state
            .accounts
            .get(identity)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(format!("account {identity}")))?;

        let group = SrpGroup::rfc5054_2048().map_err(|e| DriveError::Protocol(e.to_string()))?;
        let server = SrpServer::new(group, &registration.verifier)
            .map_err(|e| DriveError::Protocol(e.to_string()))?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let info = AuthInfo {
            session_id: session_id.clone(),
            salt: b64_encode(&registration.salt),
            server_public: b64_encode(&server.server_public()),
        };
        state.logins.insert(session_id, server);
        Ok(info)
    }

    async fn authenticate(
        &self,
        session_id: &str,
        client_public: &str,
        client_proof: &str,
    ) -> DriveResult<AuthResponse> {
        // a login attempt is single use, successful or not
        let server = self
            .state
            .lock()
            .logins
            .remove(session_id)
            .ok_or_else(|| DriveError::Protocol(format!("unknown login session {session_id}")))?;
        let decode = |v: &str| b64_decode(v).map_err(|e| DriveError::Protocol(e.to_string()));
        let (server_proof, _key) = server
            .verify_client(&decode(client_public)?, &decode(client_proof)?)
            .map_err(|e| DriveError::Protocol(e.to_string()))?;
        Ok(AuthResponse {
            session_id: session_id.to_string(),
            server_proof: b64_encode(&server_proof),
        })
    }
}
