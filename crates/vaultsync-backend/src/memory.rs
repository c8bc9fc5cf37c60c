//! In-memory identity backend for tests
//!
//! Emulates the endpoints the adapter uses, with status overrides per
//! path and a journal of every request.

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;

use vaultsync_core::{
    AliasId, BackendResponse, CanonicalId, Group, GroupAlias, MountAccessor, ObjectId,
    RequestProcessor,
};

use crate::paths;

#[derive(Debug, Clone)]
struct StoredGroup {
    id: String,
    policies: Vec<String>,
}

#[derive(Debug, Clone)]
struct StoredAlias {
    canonical_id: String,
    mount_accessor: String,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    id: String,
    name: String,
    policies: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct StoredToken {
    policies: Vec<String>,
    identity_policies: Vec<String>,
}

#[derive(Default)]
struct MemoryState {
    groups: BTreeMap<String, StoredGroup>,
    group_aliases: BTreeMap<String, StoredAlias>,
    entities: BTreeMap<String, StoredEntity>,
    /// (alias name, mount accessor) -> entity id
    entity_aliases: BTreeMap<(String, String), String>,
    /// "<type>/" -> accessor
    mounts: BTreeMap<String, String>,
    tokens: BTreeMap<String, StoredToken>,
    documents: BTreeMap<String, Value>,
    /// Queued status overrides per path, consumed front to back; an
    /// override with no count left sticks
    failures: BTreeMap<String, VecDeque<(StatusCode, bool)>>,
    journal: Vec<(String, Value)>,
    next_id: u64,
}

impl MemoryState {
    fn mint(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", kind, self.next_id)
    }

    fn forced_status(&mut self, path: &str) -> Option<StatusCode> {
        let queue = self.failures.get_mut(path)?;
        let (status, once) = *queue.front()?;
        if once {
            queue.pop_front();
        }
        Some(status)
    }

    fn alias_of_group(&self, canonical_id: &str) -> Option<(&String, &StoredAlias)> {
        self.group_aliases
            .iter()
            .find(|(_, alias)| alias.canonical_id == canonical_id)
    }
}

/// In-memory stand-in for the identity backend's request processor
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an auth mount of `mount_type` with the given accessor
    pub async fn add_mount(&self, mount_type: &str, accessor: &str) {
        let mut state = self.state.lock().await;
        state
            .mounts
            .insert(format!("{}/", mount_type), accessor.to_string());
    }

    /// Seed a group, optionally bound to a directory object. Returns the
    /// canonical id and the alias id.
    pub async fn seed_group(
        &self,
        name: &str,
        policies: &[&str],
        binding: Option<(&str, &str)>,
    ) -> (CanonicalId, Option<AliasId>) {
        let mut state = self.state.lock().await;
        let id = state.mint("group");
        state.groups.insert(
            name.to_string(),
            StoredGroup {
                id: id.clone(),
                policies: policies.iter().map(|p| p.to_string()).collect(),
            },
        );

        let alias_id = binding.map(|(mount_accessor, object_id)| {
            let alias_id = state.mint("alias");
            state.group_aliases.insert(
                alias_id.clone(),
                StoredAlias {
                    canonical_id: id.clone(),
                    mount_accessor: mount_accessor.to_string(),
                    name: object_id.to_string(),
                },
            );
            AliasId::new(alias_id)
        });

        (CanonicalId::new(id), alias_id)
    }

    /// Seed an entity bound to `alias_name` under `mount_accessor`
    pub async fn seed_entity(
        &self,
        name: &str,
        policies: &[&str],
        alias_name: &str,
        mount_accessor: &str,
    ) -> CanonicalId {
        let mut state = self.state.lock().await;
        let id = state.mint("entity");
        state.entities.insert(
            id.clone(),
            StoredEntity {
                id: id.clone(),
                name: name.to_string(),
                policies: policies.iter().map(|p| p.to_string()).collect(),
            },
        );
        state.entity_aliases.insert(
            (alias_name.to_string(), mount_accessor.to_string()),
            id.clone(),
        );
        CanonicalId::new(id)
    }

    pub async fn seed_token(&self, token: &str, policies: &[&str], identity_policies: &[&str]) {
        let mut state = self.state.lock().await;
        state.tokens.insert(
            token.to_string(),
            StoredToken {
                policies: policies.iter().map(|p| p.to_string()).collect(),
                identity_policies: identity_policies.iter().map(|p| p.to_string()).collect(),
            },
        );
    }

    pub async fn seed_document(&self, path: &str, data: Value) {
        let mut state = self.state.lock().await;
        state.documents.insert(path.to_string(), data);
    }

    /// Answer every request to `path` with `status` from now on
    pub async fn fail_path(&self, path: &str, status: StatusCode) {
        let mut state = self.state.lock().await;
        state
            .failures
            .entry(path.to_string())
            .or_default()
            .push_back((status, false));
    }

    /// Answer the next request to `path` with `status`
    pub async fn fail_path_once(&self, path: &str, status: StatusCode) {
        let mut state = self.state.lock().await;
        state
            .failures
            .entry(path.to_string())
            .or_default()
            .push_back((status, true));
    }

    /// Snapshot of a group as the backend holds it
    pub async fn group(&self, name: &str) -> Option<Group> {
        let state = self.state.lock().await;
        let group = state.groups.get(name)?;
        let alias = state.alias_of_group(&group.id).map(|(alias_id, alias)| GroupAlias {
            id: Some(AliasId::new(alias_id.clone())),
            canonical_id: CanonicalId::new(alias.canonical_id.clone()),
            mount_accessor: MountAccessor::new(alias.mount_accessor.clone()),
            external_object_id: ObjectId::new(alias.name.clone()),
        });
        Some(Group {
            name: name.to_string(),
            canonical_id: CanonicalId::new(group.id.clone()),
            policies: group.policies.clone(),
            alias,
        })
    }

    pub async fn group_alias_count(&self) -> usize {
        self.state.lock().await.group_aliases.len()
    }

    /// Policies of the entity bound to `alias_name`
    pub async fn entity_policies(&self, alias_name: &str, mount_accessor: &str) -> Option<Vec<String>> {
        let state = self.state.lock().await;
        let id = state
            .entity_aliases
            .get(&(alias_name.to_string(), mount_accessor.to_string()))?;
        state.entities.get(id).map(|e| e.policies.clone())
    }

    pub async fn document(&self, path: &str) -> Option<Value> {
        self.state.lock().await.documents.get(path).cloned()
    }

    /// Paths requested so far, in order
    pub async fn journal(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.journal.iter().map(|(path, _)| path.clone()).collect()
    }

    /// Bodies sent to `path`, in order
    pub async fn bodies_for(&self, path: &str) -> Vec<Value> {
        let state = self.state.lock().await;
        state
            .journal
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn handle(state: &mut MemoryState, path: &str, body: &Value, token: &str) -> BackendResponse {
        let field = |name: &str| body.get(name).and_then(Value::as_str).unwrap_or_default().to_string();
        let policies = || -> Vec<String> {
            body.get("policies")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        match path {
            paths::GROUP_READ => {
                let name = field("group");
                let Some(group) = state.groups.get(&name) else {
                    return BackendResponse::empty(StatusCode::NOT_FOUND);
                };
                let alias = match state.alias_of_group(&group.id) {
                    Some((id, alias)) => json!({
                        "id": id,
                        "canonical_id": alias.canonical_id,
                        "mount_accessor": alias.mount_accessor,
                        "name": alias.name,
                    }),
                    None => json!({}),
                };
                ok(json!({
                    "id": group.id,
                    "name": name,
                    "policies": group.policies,
                    "alias": alias,
                }))
            }
            paths::GROUP_DELETE => {
                let name = field("name");
                if let Some(group) = state.groups.remove(&name) {
                    state
                        .group_aliases
                        .retain(|_, alias| alias.canonical_id != group.id);
                }
                BackendResponse::empty(StatusCode::NO_CONTENT)
            }
            paths::GROUP_UPDATE => {
                let name = field("name");
                if let Some(group) = state.groups.get_mut(&name) {
                    group.policies = policies();
                    return BackendResponse::empty(StatusCode::NO_CONTENT);
                }
                let id = state.mint("group");
                state.groups.insert(
                    name.clone(),
                    StoredGroup {
                        id: id.clone(),
                        policies: policies(),
                    },
                );
                ok(json!({"data": {"id": id, "name": name}}))
            }
            paths::GROUP_ALIAS_DELETE => {
                if state.group_aliases.remove(&field("id")).is_some() {
                    BackendResponse::empty(StatusCode::NO_CONTENT)
                } else {
                    BackendResponse::empty(StatusCode::NOT_FOUND)
                }
            }
            paths::GROUP_ALIAS_CREATE => {
                let canonical_id = field("canonical_id");
                let mount_accessor = field("mount_accessor");
                let name = field("name");
                if !state.groups.values().any(|g| g.id == canonical_id) {
                    return BackendResponse::new(StatusCode::BAD_REQUEST, "unknown canonical id");
                }
                let taken = state
                    .group_aliases
                    .values()
                    .any(|a| a.mount_accessor == mount_accessor && a.name == name);
                if taken {
                    return BackendResponse::new(StatusCode::BAD_REQUEST, "alias already exists");
                }
                let id = state.mint("alias");
                state.group_aliases.insert(
                    id.clone(),
                    StoredAlias {
                        canonical_id: canonical_id.clone(),
                        mount_accessor,
                        name,
                    },
                );
                ok(json!({"data": {"id": id, "canonical_id": canonical_id}}))
            }
            paths::ENTITY_LOOKUP => {
                let key = (field("alias_name"), field("alias_mount_accessor"));
                let entity = state
                    .entity_aliases
                    .get(&key)
                    .and_then(|id| state.entities.get(id));
                match entity {
                    Some(entity) => ok(json!({"data": {
                        "id": entity.id,
                        "name": entity.name,
                        "policies": entity.policies,
                    }})),
                    None => BackendResponse::empty(StatusCode::NO_CONTENT),
                }
            }
            paths::ENTITY_ALIAS_CREATE => {
                let key = (field("name"), field("mount_accessor"));
                if state.entity_aliases.contains_key(&key) {
                    return BackendResponse::new(StatusCode::BAD_REQUEST, "alias already exists");
                }
                let id = state.mint("entity");
                state.entities.insert(
                    id.clone(),
                    StoredEntity {
                        id: id.clone(),
                        name: format!("entity_{}", id),
                        policies: Vec::new(),
                    },
                );
                state.entity_aliases.insert(key, id.clone());
                ok(json!({"data": {"id": state.mint("entity-alias"), "canonical_id": id}}))
            }
            paths::ENTITY_UPDATE => {
                let name = field("name");
                match state.entities.values_mut().find(|e| e.name == name) {
                    Some(entity) => {
                        entity.policies = policies();
                        BackendResponse::empty(StatusCode::NO_CONTENT)
                    }
                    None => {
                        let id = state.mint("entity");
                        state.entities.insert(
                            id.clone(),
                            StoredEntity {
                                id: id.clone(),
                                name,
                                policies: policies(),
                            },
                        );
                        ok(json!({"data": {"id": id}}))
                    }
                }
            }
            paths::MOUNT_LIST => {
                let mounts: serde_json::Map<String, Value> = state
                    .mounts
                    .iter()
                    .map(|(key, accessor)| {
                        (
                            key.clone(),
                            json!({"accessor": accessor, "type": key.trim_end_matches('/')}),
                        )
                    })
                    .collect();
                ok(json!({"data": mounts}))
            }
            paths::READ => match state.documents.get(&field("path")) {
                Some(data) => ok(json!({"data": data})),
                None => BackendResponse::new(StatusCode::NOT_FOUND, r#"{"errors":[]}"#),
            },
            paths::WRITE => {
                let data = body.get("data").cloned().unwrap_or(Value::Null);
                state.documents.insert(field("path"), data);
                BackendResponse::empty(StatusCode::NO_CONTENT)
            }
            p if p.ends_with("/lookup") => match state.tokens.get(token) {
                Some(t) => ok(json!({
                    "policies": t.policies,
                    "identity_policies": t.identity_policies,
                })),
                None => BackendResponse::empty(StatusCode::FORBIDDEN),
            },
            p if p.ends_with("/renew") => {
                if state.tokens.contains_key(token) {
                    ok(json!({}))
                } else {
                    BackendResponse::empty(StatusCode::FORBIDDEN)
                }
            }
            _ => BackendResponse::empty(StatusCode::NOT_FOUND),
        }
    }
}

fn ok(body: Value) -> BackendResponse {
    BackendResponse::new(StatusCode::OK, body.to_string())
}

#[async_trait]
impl RequestProcessor for MemoryBackend {
    async fn process(&self, path: &str, body: &Value, token: &str) -> BackendResponse {
        let mut state = self.state.lock().await;
        state.journal.push((path.to_string(), body.clone()));

        if let Some(status) = state.forced_status(path) {
            return BackendResponse::new(status, format!("forced {}", status.as_u16()));
        }

        Self::handle(&mut state, path, body, token)
    }
}
