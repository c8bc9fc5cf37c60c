//! Unit tests for vaultsync-reconcile

use super::*;
use async_trait::async_trait;
use http::StatusCode;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use vaultsync_backend::{paths, BackendConfig, IdentityBackend, MemoryBackend};
use vaultsync_core::{
    AccessKeyId, AccessKeyRecord, AccessKeySecret, AccountId, BackendResponse, CredentialPortal,
    DirectoryProvider, DirectoryUser, LedgerDocument, LedgerKey, ObjectId, RequestContext,
    RequestProcessor, Result, RotateRequest, UserDirectory, VaultSyncError,
};

const MOUNT: &str = "auth_oidc_1";

fn ctx() -> RequestContext {
    RequestContext::new("jdoe", "/v2/identity")
}

async fn memory_with_mount() -> Arc<MemoryBackend> {
    let memory = Arc::new(MemoryBackend::new());
    memory.add_mount("oidc", MOUNT).await;
    memory
}

fn backend(memory: &Arc<MemoryBackend>) -> IdentityBackend {
    IdentityBackend::new(memory.clone(), BackendConfig::default())
}

fn policies(names: &[&str]) -> Vec<String> {
    names.iter().map(|p| p.to_string()).collect()
}

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeDirectory {
    token: Option<String>,
    groups: BTreeMap<String, String>,
    /// lowercase address -> directory casing
    mail_casing: BTreeMap<String, String>,
}

impl FakeDirectory {
    fn with_token() -> Self {
        Self {
            token: Some("sso".to_string()),
            ..Default::default()
        }
    }

    fn group(mut self, name: &str, object_id: &str) -> Self {
        self.groups.insert(name.to_string(), object_id.to_string());
        self
    }

    fn mail(mut self, address: &str) -> Self {
        self.mail_casing
            .insert(address.to_lowercase(), address.to_string());
        self
    }
}

#[async_trait]
impl DirectoryProvider for FakeDirectory {
    async fn service_token(&self, _ctx: &RequestContext) -> Option<String> {
        self.token.clone()
    }

    async fn resolve_group_object_id(
        &self,
        _ctx: &RequestContext,
        _token: &str,
        group_name: &str,
    ) -> Option<ObjectId> {
        self.groups.get(group_name).map(|id| ObjectId::from(id.as_str()))
    }

    async fn search_groups_by_prefix(
        &self,
        _ctx: &RequestContext,
        _token: &str,
        prefix: &str,
    ) -> BTreeSet<String> {
        self.groups
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    async fn search_group_emails_by_prefix(
        &self,
        _ctx: &RequestContext,
        _token: &str,
        _prefix: &str,
    ) -> BTreeSet<String> {
        BTreeSet::new()
    }

    async fn resolve_user_object_id(
        &self,
        _ctx: &RequestContext,
        _token: &str,
        _email: &str,
    ) -> Option<ObjectId> {
        None
    }

    async fn list_user_group_names(
        &self,
        _ctx: &RequestContext,
        _token: &str,
        _user_id: &ObjectId,
    ) -> BTreeSet<String> {
        BTreeSet::new()
    }

    async fn resolve_user_by_email(
        &self,
        _ctx: &RequestContext,
        _token: &str,
        email: &str,
    ) -> Option<DirectoryUser> {
        self.mail_casing
            .get(&email.to_lowercase())
            .map(|mail| DirectoryUser {
                user_id: Some("user-obj".to_string()),
                email: Some(mail.clone()),
                ..Default::default()
            })
    }

    async fn lookup_extension_attribute(
        &self,
        _ctx: &RequestContext,
        _token: &str,
        _email: &str,
    ) -> Option<DirectoryUser> {
        None
    }
}

struct FakeUsers {
    name: &'static str,
    emails: BTreeMap<String, String>,
    calls: AtomicUsize,
}

impl FakeUsers {
    fn new(name: &'static str, entries: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            name,
            emails: entries
                .iter()
                .map(|(user, email)| (user.to_string(), email.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UserDirectory for FakeUsers {
    fn name(&self) -> &str {
        self.name
    }

    async fn find_user(&self, _ctx: &RequestContext, username: &str) -> Option<DirectoryUser> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.emails.get(username).map(|email| DirectoryUser {
            user_name: Some(username.to_string()),
            email: Some(email.clone()),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct FakePortal {
    issued: Mutex<u32>,
    fail_with: Option<StatusCode>,
}

impl FakePortal {
    async fn issue(&self, account_id: &AccountId, user_name: &str) -> Result<AccessKeySecret> {
        if let Some(status) = self.fail_with {
            return Err(VaultSyncError::upstream(status, "portal says no"));
        }
        let mut issued = self.issued.lock().await;
        *issued += 1;
        Ok(AccessKeySecret {
            account_id: account_id.clone(),
            user_name: user_name.to_string(),
            access_key_id: AccessKeyId::new(format!("AKIA{}", issued)),
            access_key_secret: format!("secret-{}", issued),
            expiry_date_epoch: 1000 * i64::from(*issued),
            status: Some("Active".to_string()),
            create_date: None,
        })
    }
}

#[async_trait]
impl CredentialPortal for FakePortal {
    async fn create_access_key(
        &self,
        _ctx: &RequestContext,
        account_id: &AccountId,
        user_name: &str,
    ) -> Result<AccessKeySecret> {
        self.issue(account_id, user_name).await
    }

    async fn rotate_secret(
        &self,
        _ctx: &RequestContext,
        request: &RotateRequest,
    ) -> Result<AccessKeySecret> {
        self.issue(&request.account_id, &request.user_name).await
    }

    async fn delete_access_key(
        &self,
        _ctx: &RequestContext,
        _account_id: &AccountId,
        _user_name: &str,
        _access_key_id: &AccessKeyId,
    ) -> Result<()> {
        match self.fail_with {
            Some(status) => Err(VaultSyncError::upstream(status, "portal says no")),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Alias Saga Tests
// =============================================================================

#[cfg(test)]
mod alias_saga_tests {
    use super::*;

    async fn seeded() -> (Arc<MemoryBackend>, AliasSaga) {
        let memory = memory_with_mount().await;
        memory
            .seed_group("eng-team", &["read"], Some((MOUNT, "obj-1")))
            .await;
        let directory = FakeDirectory::with_token().group("eng-team", "obj-1");
        let saga = AliasSaga::new(backend(&memory), Arc::new(directory));
        (memory, saga)
    }

    #[tokio::test]
    async fn test_replaces_policies_and_rebinds_alias() {
        let (memory, saga) = seeded().await;

        let binding = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["read", "write"]))
            .await
            .unwrap();
        assert_eq!(binding.policies, policies(&["read", "write"]));
        assert!(binding.alias.id.is_some());
        assert_eq!(binding.alias.mount_accessor.as_str(), MOUNT);

        let group = memory.group("eng-team").await.unwrap();
        assert_eq!(group.policies, policies(&["read", "write"]));
        assert_eq!(group.external_object_id().unwrap().as_str(), "obj-1");
        assert_eq!(group.canonical_id, binding.alias.canonical_id);
        assert_eq!(memory.group_alias_count().await, 1);

        let journal = memory.journal().await;
        let steps: Vec<&str> = journal
            .iter()
            .map(String::as_str)
            .filter(|p| *p != paths::MOUNT_LIST)
            .collect();
        assert_eq!(
            steps,
            vec![
                paths::GROUP_READ,
                paths::GROUP_ALIAS_DELETE,
                paths::GROUP_DELETE,
                paths::GROUP_UPDATE,
                paths::GROUP_ALIAS_CREATE,
            ]
        );
    }

    #[tokio::test]
    async fn test_alias_delete_failure_mutates_nothing() {
        let (memory, saga) = seeded().await;
        memory
            .fail_path_once(paths::GROUP_ALIAS_DELETE, StatusCode::INTERNAL_SERVER_ERROR)
            .await;

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["read", "write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::DeleteAlias);
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.compensation, Compensation::NotRequired);

        let group = memory.group("eng-team").await.unwrap();
        assert_eq!(group.policies, policies(&["read"]));
        assert!(group.alias.is_some());
        let journal = memory.journal().await;
        assert!(!journal.iter().any(|p| p == paths::GROUP_DELETE));
        assert!(!journal.iter().any(|p| p == paths::GROUP_UPDATE));
    }

    #[tokio::test]
    async fn test_group_delete_failure_restores_policies() {
        let (memory, saga) = seeded().await;
        memory
            .fail_path_once(paths::GROUP_DELETE, StatusCode::INTERNAL_SERVER_ERROR)
            .await;

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["read", "write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::DeleteGroup);
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.compensation, Compensation::PoliciesRestored);

        let group = memory.group("eng-team").await.unwrap();
        assert_eq!(group.policies, policies(&["read"]));
        assert!(group.alias.is_none());
    }

    /// Rollback covers the policies only; the deleted alias stays gone
    /// until the next successful update.
    #[tokio::test]
    async fn test_compensation_restores_policies_but_not_alias() {
        let memory = memory_with_mount().await;
        memory
            .seed_group("eng-team", &["read"], Some((MOUNT, "obj-1")))
            .await;
        let saga = AliasSaga::new(backend(&memory), Arc::new(FakeDirectory::with_token()));

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["read", "write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::ResolveObjectId);
        assert_eq!(failure.status(), StatusCode::BAD_REQUEST);
        assert_eq!(failure.compensation, Compensation::PoliciesRestored);

        let group = memory.group("eng-team").await.unwrap();
        assert_eq!(group.policies, policies(&["read"]));
        assert!(group.alias.is_none());
        assert_eq!(memory.group_alias_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_directory_token_compensates() {
        let memory = memory_with_mount().await;
        memory
            .seed_group("eng-team", &["read"], Some((MOUNT, "obj-1")))
            .await;
        let directory = FakeDirectory::default().group("eng-team", "obj-1");
        let saga = AliasSaga::new(backend(&memory), Arc::new(directory));

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::ResolveObjectId);
        assert_eq!(
            memory.group("eng-team").await.unwrap().policies,
            policies(&["read"])
        );
    }

    #[tokio::test]
    async fn test_missing_mount_compensates() {
        let memory = Arc::new(MemoryBackend::new());
        memory
            .seed_group("eng-team", &["read"], Some((MOUNT, "obj-1")))
            .await;
        let directory = FakeDirectory::with_token().group("eng-team", "obj-1");
        let saga = AliasSaga::new(backend(&memory), Arc::new(directory));

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::ResolveMountAccessor);
        assert_eq!(failure.status(), StatusCode::BAD_REQUEST);
        assert_eq!(failure.compensation, Compensation::PoliciesRestored);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let (memory, saga) = seeded().await;
        memory
            .fail_path_once(paths::GROUP_DELETE, StatusCode::INTERNAL_SERVER_ERROR)
            .await;
        memory
            .fail_path(paths::GROUP_UPDATE, StatusCode::SERVICE_UNAVAILABLE)
            .await;

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::DeleteGroup);
        assert_eq!(failure.compensation, Compensation::RestoreFailed);
    }

    #[tokio::test]
    async fn test_alias_create_failure_keeps_new_policies() {
        let (memory, saga) = seeded().await;
        memory
            .fail_path_once(paths::GROUP_ALIAS_CREATE, StatusCode::CONFLICT)
            .await;

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["read", "write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::CreateAlias);
        assert_eq!(failure.status(), StatusCode::CONFLICT);
        assert_eq!(failure.compensation, Compensation::NotRequired);
        assert_eq!(
            memory.group("eng-team").await.unwrap().policies,
            policies(&["read", "write"])
        );
    }

    #[tokio::test]
    async fn test_group_without_alias_is_rejected_untouched() {
        let memory = memory_with_mount().await;
        memory.seed_group("eng-team", &["read"], None).await;
        let directory = FakeDirectory::with_token().group("eng-team", "obj-1");
        let saga = AliasSaga::new(backend(&memory), Arc::new(directory));

        let failure = saga
            .run_for_group(&ctx(), "t", "eng-team", &policies(&["write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::ReadGroup);
        assert_eq!(failure.status(), StatusCode::BAD_REQUEST);
        assert_eq!(memory.journal().await, vec![paths::GROUP_READ]);
    }

    #[tokio::test]
    async fn test_unknown_group_keeps_read_status() {
        let (_memory, saga) = seeded().await;
        let failure = saga
            .run_for_group(&ctx(), "t", "nope", &policies(&["write"]))
            .await
            .unwrap_err();
        assert_eq!(failure.step, SagaStep::ReadGroup);
        assert_eq!(failure.status(), StatusCode::NOT_FOUND);
    }
}

// =============================================================================
// Entity Policy Resolver Tests
// =============================================================================

#[cfg(test)]
mod entity_policy_tests {
    use super::*;

    struct Fixture {
        memory: Arc<MemoryBackend>,
        primary: Arc<FakeUsers>,
        resolver: EntityPolicyResolver,
    }

    async fn fixture(
        memory: Arc<MemoryBackend>,
        directory: FakeDirectory,
        primary: &[(&str, &str)],
        secondary: &[(&str, &str)],
    ) -> Fixture {
        let primary = FakeUsers::new("primary", primary);
        let secondary: Arc<dyn UserDirectory> = FakeUsers::new("secondary", secondary);
        let resolver = EntityPolicyResolver::new(
            backend(&memory),
            Arc::new(directory),
            primary.clone(),
            Some(secondary),
            ResolverConfig {
                special_email_domain: Some("@corp.onmicrosoft.com".to_string()),
            },
        );
        Fixture {
            memory,
            primary,
            resolver,
        }
    }

    fn caller(user_name: &str, email: &str) -> CallerIdentity {
        CallerIdentity {
            user_name: user_name.to_string(),
            email: Some(email.to_string()),
            client_token: "caller-token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_mount_is_forbidden() {
        let f = fixture(
            Arc::new(MemoryBackend::new()),
            FakeDirectory::with_token(),
            &[("jdoe", "jane.doe@corp.com")],
            &[],
        )
        .await;

        let err = f
            .resolver
            .resolve(&ctx(), "t", "jdoe", None, false)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let f = fixture(memory_with_mount().await, FakeDirectory::with_token(), &[], &[]).await;

        let err = f
            .resolver
            .resolve(&ctx(), "t", "ghost", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultSyncError::NotFound { .. }));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_creates_entity_alias_on_first_use() {
        let f = fixture(
            memory_with_mount().await,
            FakeDirectory::with_token(),
            &[("jdoe", "jane.doe@corp.com")],
            &[],
        )
        .await;

        let resolved = f
            .resolver
            .resolve(&ctx(), "t", "jdoe", None, false)
            .await
            .unwrap();
        assert_eq!(resolved.alias_name, "jane.doe@corp.com");
        assert!(resolved.entity.canonical_id.is_some());
        assert!(resolved.entity.policies.is_empty());
        assert_eq!(
            f.memory.entity_policies("jane.doe@corp.com", MOUNT).await,
            Some(vec![])
        );

        let lookups = f
            .memory
            .journal()
            .await
            .into_iter()
            .filter(|p| p == paths::ENTITY_LOOKUP)
            .count();
        assert_eq!(lookups, 2);
    }

    #[tokio::test]
    async fn test_secondary_directory_fallback() {
        let f = fixture(
            memory_with_mount().await,
            FakeDirectory::with_token(),
            &[],
            &[("jdoe", "jdoe@legacy.corp")],
        )
        .await;

        let resolved = f
            .resolver
            .resolve(&ctx(), "t", "jdoe", None, false)
            .await
            .unwrap();
        assert_eq!(resolved.alias_name, "jdoe@legacy.corp");
    }

    #[tokio::test]
    async fn test_directory_casing_overrides_alias_name() {
        let f = fixture(
            memory_with_mount().await,
            FakeDirectory::with_token().mail("Jane.Doe@Corp.com"),
            &[("jdoe", "jane.doe@corp.com")],
            &[],
        )
        .await;

        let resolved = f
            .resolver
            .resolve(&ctx(), "t", "jdoe", None, false)
            .await
            .unwrap();
        assert_eq!(resolved.alias_name, "Jane.Doe@Corp.com");
    }

    #[tokio::test]
    async fn test_special_domain_skips_user_directories() {
        let f = fixture(memory_with_mount().await, FakeDirectory::with_token(), &[], &[]).await;
        let email = "jane@corp.onmicrosoft.com";

        let resolved = f
            .resolver
            .resolve(&ctx(), "t", email, Some(&caller("jane", email)), true)
            .await
            .unwrap();
        assert_eq!(resolved.alias_name, email);
        assert_eq!(f.primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_own_identity_unions_inherited_policies() {
        let memory = memory_with_mount().await;
        memory
            .seed_entity("entity_jdoe", &["r_users_jdoe", "default"], "jane.doe@corp.com", MOUNT)
            .await;
        memory
            .seed_token("caller-token", &["default"], &["r_group_eng", "default"])
            .await;
        let f = fixture(
            memory,
            FakeDirectory::with_token(),
            &[("jdoe", "jane.doe@corp.com")],
            &[],
        )
        .await;
        let me = caller("JDOE", "jane.doe@corp.com");

        let resolved = f
            .resolver
            .resolve(&ctx(), "t", "jdoe", Some(&me), false)
            .await
            .unwrap();
        assert_eq!(
            resolved.entity.policies,
            policies(&["r_users_jdoe", "default", "r_group_eng"])
        );

        let for_update = f
            .resolver
            .resolve(&ctx(), "t", "jdoe", Some(&me), true)
            .await
            .unwrap();
        assert_eq!(
            for_update.entity.policies,
            policies(&["r_users_jdoe", "default"])
        );
    }

    #[tokio::test]
    async fn test_other_user_ignores_caller_token() {
        let memory = memory_with_mount().await;
        memory
            .seed_entity("entity_bob", &["r_bob"], "bob@corp.com", MOUNT)
            .await;
        memory.seed_token("caller-token", &[], &["r_group_eng"]).await;
        let f = fixture(memory, FakeDirectory::with_token(), &[("bob", "bob@corp.com")], &[]).await;

        let resolved = f
            .resolver
            .resolve(&ctx(), "t", "bob", Some(&caller("jdoe", "jane.doe@corp.com")), false)
            .await
            .unwrap();
        assert_eq!(resolved.entity.policies, policies(&["r_bob"]));
    }

    #[tokio::test]
    async fn test_alias_creation_failure_keeps_status() {
        let memory = memory_with_mount().await;
        memory
            .fail_path_once(paths::ENTITY_ALIAS_CREATE, StatusCode::INTERNAL_SERVER_ERROR)
            .await;
        let f = fixture(
            memory,
            FakeDirectory::with_token(),
            &[("jdoe", "jane.doe@corp.com")],
            &[],
        )
        .await;

        let err = f
            .resolver
            .resolve(&ctx(), "t", "jdoe", None, false)
            .await
            .unwrap_err();
        assert_eq!(err.upstream_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_update_entity_policies_and_renew() {
        let memory = memory_with_mount().await;
        memory
            .seed_entity("entity_jdoe", &[], "jane.doe@corp.com", MOUNT)
            .await;
        let f = fixture(memory, FakeDirectory::with_token(), &[], &[]).await;

        f.resolver
            .update_entity_policies(&ctx(), "t", "entity_jdoe", &policies(&["r_new"]))
            .await
            .unwrap();
        assert_eq!(
            f.memory.entity_policies("jane.doe@corp.com", MOUNT).await,
            Some(policies(&["r_new"]))
        );

        // Unknown token: renewal failure is swallowed
        f.resolver.renew_caller_token(&ctx(), "unknown").await;
    }
}

// =============================================================================
// Ledger Tests
// =============================================================================

#[cfg(test)]
mod ledger_tests {
    use super::*;

    const DOC: &str = "metadata/iamsvcacc/111_svc1";

    fn key() -> LedgerKey {
        LedgerKey::new("111", "svc1")
    }

    async fn write_count(memory: &MemoryBackend) -> usize {
        memory
            .journal()
            .await
            .into_iter()
            .filter(|p| p == paths::WRITE)
            .count()
    }

    fn ids(document: &LedgerDocument) -> Vec<&str> {
        document.access_key_ids().into_iter().map(|id| id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_add_rotate_delete_sequence() {
        let memory = memory_with_mount().await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());

        let doc = ledger
            .add_key(&ctx(), "t", &key(), AccessKeyRecord::new("AKIA1", 1000))
            .await
            .unwrap();
        assert_eq!(doc.secret, vec![AccessKeyRecord::new("AKIA1", 1000)]);

        let doc = ledger
            .rotate_key(&ctx(), "t", &key(), &"AKIA1".into(), AccessKeyRecord::new("AKIA2", 2000))
            .await
            .unwrap();
        assert_eq!(doc.secret, vec![AccessKeyRecord::new("AKIA2", 2000)]);
        assert_eq!(doc.expiry_date_epoch, Some(2000));

        let doc = ledger
            .delete_key(&ctx(), "t", &key(), &"AKIA2".into())
            .await
            .unwrap();
        assert!(doc.secret.is_empty());

        let stored = memory.document(DOC).await.unwrap();
        assert_eq!(stored["secret"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_add_stamps_existing_records() {
        let memory = memory_with_mount().await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());

        ledger
            .add_key(&ctx(), "t", &key(), AccessKeyRecord::new("AKIA1", 1000))
            .await
            .unwrap();
        let doc = ledger
            .add_key(&ctx(), "t", &key(), AccessKeyRecord::new("AKIA2", 5000))
            .await
            .unwrap();
        assert_eq!(ids(&doc), vec!["AKIA1", "AKIA2"]);
        assert!(doc.secret.iter().all(|r| r.expiry_epoch == 5000));

        let again = ledger
            .add_key(&ctx(), "t", &key(), AccessKeyRecord::new("AKIA2", 5000))
            .await
            .unwrap();
        assert_eq!(again, doc);
    }

    #[tokio::test]
    async fn test_delete_unknown_key_does_not_write() {
        let memory = memory_with_mount().await;
        memory
            .seed_document(
                DOC,
                serde_json::json!({"isActivated": true, "secret": [{"accessKeyId": "AKIA1", "expiryDuration": 1000}]}),
            )
            .await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());

        let doc = ledger
            .delete_key(&ctx(), "t", &key(), &"AKIA9".into())
            .await
            .unwrap();
        assert_eq!(ids(&doc), vec!["AKIA1"]);
        assert!(!memory.journal().await.iter().any(|p| p == paths::WRITE));
    }

    #[tokio::test]
    async fn test_delete_without_document_succeeds() {
        let memory = memory_with_mount().await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());

        let doc = ledger
            .delete_key(&ctx(), "t", &key(), &"AKIA1".into())
            .await
            .unwrap();
        assert!(doc.secret.is_empty());
        assert!(memory.document(DOC).await.is_none());
    }

    #[tokio::test]
    async fn test_activate_once() {
        let memory = memory_with_mount().await;
        memory
            .seed_document(DOC, serde_json::json!({"isActivated": false, "owner": "team-a"}))
            .await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());

        let doc = ledger.activate(&ctx(), "t", &key()).await.unwrap();
        assert!(doc.is_activated);
        assert_eq!(write_count(&memory).await, 1);

        let again = ledger.activate(&ctx(), "t", &key()).await.unwrap();
        assert_eq!(again, doc);
        assert_eq!(write_count(&memory).await, 1);

        let stored = memory.document(DOC).await.unwrap();
        assert_eq!(stored["owner"], "team-a");
    }

    #[tokio::test]
    async fn test_read_failure_other_than_missing_propagates() {
        let memory = memory_with_mount().await;
        memory.fail_path_once(paths::READ, StatusCode::FORBIDDEN).await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());

        let err = ledger
            .add_key(&ctx(), "t", &key(), AccessKeyRecord::new("AKIA1", 1000))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_needs_rotation() {
        let memory = memory_with_mount().await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());
        ledger
            .add_key(&ctx(), "t", &key(), AccessKeyRecord::new("AKIA1", 1_000))
            .await
            .unwrap();

        assert!(ledger
            .needs_rotation(&ctx(), "t", &key(), chrono::Utc::now())
            .await
            .unwrap());
        let early = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(0).unwrap();
        assert!(!ledger.needs_rotation(&ctx(), "t", &key(), early).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_without_document_is_not_found() {
        let memory = memory_with_mount().await;
        let ledger = AccessKeyLedger::new(backend(&memory), &LedgerConfig::default());

        let err = ledger
            .rotate_key(&ctx(), "t", &key(), &"AKIA1".into(), AccessKeyRecord::new("AKIA2", 2000))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(write_count(&memory).await, 0);
        assert!(memory.document(DOC).await.is_none());
    }

    /// Hands control back to the runtime after every metadata read, so two
    /// read-modify-write cycles joined on one task interleave.
    struct YieldAfterRead(Arc<MemoryBackend>);

    #[async_trait]
    impl RequestProcessor for YieldAfterRead {
        async fn process(
            &self,
            path: &str,
            body: &serde_json::Value,
            token: &str,
        ) -> BackendResponse {
            let response = self.0.process(path, body, token).await;
            if path == paths::READ {
                tokio::task::yield_now().await;
            }
            response
        }
    }

    async fn concurrent_adds(serialize_writes: bool) -> (LedgerDocument, AccessKeyLedger) {
        let memory = memory_with_mount().await;
        let ledger = AccessKeyLedger::new(
            IdentityBackend::new(
                Arc::new(YieldAfterRead(memory.clone())),
                BackendConfig::default(),
            ),
            &LedgerConfig { serialize_writes },
        );
        let ctx = ctx();
        let key = key();

        let (a, b) = tokio::join!(
            ledger.add_key(&ctx, "t", &key, AccessKeyRecord::new("AKIA1", 1000)),
            ledger.add_key(&ctx, "t", &key, AccessKeyRecord::new("AKIA2", 2000)),
        );
        a.unwrap();
        b.unwrap();

        let doc = ledger.read(&ctx, "t", &key).await.unwrap();
        (doc, ledger)
    }

    #[tokio::test]
    async fn test_unserialized_concurrent_adds_lose_an_update() {
        let (doc, _) = concurrent_adds(false).await;
        assert_eq!(doc.secret.len(), 1);
    }

    #[tokio::test]
    async fn test_serialized_writes_keep_concurrent_adds() {
        let (doc, ledger) = concurrent_adds(true).await;
        assert_eq!(ids(&doc), vec!["AKIA1", "AKIA2"]);
        assert_eq!(ledger.locked_documents(), 0);
    }
}

// =============================================================================
// Credential Lifecycle Tests
// =============================================================================

#[cfg(test)]
mod credential_tests {
    use super::*;

    async fn lifecycle(portal: FakePortal) -> (Arc<MemoryBackend>, CredentialLifecycle) {
        let memory = memory_with_mount().await;
        let ledger = Arc::new(AccessKeyLedger::new(
            backend(&memory),
            &LedgerConfig::default(),
        ));
        let lifecycle = CredentialLifecycle::new(Arc::new(portal), backend(&memory), ledger);
        (memory, lifecycle)
    }

    #[tokio::test]
    async fn test_create_rotate_delete() {
        let (memory, lifecycle) = lifecycle(FakePortal::default()).await;
        let account = AccountId::from("111");

        let created = lifecycle.create(&ctx(), "t", &account, "svc1").await.unwrap();
        assert_eq!(created.access_key_id.as_str(), "AKIA1");
        let stored = memory.document("iamsvcacc/111_svc1/AKIA1").await.unwrap();
        assert_eq!(stored["accessKeySecret"], "secret-1");

        let rotated = lifecycle
            .rotate(
                &ctx(),
                "t",
                &RotateRequest {
                    access_key_id: "AKIA1".into(),
                    user_name: "svc1".to_string(),
                    account_id: account.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rotated.access_key_id.as_str(), "AKIA2");
        assert!(memory.document("iamsvcacc/111_svc1/AKIA2").await.is_some());

        let doc = lifecycle
            .ledger()
            .read(&ctx(), "t", &LedgerKey::new("111", "svc1"))
            .await
            .unwrap();
        assert_eq!(doc.secret, vec![AccessKeyRecord::new("AKIA2", 2000)]);

        let doc = lifecycle
            .delete(&ctx(), "t", &account, "svc1", &"AKIA2".into())
            .await
            .unwrap();
        assert!(doc.secret.is_empty());
    }

    #[tokio::test]
    async fn test_portal_failure_leaves_ledger_untouched() {
        let (memory, lifecycle) = lifecycle(FakePortal {
            fail_with: Some(StatusCode::BAD_GATEWAY),
            ..Default::default()
        })
        .await;

        let err = lifecycle
            .create(&ctx(), "t", &"111".into(), "svc1")
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(memory.journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_activate() {
        let (_memory, lifecycle) = lifecycle(FakePortal::default()).await;
        let doc = lifecycle
            .activate(&ctx(), "t", &LedgerKey::new("111", "svc1"))
            .await
            .unwrap();
        assert!(doc.is_activated);
    }
}
