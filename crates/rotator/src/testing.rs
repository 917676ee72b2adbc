//! In-memory fakes for the secret store and the database.
//!
//! Both enforce the invariants the real services do: one version per stage
//! label, the `AWSPREVIOUS` hand-off on `AWSCURRENT` moves, and password
//! checks on login. The database also counts open sessions so tests can
//! assert nothing leaks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{RotationError, Stage};
use serde_json::Value;

use crate::aws::rds::MockDbEndpointLookup;
use crate::db::{ConnectParams, Database, DbSession, DdlOutcome};
use crate::rotation::username::UsernameSuffix;
use crate::rotation::{RetirePolicy, RotationSettings, Rotator};
use crate::store::{PasswordPolicy, PutOutcome, SecretMetadata, SecretStore, SecretValue};

// ---------------------------------------------------------------------------
// Rotator fixture
// ---------------------------------------------------------------------------

pub fn settings(retire_policy: RetirePolicy) -> RotationSettings {
    RotationSettings {
        connect_timeout: std::time::Duration::from_secs(5),
        password: PasswordPolicy {
            length: 16,
            exclude_characters: r#"/@"'\"#.into(),
            require_each_type: true,
        },
        username_suffix: UsernameSuffix::Uuid,
        retire_policy,
        inherit_privileges: true,
        revoke_schema: "public".into(),
        test_current_credentials: false,
    }
}

/// Rotator over the given fakes with default settings and no RDS lookups.
pub fn fixture(
    store: Arc<MemorySecretStore>,
    db: MemoryDatabase,
    retire_policy: RetirePolicy,
) -> Rotator {
    fixture_with(store, db, settings(retire_policy))
}

pub fn fixture_with(
    store: Arc<MemorySecretStore>,
    db: MemoryDatabase,
    settings: RotationSettings,
) -> Rotator {
    Rotator::new(
        store,
        Arc::new(db),
        Arc::new(MockDbEndpointLookup::new()),
        settings,
    )
}

// ---------------------------------------------------------------------------
// Secret store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoredSecret {
    rotation_enabled: Option<bool>,
    versions: BTreeMap<String, StoredVersion>,
    tags: Vec<(String, String)>,
}

struct StoredVersion {
    stages: BTreeSet<String>,
    /// `None` for a version staged by `RotateSecret` before `createSecret` runs.
    secret_string: Option<String>,
}

impl StoredSecret {
    fn holder_of(&self, stage: &str) -> Option<String> {
        self.versions
            .iter()
            .find(|(_, v)| v.stages.contains(stage))
            .map(|(id, _)| id.clone())
    }

    fn strip_stage(&mut self, stage: &str) {
        for v in self.versions.values_mut() {
            v.stages.remove(stage);
        }
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, StoredSecret>>,
    passwords_issued: Mutex<u32>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `version` labelled `AWSCURRENT`, creating the secret if needed.
    pub fn seed_current(&self, secret_id: &str, version: &str, payload: Value) {
        self.seed_version(secret_id, version, &[Stage::Current], payload);
    }

    pub fn seed_version(&self, secret_id: &str, version: &str, stages: &[Stage], payload: Value) {
        self.stage(secret_id, version, stages, Some(payload.to_string()));
    }

    /// Stage `token` as a value-less `AWSPENDING` version, the way
    /// `RotateSecret` does before invoking `createSecret`.
    pub fn start_rotation(&self, secret_id: &str, token: &str) {
        self.stage(secret_id, token, &[Stage::Pending], None);
    }

    fn stage(&self, secret_id: &str, version: &str, stages: &[Stage], secret_string: Option<String>) {
        let mut secrets = self.secrets.lock().unwrap();
        let secret = secrets.entry(secret_id.to_owned()).or_insert_with(|| StoredSecret {
            rotation_enabled: Some(true),
            ..Default::default()
        });
        for stage in stages {
            secret.strip_stage(stage.as_str());
        }
        secret.versions.insert(
            version.to_owned(),
            StoredVersion {
                stages: stages.iter().map(|s| s.as_str().to_owned()).collect(),
                secret_string,
            },
        );
    }

    pub fn set_tags(&self, secret_id: &str, tags: Vec<(String, String)>) {
        let mut secrets = self.secrets.lock().unwrap();
        secrets.entry(secret_id.to_owned()).or_default().tags = tags;
    }

    pub fn set_rotation_enabled(&self, secret_id: &str, enabled: Option<bool>) {
        let mut secrets = self.secrets.lock().unwrap();
        secrets.entry(secret_id.to_owned()).or_default().rotation_enabled = enabled;
    }

    /// Version id to stage labels.
    pub fn versions(&self, secret_id: &str) -> BTreeMap<String, BTreeSet<String>> {
        let secrets = self.secrets.lock().unwrap();
        secrets
            .get(secret_id)
            .map(|s| {
                s.versions
                    .iter()
                    .map(|(id, v)| (id.clone(), v.stages.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parsed payload of one version.
    pub fn payload(&self, secret_id: &str, version: &str) -> Option<Value> {
        let secrets = self.secrets.lock().unwrap();
        let v = secrets.get(secret_id)?.versions.get(version)?;
        serde_json::from_str(v.secret_string.as_deref()?).ok()
    }

    /// Versions carrying `stage`.
    pub fn holders(&self, secret_id: &str, stage: Stage) -> Vec<String> {
        self.versions(secret_id)
            .into_iter()
            .filter(|(_, stages)| stages.contains(stage.as_str()))
            .map(|(id, _)| id)
            .collect()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn describe(&self, secret_id: &str) -> Result<SecretMetadata, RotationError> {
        let secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .get(secret_id)
            .ok_or_else(|| RotationError::SecretStore(format!("{secret_id} not found")))?;
        Ok(SecretMetadata {
            rotation_enabled: secret.rotation_enabled,
            versions: secret
                .versions
                .iter()
                .map(|(id, v)| (id.clone(), v.stages.clone()))
                .collect(),
            tags: secret.tags.clone(),
        })
    }

    async fn get_value(
        &self,
        secret_id: &str,
        stage: Stage,
        version_id: Option<&str>,
    ) -> Result<Option<SecretValue>, RotationError> {
        let secrets = self.secrets.lock().unwrap();
        let Some(secret) = secrets.get(secret_id) else {
            return Ok(None);
        };
        let found = secret.versions.iter().find(|(id, v)| {
            v.stages.contains(stage.as_str()) && version_id.map_or(true, |want| want == id.as_str())
        });
        Ok(found.and_then(|(id, v)| {
            Some(SecretValue {
                version_id: id.clone(),
                secret_string: v.secret_string.clone()?,
            })
        }))
    }

    async fn put_pending(
        &self,
        secret_id: &str,
        version_id: &str,
        secret_string: &str,
    ) -> Result<PutOutcome, RotationError> {
        let mut secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .get_mut(secret_id)
            .ok_or_else(|| RotationError::SecretStore(format!("{secret_id} not found")))?;

        if let Some(existing) = secret.versions.get_mut(version_id) {
            return Ok(match existing.secret_string.as_deref() {
                None => {
                    existing.secret_string = Some(secret_string.to_owned());
                    PutOutcome::Created
                }
                Some(s) if s == secret_string => PutOutcome::Created,
                Some(_) => PutOutcome::AlreadyExists,
            });
        }

        secret.strip_stage(Stage::Pending.as_str());
        secret.versions.insert(
            version_id.to_owned(),
            StoredVersion {
                stages: BTreeSet::from([Stage::Pending.as_str().to_owned()]),
                secret_string: Some(secret_string.to_owned()),
            },
        );
        Ok(PutOutcome::Created)
    }

    async fn update_stage(
        &self,
        secret_id: &str,
        stage: Stage,
        move_to: &str,
        remove_from: Option<&str>,
    ) -> Result<(), RotationError> {
        let mut secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .get_mut(secret_id)
            .ok_or_else(|| RotationError::SecretStore(format!("{secret_id} not found")))?;
        if !secret.versions.contains_key(move_to) {
            return Err(RotationError::SecretStore(format!("unknown version {move_to}")));
        }

        let holder = secret.holder_of(stage.as_str());
        if let Some(holder) = &holder {
            if holder != move_to && remove_from != Some(holder.as_str()) {
                return Err(RotationError::SecretStore(format!(
                    "{stage} is attached to {holder}; RemoveFromVersionId must name it"
                )));
            }
        }

        secret.strip_stage(stage.as_str());
        if let Some(v) = secret.versions.get_mut(move_to) {
            v.stages.insert(stage.as_str().to_owned());
        }

        if stage == Stage::Current {
            if let Some(old) = holder.filter(|h| h != move_to) {
                secret.strip_stage(Stage::Previous.as_str());
                if let Some(v) = secret.versions.get_mut(&old) {
                    v.stages.insert(Stage::Previous.as_str().to_owned());
                }
            }
        }
        Ok(())
    }

    async fn random_password(&self, policy: &PasswordPolicy) -> Result<String, RotationError> {
        let mut issued = self.passwords_issued.lock().unwrap();
        *issued += 1;
        let mut pw = format!("Pw{:06}x", *issued);
        while pw.len() < policy.length as usize {
            pw.push('z');
        }
        Ok(pw)
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleState {
    pub password: String,
    pub login: bool,
    pub create_role: bool,
    pub member_of: BTreeSet<String>,
    /// Privileges granted directly: `schema.object` for tables,
    /// `usage:schema` for schemas, anything else for database-wide grants.
    pub privileges: BTreeSet<String>,
    /// Objects owned, as `schema.object`.
    pub owned: BTreeSet<String>,
}

#[derive(Default)]
struct DbState {
    roles: BTreeMap<String, RoleState>,
    open_sessions: usize,
    sessions_opened: usize,
    fail_statements: bool,
    /// (session user, statement) in execution order.
    statements: Vec<(String, String)>,
}

impl DbState {
    /// `role` itself plus every role it is a member of, transitively.
    fn closure(&self, role: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = vec![role.to_owned()];
        while let Some(next) = queue.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(r) = self.roles.get(&next) {
                queue.extend(r.member_of.iter().cloned());
            }
        }
        seen
    }
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DbState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain login role.
    pub fn add_role(&self, name: &str, password: &str) {
        self.insert(name, password, false);
    }

    /// Add a login role holding `CREATEROLE`.
    pub fn add_creator(&self, name: &str, password: &str) {
        self.insert(name, password, true);
    }

    fn insert(&self, name: &str, password: &str, create_role: bool) {
        self.state.lock().unwrap().roles.insert(
            name.to_owned(),
            RoleState {
                password: password.to_owned(),
                login: true,
                create_role,
                member_of: BTreeSet::new(),
                privileges: BTreeSet::new(),
                owned: BTreeSet::new(),
            },
        );
    }

    pub fn grant(&self, role: &str, privilege: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(r) = state.roles.get_mut(role) {
            r.privileges.insert(privilege.to_owned());
        }
    }

    /// Make `member` a member of `role`.
    pub fn add_member(&self, role: &str, member: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.roles.get_mut(member) {
            m.member_of.insert(role.to_owned());
        }
    }

    pub fn set_owner(&self, role: &str, object: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(r) = state.roles.get_mut(role) {
            r.owned.insert(object.to_owned());
        }
    }

    pub fn role(&self, name: &str) -> Option<RoleState> {
        self.state.lock().unwrap().roles.get(name).cloned()
    }

    /// Privileges `role` can exercise, through ownership or inherited membership.
    pub fn effective_privileges(&self, role: &str) -> BTreeSet<String> {
        let state = self.state.lock().unwrap();
        state
            .closure(role)
            .iter()
            .filter_map(|r| state.roles.get(r))
            .flat_map(|r| r.privileges.iter().chain(r.owned.iter()).cloned())
            .collect()
    }

    pub fn role_names(&self) -> Vec<String> {
        self.state.lock().unwrap().roles.keys().cloned().collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().open_sessions
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().sessions_opened
    }

    pub fn fail_statements(&self, fail: bool) {
        self.state.lock().unwrap().fail_statements = fail;
    }

    pub fn statements(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().statements.clone()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DbSession>, RotationError> {
        let mut state = self.state.lock().unwrap();
        match state.roles.get(&params.username) {
            Some(r) if r.login && r.password == params.password => {}
            _ => {
                return Err(RotationError::DatabaseConnectionFailed(format!(
                    "password authentication failed for user {}",
                    params.username
                )))
            }
        }
        state.open_sessions += 1;
        state.sessions_opened += 1;
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            user: params.username.clone(),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<DbState>>,
    user: String,
}

impl MemorySession {
    fn run<T>(
        &self,
        statement: String,
        f: impl FnOnce(&mut DbState, &str) -> Result<T, RotationError>,
    ) -> Result<T, RotationError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_statements {
            return Err(RotationError::DatabaseStatementFailed(format!(
                "{statement}: permission denied"
            )));
        }
        state.statements.push((self.user.clone(), statement));
        f(&mut state, &self.user)
    }
}

fn require_create_role(state: &DbState, user: &str, what: &str) -> Result<(), RotationError> {
    match state.roles.get(user) {
        Some(r) if r.create_role => Ok(()),
        _ => Err(RotationError::DatabaseStatementFailed(format!(
            "{what}: permission denied for {user}"
        ))),
    }
}

#[async_trait]
impl DbSession for MemorySession {
    async fn role_exists(&mut self, role: &str) -> Result<bool, RotationError> {
        self.run(format!("exists {role}"), |state, _| {
            Ok(state.roles.contains_key(role))
        })
    }

    async fn can_create_roles(&mut self, role: &str) -> Result<bool, RotationError> {
        self.run(format!("createrole? {role}"), |state, _| {
            Ok(state.roles.get(role).is_some_and(|r| r.create_role))
        })
    }

    async fn create_login_role(
        &mut self,
        role: &str,
        password: &str,
        create_role: bool,
    ) -> Result<DdlOutcome, RotationError> {
        self.run(format!("create {role}"), |state, user| {
            require_create_role(state, user, "create role")?;
            if state.roles.contains_key(role) {
                return Ok(DdlOutcome::AlreadyExists);
            }
            state.roles.insert(
                role.to_owned(),
                RoleState {
                    password: password.to_owned(),
                    login: true,
                    create_role,
                    member_of: BTreeSet::new(),
                    privileges: BTreeSet::new(),
                    owned: BTreeSet::new(),
                },
            );
            Ok(DdlOutcome::Applied)
        })
    }

    async fn set_password(
        &mut self,
        role: &str,
        password: &str,
        create_role: bool,
    ) -> Result<DdlOutcome, RotationError> {
        self.run(format!("password {role}"), |state, user| {
            if role != user || create_role {
                require_create_role(state, user, "alter role")?;
            }
            Ok(match state.roles.get_mut(role) {
                Some(r) => {
                    r.password = password.to_owned();
                    r.login = true;
                    r.create_role |= create_role;
                    DdlOutcome::Applied
                }
                None => DdlOutcome::NotFound,
            })
        })
    }

    async fn grant_membership(
        &mut self,
        role: &str,
        member: &str,
    ) -> Result<DdlOutcome, RotationError> {
        self.run(format!("grant {role} to {member}"), |state, user| {
            require_create_role(state, user, "grant")?;
            if !state.roles.contains_key(role) {
                return Ok(DdlOutcome::NotFound);
            }
            Ok(match state.roles.get_mut(member) {
                Some(m) => {
                    m.member_of.insert(role.to_owned());
                    DdlOutcome::Applied
                }
                None => DdlOutcome::NotFound,
            })
        })
    }

    async fn revoke_membership(
        &mut self,
        role: &str,
        member: &str,
    ) -> Result<DdlOutcome, RotationError> {
        self.run(format!("revoke {role} from {member}"), |state, user| {
            require_create_role(state, user, "revoke")?;
            if !state.roles.contains_key(role) {
                return Ok(DdlOutcome::NotFound);
            }
            Ok(match state.roles.get_mut(member) {
                Some(m) => {
                    m.member_of.remove(role);
                    DdlOutcome::Applied
                }
                None => DdlOutcome::NotFound,
            })
        })
    }

    async fn transfer_privileges(
        &mut self,
        schema: &str,
        from: &str,
        to: &str,
    ) -> Result<usize, RotationError> {
        self.run(format!("transfer {schema} from {from} to {to}"), |state, _| {
            let Some(source) = state.roles.get(from) else {
                return Ok(0);
            };
            let prefix = format!("{schema}.");
            let usage = format!("usage:{schema}");
            let privileges: Vec<String> = source
                .privileges
                .iter()
                .chain(source.owned.iter())
                .filter(|p| p.starts_with(&prefix) || **p == usage)
                .cloned()
                .collect();
            let memberships: Vec<String> = source
                .member_of
                .iter()
                .filter(|g| g.as_str() != to)
                .cloned()
                .collect();
            let target = state.roles.get_mut(to).ok_or_else(|| {
                RotationError::DatabaseStatementFailed(format!("role {to} does not exist"))
            })?;
            let count = privileges.len() + memberships.len();
            target.privileges.extend(privileges);
            target.member_of.extend(memberships);
            Ok(count)
        })
    }

    async fn revoke_schema_privileges(
        &mut self,
        schema: &str,
        role: &str,
    ) -> Result<DdlOutcome, RotationError> {
        self.run(format!("revoke {schema} from {role}"), |state, _| {
            let prefix = format!("{schema}.");
            Ok(match state.roles.get_mut(role) {
                Some(r) => {
                    r.privileges.retain(|p| !p.starts_with(&prefix));
                    DdlOutcome::Applied
                }
                None => DdlOutcome::NotFound,
            })
        })
    }

    async fn disable_login(&mut self, role: &str) -> Result<DdlOutcome, RotationError> {
        self.run(format!("nologin {role}"), |state, user| {
            require_create_role(state, user, "alter role")?;
            Ok(match state.roles.get_mut(role) {
                Some(r) => {
                    r.login = false;
                    DdlOutcome::Applied
                }
                None => DdlOutcome::NotFound,
            })
        })
    }

    async fn reassign_owned(&mut self, from: &str, to: &str) -> Result<DdlOutcome, RotationError> {
        self.run(format!("reassign {from} to {to}"), |state, user| {
            if !state.roles.contains_key(from) || !state.roles.contains_key(to) {
                return Ok(DdlOutcome::NotFound);
            }
            let held = state.closure(user);
            if !held.contains(from) || !held.contains(to) {
                return Err(RotationError::DatabaseStatementFailed(format!(
                    "reassign owned: permission denied for {user}"
                )));
            }
            let owned = state
                .roles
                .get_mut(from)
                .map(|r| std::mem::take(&mut r.owned))
                .unwrap_or_default();
            if let Some(target) = state.roles.get_mut(to) {
                target.owned.extend(owned);
            }
            Ok(DdlOutcome::Applied)
        })
    }

    async fn drop_owned(&mut self, role: &str) -> Result<DdlOutcome, RotationError> {
        self.run(format!("drop owned {role}"), |state, user| {
            if !state.closure(user).contains(role) {
                return Err(RotationError::DatabaseStatementFailed(format!(
                    "drop owned: permission denied for {user}"
                )));
            }
            Ok(match state.roles.get_mut(role) {
                Some(r) => {
                    r.privileges.clear();
                    r.owned.clear();
                    DdlOutcome::Applied
                }
                None => DdlOutcome::NotFound,
            })
        })
    }

    async fn drop_role(&mut self, role: &str) -> Result<DdlOutcome, RotationError> {
        self.run(format!("drop {role}"), |state, user| {
            require_create_role(state, user, "drop role")?;
            match state.roles.get(role) {
                None => return Ok(DdlOutcome::NotFound),
                Some(r) if !r.privileges.is_empty() || !r.owned.is_empty() => {
                    return Err(RotationError::DatabaseStatementFailed(format!(
                        "drop role {role}: some objects depend on it"
                    )))
                }
                Some(_) => {}
            }
            state.roles.remove(role);
            for r in state.roles.values_mut() {
                r.member_of.remove(role);
            }
            Ok(DdlOutcome::Applied)
        })
    }

    async fn ping(&mut self) -> Result<(), RotationError> {
        self.run("select now()".to_owned(), |_, _| Ok(()))
            .map_err(|e| RotationError::DatabaseConnectionFailed(format!("round trip failed: {e}")))
    }

    async fn close(self: Box<Self>) -> Result<(), RotationError> {
        self.state.lock().unwrap().open_sessions -= 1;
        Ok(())
    }
}
