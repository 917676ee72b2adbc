//! Database session abstraction used by the step handlers.
//!
//! A session is opened for exactly one step and must be closed on every exit
//! path. DDL results are typed: "already exists" and "does not exist" come
//! back as [`DdlOutcome`] values, everything else as
//! [`RotationError::DatabaseStatementFailed`].

pub mod postgres;

pub use postgres::PostgresDatabase;

use std::time::Duration;

use async_trait::async_trait;
use common::RotationError;

/// Everything needed to open a session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Typed result of a DDL statement against a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOutcome {
    Applied,
    AlreadyExists,
    NotFound,
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Open a session, failing with [`RotationError::DatabaseConnectionFailed`]
    /// if the server is unreachable, rejects the credentials, or does not
    /// answer within `params.timeout`.
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DbSession>, RotationError>;
}

/// An open session. Statements run in autocommit mode.
#[async_trait]
pub trait DbSession: Send {
    async fn role_exists(&mut self, role: &str) -> Result<bool, RotationError>;

    /// Whether `role` holds `CREATEROLE`. `false` for an unknown role.
    async fn can_create_roles(&mut self, role: &str) -> Result<bool, RotationError>;

    async fn create_login_role(
        &mut self,
        role: &str,
        password: &str,
        create_role: bool,
    ) -> Result<DdlOutcome, RotationError>;

    /// Reset the password and re-enable login. `create_role` adds
    /// `CREATEROLE`; it never removes it.
    async fn set_password(
        &mut self,
        role: &str,
        password: &str,
        create_role: bool,
    ) -> Result<DdlOutcome, RotationError>;

    /// Grant membership of `role` to `member`, so `member` inherits its privileges.
    async fn grant_membership(&mut self, role: &str, member: &str)
        -> Result<DdlOutcome, RotationError>;

    async fn revoke_membership(&mut self, role: &str, member: &str)
        -> Result<DdlOutcome, RotationError>;

    /// Grant `to` directly what `from` holds in `schema` (tables, sequences,
    /// the schema itself, owned objects included) plus `from`'s role
    /// memberships. Returns the number of grants issued.
    async fn transfer_privileges(
        &mut self,
        schema: &str,
        from: &str,
        to: &str,
    ) -> Result<usize, RotationError>;

    /// Revoke all table privileges in `schema` from `role`.
    async fn revoke_schema_privileges(
        &mut self,
        schema: &str,
        role: &str,
    ) -> Result<DdlOutcome, RotationError>;

    async fn disable_login(&mut self, role: &str) -> Result<DdlOutcome, RotationError>;

    /// Hand every object owned by `from` to `to`.
    async fn reassign_owned(&mut self, from: &str, to: &str)
        -> Result<DdlOutcome, RotationError>;

    /// Drop `role`'s remaining objects and revoke every privilege granted to it.
    async fn drop_owned(&mut self, role: &str) -> Result<DdlOutcome, RotationError>;

    async fn drop_role(&mut self, role: &str) -> Result<DdlOutcome, RotationError>;

    /// Trivial round trip proving the session is usable.
    async fn ping(&mut self) -> Result<(), RotationError>;

    async fn close(self: Box<Self>) -> Result<(), RotationError>;
}
