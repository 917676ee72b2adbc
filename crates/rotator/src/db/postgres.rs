//! PostgreSQL implementation of [`Database`] on a single `sqlx` connection.
//!
//! Utility statements (`CREATE ROLE`, `ALTER ROLE ... PASSWORD`, `GRANT`) do
//! not accept bind parameters, so identifiers and literals are quoted
//! client-side following PostgreSQL's `quote_ident` / `quote_literal` rules.

use async_trait::async_trait;
use common::RotationError;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::debug;

use super::{ConnectParams, Database, DbSession, DdlOutcome};

/// SQLSTATE `duplicate_object`: role already exists.
const DUPLICATE_OBJECT: &str = "42710";
/// SQLSTATE `undefined_object`: role does not exist.
const UNDEFINED_OBJECT: &str = "42704";

/// Opens one plain (unpooled) connection per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDatabase;

#[async_trait]
impl Database for PostgresDatabase {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DbSession>, RotationError> {
        // Statements get a bounded budget too so a lock wait cannot outlive the invocation.
        let statement_timeout = (params.timeout * 4).as_millis().to_string();
        let opts = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.dbname)
            .username(&params.username)
            .password(&params.password)
            .application_name("pg-rotator")
            .options([("statement_timeout", statement_timeout.as_str())]);

        let target = format!(
            "{}@{}:{}/{}",
            params.username, params.host, params.port, params.dbname
        );
        let conn = tokio::time::timeout(params.timeout, PgConnection::connect_with(&opts))
            .await
            .map_err(|_| {
                RotationError::DatabaseConnectionFailed(format!(
                    "{target} did not answer within {}s",
                    params.timeout.as_secs()
                ))
            })?
            .map_err(|e| RotationError::DatabaseConnectionFailed(format!("{target}: {e}")))?;

        debug!(target = %target, "database session opened");
        Ok(Box::new(PostgresSession { conn }))
    }
}

struct PostgresSession {
    conn: PgConnection,
}

impl PostgresSession {
    async fn ddl(&mut self, sql: &str, what: &str) -> Result<DdlOutcome, RotationError> {
        // Statements can carry passwords; keep them out of the statement cache.
        match sqlx::query(sql)
            .persistent(false)
            .execute(&mut self.conn)
            .await
        {
            Ok(_) => Ok(DdlOutcome::Applied),
            Err(e) => classify(e, what),
        }
    }
}

fn classify(err: sqlx::Error, what: &str) -> Result<DdlOutcome, RotationError> {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(DUPLICATE_OBJECT) => return Ok(DdlOutcome::AlreadyExists),
            Some(UNDEFINED_OBJECT) => return Ok(DdlOutcome::NotFound),
            _ => {}
        }
    }
    Err(RotationError::DatabaseStatementFailed(format!("{what}: {err}")))
}

/// `GRANT` statements that give `$3` what `$2` holds in schema `$1`.
/// Owner privileges are implicit when an ACL is null, hence `acldefault`.
const TRANSFER_GRANTS: &str = r#"
WITH src AS (SELECT oid FROM pg_catalog.pg_roles WHERE rolname = $2::text)
SELECT format('GRANT %s ON TABLE %I.%I TO %I', a.privilege_type, n.nspname, c.relname, $3::text)
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
CROSS JOIN LATERAL aclexplode(COALESCE(c.relacl, acldefault('r', c.relowner))) a
WHERE n.nspname = $1::text
  AND c.relkind IN ('r', 'v', 'm', 'f', 'p')
  AND a.grantee = (SELECT oid FROM src)
UNION ALL
SELECT format('GRANT %s ON SEQUENCE %I.%I TO %I', a.privilege_type, n.nspname, c.relname, $3::text)
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
CROSS JOIN LATERAL aclexplode(COALESCE(c.relacl, acldefault('s', c.relowner))) a
WHERE n.nspname = $1::text
  AND c.relkind = 'S'
  AND a.grantee = (SELECT oid FROM src)
UNION ALL
SELECT format('GRANT %s ON SCHEMA %I TO %I', a.privilege_type, n.nspname, $3::text)
FROM pg_catalog.pg_namespace n
CROSS JOIN LATERAL aclexplode(COALESCE(n.nspacl, acldefault('n', n.nspowner))) a
WHERE n.nspname = $1::text
  AND a.grantee = (SELECT oid FROM src)
UNION ALL
SELECT format('GRANT %I TO %I', g.rolname, $3::text)
FROM pg_catalog.pg_auth_members m
JOIN pg_catalog.pg_roles g ON g.oid = m.roleid
WHERE m.member = (SELECT oid FROM src)
  AND g.rolname <> $3::text
"#;

#[async_trait]
impl DbSession for PostgresSession {
    async fn role_exists(&mut self, role: &str) -> Result<bool, RotationError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1)",
        )
        .bind(role)
        .fetch_one(&mut self.conn)
        .await
        .map_err(|e| RotationError::DatabaseStatementFailed(format!("role lookup for {role}: {e}")))
    }

    async fn can_create_roles(&mut self, role: &str) -> Result<bool, RotationError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT COALESCE((SELECT rolcreaterole FROM pg_catalog.pg_roles WHERE rolname = $1), false)",
        )
        .bind(role)
        .fetch_one(&mut self.conn)
        .await
        .map_err(|e| {
            RotationError::DatabaseStatementFailed(format!("attribute lookup for {role}: {e}"))
        })
    }

    async fn create_login_role(
        &mut self,
        role: &str,
        password: &str,
        create_role: bool,
    ) -> Result<DdlOutcome, RotationError> {
        let sql = format!(
            "CREATE ROLE {} WITH LOGIN{} PASSWORD {}",
            quote_ident(role),
            createrole_clause(create_role),
            quote_literal(password)
        );
        self.ddl(&sql, &format!("create role {role}")).await
    }

    async fn set_password(
        &mut self,
        role: &str,
        password: &str,
        create_role: bool,
    ) -> Result<DdlOutcome, RotationError> {
        let sql = format!(
            "ALTER ROLE {} WITH LOGIN{} PASSWORD {}",
            quote_ident(role),
            createrole_clause(create_role),
            quote_literal(password)
        );
        self.ddl(&sql, &format!("set password for {role}")).await
    }

    async fn grant_membership(
        &mut self,
        role: &str,
        member: &str,
    ) -> Result<DdlOutcome, RotationError> {
        let sql = format!("GRANT {} TO {}", quote_ident(role), quote_ident(member));
        self.ddl(&sql, &format!("grant {role} to {member}")).await
    }

    async fn revoke_membership(
        &mut self,
        role: &str,
        member: &str,
    ) -> Result<DdlOutcome, RotationError> {
        let sql = format!("REVOKE {} FROM {}", quote_ident(role), quote_ident(member));
        self.ddl(&sql, &format!("revoke {role} from {member}")).await
    }

    async fn transfer_privileges(
        &mut self,
        schema: &str,
        from: &str,
        to: &str,
    ) -> Result<usize, RotationError> {
        let grants = sqlx::query_scalar::<_, String>(TRANSFER_GRANTS)
            .bind(schema)
            .bind(from)
            .bind(to)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| {
                RotationError::DatabaseStatementFailed(format!(
                    "privilege lookup for {from} in {schema}: {e}"
                ))
            })?;

        let what = format!("transfer privileges from {from} to {to}");
        for grant in &grants {
            if self.ddl(grant, &what).await? == DdlOutcome::NotFound {
                return Err(RotationError::DatabaseStatementFailed(format!(
                    "{what}: role {to} does not exist"
                )));
            }
        }
        debug!(from, to, schema, grants = grants.len(), "privileges transferred");
        Ok(grants.len())
    }

    async fn revoke_schema_privileges(
        &mut self,
        schema: &str,
        role: &str,
    ) -> Result<DdlOutcome, RotationError> {
        let sql = format!(
            "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA {} FROM {}",
            quote_ident(schema),
            quote_ident(role)
        );
        self.ddl(&sql, &format!("revoke {schema} privileges from {role}"))
            .await
    }

    async fn disable_login(&mut self, role: &str) -> Result<DdlOutcome, RotationError> {
        let sql = format!("ALTER ROLE {} WITH NOLOGIN", quote_ident(role));
        self.ddl(&sql, &format!("disable login for {role}")).await
    }

    async fn reassign_owned(&mut self, from: &str, to: &str) -> Result<DdlOutcome, RotationError> {
        let sql = format!(
            "REASSIGN OWNED BY {} TO {}",
            quote_ident(from),
            quote_ident(to)
        );
        self.ddl(&sql, &format!("reassign objects of {from} to {to}"))
            .await
    }

    async fn drop_owned(&mut self, role: &str) -> Result<DdlOutcome, RotationError> {
        let sql = format!("DROP OWNED BY {}", quote_ident(role));
        self.ddl(&sql, &format!("drop objects owned by {role}")).await
    }

    async fn drop_role(&mut self, role: &str) -> Result<DdlOutcome, RotationError> {
        let sql = format!("DROP ROLE {}", quote_ident(role));
        self.ddl(&sql, &format!("drop role {role}")).await
    }

    async fn ping(&mut self) -> Result<(), RotationError> {
        sqlx::query("SELECT now()")
            .execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|e| RotationError::DatabaseConnectionFailed(format!("round trip failed: {e}")))
    }

    async fn close(self: Box<Self>) -> Result<(), RotationError> {
        self.conn
            .close()
            .await
            .map_err(|e| RotationError::DatabaseConnectionFailed(format!("close failed: {e}")))
    }
}

fn createrole_clause(create_role: bool) -> &'static str {
    if create_role {
        " CREATEROLE"
    } else {
        ""
    }
}

/// Quote an identifier the way `quote_ident` does for names needing quotes.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal the way `quote_literal` does, using the `E''`
/// form when backslashes are present.
pub(crate) fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if value.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}
