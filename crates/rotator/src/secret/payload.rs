//! Secret payload model.
//!
//! A payload is the JSON `SecretString` of one version:
//!
//! ```json
//! {"engine": "postgres", "host": "db.internal", "port": 5432, "dbname": "app",
//!  "username": "app_3f2a9c1d", "password": "...", "masterarn": "arn:..."}
//! ```
//!
//! Payloads with a `masterarn`/`master_arn` key use the master-user scheme;
//! the rest use the single-user scheme. Keys this handler does not interpret
//! are carried through untouched.

use common::RotationError;
use serde_json::{Map, Value};

use crate::db::ConnectParams;

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_DBNAME: &str = "postgres";

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Postgres,
    AuroraPostgresql,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::AuroraPostgresql => "aurora-postgresql",
        }
    }

    pub fn parse(value: &str) -> Result<Self, RotationError> {
        match value {
            "postgres" => Ok(Engine::Postgres),
            "aurora-postgresql" => Ok(Engine::AuroraPostgresql),
            other => Err(RotationError::InvalidSecretSchema(format!(
                "database engine must be postgres or aurora-postgresql, got {other:?}"
            ))),
        }
    }
}

/// Connection fields shared by every payload shape.
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredential {
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DbCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the password.
        f.debug_struct("DbCredential")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl DbCredential {
    /// Validate the connection fields of a parsed JSON object.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, RotationError> {
        let engine = Engine::parse(&required_str(map, "engine")?)?;
        let port = match map.get("port") {
            None | Some(Value::Null) => DEFAULT_PORT,
            Some(v) => parse_port(v)?,
        };
        let dbname = match map.get("dbname") {
            None | Some(Value::Null) => DEFAULT_DBNAME.to_owned(),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(_) => {
                return Err(RotationError::InvalidSecretSchema(
                    "dbname must be a non-empty string".into(),
                ))
            }
        };

        Ok(Self {
            engine,
            host: required_str(map, "host")?,
            port,
            dbname,
            username: required_str(map, "username")?,
            password: required_str(map, "password")?,
        })
    }

    pub fn connect_params(&self, timeout: std::time::Duration) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            dbname: self.dbname.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout,
        }
    }
}

/// Which key named the master secret, so it is written back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKey {
    MasterArn,
    MasterArnSnake,
}

impl MasterKey {
    pub fn as_str(self) -> &'static str {
        match self {
            MasterKey::MasterArn => "masterarn",
            MasterKey::MasterArnSnake => "master_arn",
        }
    }
}

/// Rotation scheme, derived from the payload shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    /// The rotating credential administers its own successor.
    SingleUser,
    /// A separately stored master credential administers principals.
    MasterUser { key: MasterKey, arn: String },
}

/// A validated secret payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretPayload {
    pub credential: DbCredential,
    pub scheme: Scheme,
    /// Keys not interpreted here, preserved across rotations.
    extra: Map<String, Value>,
}

/// Keys owned by [`SecretPayload`]; everything else lands in `extra`.
const KNOWN_KEYS: [&str; 8] = [
    "engine",
    "host",
    "port",
    "dbname",
    "username",
    "password",
    "masterarn",
    "master_arn",
];

impl SecretPayload {
    /// Parse and validate a `SecretString`.
    pub fn parse(secret_string: &str) -> Result<Self, RotationError> {
        let map = parse_object(secret_string)?;
        Self::from_map(map)
    }

    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, RotationError> {
        let credential = DbCredential::from_map(&map)?;

        let scheme = match (map.get("masterarn"), map.get("master_arn")) {
            (Some(_), Some(_)) => {
                return Err(RotationError::InvalidSecretSchema(
                    "only one of masterarn and master_arn may be set".into(),
                ))
            }
            (Some(_), None) => Scheme::MasterUser {
                key: MasterKey::MasterArn,
                arn: required_str(&map, "masterarn")?,
            },
            (None, Some(_)) => Scheme::MasterUser {
                key: MasterKey::MasterArnSnake,
                arn: required_str(&map, "master_arn")?,
            },
            (None, None) => Scheme::SingleUser,
        };

        map.retain(|k, _| !KNOWN_KEYS.contains(&k.as_str()));
        Ok(Self {
            credential,
            scheme,
            extra: map,
        })
    }

    /// Same payload with a new username and password.
    pub fn with_credentials(&self, username: String, password: String) -> Self {
        let mut next = self.clone();
        next.credential.username = username;
        next.credential.password = password;
        next
    }

    /// ARN of the master secret, for the master-user scheme.
    pub fn master_arn(&self) -> Option<&str> {
        match &self.scheme {
            Scheme::MasterUser { arn, .. } => Some(arn),
            Scheme::SingleUser => None,
        }
    }

    /// Serialise back to a `SecretString`.
    pub fn to_secret_string(&self) -> String {
        let c = &self.credential;
        let mut map = self.extra.clone();
        map.insert("engine".into(), c.engine.as_str().into());
        map.insert("host".into(), c.host.clone().into());
        map.insert("port".into(), c.port.into());
        map.insert("dbname".into(), c.dbname.clone().into());
        map.insert("username".into(), c.username.clone().into());
        map.insert("password".into(), c.password.clone().into());
        if let Scheme::MasterUser { key, arn } = &self.scheme {
            map.insert(key.as_str().into(), arn.clone().into());
        }
        Value::Object(map).to_string()
    }
}

/// Parse a `SecretString` into a JSON object.
pub fn parse_object(secret_string: &str) -> Result<Map<String, Value>, RotationError> {
    match serde_json::from_str::<Value>(secret_string) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(RotationError::InvalidSecretSchema(
            "secret string must be a JSON object".into(),
        )),
        Err(e) => Err(RotationError::InvalidSecretSchema(format!(
            "secret string is not valid JSON: {e}"
        ))),
    }
}

fn required_str(map: &Map<String, Value>, key: &str) -> Result<String, RotationError> {
    match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(RotationError::InvalidSecretSchema(format!(
            "{key} must be a non-empty string"
        ))),
        None => Err(RotationError::InvalidSecretSchema(format!(
            "{key} key is missing from secret JSON"
        ))),
    }
}

fn parse_port(value: &Value) -> Result<u16, RotationError> {
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.filter(|p| *p != 0).ok_or_else(|| {
        RotationError::InvalidSecretSchema(format!("port must be a valid TCP port, got {value}"))
    })
}
