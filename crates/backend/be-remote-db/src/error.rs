//! Errors raised by the update distribution repositories.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },

    /// A row points at a missing parent, or a parent still has children.
    #[error("{entity} reference violated")]
    ForeignKeyViolation { entity: &'static str },

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl DbError {
    pub fn not_found_with_id(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn duplicate(field: &'static str, value: impl Into<String>) -> Self {
        Self::Duplicate {
            field,
            value: value.into(),
        }
    }

    pub fn foreign_key(entity: &'static str) -> Self {
        Self::ForeignKeyViolation { entity }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, Self::ForeignKeyViolation { .. })
    }
}

/// Field named by a unique constraint in the schema.
fn unique_field(constraint: &str) -> &'static str {
    match constraint {
        "updates_version_key" => "version",
        "devices_device_identifier_key" => "device_identifier",
        "deployments_active_release_device" => "active deployment",
        _ => "id",
    }
}

/// Parent entity named by a foreign key constraint in the schema.
fn referenced_entity(constraint: &str) -> &'static str {
    match constraint {
        "releases_update_id_fkey" => "update",
        "deployments_release_id_fkey" => "release",
        "deployments_device_id_fkey" => "device",
        _ => "record",
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or_default().to_string();
                // 23505 unique_violation, 23503 foreign_key_violation
                match db_err.code().as_deref() {
                    Some("23505") => Self::Duplicate {
                        field: unique_field(&constraint),
                        value: constraint,
                    },
                    Some("23503") => Self::ForeignKeyViolation {
                        entity: referenced_entity(&constraint),
                    },
                    _ => Self::Database(sqlx::Error::Database(db_err)),
                }
            }
            sqlx::Error::PoolTimedOut => Self::Connection("connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => Self::Connection("connection pool is closed".to_string()),
            sqlx::Error::Io(io_err) => Self::Connection(io_err.to_string()),
            sqlx::Error::Tls(tls_err) => Self::Connection(format!("TLS error: {}", tls_err)),
            other => Self::Database(other),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
