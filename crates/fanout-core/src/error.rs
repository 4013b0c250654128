use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Wraps `anyhow::Error` so call sites can keep using `.context(...)` / `.with_context(...)`
/// while the public API surface stays a single concrete type.
#[derive(Debug)]
pub struct Error {
    inner: anyhow::Error,
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: anyhow::anyhow!(message.into()),
        }
    }

    /// True if this error originated from a database operation whose target relation does not
    /// exist yet (an undeployed schema). The cleanup service treats this as transient.
    pub fn is_missing_relation(&self) -> bool {
        self.inner
            .downcast_ref::<sqlx::Error>()
            .map(is_missing_relation_sqlx_error)
            .unwrap_or(false)
    }
}

fn is_missing_relation_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self { inner: value }
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}
