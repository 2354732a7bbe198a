use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Error taxonomy surfaced by the coordination core. Everything the store
/// throws that is not a recognizable lookup miss or constraint violation
/// collapses into `Infrastructure`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid ID provided")]
    InvalidId,

    #[error("required input was missing")]
    NilInput,

    #[error("record not found")]
    NotFound,

    #[error("duplicate record")]
    Duplicate,

    #[error("meal plan is already finalized")]
    AlreadyFinalized,

    #[error("no conversion path from {from} to {to}")]
    NoConversion { from: String, to: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("encryption failure: {0}")]
    Encryption(String),

    #[error("serialization failure")]
    Serialization(#[from] serde_json::Error),

    #[error("database failure")]
    Infrastructure(#[source] sqlx::Error),
}

// SQLite primary-key and unique-constraint extended result codes.
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CoreError::NotFound,
            sqlx::Error::Database(db) => {
                if let Some(code) = db.code() {
                    if code == SQLITE_CONSTRAINT_PRIMARYKEY || code == SQLITE_CONSTRAINT_UNIQUE {
                        return CoreError::Duplicate;
                    }
                }
                CoreError::Infrastructure(err)
            }
            _ => CoreError::Infrastructure(err),
        }
    }
}

impl CoreError {
    /// Whether the condition is one the caller can act on, as opposed to a
    /// store failure that should be surfaced as a 500.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CoreError::Infrastructure(_) | CoreError::Serialization(_) | CoreError::Encryption(_)
        )
    }

    pub(crate) fn require_id(id: &str) -> CoreResult<()> {
        if id.trim().is_empty() {
            return Err(CoreError::InvalidId);
        }
        Ok(())
    }
}
