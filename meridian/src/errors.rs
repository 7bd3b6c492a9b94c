use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("tuple decode mismatch: {0}")]
    TupleDecode(String),
    #[error("write-write conflict detected")]
    WriteWriteConflict,
    #[error("primary key violation on table {0}")]
    PrimaryKeyViolation(String),
    #[error("transaction is not in a valid state for this operation")]
    InvalidTransactionState,
    #[error("serialization failure")]
    SerializationFailure,
    #[error("execution failed: {0}")]
    Generic(String),
}
