//! Error taxonomy shared by every datastore and adapter.

/// Errors from datastore operations.
///
/// Every variant corresponds to one [`ErrorKind`]; callers should branch on
/// [`StoreError::kind`] rather than on message text.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A store (or one of its children) could not be initialized.
    #[error("cannot open datastore: {reason}")]
    OpenFailed {
        reason: String,
        #[source]
        source: Option<Box<StoreError>>,
    },

    /// A put could not be routed or a child write failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        reason: String,
        #[source]
        source: Option<Box<StoreError>>,
    },

    /// A delete could not be routed or a child delete failed.
    #[error("delete failed: {reason}")]
    DeleteFailed {
        reason: String,
        #[source]
        source: Option<Box<StoreError>>,
    },

    /// No value (or no route, or no shard descriptor) exists for the key.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested shard does not match the one already persisted.
    #[error("specified shard {requested} does not match repo shard {existing}")]
    ConfigConflict { requested: String, existing: String },

    /// A key escaped the prefix it was expected to live under.
    #[error("expected prefix {prefix} in key {key}")]
    InvariantViolation { prefix: String, key: String },

    /// A shard descriptor could not be parsed.
    #[error("invalid shard descriptor {input:?}: {reason}")]
    Parse { input: String, reason: String },

    /// A fan-out was cancelled because a sibling operation failed.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A store layout description is malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Opaque failure reported by a backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Structural tag for a [`StoreError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OpenFailed,
    WriteFailed,
    DeleteFailed,
    NotFound,
    ConfigConflict,
    InvariantViolation,
    Parse,
    Aborted,
    InvalidConfig,
    Backend,
}

impl StoreError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenFailed { .. } => ErrorKind::OpenFailed,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ConfigConflict { .. } => ErrorKind::ConfigConflict,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Returns `true` if this is a [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn open_failed(reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn delete_failed(reason: impl Into<String>) -> Self {
        Self::DeleteFailed {
            reason: reason.into(),
            source: None,
        }
    }

    /// Wrap `self` as the cause of an [`StoreError::OpenFailed`].
    pub fn into_open_failed(self) -> Self {
        Self::OpenFailed {
            reason: self.to_string(),
            source: Some(Box::new(self)),
        }
    }

    /// Wrap `self` as the cause of a [`StoreError::WriteFailed`].
    ///
    /// Errors that already are write failures pass through unchanged.
    pub fn into_write_failed(self) -> Self {
        match self {
            Self::WriteFailed { .. } => self,
            other => Self::WriteFailed {
                reason: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Wrap `self` as the cause of a [`StoreError::DeleteFailed`].
    ///
    /// Errors that already are delete failures pass through unchanged.
    pub fn into_delete_failed(self) -> Self {
        match self {
            Self::DeleteFailed { .. } => self,
            other => Self::DeleteFailed {
                reason: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
