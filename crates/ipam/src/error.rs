//! IPAM errors

use thiserror::Error;

/// Errors returned by an [`IpamStore`](crate::IpamStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create targeted a name that is already taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Update or delete targeted a stale version
    #[error("Version conflict: {0}")]
    Conflict(String),

    /// Kubernetes API error that is neither NotFound nor Conflict
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Any other backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors returned by the IPAM engine
#[derive(Debug, Error)]
pub enum IpamError {
    /// Pool missing or disabled
    #[error("No qualified pool: {0}")]
    NoQualifiedPool(String),

    /// Pool type the engine cannot subdivide
    #[error("Unknown pool type: {0}")]
    UnknownPoolType(String),

    /// Pool spec that cannot be turned into blocks (bad CIDR, block size, ...)
    #[error("Invalid pool: {0}")]
    InvalidPool(String),

    /// Every block CIDR of the pool is claimed and none has a free slot
    #[error("No free blocks in pool: {0}")]
    NoFreeBlocks(String),

    /// A block adopted after a create race had no free slot.
    /// Retried by the allocation loop, which then treats the block as claimed.
    #[error("Insufficient free addresses in block: {0}")]
    InsufficientFreeAddresses(String),

    /// Handle id that callers may not use
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Retry ceiling hit while racing other writers
    #[error("Max retries exceeded: {0}")]
    MaxRetries(String),

    /// Selected block was filled or removed by another writer.
    /// Retried by the allocation loop; callers only see `MaxRetries`.
    #[error("Block contention: {0}")]
    BlockContention(String),

    /// Stored block or handle that cannot be interpreted
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Store error that is not handled by a retry loop
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IpamError {
    /// Whether the allocation loop should start over from the pool fetch
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IpamError::BlockContention(_)
                | IpamError::InsufficientFreeAddresses(_)
                | IpamError::Store(StoreError::Conflict(_))
                | IpamError::Store(StoreError::AlreadyExists(_))
        )
    }
}
