/// The closed, flat set of error kinds a store mutation can fail with. Store
/// errors never escape as bus events; REST turns them into status codes, the
/// correlator just aborts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("reserved identifier")]
    Reserved,
}

pub type StoreResult<T> = Result<T, StoreError>;
