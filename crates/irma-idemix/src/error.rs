use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdemixError {
    #[error("signature does not verify")]
    InvalidSignature,

    #[error("attribute count does not match key")]
    AttributeCountMismatch,

    #[error("builder used out of order: {0}")]
    BuilderState(String),

    #[error("value not invertible modulo n")]
    NotInvertible,

    #[error("paillier message out of range")]
    PaillierRange,
}

pub type IdemixResult<T> = Result<T, IdemixError>;
