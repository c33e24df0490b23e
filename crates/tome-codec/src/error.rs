use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{codec} serialization error: {reason}")]
    Serialization { codec: &'static str, reason: String },

    #[error("{codec} deserialization error: {reason}")]
    Deserialization { codec: &'static str, reason: String },

    #[error("unknown codec: {0}")]
    UnknownCodec(String),
}

pub type CodecResult<T> = Result<T, CodecError>;
