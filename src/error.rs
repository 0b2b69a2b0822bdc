use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptchaError>;

/// Exceptional failures. Expected, user-facing verification rejections are
/// modeled separately by [`crate::pow::PowRejection`] and
/// [`crate::verify::VerifyOutcome`] — they are not errors.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("encode error: {0}")]
    EncodeError(String),

    #[error("asset missing: {0}")]
    AssetMissing(String),

    #[error("video decoder error: {0}")]
    DecoderError(String),

    #[error("internal error: {0}")]
    Internal(String),
}
