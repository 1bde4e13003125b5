pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("image size changed")]
    ImageSizeChanged,
    #[error("region of interest size does not match frame size")]
    RoiSizeMismatch,
    #[error("model was finalized")]
    Finalized,
}
