use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index parse error: {0}")]
    IndexParse(#[from] serde_json::Error),
}
