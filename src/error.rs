use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    #[error("Index {index} is out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("Unknown reduction: {0}")]
    UnknownReduction(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err.to_string())
    }
}
