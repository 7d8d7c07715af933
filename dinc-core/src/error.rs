use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load sensor error: {0}")]
    LoadSensor(String),
}

pub type Result<T> = std::result::Result<T, Error>;
