use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("Logging: {}", .0)]
    Logging(String),

    #[error(transparent)]
    Gate(#[from] pressgate_core::GateError),

    #[error("changes were not saved: {}", .0)]
    NotSaved(#[source] pressgate_core::GateError),
}
