use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    #[error("relay hub has shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, HubError>;
