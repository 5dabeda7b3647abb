use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("meta encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage root {0} must be an absolute path")]
    RelativeRoot(String),

    #[error("invalid object uri '{0}'")]
    InvalidUri(String),

    #[error("object {0} already exists and overwrite_existing is false")]
    AlreadyExists(String),

    #[error("cannot create object {uri} inside preexisting object {parent}")]
    InsideObject { uri: String, parent: String },

    #[error("cannot create object {0} at nonempty directory")]
    NonEmptyDirectory(String),

    #[error("object {0} does not exist")]
    NotFound(String),

    #[error("path {0} does not exist")]
    DirectoryNotFound(String),

    #[error("meta of object {0} is not a JSON object")]
    InvalidMeta(String),
}
