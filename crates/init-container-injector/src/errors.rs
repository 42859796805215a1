use thiserror::Error;

use crate::patch::PatchError;

pub type Result<T> = std::result::Result<T, AdmissionError>;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("admission review does not contain a request")]
    MissingRequest,

    #[error("admission request does not contain an object")]
    MissingObject,

    #[error("cannot decode {kind} object: {source}")]
    InvalidObject {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),
}
