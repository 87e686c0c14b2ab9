use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("not running on an EC2 instance or the metadata service is not available")]
    MetadataUnavailable,

    #[error("image {image_id} was not available after {attempts} poll attempts")]
    ImageWaitTimedOut { image_id: String, attempts: usize },

    #[error("tags on {resource_id} were not confirmed after {attempts} checks")]
    TagConfirmTimedOut { resource_id: String, attempts: usize },

    #[error("can't find image: {0}")]
    ImageNotFound(String),

    #[error("snapshot tagging failed: {}", .0.join(", "))]
    SnapshotTagging(Vec<String>),
}
