pub mod aws;
#[cfg(test)]
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Key/value metadata attached to images and snapshots. Order is insertion
/// order and is preserved; consumers may read tags positionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    Pending,
    Available,
    Failed,
    Other(String),
}

impl ImageState {
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => ImageState::Pending,
            "available" => ImageState::Available,
            "failed" => ImageState::Failed,
            other => ImageState::Other(other.to_string()),
        }
    }
}

/// Point-in-time machine image of an instance's disks.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub image_id: String,
    /// Provider-reported creation timestamp; authoritative only when the
    /// state is `Available`.
    pub creation_date: Option<String>,
    pub state: ImageState,
    /// One entry per block-device mapping with an attached volume; ephemeral
    /// mappings carry no snapshot and are dropped at the adapter boundary.
    pub snapshot_ids: Vec<String>,
}

/// The provider operations the backup engine needs. One production adapter
/// talks to EC2; tests substitute an in-memory implementation.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Identity of the instance this program runs on, via the metadata
    /// service.
    async fn current_instance_id(&self) -> Result<String>;

    /// Value of the instance's Name tag, or the instance id when the tag is
    /// absent or empty.
    async fn instance_display_name(&self, instance_id: &str) -> Result<String>;

    /// Creates an image named `{name}-{now}` and blocks until it reaches the
    /// available state or the poll-attempt ceiling is hit.
    async fn create_image(&self, instance_id: &str, name: &str, now: &str) -> Result<String>;

    /// Applies `tags` to a resource and confirms the resource reports the
    /// full set before returning.
    async fn apply_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()>;

    /// All auto-backup images carrying the given Name/Service fingerprint.
    async fn list_images(&self, name: &str, service: &str) -> Result<Vec<Image>>;

    async fn get_image(&self, image_id: &str) -> Result<Image>;

    async fn snapshot_ids(&self, image_id: &str) -> Result<Vec<String>>;

    /// Deregisters images and deletes their snapshots. Best-effort per
    /// resource; a stuck snapshot never blocks the rest of the batch.
    async fn deregister_images(&self, images: &[Image]) -> Result<()>;
}
