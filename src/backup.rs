use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::error::BackupError;
use crate::gateway::{Image, ImageState, ProviderGateway, Tag};

/// Minute-resolution suffix appended to the image name.
const IMAGE_NAME_TIMESTAMP: &str = "%Y%m%d%H%M";
const CREATION_DATE_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";

/// Input bundle for one backup run; built fresh per invocation and never
/// persisted.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub instance_id: String,
    pub name: String,
    pub service: String,
    pub generation: usize,
    pub custom_tags: Vec<Tag>,
}

pub struct Backup {
    request: BackupRequest,
    client: Arc<dyn ProviderGateway>,
}

impl Backup {
    pub fn new(client: Arc<dyn ProviderGateway>, request: BackupRequest) -> Self {
        Self { request, client }
    }

    /// Creates a machine image of the instance and propagates the provenance
    /// tag set to the image and every snapshot it owns. A snapshot tagging
    /// failure does not stop the loop; failures are reported together once
    /// every snapshot has been attempted.
    pub async fn create(&self) -> Result<String> {
        let now = Utc::now().format(IMAGE_NAME_TIMESTAMP).to_string();
        let image_id = self
            .client
            .create_image(&self.request.instance_id, &self.request.name, &now)
            .await?;
        info!("image {image_id} available");

        let tags = self.tag_set();
        self.client.apply_tags(&image_id, &tags).await?;

        let snapshot_ids = self.client.snapshot_ids(&image_id).await?;
        let mut failures = Vec::new();
        for snapshot_id in &snapshot_ids {
            if let Err(err) = self.client.apply_tags(snapshot_id, &tags).await {
                warn!("tagging snapshot {snapshot_id} failed: {err:#}");
                failures.push(format!("{snapshot_id}: {err:#}"));
            }
        }
        if !failures.is_empty() {
            return Err(BackupError::SnapshotTagging(failures).into());
        }

        Ok(image_id)
    }

    /// Deregisters images beyond the retention generation count, oldest
    /// first by effective creation time, and returns their identifiers in
    /// that order.
    pub async fn rotate(&self, latest_image_id: &str) -> Result<Vec<String>> {
        let mut images = self
            .client
            .list_images(&self.request.name, &self.request.service)
            .await?;

        // The freshly created image may still be missing from the
        // tag-filtered listing.
        if !images.iter().any(|image| image.image_id == latest_image_id) {
            images.push(self.client.get_image(latest_image_id).await?);
        }

        if images.len() <= self.request.generation {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        images.sort_by_key(|image| effective_creation_time(image, now));

        let excess = images.len() - self.request.generation;
        let expired = &images[..excess];
        info!("rotating {} images", expired.len());
        self.client.deregister_images(expired).await?;

        Ok(expired
            .iter()
            .map(|image| image.image_id.clone())
            .collect())
    }

    fn tag_set(&self) -> Vec<Tag> {
        let mut tags = vec![
            Tag::new("BackupType", "auto"),
            Tag::new("Name", &self.request.name),
            Tag::new("Service", &self.request.service),
        ];
        tags.extend(self.request.custom_tags.iter().cloned());
        tags
    }
}

/// Sort key for rotation. Failed images are forced oldest so they are
/// reclaimed first; pending images are forced newest so they survive until
/// they resolve.
fn effective_creation_time(image: &Image, now: DateTime<Utc>) -> DateTime<Utc> {
    match image.state {
        ImageState::Failed => DateTime::UNIX_EPOCH,
        ImageState::Pending => now,
        _ => parse_creation_date(image.creation_date.as_deref().unwrap_or_default()),
    }
}

/// EC2 reports e.g. `2023-10-01T12:30:00.000Z`; the fractional part is cut
/// and the rest parsed at second resolution. Unparsable dates sort oldest.
fn parse_creation_date(raw: &str) -> DateTime<Utc> {
    let seconds = raw.split('.').next().unwrap_or(raw);
    NaiveDateTime::parse_from_str(seconds, CREATION_DATE_LAYOUT)
        .map(|at| at.and_utc())
        .unwrap_or(DateTime::UNIX_EPOCH)
}
