//! In-memory gateway used by the engine and CLI tests.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{Image, ImageState, ProviderGateway, Tag};
use crate::error::BackupError;

#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    instance_id: Option<String>,
    instance_name: Option<String>,
    next_image_id: Option<String>,
    next_snapshot_ids: Vec<String>,
    /// Images returned by the fingerprint listing.
    listed: Vec<Image>,
    /// Images visible to get-by-id only, simulating list-after-write lag.
    unlisted: Vec<Image>,
    failing_tag_resources: HashSet<String>,
    tag_attempts: Vec<String>,
    applied: Vec<(String, Vec<Tag>)>,
    created: Vec<(String, String, String)>,
    deregistered: Vec<String>,
    deleted_snapshots: Vec<String>,
    get_image_calls: usize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(self, instance_id: &str, name: &str) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.instance_id = Some(instance_id.to_string());
            inner.instance_name = Some(name.to_string());
        }
        self
    }

    /// Scripts the image id and snapshot ids the next create call produces.
    pub fn with_created_image(self, image_id: &str, snapshot_ids: &[&str]) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.next_image_id = Some(image_id.to_string());
            inner.next_snapshot_ids = snapshot_ids.iter().map(|id| id.to_string()).collect();
        }
        self
    }

    pub fn with_listed_image(self, image: Image) -> Self {
        self.inner.lock().unwrap().listed.push(image);
        self
    }

    pub fn with_unlisted_image(self, image: Image) -> Self {
        self.inner.lock().unwrap().unlisted.push(image);
        self
    }

    pub fn fail_tagging_on(self, resource_id: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failing_tag_resources
            .insert(resource_id.to_string());
        self
    }

    /// Successful tag applications, in call order.
    pub fn applied_tags(&self) -> Vec<(String, Vec<Tag>)> {
        self.inner.lock().unwrap().applied.clone()
    }

    /// Every resource tagging was attempted on, including refused ones.
    pub fn tag_attempts(&self) -> Vec<String> {
        self.inner.lock().unwrap().tag_attempts.clone()
    }

    pub fn created_calls(&self) -> Vec<(String, String, String)> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn deregistered_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().deregistered.clone()
    }

    pub fn deleted_snapshot_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted_snapshots.clone()
    }

    pub fn get_image_calls(&self) -> usize {
        self.inner.lock().unwrap().get_image_calls
    }
}

#[async_trait]
impl ProviderGateway for MemoryGateway {
    async fn current_instance_id(&self) -> Result<String> {
        self.inner
            .lock()
            .unwrap()
            .instance_id
            .clone()
            .ok_or_else(|| BackupError::MetadataUnavailable.into())
    }

    async fn instance_display_name(&self, instance_id: &str) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .instance_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| instance_id.to_string()))
    }

    async fn create_image(&self, instance_id: &str, name: &str, now: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .created
            .push((instance_id.to_string(), name.to_string(), now.to_string()));
        let image_id = inner
            .next_image_id
            .clone()
            .ok_or_else(|| anyhow!("no scripted image id"))?;
        let snapshot_ids = inner.next_snapshot_ids.clone();
        inner.unlisted.push(Image {
            image_id: image_id.clone(),
            creation_date: None,
            state: ImageState::Available,
            snapshot_ids,
        });
        Ok(image_id)
    }

    async fn apply_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tag_attempts.push(resource_id.to_string());
        if inner.failing_tag_resources.contains(resource_id) {
            return Err(anyhow!("tagging {resource_id} was refused"));
        }
        inner.applied.push((resource_id.to_string(), tags.to_vec()));
        Ok(())
    }

    async fn list_images(&self, _name: &str, _service: &str) -> Result<Vec<Image>> {
        Ok(self.inner.lock().unwrap().listed.clone())
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        let mut inner = self.inner.lock().unwrap();
        inner.get_image_calls += 1;
        inner
            .listed
            .iter()
            .chain(inner.unlisted.iter())
            .find(|image| image.image_id == image_id)
            .cloned()
            .ok_or_else(|| BackupError::ImageNotFound(image_id.to_string()).into())
    }

    async fn snapshot_ids(&self, image_id: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        inner
            .listed
            .iter()
            .chain(inner.unlisted.iter())
            .find(|image| image.image_id == image_id)
            .map(|image| image.snapshot_ids.clone())
            .ok_or_else(|| BackupError::ImageNotFound(image_id.to_string()).into())
    }

    async fn deregister_images(&self, images: &[Image]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for image in images {
            inner.deregistered.push(image.image_id.clone());
            inner
                .deleted_snapshots
                .extend(image.snapshot_ids.iter().cloned());
        }
        Ok(())
    }
}
