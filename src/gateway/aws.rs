use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::imds;
use aws_config::imds::region::ImdsRegionProvider;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_ec2 as ec2;
use aws_types::region::Region;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{Image, ImageState, ProviderGateway, Tag};
use crate::error::BackupError;

/// Backward-compatible default when no other region source resolves.
const DEFAULT_REGION: &str = "ap-northeast-1";
const IMAGE_DESCRIPTION: &str = "created by ami-backup";

const IMAGE_WAIT_ATTEMPTS: usize = 120;
const IMAGE_POLL_INTERVAL: Duration = Duration::from_secs(15);
const TAG_CONFIRM_ATTEMPTS: usize = 10;

/// Production gateway over EC2 and the instance metadata service.
pub struct AwsGateway {
    ec2: ec2::Client,
    imds: imds::Client,
}

impl AwsGateway {
    /// Region resolution order: explicit value, SDK-loaded config, instance
    /// metadata, hardcoded default.
    pub async fn new(region: Option<String>) -> Self {
        let chain = RegionProviderChain::first_try(region.map(Region::new))
            .or_default_provider()
            .or_else(ImdsRegionProvider::builder().build())
            .or_else(Region::new(DEFAULT_REGION));
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(chain)
            .load()
            .await;

        Self {
            ec2: ec2::Client::new(&config),
            imds: imds::Client::builder().build(),
        }
    }

    async fn describe_image(&self, image_id: &str) -> Result<ec2::types::Image> {
        let resp = self
            .ec2
            .describe_images()
            .image_ids(image_id)
            .send()
            .await?;
        resp.images()
            .first()
            .cloned()
            .ok_or_else(|| BackupError::ImageNotFound(image_id.to_string()).into())
    }

    /// Number of tags the resource currently reports. Images and snapshots
    /// are described through different calls, told apart by the id prefix.
    async fn tag_count(&self, resource_id: &str) -> Result<usize> {
        if resource_id.starts_with("snap-") {
            let resp = self
                .ec2
                .describe_snapshots()
                .snapshot_ids(resource_id)
                .send()
                .await?;
            Ok(resp.snapshots().first().map_or(0, |snap| snap.tags().len()))
        } else {
            let resp = self
                .ec2
                .describe_images()
                .image_ids(resource_id)
                .send()
                .await?;
            Ok(resp.images().first().map_or(0, |image| image.tags().len()))
        }
    }
}

fn tag_filter(name: &str, value: &str) -> ec2::types::Filter {
    ec2::types::Filter::builder().name(name).values(value).build()
}

fn convert_image(image: &ec2::types::Image) -> Image {
    Image {
        image_id: image.image_id().unwrap_or_default().to_string(),
        creation_date: image.creation_date().map(str::to_string),
        state: image
            .state()
            .map_or(ImageState::Other(String::new()), |state| {
                ImageState::parse(state.as_str())
            }),
        snapshot_ids: image
            .block_device_mappings()
            .iter()
            .filter_map(|mapping| mapping.ebs().and_then(|ebs| ebs.snapshot_id()))
            .map(str::to_string)
            .collect(),
    }
}

#[async_trait]
impl ProviderGateway for AwsGateway {
    async fn current_instance_id(&self) -> Result<String> {
        let instance_id = self
            .imds
            .get("/latest/meta-data/instance-id")
            .await
            .map_err(|err| {
                debug!("instance metadata lookup failed: {err}");
                BackupError::MetadataUnavailable
            })?;
        Ok(instance_id.as_ref().to_string())
    }

    async fn instance_display_name(&self, instance_id: &str) -> Result<String> {
        let resp = self
            .ec2
            .describe_tags()
            .filters(tag_filter("resource-id", instance_id))
            .filters(tag_filter("key", "Name"))
            .send()
            .await
            .with_context(|| format!("describe tags of {instance_id}"))?;

        let name = resp
            .tags()
            .first()
            .and_then(|tag| tag.value())
            .unwrap_or_default();
        if name.is_empty() {
            Ok(instance_id.to_string())
        } else {
            Ok(name.to_string())
        }
    }

    async fn create_image(&self, instance_id: &str, name: &str, now: &str) -> Result<String> {
        let resp = self
            .ec2
            .create_image()
            .instance_id(instance_id)
            .name(format!("{name}-{now}"))
            .description(IMAGE_DESCRIPTION)
            .no_reboot(true)
            .send()
            .await
            .with_context(|| format!("create image of {instance_id}"))?;
        let image_id = resp
            .image_id()
            .context("create image returned no image id")?
            .to_string();

        for _ in 0..IMAGE_WAIT_ATTEMPTS {
            match self.describe_image(&image_id).await {
                Ok(image) => {
                    if image.state().map(|state| state.as_str()) == Some("available") {
                        return Ok(image_id);
                    }
                }
                Err(err) => debug!("describe while waiting for {image_id}: {err:#}"),
            }
            sleep(IMAGE_POLL_INTERVAL).await;
        }

        Err(BackupError::ImageWaitTimedOut {
            image_id,
            attempts: IMAGE_WAIT_ATTEMPTS,
        }
        .into())
    }

    async fn apply_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()> {
        let ec2_tags: Vec<ec2::types::Tag> = tags
            .iter()
            .map(|tag| {
                ec2::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
            })
            .collect();
        self.ec2
            .create_tags()
            .resources(resource_id)
            .set_tags(Some(ec2_tags))
            .send()
            .await
            .with_context(|| format!("create tags on {resource_id}"))?;

        // Tag writes are eventually consistent; confirm the resource reports
        // at least as many tags as were submitted.
        for attempt in 1..=TAG_CONFIRM_ATTEMPTS {
            match self.tag_count(resource_id).await {
                Ok(count) if count >= tags.len() => return Ok(()),
                Ok(_) => {}
                Err(err) => debug!("describe while confirming tags on {resource_id}: {err:#}"),
            }
            sleep(Duration::from_secs(attempt as u64)).await;
        }

        Err(BackupError::TagConfirmTimedOut {
            resource_id: resource_id.to_string(),
            attempts: TAG_CONFIRM_ATTEMPTS,
        }
        .into())
    }

    async fn list_images(&self, name: &str, service: &str) -> Result<Vec<Image>> {
        let mut images = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let resp = self
                .ec2
                .describe_images()
                .filters(tag_filter("tag:BackupType", "auto"))
                .filters(tag_filter("tag:Name", name))
                .filters(tag_filter("tag:Service", service))
                .set_next_token(next.clone())
                .send()
                .await?;

            images.extend(resp.images().iter().map(convert_image));

            next = resp.next_token().map(str::to_string);
            if next.is_none() {
                break;
            }
        }
        Ok(images)
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        Ok(convert_image(&self.describe_image(image_id).await?))
    }

    async fn snapshot_ids(&self, image_id: &str) -> Result<Vec<String>> {
        Ok(convert_image(&self.describe_image(image_id).await?).snapshot_ids)
    }

    async fn deregister_images(&self, images: &[Image]) -> Result<()> {
        for image in images {
            if let Err(err) = self
                .ec2
                .deregister_image()
                .image_id(&image.image_id)
                .send()
                .await
            {
                warn!("deregister {} failed: {err}", image.image_id);
            }
            for snapshot_id in &image.snapshot_ids {
                if let Err(err) = self
                    .ec2
                    .delete_snapshot()
                    .snapshot_id(snapshot_id)
                    .send()
                    .await
                {
                    warn!("delete snapshot {snapshot_id} failed: {err}");
                }
            }
        }
        Ok(())
    }
}
