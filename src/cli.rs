use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use crate::backup::{Backup, BackupRequest};
use crate::gateway::aws::AwsGateway;
use crate::gateway::{ProviderGateway, Tag};

pub const EXIT_FLAG_PARSE: i32 = 11;
pub const EXIT_BACKUP: i32 = 12;

#[derive(Parser, Debug)]
#[command(
    name = "ami-backup",
    version,
    about = "Create and rotate machine-image backups of an EC2 instance"
)]
pub struct Args {
    /// Instance to back up; defaults to the instance this program runs on
    #[arg(short = 'i', long)]
    pub instance_id: Option<String>,

    /// Number of backup generations to keep
    #[arg(short = 'g', long, default_value_t = 10)]
    pub backup_generation: usize,

    /// Region override; falls back to SDK config, then instance metadata
    #[arg(short = 'r', long)]
    pub region: Option<String>,

    /// Value of the Service tag attached to created images and snapshots
    #[arg(short = 's', long, default_value = "")]
    pub service_tag: String,

    /// Extra tags as key:value pairs, comma separated
    #[arg(short = 'c', long, value_delimiter = ',', value_parser = parse_tag)]
    pub custom_tags: Vec<Tag>,

    /// Endpoint that receives a JSON notice when the backup fails
    #[arg(short = 'n', long)]
    pub notify_url: Option<String>,
}

fn parse_tag(raw: &str) -> Result<Tag, String> {
    let mut parts = raw.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Ok(Tag::new(key, value)),
        _ => Err(format!("expected key:value, got {raw:?}")),
    }
}

pub async fn run(args: Args) -> Result<()> {
    let gateway = Arc::new(AwsGateway::new(args.region.clone()).await);
    run_with(gateway, args).await
}

async fn run_with(gateway: Arc<dyn ProviderGateway>, args: Args) -> Result<()> {
    let instance_id = match args.instance_id {
        Some(id) => id,
        None => gateway.current_instance_id().await?,
    };
    let name = gateway.instance_display_name(&instance_id).await?;

    let backup = Backup::new(
        gateway,
        BackupRequest {
            instance_id,
            name,
            service: args.service_tag,
            generation: args.backup_generation,
            custom_tags: args.custom_tags,
        },
    );

    let image_id = backup.create().await?;
    println!("create image: {image_id}");

    let rotated = backup.rotate(&image_id).await?;
    println!("deregister images: {}", rotated.join(", "));

    Ok(())
}
