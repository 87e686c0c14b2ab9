//! Failure notification side-channel. Never affects the run's outcome.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const RETRIES: usize = 3;

fn failure_notice(body: &str, instance_id: Option<&str>, service: &str) -> Value {
    json!({
        "subject": "Backup failed",
        "body": body,
        "instanceId": instance_id,
        "service": service,
    })
}

/// POSTs a failure notice to `endpoint`, retrying with backoff.
pub async fn send_failure(
    endpoint: &str,
    body: &str,
    instance_id: Option<&str>,
    service: &str,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .build()?;

    let notice = failure_notice(body, instance_id, service);

    let mut last = None;
    for attempt in 1..=RETRIES {
        match client.post(endpoint).json(&notice).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                last = Some(anyhow!(
                    "HTTP {} {}",
                    resp.status(),
                    resp.text().await.unwrap_or_default()
                ))
            }
            Err(err) => last = Some(anyhow!(err)),
        }
        tokio::time::sleep(Duration::from_millis(300 * attempt as u64)).await;
    }
    Err(last.unwrap_or_else(|| anyhow!("notification post failed")))
}
