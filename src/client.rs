//! Agent-side HTTP transport to the hub
//!
//! Every request carries the host's monitor secret as a bearer token.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{instrument, trace};

use crate::{ProbeResult, Pulse, Task, TasksResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/agent/{path}", self.base_url)
    }

    /// Fetch the full task set this host should run
    #[instrument(skip(self))]
    pub async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        let response = self
            .client
            .get(self.url("tasks"))
            .bearer_auth(&self.secret)
            .send()
            .await
            .context("task sync request failed")?;

        if !response.status().is_success() {
            bail!("task sync rejected with status {}", response.status());
        }

        let body: TasksResponse = response
            .json()
            .await
            .context("failed to decode task list")?;
        trace!("fetched {} tasks", body.tasks.len());

        Ok(body.tasks)
    }

    #[instrument(skip(self, results), fields(count = results.len()))]
    pub async fn report_results(&self, results: &[ProbeResult]) -> Result<()> {
        let response = self
            .client
            .post(self.url("report"))
            .bearer_auth(&self.secret)
            .json(results)
            .send()
            .await
            .context("report request failed")?;

        if !response.status().is_success() {
            bail!("report rejected with status {}", response.status());
        }
        Ok(())
    }

    #[instrument(skip(self, pulse), fields(host_id = pulse.host_id))]
    pub async fn send_pulse(&self, pulse: &Pulse) -> Result<()> {
        let response = self
            .client
            .post(self.url("pulse"))
            .bearer_auth(&self.secret)
            .json(pulse)
            .send()
            .await
            .context("pulse request failed")?;

        if !response.status().is_success() {
            bail!("pulse rejected with status {}", response.status());
        }
        Ok(())
    }
}
