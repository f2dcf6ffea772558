//! Stale workflow run cancellation through the GitHub Actions API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftgate_core::event::TriggerEvent;
use driftgate_core::maintenance::{CancelReport, CancelSpec, RunCanceller};
use driftgate_core::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Run statuses GitHub reports for runs that have not finished.
const ACTIVE_STATUSES: &[&str] = &["queued", "in_progress", "waiting", "pending", "requested"];

/// A workflow run as returned by the GitHub API.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub workflow_id: u64,
    pub head_branch: Option<String>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| ACTIVE_STATUSES.contains(&s))
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRunList {
    workflow_runs: Vec<WorkflowRun>,
}

/// Cancels earlier, still-active runs of the current workflow on the same
/// branch. The current run is read from `GITHUB_RUN_ID`.
pub struct GithubRunCanceller {
    client: reqwest::Client,
}

impl Default for GithubRunCanceller {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubRunCanceller {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", "driftgate")
            .header("Accept", "application/vnd.github+json")
    }

    /// Listing of a workflow's runs on `branch`. The branch goes through the
    /// query encoder so names like `feat+x` survive intact.
    fn list_runs_request(
        &self,
        api: &str,
        repo: &str,
        workflow_id: u64,
        branch: &str,
        token: &str,
    ) -> Result<reqwest::Request> {
        let url = format!("{}/repos/{}/actions/workflows/{}/runs", api, repo, workflow_id);
        self.authorized(self.client.get(&url), token)
            .query(&[("branch", branch), ("per_page", "100")])
            .build()
            .map_err(|e| Error::Maintenance(format!("invalid request to {}: {}", url, e)))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        let url = request.url().clone();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Maintenance(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Maintenance(format!("GET {} failed: {}", url, text)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Maintenance(format!("invalid response from {}: {}", url, e)))
    }

    async fn cancel_run(&self, api: &str, repo: &str, run_id: u64, token: &str) -> Result<()> {
        let url = format!("{}/repos/{}/actions/runs/{}/cancel", api, repo, run_id);
        let response = self
            .authorized(self.client.post(&url), token)
            .send()
            .await
            .map_err(|e| Error::Maintenance(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Maintenance(format!(
                "cancelling run {} failed: {}",
                run_id, text
            )));
        }
        Ok(())
    }
}

/// Runs of the same workflow and branch as `current` that started before it
/// and are still active.
pub fn select_stale<'a>(runs: &'a [WorkflowRun], current: &WorkflowRun) -> Vec<&'a WorkflowRun> {
    runs.iter()
        .filter(|run| run.id != current.id)
        .filter(|run| run.workflow_id == current.workflow_id)
        .filter(|run| run.head_branch == current.head_branch)
        .filter(|run| run.created_at < current.created_at)
        .filter(|run| run.is_active())
        .collect()
}

fn env_required(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Maintenance(format!("{} is not set", name)))
}

#[async_trait]
impl RunCanceller for GithubRunCanceller {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn cancel_stale(&self, spec: &CancelSpec, event: &TriggerEvent) -> Result<CancelReport> {
        let token = env_required(&spec.token_env)?;
        let repo = match &spec.repository {
            Some(repo) => repo.clone(),
            None => env_required("GITHUB_REPOSITORY")?,
        };
        let run_id = env_required("GITHUB_RUN_ID")?;
        let api = spec.api_url.trim_end_matches('/');

        let url = format!("{}/repos/{}/actions/runs/{}", api, repo, run_id);
        let request = self
            .authorized(self.client.get(&url), &token)
            .build()
            .map_err(|e| Error::Maintenance(format!("invalid request to {}: {}", url, e)))?;
        let current: WorkflowRun = self.get(request).await?;

        let branch = current
            .head_branch
            .clone()
            .unwrap_or_else(|| event.ref_name().short_name().to_string());
        let request = self.list_runs_request(api, &repo, current.workflow_id, &branch, &token)?;
        let list: WorkflowRunList = self.get(request).await?;

        let stale = select_stale(&list.workflow_runs, &current);
        debug!(repo = %repo, %branch, candidates = list.workflow_runs.len(), stale = stale.len(), "Listed workflow runs");

        let mut report = CancelReport::default();
        for run in stale {
            match self.cancel_run(api, &repo, run.id, &token).await {
                Ok(()) => {
                    info!(run_id = run.id, %branch, "Cancelled stale run");
                    report.cancelled.push(run.id);
                }
                // Runs that finish between listing and cancelling are not errors
                Err(e) => warn!(run_id = run.id, error = %e, "Could not cancel run"),
            }
        }

        Ok(report)
    }
}
