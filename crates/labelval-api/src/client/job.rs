// Job endpoints
//
// The loaded job, its sectors, print enable and run-mode control.

use serde_json::json;

use crate::client::NodeClient;
use crate::error::Error;
use crate::models::Job;

impl NodeClient {
    /// `GET /inspection/job`
    pub async fn get_job(&self) -> Result<Job, Error> {
        let url = self.node_url("inspection/job")?;
        self.get_json(url).await
    }

    /// Add (or replace) a sector on the loaded job.
    ///
    /// `sector_json` is the sector definition exactly as the node expects
    /// it, usually built by `labelval_core::sectors`.
    ///
    /// `PUT /inspection/job/sectors/{name}`
    pub async fn add_sector(&self, name: &str, sector_json: String) -> Result<(), Error> {
        let url = self.node_url(&format!("inspection/job/sectors/{name}"))?;
        self.put_raw_json(url, sector_json).await
    }

    /// `DELETE /inspection/job/sectors/{name}`
    pub async fn delete_sector(&self, name: &str) -> Result<(), Error> {
        let url = self.node_url(&format!("inspection/job/sectors/{name}"))?;
        self.delete(url).await
    }

    /// Enable or disable the print output of the node.
    ///
    /// `PUT /inspection/print`
    pub async fn print_enable(&self, enabled: bool) -> Result<(), Error> {
        let url = self.node_url("inspection/print")?;
        self.put_json(url, &json!({ "enabled": enabled })).await
    }

    /// Stop a running job, returning the node to Editing.
    ///
    /// `PUT /inspection/job/stop`
    pub async fn stop_job(&self) -> Result<(), Error> {
        self.put_empty(self.node_url("inspection/job/stop")?).await
    }

    /// Switch the named job into run mode.
    ///
    /// `PUT /inspection/job/run`
    pub async fn run_job(&self, name: &str) -> Result<(), Error> {
        let url = self.node_url("inspection/job/run")?;
        self.put_json(url, &json!({ "name": name })).await
    }

    /// `PUT /inspection/job/start`
    pub async fn start_job(&self) -> Result<(), Error> {
        self.put_empty(self.node_url("inspection/job/start")?).await
    }

    /// Resume a paused job.
    ///
    /// `PUT /inspection/job/resume`
    pub async fn resume_job(&self) -> Result<(), Error> {
        self.put_empty(self.node_url("inspection/job/resume")?).await
    }

    /// Whether the loaded job can be switched into run mode. A non-2xx
    /// answer means not ready and is returned as the error.
    ///
    /// `GET /inspection/job/runready`
    pub async fn is_run_ready(&self) -> Result<(), Error> {
        let url = self.node_url("inspection/job/runready")?;
        // Body shape varies by firmware; only the status matters.
        self.get_bytes(url).await.map(drop)
    }
}
