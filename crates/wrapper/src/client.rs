//! Thin HTTP client for the daemon's client protocol:
//! register, start, finish, and report-other-event, all `PUT` with a
//! JSON body over `reqwest`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("daemon rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    inhibit: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StartOutcome {
    pub inhibit: bool,
}

pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self { http, base_url }
    }

    fn crab_url(&self, host: &str, crabid: Option<&str>, suffix: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        match crabid {
            Some(id) => format!("{base}/api/0/crab/{host}/{id}{suffix}"),
            None => format!("{base}/api/0/crab/{host}{suffix}"),
        }
    }

    async fn put(&self, url: String, body: serde_json::Value) -> Result<ApiEnvelope, ClientError> {
        let resp = self.http.put(&url).json(&body).send().await?;
        let envelope: ApiEnvelope = resp.json().await?;
        if envelope.status != "ok" {
            return Err(ClientError::Rejected(envelope.message.unwrap_or_default()));
        }
        Ok(envelope)
    }

    pub async fn register(&self, host: &str, crabid: Option<&str>, command: &str) -> Result<(), ClientError> {
        let url = self.crab_url(host, crabid, "");
        self.put(url, json!({ "command": command })).await?;
        Ok(())
    }

    pub async fn start(&self, host: &str, crabid: Option<&str>, command: &str) -> Result<StartOutcome, ClientError> {
        let url = self.crab_url(host, crabid, "/start");
        let envelope = self.put(url, json!({ "command": command })).await?;
        Ok(StartOutcome { inhibit: envelope.inhibit })
    }

    pub async fn finish(
        &self,
        host: &str,
        crabid: Option<&str>,
        command: &str,
        status: i32,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) -> Result<(), ClientError> {
        let url = self.crab_url(host, crabid, "/finish");
        self.put(
            url,
            json!({ "command": command, "status": status, "stdout": stdout, "stderr": stderr }),
        )
        .await?;
        Ok(())
    }

    /// Report a non-START/FINISH event kind the wrapper observed
    /// client-side: `INHIBITED`, `ALREADYRUNNING`, or `COULDNOTSTART`.
    pub async fn report(&self, host: &str, crabid: Option<&str>, command: &str, kind: &str) -> Result<(), ClientError> {
        let url = self.crab_url(host, crabid, "/event");
        self.put(url, json!({ "command": command, "kind": kind })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crab_url_with_and_without_crabid() {
        let client = DaemonClient::new("http://localhost:8039".into());
        assert_eq!(
            client.crab_url("hostA", None, "/start"),
            "http://localhost:8039/api/0/crab/hostA/start"
        );
        assert_eq!(
            client.crab_url("hostA", Some("backup"), "/start"),
            "http://localhost:8039/api/0/crab/hostA/backup/start"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = DaemonClient::new("http://localhost:8039/".into());
        assert_eq!(client.crab_url("hostA", None, ""), "http://localhost:8039/api/0/crab/hostA");
    }
}
