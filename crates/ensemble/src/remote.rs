//! HTTP client for the admin endpoints of remote ensemble members. Also the
//! production [`MemberClient`] the rollout coordinator drives.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::debug;
use warden_config::{ServerSpec, VersionedConfig};
use warden_rollout::{MemberClient, MemberError};

use crate::checker::InstanceState;

const REJOIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to the `warden` admin port of other ensemble members.
#[derive(Clone, Debug)]
pub struct RemoteMemberClient {
    client: reqwest::Client,
    admin_port: u16,
}

impl RemoteMemberClient {
    /// Creates a client for members listening on `admin_port`.
    #[must_use]
    pub fn new(admin_port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            admin_port,
        }
    }

    fn url(&self, hostname: &str, path: &str) -> String {
        format!("http://{hostname}:{}/warden/v1/{path}", self.admin_port)
    }

    async fn member_state(&self, hostname: &str) -> Result<u8, MemberError> {
        let response = self
            .client
            .get(self.url(hostname, "cluster/state"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| MemberError::unreachable(hostname, e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| MemberError::unreachable(hostname, e.to_string()))?;
        body.get("state")
            .and_then(Value::as_u64)
            .map(|code| code as u8)
            .ok_or_else(|| MemberError::unreachable(hostname, "malformed state document"))
    }
}

#[async_trait]
impl MemberClient for RemoteMemberClient {
    async fn push_config(
        &self,
        member: &ServerSpec,
        config: &VersionedConfig,
    ) -> Result<(), MemberError> {
        let response = self
            .client
            .post(self.url(&member.hostname, "cluster/push-config"))
            .timeout(REQUEST_TIMEOUT)
            .json(config)
            .send()
            .await
            .map_err(|e| MemberError::unreachable(&member.hostname, e.to_string()))?;
        if !response.status().is_success() {
            return Err(MemberError::unreachable(
                &member.hostname,
                format!("push-config returned {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn restart(&self, member: &ServerSpec) -> Result<(), MemberError> {
        let response = self
            .client
            .get(self.url(&member.hostname, "cluster/restart"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| MemberError::unreachable(&member.hostname, e.to_string()))?;
        if !response.status().is_success() {
            return Err(MemberError::unreachable(
                &member.hostname,
                format!("restart returned {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn await_rejoin(
        &self,
        member: &ServerSpec,
        timeout: Duration,
    ) -> Result<(), MemberError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.member_state(&member.hostname).await {
                Ok(code) if code == InstanceState::Serving.code() => return Ok(()),
                Ok(code) => debug!(hostname = %member.hostname, code, "member not serving yet"),
                Err(e) => debug!(hostname = %member.hostname, error = %e, "member state poll failed"),
            }
            if Instant::now() + REJOIN_POLL_INTERVAL > deadline {
                return Err(MemberError::unreachable(
                    &member.hostname,
                    "did not rejoin the quorum in time",
                ));
            }
            sleep(REJOIN_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP responder that answers every request with `body`.
    async fn http_server(body: &'static str, requests: usize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            for _ in 0..requests {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    fn member() -> ServerSpec {
        ServerSpec {
            server_id: 1,
            hostname: "127.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn restart_succeeds_on_ok() {
        let port = http_server(r#"{"succeeded":true}"#, 1).await;
        let client = RemoteMemberClient::new(port);

        client.restart(&member()).await.unwrap();
    }

    #[tokio::test]
    async fn await_rejoin_returns_once_serving() {
        let port = http_server(r#"{"state":3,"description":"serving"}"#, 1).await;
        let client = RemoteMemberClient::new(port);

        client
            .await_rejoin(&member(), Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn await_rejoin_times_out_against_dead_member() {
        let client = RemoteMemberClient::new(1);

        let result = client
            .await_rejoin(&member(), Duration::from_millis(300))
            .await;

        assert!(matches!(result, Err(MemberError::Unreachable { .. })));
    }
}
