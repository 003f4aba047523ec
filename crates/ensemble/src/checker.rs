//! Classifies the state of a ZooKeeper server from its admin responses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;
use warden_config::EnsembleConfig;

use crate::Error;
use crate::fourletter::four_letter;

const POLL_ATTEMPTS: u32 = 3;
const POLL_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Observed state of one ZooKeeper instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Not checked yet.
    Latent,
    /// Not reachable.
    Down,
    /// Reachable but not part of an active quorum.
    NotServing,
    /// Serving requests.
    Serving,
    /// Host is not in the server specification.
    Unlisted,
    /// Reachable but the response was not understood.
    Unknown,
}

impl InstanceState {
    /// Numeric code used on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Latent => 0,
            Self::Down => 1,
            Self::NotServing => 2,
            Self::Serving => 3,
            Self::Unlisted => 4,
            Self::Unknown => 5,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Latent => "latent",
            Self::Down => "down",
            Self::NotServing => "not serving",
            Self::Serving => "serving",
            Self::Unlisted => "down (not in server list)",
            Self::Unknown => "unknown",
        }
    }
}

/// Result of probing one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    /// Classified state.
    pub state: InstanceState,
    /// True when `srvr` reported leader mode.
    pub is_leader: bool,
}

async fn ruok_with_backoff(host: &str, port: u16, deadline: Duration) -> Result<String, Error> {
    let mut delay = POLL_BACKOFF_BASE;
    let mut last = None;
    for attempt in 0..POLL_ATTEMPTS {
        match four_letter(host, port, "ruok", deadline).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                debug!(host, attempt, error = %e, "ruok probe failed");
                last = Some(e);
            }
        }
        if attempt + 1 < POLL_ATTEMPTS {
            sleep(delay).await;
            delay *= 2;
        }
    }
    Err(last.unwrap_or(Error::Timeout("ruok")))
}

/// Probes `host` and classifies its state.
///
/// Transient connection failures are retried with doubling backoff before
/// the instance is declared down. The `srvr` mode parse mirrors what the
/// server actually prints, so it breaks if that format changes.
pub async fn probe(config: &EnsembleConfig, host: &str) -> Probe {
    let listed = config
        .server_list()
        .is_ok_and(|list| list.server_id_for(host).is_some() || host == "localhost");
    let deadline = config.connection_timeout();

    let Ok(ruok) = ruok_with_backoff(host, config.client_port, deadline).await else {
        let state = if listed {
            InstanceState::Down
        } else {
            InstanceState::Unlisted
        };
        return Probe {
            state,
            is_leader: false,
        };
    };

    if ruok != "imok" {
        return Probe {
            state: InstanceState::Unknown,
            is_leader: false,
        };
    }

    let Ok(srvr) = four_letter(host, config.client_port, "srvr", deadline).await else {
        return Probe {
            state: InstanceState::Unknown,
            is_leader: false,
        };
    };

    let mut state = InstanceState::Unknown;
    let mut is_leader = false;
    for line in srvr.lines() {
        if line.contains("not currently serving") {
            state = InstanceState::NotServing;
            break;
        }
        if line.to_lowercase().starts_with("mode") {
            state = InstanceState::Serving;
            is_leader = line.to_lowercase().contains("leader");
            break;
        }
    }

    Probe { state, is_leader }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn fake_zookeeper(srvr_body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // serve a handful of sequential probes
            for _ in 0..8 {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut word = [0u8; 4];
                if stream.read_exact(&mut word).await.is_err() {
                    continue;
                }
                let response = match &word {
                    b"ruok" => "imok",
                    b"srvr" => srvr_body,
                    _ => "",
                };
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    fn config_with_port(port: u16) -> EnsembleConfig {
        EnsembleConfig {
            install_dir: "/opt/zookeeper".to_string(),
            data_dir: "/var/lib/zookeeper".to_string(),
            log_index_dir: "/var/lib/warden/index".to_string(),
            servers_spec: "localhost:1".to_string(),
            hostname: "localhost".to_string(),
            client_port: port,
            connection_timeout_ms: 500,
            ..EnsembleConfig::default()
        }
    }

    #[tokio::test]
    async fn serving_follower_is_classified() {
        let port = fake_zookeeper("Zookeeper version: 3.4\nMode: follower\n").await;

        let probe = probe(&config_with_port(port), "localhost").await;

        assert_eq!(probe.state, InstanceState::Serving);
        assert!(!probe.is_leader);
    }

    #[tokio::test]
    async fn leader_mode_is_detected() {
        let port = fake_zookeeper("Zookeeper version: 3.4\nMode: leader\n").await;

        let probe = probe(&config_with_port(port), "localhost").await;

        assert_eq!(probe.state, InstanceState::Serving);
        assert!(probe.is_leader);
    }

    #[tokio::test]
    async fn quorumless_server_is_not_serving() {
        let port =
            fake_zookeeper("This ZooKeeper instance is not currently serving requests\n").await;

        let probe = probe(&config_with_port(port), "localhost").await;

        assert_eq!(probe.state, InstanceState::NotServing);
    }

    #[tokio::test]
    async fn unreachable_listed_host_is_down() {
        let mut config = config_with_port(1);
        config.connection_timeout_ms = 100;

        let probe = probe(&config, "localhost").await;

        assert_eq!(probe.state, InstanceState::Down);
    }

    #[tokio::test]
    async fn unreachable_unlisted_host_is_unlisted() {
        let mut config = config_with_port(1);
        config.connection_timeout_ms = 100;

        let probe = probe(&config, "stranger.example").await;

        assert_eq!(probe.state, InstanceState::Unlisted);
    }
}
