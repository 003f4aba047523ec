//! Launches and supervises the local ZooKeeper server process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};
use warden_config::EnsembleConfig;

use crate::Error;

const QUORUM_PEER_MAIN: &str = "org.apache.zookeeper.server.quorum.QuorumPeerMain";

/// Renders the `zoo.cfg` contents for a configuration. Passthrough
/// properties override the built-in defaults; `server.N` lines come from
/// the server specification.
pub(crate) fn render_zoo_cfg(config: &EnsembleConfig) -> Result<String, Error> {
    let servers = config.server_list()?;

    let mut lines = vec![
        format!("clientPort={}", config.client_port),
        format!("dataDir={}", config.data_dir),
    ];

    for (key, default) in [("tickTime", "2000"), ("initLimit", "10"), ("syncLimit", "5")] {
        if !config.zoo_cfg_extra.contains_key(key) {
            lines.push(format!("{key}={default}"));
        }
    }
    for (key, value) in &config.zoo_cfg_extra {
        lines.push(format!("{key}={value}"));
    }
    for spec in servers.specs() {
        lines.push(format!(
            "server.{}={}:{}:{}",
            spec.server_id, spec.hostname, config.connect_port, config.election_port
        ));
    }

    lines.push(String::new());
    Ok(lines.join("\n"))
}

async fn write_instance_files(config: &EnsembleConfig) -> Result<PathBuf, Error> {
    let conf_dir = Path::new(&config.install_dir).join("conf");
    tokio::fs::create_dir_all(&conf_dir)
        .await
        .map_err(|e| Error::Io("error creating conf directory", e))?;

    let cfg_path = conf_dir.join("zoo.cfg");
    tokio::fs::write(&cfg_path, render_zoo_cfg(config)?)
        .await
        .map_err(|e| Error::Io("error writing zoo.cfg", e))?;

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .map_err(|e| Error::Io("error creating data directory", e))?;
    if let Some(server_id) = config.server_id() {
        tokio::fs::write(Path::new(&config.data_dir).join("myid"), format!("{server_id}\n"))
            .await
            .map_err(|e| Error::Io("error writing myid", e))?;
    }

    Ok(cfg_path)
}

fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "zookeeper", "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                error!(target: "zookeeper", "{line}");
            }
        });
    }
}

/// Handle to a supervised ZooKeeper server process.
pub(crate) struct ZooKeeperProcess {
    child: Child,
}

impl ZooKeeperProcess {
    /// Writes `zoo.cfg` and `myid`, then launches the JVM.
    pub(crate) async fn launch(config: &EnsembleConfig) -> Result<Self, Error> {
        let cfg_path = write_instance_files(config).await?;
        let classpath = format!(
            "{install}/lib/*:{install}/*:{install}/conf",
            install = config.install_dir
        );

        let mut child = Command::new("java")
            .arg("-cp")
            .arg(classpath)
            .arg(QUORUM_PEER_MAIN)
            .arg(&cfg_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Io("error launching zookeeper", e))?;

        forward_output(&mut child);
        info!(config = %cfg_path.display(), "zookeeper launched");
        Ok(Self { child })
    }

    /// True while the child has not exited.
    pub(crate) fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kills the process and reaps it.
    pub(crate) async fn stop(mut self) {
        debug!("stopping zookeeper");
        if let Err(e) = self.child.start_kill() {
            warn!(error = %e, "error signalling zookeeper");
        }
        match self.child.wait().await {
            Ok(status) => info!(%status, "zookeeper stopped"),
            Err(e) => warn!(error = %e, "error reaping zookeeper"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EnsembleConfig {
        EnsembleConfig {
            install_dir: "/opt/zookeeper".to_string(),
            data_dir: "/var/lib/zookeeper".to_string(),
            log_index_dir: "/var/lib/warden/index".to_string(),
            servers_spec: "zk2:2,zk1:1".to_string(),
            hostname: "zk1".to_string(),
            ..EnsembleConfig::default()
        }
    }

    #[test]
    fn renders_server_lines_in_id_order() {
        let rendered = render_zoo_cfg(&config()).unwrap();

        assert!(rendered.contains("clientPort=2181"));
        assert!(rendered.contains("dataDir=/var/lib/zookeeper"));
        let zk1 = rendered.find("server.1=zk1:2888:3888").unwrap();
        let zk2 = rendered.find("server.2=zk2:2888:3888").unwrap();
        assert!(zk1 < zk2);
    }

    #[test]
    fn passthrough_overrides_defaults() {
        let mut cfg = config();
        cfg.zoo_cfg_extra
            .insert("tickTime".to_string(), "5000".to_string());
        cfg.zoo_cfg_extra
            .insert("autopurge.purgeInterval".to_string(), "1".to_string());

        let rendered = render_zoo_cfg(&cfg).unwrap();

        assert!(rendered.contains("tickTime=5000"));
        assert!(!rendered.contains("tickTime=2000"));
        assert!(rendered.contains("autopurge.purgeInterval=1"));
    }

    #[tokio::test]
    async fn instance_files_include_myid() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EnsembleConfig {
            install_dir: dir.path().join("install").to_string_lossy().into_owned(),
            data_dir: dir.path().join("data").to_string_lossy().into_owned(),
            ..config()
        };

        let cfg_path = write_instance_files(&cfg).await.unwrap();

        assert!(cfg_path.ends_with("conf/zoo.cfg"));
        let myid = std::fs::read_to_string(dir.path().join("data").join("myid")).unwrap();
        assert_eq!(myid.trim(), "1");
    }
}
