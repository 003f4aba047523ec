//! Coordinates applying a new ensemble configuration across members, either
//! atomically or as a staged rolling rollout with cancel/rollback support.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod member;
mod state;

pub use error::Error;
pub use member::{MemberClient, MemberError};
pub use state::{MemberApplyStatus, MemberProgress, RollingState, RolloutStatus};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_config::{
    ConfigStore, EnsembleConfig, ServerList, ServerSpec, VersionedConfig, ensemble_level_change,
};

/// Outcome of an atomic apply: the new version plus any members the push did
/// not reach.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    /// Version assigned by the configuration store.
    pub version: u64,
    /// Members that did not acknowledge the push.
    pub failed: Vec<FailedMember>,
}

impl ApplyReport {
    /// True when every member acknowledged.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One member that failed during an atomic apply.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMember {
    /// Member hostname.
    pub hostname: String,
    /// Failure detail.
    pub message: String,
}

/// Options for constructing a [`RolloutCoordinator`].
pub struct RolloutCoordinatorOptions {
    /// The versioned configuration store.
    pub config_store: Arc<ConfigStore>,
    /// Client used to reach individual members.
    pub members: Arc<dyn MemberClient>,
    /// How long a restarted member gets to rejoin the quorum before the
    /// rollout halts.
    pub rejoin_timeout: Duration,
}

struct Shared {
    rolling: RollingState,
    prior: Option<VersionedConfig>,
    cancel: Option<CancellationToken>,
}

struct Inner {
    config_store: Arc<ConfigStore>,
    members: Arc<dyn MemberClient>,
    rejoin_timeout: Duration,
    state: RwLock<Shared>,
}

/// Serializes configuration rollouts for one ensemble.
///
/// Only one rollout may be active at a time; concurrent requests are
/// rejected with [`Error::RolloutInProgress`], never queued.
#[derive(Clone)]
pub struct RolloutCoordinator {
    inner: Arc<Inner>,
}

impl RolloutCoordinator {
    /// Creates a new coordinator in the idle state.
    #[must_use]
    pub fn new(
        RolloutCoordinatorOptions {
            config_store,
            members,
            rejoin_timeout,
        }: RolloutCoordinatorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config_store,
                members,
                rejoin_timeout,
                state: RwLock::new(Shared {
                    rolling: RollingState::idle(),
                    prior: None,
                    cancel: None,
                }),
            }),
        }
    }

    /// Returns a snapshot of the rollout state.
    pub async fn state(&self) -> RollingState {
        self.inner.state.read().await.rolling.clone()
    }

    /// Validates and stores the configuration, then pushes it to every
    /// member in parallel. Member failures do not roll the write back; they
    /// are surfaced in the report for the operator.
    ///
    /// # Errors
    ///
    /// [`Error::RolloutInProgress`] while a rolling rollout is active;
    /// otherwise validation/conflict errors from the store.
    pub async fn apply_at_once(
        &self,
        expected_version: u64,
        new: EnsembleConfig,
    ) -> Result<ApplyReport, Error> {
        if self.inner.state.read().await.rolling.status.is_active() {
            return Err(Error::RolloutInProgress);
        }

        let servers = new.server_list()?;
        let version = self
            .inner
            .config_store
            .compare_and_set(expected_version, new.clone())
            .await?;
        let target = VersionedConfig {
            version,
            config: new,
        };

        let pushes = servers.specs().iter().map(|spec| {
            let target = &target;
            async move {
                let result = self.inner.members.push_config(spec, target).await;
                (spec.hostname.clone(), result)
            }
        });
        let failed = futures::future::join_all(pushes)
            .await
            .into_iter()
            .filter_map(|(hostname, result)| {
                result.err().map(|e| FailedMember {
                    hostname,
                    message: e.to_string(),
                })
            })
            .collect::<Vec<_>>();

        if failed.is_empty() {
            info!(version, "configuration applied to all members");
        } else {
            warn!(
                version,
                failed = failed.len(),
                "configuration stored but some members did not acknowledge"
            );
        }
        Ok(ApplyReport { version, failed })
    }

    /// Starts a rolling rollout and returns immediately; progress is
    /// observed via [`state`](Self::state).
    ///
    /// Member-local changes (nothing ensemble-level differs) skip staging
    /// entirely and are applied at once.
    ///
    /// # Errors
    ///
    /// [`Error::RolloutInProgress`] while another rollout is active;
    /// otherwise validation/conflict errors from the store.
    pub async fn apply_rolling(
        &self,
        expected_version: u64,
        new: EnsembleConfig,
    ) -> Result<(), Error> {
        let prior = self.inner.config_store.get().await;

        if !ensemble_level_change(&prior.config, &new) {
            let report = self.apply_at_once(expected_version, new).await?;
            let mut shared = self.inner.state.write().await;
            shared.rolling = RollingState::idle();
            shared.rolling.status = RolloutStatus::Committed;
            shared.rolling.percent_done = 100;
            shared.rolling.target_version = Some(report.version);
            shared.rolling.message = "change was member-local; applied without staging".to_string();
            return Ok(());
        }

        let servers = new.server_list()?;

        let mut shared = self.inner.state.write().await;
        if shared.rolling.status.is_active() {
            return Err(Error::RolloutInProgress);
        }

        let version = self
            .inner
            .config_store
            .compare_and_set(expected_version, new.clone())
            .await?;
        let target = VersionedConfig {
            version,
            config: new,
        };

        let token = CancellationToken::new();
        shared.rolling = RollingState::starting(version, &servers);
        shared.prior = Some(prior);
        shared.cancel = Some(token.clone());
        drop(shared);

        info!(version, members = servers.len(), "rolling rollout started");

        let this = self.clone();
        tokio::spawn(async move {
            this.run_rolling(target, servers, token).await;
        });
        Ok(())
    }

    /// Cancels an active rollout.
    ///
    /// With `force_commit` the remaining members are marked (and nudged)
    /// onto the target configuration and the rollout ends `committed`.
    /// Without it, members already updated are reverted best-effort, the
    /// prior configuration is restored in the store under a fresh version,
    /// and the rollout ends `rolled_back`.
    ///
    /// # Errors
    ///
    /// [`Error::NoActiveRollout`] when nothing is in progress.
    pub async fn cancel(&self, force_commit: bool) -> Result<RolloutStatus, Error> {
        let (members_snapshot, prior) = {
            let mut shared = self.inner.state.write().await;
            if !shared.rolling.status.is_active() {
                return Err(Error::NoActiveRollout);
            }
            if let Some(token) = shared.cancel.take() {
                token.cancel();
            }
            shared.rolling.status = RolloutStatus::Committing;
            shared.rolling.halted = false;
            shared.rolling.message = if force_commit {
                "force-committing remaining members".to_string()
            } else {
                "rolling back updated members".to_string()
            };
            (shared.rolling.members.clone(), shared.prior.take())
        };

        let current = self.inner.config_store.get().await;

        if force_commit {
            for progress in members_snapshot
                .iter()
                .filter(|m| m.status != MemberApplyStatus::Done)
            {
                let spec = ServerSpec {
                    server_id: progress.server_id,
                    hostname: progress.hostname.clone(),
                };
                if let Err(e) = self.inner.members.push_config(&spec, &current).await {
                    warn!(hostname = %spec.hostname, error = %e, "force-commit push failed");
                }
            }

            let mut shared = self.inner.state.write().await;
            for member in &mut shared.rolling.members {
                member.status = MemberApplyStatus::Done;
                member.error = None;
            }
            shared.rolling.status = RolloutStatus::Committed;
            shared.rolling.percent_done = 100;
            shared.rolling.message = "rollout force-committed".to_string();
            info!("rollout force-committed");
            return Ok(RolloutStatus::Committed);
        }

        if let Some(prior) = prior {
            let restored_version = self
                .inner
                .config_store
                .compare_and_set(current.version, prior.config.clone())
                .await?;
            let restored = VersionedConfig {
                version: restored_version,
                config: prior.config,
            };
            for progress in members_snapshot
                .iter()
                .filter(|m| m.status == MemberApplyStatus::Done)
            {
                let spec = ServerSpec {
                    server_id: progress.server_id,
                    hostname: progress.hostname.clone(),
                };
                if let Err(e) = self.inner.members.push_config(&spec, &restored).await {
                    warn!(hostname = %spec.hostname, error = %e, "rollback push failed");
                }
            }
        }

        let mut shared = self.inner.state.write().await;
        for member in &mut shared.rolling.members {
            member.status = MemberApplyStatus::Pending;
            member.error = None;
        }
        shared.rolling.status = RolloutStatus::RolledBack;
        shared.rolling.percent_done = 0;
        shared.rolling.message = "rollout rolled back".to_string();
        info!("rollout rolled back");
        Ok(RolloutStatus::RolledBack)
    }

    async fn apply_member(
        &self,
        member: &ServerSpec,
        target: &VersionedConfig,
    ) -> Result<(), MemberError> {
        self.inner.members.push_config(member, target).await?;
        self.inner.members.restart(member).await?;
        self.inner
            .members
            .await_rejoin(member, self.inner.rejoin_timeout)
            .await
    }

    async fn run_rolling(
        &self,
        target: VersionedConfig,
        servers: ServerList,
        cancel: CancellationToken,
    ) {
        for member in servers.specs() {
            {
                let mut shared = self.inner.state.write().await;
                if cancel.is_cancelled() {
                    return;
                }
                if let Some(m) = shared.rolling.member_mut(&member.hostname) {
                    m.status = MemberApplyStatus::Applying;
                }
                shared.rolling.message = format!("applying to {}", member.hostname);
            }

            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = self.apply_member(member, &target) => result,
            };

            let mut shared = self.inner.state.write().await;
            if cancel.is_cancelled() {
                return;
            }
            match result {
                Ok(()) => {
                    if let Some(m) = shared.rolling.member_mut(&member.hostname) {
                        m.status = MemberApplyStatus::Done;
                    }
                    shared.rolling.recompute_percent();
                    shared.rolling.message = format!(
                        "{} rejoined ({}% done)",
                        member.hostname, shared.rolling.percent_done
                    );
                    info!(hostname = %member.hostname, percent = shared.rolling.percent_done, "member updated");
                }
                Err(e) => {
                    if let Some(m) = shared.rolling.member_mut(&member.hostname) {
                        m.status = MemberApplyStatus::Failed;
                        m.error = Some(e.to_string());
                    }
                    shared.rolling.halted = true;
                    shared.rolling.message = format!(
                        "halted at {}: {e}; rollback or force-commit required",
                        member.hostname
                    );
                    warn!(hostname = %member.hostname, error = %e, "rolling rollout halted");
                    return;
                }
            }
        }

        let mut shared = self.inner.state.write().await;
        if cancel.is_cancelled() {
            return;
        }
        shared.rolling.status = RolloutStatus::Committed;
        shared.rolling.percent_done = 100;
        shared.rolling.message = "rollout committed".to_string();
        shared.prior = None;
        shared.cancel = None;
        info!("rolling rollout committed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::time::{Duration as TokioDuration, sleep, timeout};
    use warden_config::MemoryConfigPersistence;

    #[derive(Default)]
    struct MockMembers {
        log: Mutex<Vec<String>>,
        fail_push: Mutex<HashSet<String>>,
        fail_rejoin: Mutex<HashSet<String>>,
        hold_rejoin: Mutex<HashMap<String, Arc<Notify>>>,
    }

    impl MockMembers {
        fn log_call(&self, call: String) {
            self.log.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn hold_rejoin_of(&self, hostname: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.hold_rejoin
                .lock()
                .unwrap()
                .insert(hostname.to_string(), gate.clone());
            gate
        }
    }

    #[async_trait]
    impl MemberClient for Arc<MockMembers> {
        async fn push_config(
            &self,
            member: &ServerSpec,
            config: &VersionedConfig,
        ) -> Result<(), MemberError> {
            self.log_call(format!("push:{}:v{}", member.hostname, config.version));
            if self.fail_push.lock().unwrap().contains(&member.hostname) {
                return Err(MemberError::unreachable(&member.hostname, "push refused"));
            }
            Ok(())
        }

        async fn restart(&self, member: &ServerSpec) -> Result<(), MemberError> {
            self.log_call(format!("restart:{}", member.hostname));
            Ok(())
        }

        async fn await_rejoin(
            &self,
            member: &ServerSpec,
            _timeout: Duration,
        ) -> Result<(), MemberError> {
            self.log_call(format!("rejoin:{}", member.hostname));
            let gate = self.hold_rejoin.lock().unwrap().get(&member.hostname).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_rejoin.lock().unwrap().contains(&member.hostname) {
                return Err(MemberError::unreachable(&member.hostname, "rejoin timed out"));
            }
            Ok(())
        }
    }

    fn base_config() -> EnsembleConfig {
        EnsembleConfig {
            install_dir: "/opt/zookeeper".to_string(),
            data_dir: "/var/lib/zookeeper".to_string(),
            log_index_dir: "/var/lib/warden/index".to_string(),
            servers_spec: "zk1:1,zk2:2,zk3:3".to_string(),
            hostname: "zk1".to_string(),
            ..EnsembleConfig::default()
        }
    }

    async fn setup() -> (RolloutCoordinator, Arc<MockMembers>, Arc<ConfigStore>) {
        let store = Arc::new(
            ConfigStore::open(Arc::new(MemoryConfigPersistence::new()), base_config())
                .await
                .unwrap(),
        );
        let members = Arc::new(MockMembers::default());
        let coordinator = RolloutCoordinator::new(RolloutCoordinatorOptions {
            config_store: store.clone(),
            members: Arc::new(members.clone()),
            rejoin_timeout: Duration::from_secs(5),
        });
        (coordinator, members, store)
    }

    async fn wait_for<F>(coordinator: &RolloutCoordinator, predicate: F) -> RollingState
    where
        F: Fn(&RollingState) -> bool,
    {
        timeout(TokioDuration::from_secs(5), async {
            loop {
                let state = coordinator.state().await;
                if predicate(&state) {
                    return state;
                }
                sleep(TokioDuration::from_millis(5)).await;
            }
        })
        .await
        .expect("state never reached")
    }

    fn port_change() -> EnsembleConfig {
        EnsembleConfig {
            client_port: 2182,
            ..base_config()
        }
    }

    #[tokio::test]
    async fn rolling_walks_members_ascending_and_commits() {
        let (coordinator, members, store) = setup().await;

        coordinator.apply_rolling(1, port_change()).await.unwrap();
        let state =
            wait_for(&coordinator, |s| s.status == RolloutStatus::Committed).await;

        assert_eq!(state.percent_done, 100);
        assert_eq!(store.get().await.version, 2);

        let calls = members.calls();
        let rejoins: Vec<_> = calls.iter().filter(|c| c.starts_with("rejoin")).collect();
        assert_eq!(rejoins, vec!["rejoin:zk1", "rejoin:zk2", "rejoin:zk3"]);
    }

    #[tokio::test]
    async fn member_failure_halts_at_floor_percent() {
        let (coordinator, members, _) = setup().await;
        members.fail_rejoin.lock().unwrap().insert("zk2".to_string());

        coordinator.apply_rolling(1, port_change()).await.unwrap();
        let state = wait_for(&coordinator, |s| s.halted).await;

        assert_eq!(state.status, RolloutStatus::RollingOut);
        assert_eq!(state.percent_done, 33);
        assert_eq!(state.members[1].status, MemberApplyStatus::Failed);
        assert_eq!(state.members[2].status, MemberApplyStatus::Pending);
        // zk3 was never touched
        assert!(!members.calls().iter().any(|c| c == "push:zk3:v2"));
    }

    #[tokio::test]
    async fn concurrent_rollouts_are_rejected_not_queued() {
        let (coordinator, members, _) = setup().await;
        let gate = members.hold_rejoin_of("zk1");

        coordinator.apply_rolling(1, port_change()).await.unwrap();
        wait_for(&coordinator, |s| s.status == RolloutStatus::RollingOut).await;

        assert!(matches!(
            coordinator.apply_rolling(2, port_change()).await,
            Err(Error::RolloutInProgress)
        ));
        assert!(matches!(
            coordinator.apply_at_once(2, port_change()).await,
            Err(Error::RolloutInProgress)
        ));

        gate.notify_waiters();
        gate.notify_one();
        wait_for(&coordinator, |s| s.status == RolloutStatus::Committed).await;
    }

    #[tokio::test]
    async fn cancel_rollback_restores_prior_config() {
        let (coordinator, members, store) = setup().await;
        let _gate = members.hold_rejoin_of("zk2");

        coordinator.apply_rolling(1, port_change()).await.unwrap();
        wait_for(&coordinator, |s| {
            s.members.first().is_some_and(|m| m.status == MemberApplyStatus::Done)
        })
        .await;

        let status = coordinator.cancel(false).await.unwrap();
        assert_eq!(status, RolloutStatus::RolledBack);

        let current = store.get().await;
        assert_eq!(current.version, 3);
        assert_eq!(current.config.client_port, 2181);
        // zk1 had completed, so it was pushed the restored config
        assert!(members.calls().iter().any(|c| c == "push:zk1:v3"));
    }

    #[tokio::test]
    async fn cancel_force_commit_converges_remaining_members() {
        let (coordinator, members, store) = setup().await;
        let _gate = members.hold_rejoin_of("zk2");

        coordinator.apply_rolling(1, port_change()).await.unwrap();
        wait_for(&coordinator, |s| {
            s.members.first().is_some_and(|m| m.status == MemberApplyStatus::Done)
        })
        .await;

        let status = coordinator.cancel(true).await.unwrap();
        assert_eq!(status, RolloutStatus::Committed);

        let state = coordinator.state().await;
        assert_eq!(state.percent_done, 100);
        assert!(state.members.iter().all(|m| m.status == MemberApplyStatus::Done));
        assert_eq!(store.get().await.config.client_port, 2182);
        // remaining members were nudged onto the stored target
        assert!(members.calls().iter().any(|c| c == "push:zk2:v2"));
        assert!(members.calls().iter().any(|c| c == "push:zk3:v2"));
    }

    #[tokio::test]
    async fn halted_rollout_accepts_force_commit() {
        let (coordinator, members, _) = setup().await;
        members.fail_rejoin.lock().unwrap().insert("zk2".to_string());

        coordinator.apply_rolling(1, port_change()).await.unwrap();
        wait_for(&coordinator, |s| s.halted).await;

        let status = coordinator.cancel(true).await.unwrap();
        assert_eq!(status, RolloutStatus::Committed);
    }

    #[tokio::test]
    async fn at_once_reports_partial_failure() {
        let (coordinator, members, store) = setup().await;
        members.fail_push.lock().unwrap().insert("zk3".to_string());

        let report = coordinator.apply_at_once(1, port_change()).await.unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].hostname, "zk3");
        assert_eq!(store.get().await.version, 2);
        assert_eq!(coordinator.state().await.status, RolloutStatus::Idle);
    }

    #[tokio::test]
    async fn member_local_rolling_change_applies_without_staging() {
        let (coordinator, members, store) = setup().await;

        let change = EnsembleConfig {
            check_ms: 5_000,
            ..base_config()
        };
        coordinator.apply_rolling(1, change).await.unwrap();

        let state = coordinator.state().await;
        assert_eq!(state.status, RolloutStatus::Committed);
        assert_eq!(store.get().await.config.check_ms, 5_000);
        assert!(!members.calls().iter().any(|c| c.starts_with("restart")));
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let (coordinator, _, _) = setup().await;

        coordinator.apply_at_once(1, port_change()).await.unwrap();
        let result = coordinator.apply_at_once(1, port_change()).await;

        assert!(matches!(
            result,
            Err(Error::Config(warden_config::Error::Conflict { .. }))
        ));
    }
}
