use std::sync::{Arc, Once, OnceLock, Weak};
use std::time::Duration;

use topo::protocol::{ConnectionPhase, DeviceConfig, DeviceIdentity, MemberAddress, MemberStatus, NegotiatedCapabilities, StatusSnapshot};
use parking_lot::Mutex;
use topo::runtime::fake::{FakeElection, FakeRegistrationSink, FakeSessionBuilder, FakeSessionController, RecordingNotifier, SessionCall};
use topo::runtime::{SessionError, StatusNotifier};
use topo::{Collaborators, Error, ManagerConfig, ReconnectPolicy, TopologyManager};

const SELF: &str = "member@10.0.0.5:2550";

fn init_tracing() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.try_init();
	});
}

struct Cluster {
	manager: TopologyManager,
	sessions: FakeSessionController,
	election: Arc<FakeElection>,
	sink: Arc<FakeRegistrationSink>,
	notifier: Arc<RecordingNotifier>,
}

impl Cluster {
	fn new(reconnect: ReconnectPolicy) -> Self {
		Self::with_session(reconnect, FakeSessionBuilder::new())
	}

	fn with_session(reconnect: ReconnectPolicy, session: FakeSessionBuilder) -> Self {
		init_tracing();
		let (session, sessions) = session.build();
		let election = Arc::new(FakeElection::new(MemberAddress::new(SELF)));
		let sink = Arc::new(FakeRegistrationSink::new());
		let notifier = Arc::new(RecordingNotifier::new());
		let manager = TopologyManager::new(
			ManagerConfig { reconnect },
			Collaborators {
				session,
				election: election.clone(),
				registrations: sink.clone(),
				notifier: notifier.clone(),
			},
		);
		Self {
			manager,
			sessions,
			election,
			sink,
			notifier,
		}
	}

	fn immediate() -> Self {
		Self::new(immediate_policy())
	}

	async fn wait_phase(&self, identity: &DeviceIdentity, phase: ConnectionPhase) -> Arc<StatusSnapshot> {
		tokio::time::timeout(Duration::from_secs(5), self.notifier.wait_for(identity, |s| s.phase == phase))
			.await
			.unwrap_or_else(|_| panic!("{identity} never reached {phase:?}"))
	}
}

fn immediate_policy() -> ReconnectPolicy {
	ReconnectPolicy {
		automatic: true,
		min_interval_ms: 0,
	}
}

fn router() -> (DeviceIdentity, DeviceConfig) {
	(DeviceIdentity::new("r1", "topology-netconf"), DeviceConfig::new("10.0.0.1", 830))
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
	let polled = tokio::time::timeout(Duration::from_secs(5), async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	});
	polled.await.unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn status_is_connecting_right_after_create() -> anyhow::Result<()> {
	let cluster = Cluster::immediate();
	let (id, config) = router();

	cluster.manager.create(id.clone(), config.clone())?;
	let status = cluster.manager.current_status(&id)?;

	assert_eq!(status.phase, ConnectionPhase::Connecting);
	assert_eq!(status.member_status(&MemberAddress::new(SELF)), Some(MemberStatus::Unavailable));
	assert_eq!((status.host.as_str(), status.port), ("10.0.0.1", 830));
	assert!(matches!(cluster.manager.create(id.clone(), config), Err(Error::DeviceExists(_))));
	assert_eq!(cluster.manager.devices(), vec![id]);
	Ok(())
}

#[tokio::test]
async fn owned_session_is_released_on_disconnect() -> anyhow::Result<()> {
	let cluster = Cluster::immediate();
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;

	let pending = cluster.sessions.next_connect().await.unwrap();
	let listener = pending.succeed(NegotiatedCapabilities::default().with_non_module(["base:1.0"]));
	let connected = cluster.wait_phase(&id, ConnectionPhase::Connected).await;
	assert_eq!(connected.capabilities.as_ref().unwrap().available.len(), 1);
	assert!(connected.capabilities.as_ref().unwrap().contains("base:1.0"));
	assert_eq!(connected.member_status(&MemberAddress::new(SELF)), Some(MemberStatus::Connected));

	assert!(cluster.election.grant(&id));
	eventually("registration", || cluster.sink.live(&id) == 1).await;

	listener.device_disconnected();
	cluster.wait_phase(&id, ConnectionPhase::Connecting).await;
	assert_eq!(cluster.sink.live(&id), 0);
	assert_eq!(cluster.sink.released(), 1);

	// Automatic reconnect issues a fresh connect.
	cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;
	Ok(())
}

#[tokio::test]
async fn superseded_connect_never_publishes() -> anyhow::Result<()> {
	let cluster = Cluster::immediate();
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;
	let stale = cluster.sessions.next_connect().await.unwrap();

	cluster.manager.update(&id, DeviceConfig::new("10.0.0.1", 2830))?;
	let fresh = cluster.sessions.next_connect().await.unwrap();
	assert_eq!(fresh.config.port, 2830);

	stale.succeed(NegotiatedCapabilities::default());
	fresh.fail(SessionError::connect("authentication failed"));

	let failed = cluster.wait_phase(&id, ConnectionPhase::UnableToConnect).await;
	assert_eq!(failed.connected_message.as_deref(), Some("authentication failed"));
	assert_eq!(failed.port, 2830);
	assert!(cluster.notifier.published(&id).iter().all(|s| s.phase != ConnectionPhase::Connected));
	assert!(!cluster.election.is_candidate(&id));
	Ok(())
}

#[tokio::test]
async fn repeated_became_owner_keeps_one_registration() -> anyhow::Result<()> {
	let cluster = Cluster::immediate();
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;
	let listener = cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;

	cluster.election.grant(&id);
	cluster.election.grant(&id);
	listener.device_failed(Some("transport closed".into()));
	cluster.wait_phase(&id, ConnectionPhase::UnableToConnect).await;

	assert_eq!(cluster.sink.registered(), 1);
	assert_eq!(cluster.sink.released(), 1);
	assert_eq!(cluster.sink.live(&id), 0);
	Ok(())
}

#[tokio::test]
async fn repeated_failure_publishes_once() -> anyhow::Result<()> {
	let cluster = Cluster::immediate();
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;
	let listener = cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;

	listener.device_failed(Some("boom".into()));
	let first = cluster.wait_phase(&id, ConnectionPhase::UnableToConnect).await;
	listener.device_failed(Some("boom".into()));
	cluster.manager.retry(&id)?;
	cluster.wait_phase(&id, ConnectionPhase::Connecting).await;

	let failures: Vec<_> = cluster.notifier.published(&id).into_iter().filter(|s| s.phase == ConnectionPhase::UnableToConnect).collect();
	assert_eq!(failures.len(), 1);
	assert_eq!(*failures[0], *first);
	assert_eq!(first.member_status(&MemberAddress::new(SELF)), Some(MemberStatus::Failed));
	Ok(())
}

#[tokio::test]
async fn delete_releases_once_and_ignores_later_ownership() -> anyhow::Result<()> {
	let cluster = Cluster::immediate();
	let (id, config) = router();
	cluster.manager.create(id.clone(), config.clone())?;
	cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;
	let ownership = cluster.election.listener(&id).unwrap();
	ownership.became_owner();
	eventually("registration", || cluster.sink.live(&id) == 1).await;

	cluster.manager.delete(&id).await?;
	assert_eq!(cluster.sink.live(&id), 0);
	assert_eq!(cluster.sink.released(), 1);
	assert!(!cluster.election.is_candidate(&id));
	assert!(matches!(cluster.manager.current_status(&id), Err(Error::UnknownDevice(_))));

	ownership.became_owner();
	tokio::task::yield_now().await;
	assert_eq!(cluster.sink.registered(), 1);

	cluster.manager.create(id.clone(), config)?;
	assert_eq!(cluster.manager.current_status(&id)?.phase, ConnectionPhase::Connecting);
	Ok(())
}

#[tokio::test]
async fn unknown_devices_are_rejected() {
	let cluster = Cluster::immediate();
	let (id, config) = router();

	assert!(matches!(cluster.manager.update(&id, config), Err(Error::UnknownDevice(_))));
	assert!(matches!(cluster.manager.retry(&id), Err(Error::UnknownDevice(_))));
	assert!(matches!(cluster.manager.delete(&id).await, Err(Error::UnknownDevice(_))));
	assert!(matches!(cluster.manager.current_status(&id), Err(Error::UnknownDevice(_))));
}

#[tokio::test]
async fn shutdown_tears_down_every_record() -> anyhow::Result<()> {
	let cluster = Cluster::immediate();
	let ids = [DeviceIdentity::new("r1", "t"), DeviceIdentity::new("r2", "t")];
	for id in &ids {
		cluster.manager.create(id.clone(), DeviceConfig::new("10.0.0.1", 830))?;
		cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
		cluster.wait_phase(id, ConnectionPhase::Connected).await;
		cluster.election.grant(id);
	}
	eventually("both registrations", || ids.iter().all(|id| cluster.sink.live(id) == 1)).await;

	cluster.manager.shutdown().await;

	assert!(cluster.manager.devices().is_empty());
	assert!(cluster.manager.store().is_empty());
	assert_eq!(cluster.sink.released(), 2);
	Ok(())
}

#[tokio::test]
async fn dropping_the_manager_releases_registrations() -> anyhow::Result<()> {
	let Cluster {
		manager,
		sessions,
		election,
		sink,
		notifier,
	} = Cluster::immediate();
	let (id, config) = router();
	manager.create(id.clone(), config)?;
	sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	tokio::time::timeout(Duration::from_secs(5), notifier.wait_for(&id, |s| s.phase == ConnectionPhase::Connected)).await?;
	election.grant(&id);
	eventually("registration", || sink.live(&id) == 1).await;

	drop(manager);
	eventually("release", || sink.live(&id) == 0).await;
	assert!(!election.is_candidate(&id));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_for_the_minimum_interval() -> anyhow::Result<()> {
	let cluster = Cluster::new(ReconnectPolicy::default());
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;
	let listener = cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;

	let disconnected_at = tokio::time::Instant::now();
	listener.device_disconnected();
	cluster.wait_phase(&id, ConnectionPhase::Connecting).await;

	let pending = cluster.sessions.next_connect().await.unwrap();
	assert!(disconnected_at.elapsed() >= Duration::from_secs(2));
	pending.succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;
	Ok(())
}

#[tokio::test]
async fn manual_reconnect_waits_for_retry() -> anyhow::Result<()> {
	let cluster = Cluster::new(ReconnectPolicy {
		automatic: false,
		min_interval_ms: 0,
	});
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;
	let listener = cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;

	listener.device_disconnected();
	cluster.wait_phase(&id, ConnectionPhase::Connecting).await;
	assert!(cluster.sessions.try_next_connect().is_none());

	cluster.manager.retry(&id)?;
	cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn recreate_after_delete_is_not_torn_down_by_the_old_close() -> anyhow::Result<()> {
	let cluster = Cluster::with_session(immediate_policy(), FakeSessionBuilder::new().disconnect_delay(Duration::from_millis(200)));
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;
	cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;

	cluster.manager.delete(&id).await?;
	assert_eq!(cluster.sessions.disconnects(), vec![id.clone()]);

	cluster.manager.create(id.clone(), DeviceConfig::new("10.0.0.1", 2830))?;
	cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;

	assert_eq!(
		cluster.sessions.calls(),
		vec![
			SessionCall::Connect { identity: id.clone(), port: 830 },
			SessionCall::Disconnect(id.clone()),
			SessionCall::Connect { identity: id.clone(), port: 2830 },
		]
	);
	assert_eq!(cluster.manager.current_status(&id)?.phase, ConnectionPhase::Connected);
	Ok(())
}

#[tokio::test]
async fn failed_close_is_never_reported() -> anyhow::Result<()> {
	let cluster = Cluster::with_session(immediate_policy(), FakeSessionBuilder::new().disconnect_error(SessionError::Closed));
	let (id, config) = router();
	cluster.manager.create(id.clone(), config)?;
	cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	cluster.wait_phase(&id, ConnectionPhase::Connected).await;
	cluster.election.grant(&id);
	eventually("registration", || cluster.sink.live(&id) == 1).await;

	cluster.manager.update(&id, DeviceConfig::new("10.0.0.1", 2830))?;
	cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	let reconnected = cluster.wait_phase(&id, ConnectionPhase::Connected).await;
	assert_eq!(reconnected.port, 2830);
	assert!(cluster.notifier.published(&id).iter().all(|s| s.phase != ConnectionPhase::UnableToConnect));

	cluster.manager.delete(&id).await?;
	assert_eq!(cluster.sessions.disconnects(), vec![id.clone(), id.clone()]);
	assert_eq!(cluster.sink.live(&id), 0);
	assert!(cluster.manager.store().is_empty());
	Ok(())
}

#[test]
fn dropping_the_runtime_releases_registrations() -> anyhow::Result<()> {
	let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
	let cluster = Cluster::immediate();
	let (id, config) = router();

	runtime.block_on(async {
		cluster.manager.create(id.clone(), config)?;
		cluster.sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
		cluster.wait_phase(&id, ConnectionPhase::Connected).await;
		cluster.election.grant(&id);
		eventually("registration", || cluster.sink.live(&id) == 1).await;
		anyhow::Ok(())
	})?;

	drop(runtime);
	assert_eq!(cluster.sink.live(&id), 0);
	assert_eq!(cluster.sink.released(), 1);
	assert!(!cluster.election.is_candidate(&id));
	Ok(())
}

/// Reads the manager back from inside `publish`.
#[derive(Default)]
struct ReentrantNotifier {
	manager: OnceLock<Weak<TopologyManager>>,
	seen: Mutex<Vec<(Vec<DeviceIdentity>, ConnectionPhase)>>,
}

impl StatusNotifier for ReentrantNotifier {
	fn publish(&self, identity: &DeviceIdentity, snapshot: Arc<StatusSnapshot>) {
		let Some(manager) = self.manager.get().and_then(Weak::upgrade) else {
			return;
		};
		let devices = manager.devices();
		let phase = manager.current_status(identity).map_or(snapshot.phase, |status| status.phase);
		self.seen.lock().push((devices, phase));
	}

	fn notify_status_changed(&self, _identity: &DeviceIdentity) {}
}

#[tokio::test]
async fn notifier_may_call_back_into_the_manager() -> anyhow::Result<()> {
	init_tracing();
	let (session, sessions) = FakeSessionBuilder::new().build();
	let notifier = Arc::new(ReentrantNotifier::default());
	let manager = Arc::new(TopologyManager::new(
		ManagerConfig { reconnect: immediate_policy() },
		Collaborators {
			session,
			election: Arc::new(FakeElection::new(MemberAddress::new(SELF))),
			registrations: Arc::new(FakeRegistrationSink::new()),
			notifier: notifier.clone(),
		},
	));
	let _ = notifier.manager.set(Arc::downgrade(&manager));
	let (id, config) = router();

	manager.create(id.clone(), config)?;
	assert_eq!(*notifier.seen.lock(), vec![(vec![id.clone()], ConnectionPhase::Connecting)]);

	sessions.next_connect().await.unwrap().succeed(NegotiatedCapabilities::default());
	eventually("connected", || notifier.seen.lock().len() == 2).await;
	assert_eq!(notifier.seen.lock()[1], (vec![id.clone()], ConnectionPhase::Connected));

	manager.delete(&id).await?;
	Ok(())
}
