//! End-to-end pool manager scenarios: state swaps, node retirement, and
//! resurrection cadence, driven through mock conduits and a channel-backed
//! config source.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use tidepool_client::{
    ClientError, ClusterPool, Conduit, ConduitFactory, ConfigSource, ConfigUpdate, PlainCredentials,
    PoolSettings,
};
use tidepool_cluster::{
    ClusterConfig, NodeConfig, NodeEndpoint, NodeLocator, NodePorts, NodeStatus, VBucketServerMap,
};

/// Observable side of one mock conduit.
#[derive(Clone)]
struct ConduitProbe {
    endpoint: String,
    ping_ok: Arc<AtomicBool>,
    pings: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

struct MockConduit {
    probe: ConduitProbe,
}

#[async_trait]
impl Conduit for MockConduit {
    async fn ping(&self) -> bool {
        self.probe.pings.fetch_add(1, Ordering::SeqCst);
        self.probe.ping_ok.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Conduit factory that records every conduit it ever opened.
#[derive(Clone, Default)]
struct MockConduits {
    probes: Arc<Mutex<Vec<ConduitProbe>>>,
    auth_seen: Arc<Mutex<Vec<Option<PlainCredentials>>>>,
}

impl MockConduits {
    fn probes(&self) -> Vec<ConduitProbe> {
        self.probes.lock().clone()
    }

    fn probe_for(&self, endpoint: &str) -> ConduitProbe {
        self.probes
            .lock()
            .iter()
            .rev()
            .find(|p| p.endpoint == endpoint)
            .unwrap_or_else(|| panic!("no conduit opened for {endpoint}"))
            .clone()
    }
}

impl ConduitFactory for MockConduits {
    fn open(
        &self,
        endpoint: &NodeEndpoint,
        auth: Option<&PlainCredentials>,
        _connect_timeout: Duration,
    ) -> Box<dyn Conduit> {
        let probe = ConduitProbe {
            endpoint: endpoint.to_string(),
            ping_ok: Arc::new(AtomicBool::new(true)),
            pings: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        };
        self.probes.lock().push(probe.clone());
        self.auth_seen.lock().push(auth.cloned());
        Box::new(MockConduit { probe })
    }
}

/// A config source backed by a plain channel.
struct ChannelSource {
    rx: Option<mpsc::Receiver<ConfigUpdate>>,
    stopped: Arc<AtomicBool>,
}

impl ChannelSource {
    fn new() -> (Self, mpsc::Sender<ConfigUpdate>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(8);
        let stopped = Arc::new(AtomicBool::new(false));
        (
            Self {
                rx: Some(rx),
                stopped: stopped.clone(),
            },
            tx,
            stopped,
        )
    }
}

#[async_trait]
impl ConfigSource for ChannelSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<ConfigUpdate>, ClientError> {
        self.rx
            .take()
            .ok_or_else(|| ClientError::InvalidConfiguration("source already started".into()))
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn settings() -> PoolSettings {
    PoolSettings {
        pool_urls: vec!["http://cfg1:8091/pools".to_owned()],
        dead_timeout: Duration::from_millis(500),
        ..PoolSettings::default()
    }
}

fn classic_config(hosts: &[&str]) -> ClusterConfig {
    ClusterConfig {
        nodes: hosts
            .iter()
            .map(|host| NodeConfig {
                hostname: (*host).to_owned(),
                ports: NodePorts {
                    proxy: 11210,
                    direct: 11211,
                },
                status: NodeStatus::Healthy,
            })
            .collect(),
        v_bucket_server_map: None,
    }
}

fn vbucket_config() -> ClusterConfig {
    ClusterConfig {
        nodes: Vec::new(),
        v_bucket_server_map: Some(VBucketServerMap {
            hash_algorithm: "CRC".to_owned(),
            server_list: vec![
                "s0:11210".to_owned(),
                "s1:11210".to_owned(),
                "s2:11210".to_owned(),
            ],
            v_bucket_map: vec![vec![0, 1], vec![1, 2], vec![2, 0], vec![0, 2]],
            v_bucket_map_forward: None,
        }),
    }
}

/// Like [`vbucket_config`], but mid-rebalance: the snapshot carries a
/// pending map that moves bucket 2 from s2 to s0.
fn vbucket_config_with_forward() -> ClusterConfig {
    let mut config = vbucket_config();
    config.v_bucket_server_map.as_mut().unwrap().v_bucket_map_forward =
        Some(vec![vec![1, 0], vec![2, 1], vec![0, 2], vec![1, 2]]);
    config
}

/// Lets the spawned driver task drain its channels.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn start_fails_without_pool_urls() {
    let (source, _tx, _stopped) = ChannelSource::new();
    let err = ClusterPool::start(
        PoolSettings::default(),
        Arc::new(MockConduits::default()),
        source,
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "At least 1 pool url must be specified.");
}

#[tokio::test]
async fn start_fails_when_the_stream_closes_early() {
    let (source, tx, stopped) = ChannelSource::new();
    drop(tx);
    let err = ClusterPool::start(settings(), Arc::new(MockConduits::default()), source)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ConfigStreamClosed));
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn start_surfaces_a_malformed_first_snapshot() {
    let (source, tx, _stopped) = ChannelSource::new();
    let mut bad = vbucket_config();
    // three buckets is not a power of two
    bad.v_bucket_server_map
        .as_mut()
        .unwrap()
        .v_bucket_map
        .truncate(3);
    tx.send(Some(bad)).await.unwrap();

    let err = ClusterPool::start(settings(), Arc::new(MockConduits::default()), source)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Topology(_)));
}

#[tokio::test]
async fn classic_config_routes_keys() {
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1", "10.2.2.2", "10.2.2.3"])))
        .await
        .unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(MockConduits::default()), source)
        .await
        .unwrap();

    assert_eq!(pool.working_nodes().len(), 3);

    // stable: the same key keeps hitting the same node
    let first = pool.locate(b"k7").unwrap();
    for _ in 0..5 {
        assert!(Arc::ptr_eq(&first, &pool.locate(b"k7").unwrap()));
    }
    assert_eq!(first.endpoint().to_string(), "10.2.2.2:11211");

    pool.shutdown().await;
}

#[tokio::test]
async fn config_swap_retires_every_previous_handle() {
    let conduits = MockConduits::default();
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1", "10.2.2.2", "10.2.2.3"])))
        .await
        .unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(conduits.clone()), source)
        .await
        .unwrap();

    let old_state = pool.state();
    let old_ptrs: Vec<_> = old_state.nodes().iter().map(Arc::as_ptr).collect();
    assert_eq!(old_ptrs.len(), 3);

    // the new membership shares the 10.2.2.1 endpoint
    tx.send(Some(classic_config(&["10.2.2.1", "10.2.2.4"])))
        .await
        .unwrap();
    settle().await;

    let new_state = pool.state();
    assert_eq!(new_state.nodes().len(), 2);

    // fresh handles even for the surviving endpoint
    for node in new_state.nodes() {
        assert!(!old_ptrs.contains(&Arc::as_ptr(node)));
    }

    // every previous conduit saw exactly one shutdown; the two new ones none
    let probes = conduits.probes();
    assert_eq!(probes.len(), 5);
    for probe in &probes[..3] {
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1, "{}", probe.endpoint);
    }
    for probe in &probes[3..] {
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 0, "{}", probe.endpoint);
    }

    // a reader still holding the old snapshot keeps a consistent view
    assert_eq!(old_state.nodes().len(), 3);

    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn resurrection_probes_all_dead_nodes_in_one_pass() {
    let conduits = MockConduits::default();
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1", "10.2.2.2", "10.2.2.3"])))
        .await
        .unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(conduits.clone()), source)
        .await
        .unwrap();
    settle().await;

    let a = conduits.probe_for("10.2.2.1:11211");
    let b = conduits.probe_for("10.2.2.2:11211");

    // two nodes die 10 ms apart
    let state = pool.state();
    state.nodes()[0].report_failure();
    settle().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    state.nodes()[1].report_failure();
    settle().await;

    assert_eq!(pool.working_nodes().len(), 1);

    // one pass at ~T1 + 500 ms covers both
    tokio::time::sleep(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(a.pings.load(Ordering::SeqCst), 1);
    assert_eq!(b.pings.load(Ordering::SeqCst), 1);
    assert_eq!(pool.working_nodes().len(), 3);

    // both recovered, so the timer is at rest: no further probes
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(a.pings.load(Ordering::SeqCst), 1);
    assert_eq!(b.pings.load(Ordering::SeqCst), 1);

    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_probes_rearm_until_recovery() {
    let conduits = MockConduits::default();
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1", "10.2.2.2"])))
        .await
        .unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(conduits.clone()), source)
        .await
        .unwrap();
    settle().await;

    let probe = conduits.probe_for("10.2.2.1:11211");
    probe.ping_ok.store(false, Ordering::SeqCst);

    pool.state().nodes()[0].report_failure();
    settle().await;

    // each pass fails and rearms, one pass per dead_timeout
    tokio::time::sleep(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(probe.pings.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(probe.pings.load(Ordering::SeqCst), 2);
    assert_eq!(pool.working_nodes().len(), 1);

    // the node comes back; the next pass resurrects it and the timer rests
    probe.ping_ok.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(probe.pings.load(Ordering::SeqCst), 3);
    assert_eq!(pool.working_nodes().len(), 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(probe.pings.load(Ordering::SeqCst), 3);

    pool.shutdown().await;
}

#[tokio::test]
async fn a_fully_dead_membership_is_no_route() {
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1"]))).await.unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(MockConduits::default()), source)
        .await
        .unwrap();

    pool.state().nodes()[0].report_failure();
    assert!(matches!(pool.locate(b"k7"), Err(ClientError::NoRoute)));
    assert!(pool.working_nodes().is_empty());

    pool.shutdown().await;
}

#[tokio::test]
async fn vbucket_routing_stamps_the_bucket_index() {
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(vbucket_config())).await.unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(MockConduits::default()), source)
        .await
        .unwrap();

    // crc("counter") → bucket 2 → master s2
    let routed = pool.operation_factory().route(b"counter").unwrap();
    assert_eq!(routed.vbucket, Some(2));
    assert_eq!(routed.node.endpoint().to_string(), "s2:11210");

    let replicas = pool.operation_factory().replicas(b"counter");
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].node.endpoint().to_string(), "s0:11210");
    assert_eq!(replicas[0].vbucket, Some(2));

    // server-list order is preserved in the state
    let labels: Vec<_> = pool
        .state()
        .nodes()
        .iter()
        .map(|n| n.endpoint().to_string())
        .collect();
    assert_eq!(labels, ["s0:11210", "s1:11210", "s2:11210"]);

    pool.shutdown().await;
}

#[tokio::test]
async fn a_forward_map_builds_the_pending_locator() {
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(vbucket_config_with_forward())).await.unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(MockConduits::default()), source)
        .await
        .unwrap();

    // the live map still routes bucket 2 to s2
    assert_eq!(
        pool.locate(b"counter").unwrap().endpoint().to_string(),
        "s2:11210"
    );

    // the pending map is wired into the state and already points at s0
    let state = pool.state();
    let forward = state.forward_locator().expect("forward locator");
    assert_eq!(forward.vbucket_of(b"counter"), 2);
    assert_eq!(
        forward.locate(b"counter").unwrap().endpoint().to_string(),
        "s0:11210"
    );
    assert_eq!(
        forward
            .locate_by_vbucket(2)
            .unwrap()
            .endpoint()
            .to_string(),
        "s0:11210"
    );

    // both locators share the state's node handles
    assert!(Arc::ptr_eq(
        &forward.locate(b"counter").unwrap(),
        &state.nodes()[0]
    ));

    pool.shutdown().await;
}

#[tokio::test]
async fn a_malformed_snapshot_after_start_keeps_the_state_and_leaks_nothing() {
    let conduits = MockConduits::default();
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(vbucket_config())).await.unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(conduits.clone()), source)
        .await
        .unwrap();
    let live = conduits.probes();
    assert_eq!(live.len(), 3);

    // a later snapshot whose forward map is broken (three rows is not a
    // power of two) is rejected in full
    let mut bad = vbucket_config();
    bad.v_bucket_server_map.as_mut().unwrap().v_bucket_map_forward =
        Some(vec![vec![0], vec![1], vec![2]]);
    tx.send(Some(bad)).await.unwrap();
    settle().await;

    // the previous state still serves
    assert_eq!(
        pool.locate(b"counter").unwrap().endpoint().to_string(),
        "s2:11210"
    );
    for probe in &live {
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 0, "{}", probe.endpoint);
    }

    // and the rejected snapshot cost nothing: any conduit opened for it
    // has been closed again
    for probe in &conduits.probes()[live.len()..] {
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1, "{}", probe.endpoint);
    }

    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failures_from_retired_handles_never_arm_the_timer() {
    let conduits = MockConduits::default();
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1"]))).await.unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(conduits.clone()), source)
        .await
        .unwrap();

    let old = pool.state().nodes()[0].clone();
    tx.send(Some(classic_config(&["10.2.2.4"]))).await.unwrap();
    settle().await;

    // the retired handle still takes failure reports, but they go nowhere
    old.report_failure();
    settle().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    for probe in conduits.probes() {
        assert_eq!(probe.pings.load(Ordering::SeqCst), 0, "{}", probe.endpoint);
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn a_none_update_empties_the_pool() {
    let conduits = MockConduits::default();
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1"]))).await.unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(conduits.clone()), source)
        .await
        .unwrap();

    tx.send(None).await.unwrap();
    settle().await;

    assert!(matches!(pool.locate(b"k7"), Err(ClientError::NoRoute)));
    assert!(pool.state().nodes().is_empty());
    assert_eq!(
        conduits.probe_for("10.2.2.1:11211").shutdowns.load(Ordering::SeqCst),
        1
    );

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_retires_nodes_and_stops_the_source() {
    let conduits = MockConduits::default();
    let (source, tx, stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1", "10.2.2.2"])))
        .await
        .unwrap();

    let pool = ClusterPool::start(settings(), Arc::new(conduits.clone()), source)
        .await
        .unwrap();
    pool.shutdown().await;

    assert!(stopped.load(Ordering::SeqCst));
    for probe in conduits.probes() {
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1, "{}", probe.endpoint);
    }
}

#[tokio::test]
async fn named_buckets_authenticate_with_plain_credentials() {
    let conduits = MockConduits::default();
    let (source, tx, _stopped) = ChannelSource::new();
    tx.send(Some(classic_config(&["10.2.2.1"]))).await.unwrap();

    let pool = ClusterPool::start(
        PoolSettings {
            bucket: Some("sessions".to_owned()),
            ..settings()
        },
        Arc::new(conduits.clone()),
        source,
    )
    .await
    .unwrap();

    let auth = conduits.auth_seen.lock().clone();
    assert_eq!(auth.len(), 1);
    let creds = auth[0].as_ref().unwrap();
    assert_eq!(creds.username(), "sessions");
    // no password anywhere: the bucket name is the fallback secret
    assert_eq!(creds.password(), "sessions");

    pool.shutdown().await;
}
