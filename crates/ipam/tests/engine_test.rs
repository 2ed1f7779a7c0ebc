use async_trait::async_trait;
use ipam::labels;
use ipam::{Backend, BackendError, IpAllocation, Ipam, IpamError, PrefixKind, Route, StatusCode};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// In-memory backend that records every call
#[derive(Default)]
struct RecordingBackend {
    snapshots: Mutex<HashMap<String, Vec<Route>>>,
    restores: AtomicUsize,
    stores: AtomicUsize,
    deletes: AtomicUsize,
    fail_store: AtomicBool,
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn restore(&self, network_instance: &str) -> Result<Vec<Route>, BackendError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshots.lock().get(network_instance).cloned().unwrap_or_default())
    }

    async fn store(&self, network_instance: &str, routes: &[Route]) -> Result<(), BackendError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(BackendError::Storage("store unavailable".into()));
        }
        self.snapshots.lock().insert(network_instance.to_string(), routes.to_vec());
        Ok(())
    }

    async fn delete(&self, network_instance: &str) -> Result<(), BackendError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.snapshots.lock().remove(network_instance);
        Ok(())
    }
}

/// Backend whose restore blocks until released
#[derive(Default)]
struct GatedBackend {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Backend for GatedBackend {
    async fn restore(&self, _network_instance: &str) -> Result<Vec<Route>, BackendError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(Vec::new())
    }

    async fn store(&self, _network_instance: &str, _routes: &[Route]) -> Result<(), BackendError> {
        Ok(())
    }

    async fn delete(&self, _network_instance: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

type Notifications = Arc<Mutex<Vec<(Vec<String>, StatusCode)>>>;

fn watch(ipam: &Ipam, gvk: &str) -> Notifications {
    let seen: Notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ipam.add_watch(labels::OWNER_GVK, gvk, move |routes, status| {
        sink.lock()
            .push((routes.iter().map(|r| r.prefix().to_string()).collect(), status));
    });
    seen
}

fn network(ni: &str, name: &str, prefix: &str) -> IpAllocation {
    IpAllocation::new("default", name, ni, PrefixKind::Network)
        .with_prefix(prefix)
        .with_create_prefix(true)
}

fn address(ni: &str, name: &str, prefix: &str) -> IpAllocation {
    IpAllocation::new("default", name, ni, PrefixKind::Network).with_prefix(prefix)
}

fn prefixes(ipam: &Ipam, ni: &str) -> Vec<String> {
    ipam.get_prefixes(ni)
        .unwrap()
        .iter()
        .map(|r| r.prefix().to_string())
        .collect()
}

#[tokio::test]
async fn test_hierarchical_allocation() {
    let ipam = Ipam::new();
    ipam.create("ni1").await;

    let err = ipam.allocate(&address("ni1", "host", "10.0.0.2/24")).await.unwrap_err();
    match &err {
        IpamError::ValidationFailed(msg) => {
            assert_eq!(msg, "network prefix requires an existing parent network prefix")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert!(ipam.get_prefixes("ni1").unwrap().is_empty());

    let net = ipam.allocate(&network("ni1", "net", "10.0.0.1/24")).await.unwrap();
    assert_eq!(net.status.allocated_prefix.as_deref(), Some("10.0.0.1/24"));

    let host = ipam.allocate(&address("ni1", "host", "10.0.0.2/24")).await.unwrap();
    assert_eq!(host.status.allocated_prefix.as_deref(), Some("10.0.0.2/24"));
    assert_eq!(host.status.gateway.as_deref(), Some("10.0.0.1"));
    assert_eq!(prefixes(&ipam, "ni1"), vec!["10.0.0.0/24", "10.0.0.2/32"]);
}

#[tokio::test]
async fn test_instance_lifecycle() {
    let backend = Arc::new(RecordingBackend::default());
    let ipam = Ipam::with_backend(backend.clone());

    ipam.create("ni1").await;
    ipam.create("ni1").await;
    assert_eq!(backend.restores.load(Ordering::SeqCst), 1);
    assert_eq!(ipam.instances(), vec!["ni1".to_string()]);

    ipam.allocate(&network("ni1", "net", "10.0.0.0/24")).await.unwrap();
    assert_eq!(backend.stores.load(Ordering::SeqCst), 1);

    ipam.delete("ni1").await;
    assert_eq!(backend.deletes.load(Ordering::SeqCst), 1);
    assert!(ipam.instances().is_empty());

    let err = ipam.allocate(&network("ni1", "net", "10.0.0.0/24")).await.unwrap_err();
    assert!(matches!(err, IpamError::NotFound(_)));
    assert!(!err.is_retryable());
    assert!(matches!(ipam.get_prefixes("ni1"), Err(IpamError::NotFound(_))));
}

#[tokio::test]
async fn test_not_ready_until_restored() {
    let backend = Arc::new(GatedBackend::default());
    let ipam = Ipam::with_backend(backend.clone());

    let creating = {
        let ipam = ipam.clone();
        tokio::spawn(async move { ipam.create("ni1").await })
    };
    backend.started.notified().await;

    let err = ipam.allocate(&network("ni1", "net", "10.0.0.0/24")).await.unwrap_err();
    assert!(matches!(err, IpamError::NotReady(_)));
    assert!(err.is_retryable());

    backend.release.notify_one();
    creating.await.unwrap();
    ipam.allocate(&network("ni1", "net", "10.0.0.0/24")).await.unwrap();
}

#[tokio::test]
async fn test_restore_snapshot() {
    let backend = Arc::new(RecordingBackend::default());
    {
        let writer = Ipam::with_backend(backend.clone());
        writer.create("ni1").await;
        writer
            .allocate(&network("ni1", "net", "10.0.0.1/24").with_owner("example.io/v1/Net", "default", "net"))
            .await
            .unwrap();
        writer.allocate(&address("ni1", "host", "10.0.0.2/24")).await.unwrap();
    }

    // duplicate entries in a snapshot are skipped
    {
        let mut snapshots = backend.snapshots.lock();
        let routes = snapshots.get_mut("ni1").unwrap();
        let dup = routes[0].clone();
        routes.push(dup);
    }

    let reader = Ipam::with_backend(backend.clone());
    let seen = watch(&reader, "example.io/v1/Net");
    reader.create("ni1").await;

    assert_eq!(prefixes(&reader, "ni1"), vec!["10.0.0.0/24", "10.0.0.2/32"]);
    assert_eq!(*seen.lock(), vec![(vec!["10.0.0.0/24".to_string()], StatusCode::Valid)]);

    // restored state is live: the same identity is idempotent, others conflict
    let again = reader.allocate(&address("ni1", "host", "10.0.0.2/24")).await.unwrap();
    assert_eq!(again.status.allocated_prefix.as_deref(), Some("10.0.0.2/24"));
    assert_eq!(again.status.gateway.as_deref(), Some("10.0.0.1"));
    let err = reader.allocate(&address("ni1", "other", "10.0.0.2/24")).await.unwrap_err();
    assert!(matches!(err, IpamError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_instances_are_isolated() {
    let ipam = Ipam::new();
    ipam.create("red").await;
    ipam.create("blue").await;

    ipam.allocate(&network("red", "net", "10.0.0.0/24")).await.unwrap();
    ipam.allocate(&network("blue", "net", "10.0.0.0/24")).await.unwrap();
    ipam.allocate(&address("red", "host", "10.0.0.5/24")).await.unwrap();

    assert_eq!(prefixes(&ipam, "red"), vec!["10.0.0.0/24", "10.0.0.5/32"]);
    assert_eq!(prefixes(&ipam, "blue"), vec!["10.0.0.0/24"]);

    ipam.deallocate(&network("red", "net", "10.0.0.0/24")).await.unwrap();
    assert!(prefixes(&ipam, "red").is_empty());
    assert_eq!(prefixes(&ipam, "blue"), vec!["10.0.0.0/24"]);
}

#[tokio::test]
async fn test_allocate_deallocate_round_trip() {
    let ipam = Ipam::new();
    ipam.create("ni1").await;
    ipam.allocate(&network("ni1", "net", "10.0.0.0/24")).await.unwrap();
    let before = ipam.get_prefixes("ni1").unwrap();

    let host = address("ni1", "host", "10.0.0.9/24");
    ipam.allocate(&host).await.unwrap();
    ipam.deallocate(&host).await.unwrap();
    ipam.deallocate(&host).await.unwrap();

    assert_eq!(ipam.get_prefixes("ni1").unwrap(), before);
}

#[tokio::test]
async fn test_dynamic_allocation_is_first_fit_and_stable() {
    let ipam = Ipam::new();
    ipam.create("ni1").await;
    ipam.allocate(&network("ni1", "net", "10.0.0.1/24")).await.unwrap();

    let mut allocated = Vec::new();
    for i in 0..3 {
        let request = IpAllocation::new("default", format!("host-{i}"), "ni1", PrefixKind::Network);
        let result = ipam.allocate(&request).await.unwrap();
        allocated.push(result.status.allocated_prefix.unwrap());
    }
    assert_eq!(allocated, vec!["10.0.0.2/24", "10.0.0.3/24", "10.0.0.4/24"]);

    let repeat = ipam
        .allocate(&IpAllocation::new("default", "host-1", "ni1", PrefixKind::Network))
        .await
        .unwrap();
    assert_eq!(repeat.status.allocated_prefix.as_deref(), Some("10.0.0.3/24"));
}

#[tokio::test]
async fn test_notifications() {
    let ipam = Ipam::new();
    ipam.create("ni1").await;
    let nets = watch(&ipam, "example.io/v1/Net");
    let hosts = watch(&ipam, "example.io/v1/Host");

    let net = network("ni1", "net", "10.0.0.0/24").with_owner("example.io/v1/Net", "default", "net");
    let host = address("ni1", "host", "10.0.0.2/24").with_owner("example.io/v1/Host", "default", "host");
    ipam.allocate(&net).await.unwrap();
    ipam.allocate(&host).await.unwrap();
    ipam.allocate(&host).await.unwrap();

    assert_eq!(*nets.lock(), vec![(vec!["10.0.0.0/24".to_string()], StatusCode::Valid)]);
    assert_eq!(*hosts.lock(), vec![(vec!["10.0.0.2/32".to_string()], StatusCode::Valid)]);

    // moving an address withdraws the old route
    let moved = address("ni1", "host", "10.0.0.3/24").with_owner("example.io/v1/Host", "default", "host");
    ipam.allocate(&moved).await.unwrap();
    assert_eq!(
        hosts.lock()[1..],
        [
            (vec!["10.0.0.2/32".to_string()], StatusCode::Unknown),
            (vec!["10.0.0.3/32".to_string()], StatusCode::Valid),
        ]
    );

    // removing the boundary cascades to the address owner
    ipam.deallocate(&net).await.unwrap();
    assert_eq!(nets.lock().last().unwrap().1, StatusCode::Unknown);
    assert_eq!(
        hosts.lock().last().unwrap(),
        &(vec!["10.0.0.3/32".to_string()], StatusCode::Unknown)
    );
    assert!(ipam.get_prefixes("ni1").unwrap().is_empty());

    ipam.delete_watch(labels::OWNER_GVK, "example.io/v1/Host");
    ipam.allocate(&net).await.unwrap();
    ipam.allocate(&moved).await.unwrap();
    assert_eq!(hosts.lock().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_single_winner() {
    let ipam = Ipam::new();
    ipam.create("ni1").await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let ipam = ipam.clone();
        tasks.push(tokio::spawn(async move {
            let claim = IpAllocation::new("default", format!("lo-{i}"), "ni1", PrefixKind::Loopback)
                .with_prefix("10.255.0.1/32");
            ipam.allocate(&claim).await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => {
                assert!(e.is_retryable(), "{e}");
                assert!(matches!(e, IpamError::ValidationFailed(_) | IpamError::AlreadyExists { .. }));
            }
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(prefixes(&ipam, "ni1"), vec!["10.255.0.1/32"]);
}

#[tokio::test]
async fn test_store_failure_does_not_fail_allocation() {
    let backend = Arc::new(RecordingBackend::default());
    backend.fail_store.store(true, Ordering::SeqCst);
    let ipam = Ipam::with_backend(backend.clone());
    ipam.create("ni1").await;

    ipam.allocate(&network("ni1", "net", "10.0.0.0/24")).await.unwrap();
    assert_eq!(backend.stores.load(Ordering::SeqCst), 1);
    assert!(backend.snapshots.lock().is_empty());

    // the next successful store carries the whole table
    backend.fail_store.store(false, Ordering::SeqCst);
    ipam.allocate(&address("ni1", "host", "10.0.0.2/24")).await.unwrap();
    let stored: Vec<String> = backend.snapshots.lock()["ni1"]
        .iter()
        .map(|r| r.prefix().to_string())
        .collect();
    assert_eq!(stored, vec!["10.0.0.0/24", "10.0.0.2/32"]);
}

#[tokio::test]
async fn test_labels_and_selector() {
    let ipam = Ipam::new();
    ipam.create("ni1").await;
    ipam.allocate(&network("ni1", "lan", "10.0.0.1/24")).await.unwrap();
    ipam.allocate(&network("ni1", "mgmt", "10.0.1.1/24").with_label("purpose", "mgmt"))
        .await
        .unwrap();

    let request = IpAllocation::new("default", "bmc-1", "ni1", PrefixKind::Network)
        .with_selector("purpose", "mgmt")
        .with_label("rack", "r1");
    let allocated = ipam.allocate(&request).await.unwrap();
    assert_eq!(allocated.status.allocated_prefix.as_deref(), Some("10.0.1.2/24"));

    let route = ipam
        .get_prefixes("ni1")
        .unwrap()
        .into_iter()
        .find(|r| r.prefix().to_string() == "10.0.1.2/32")
        .unwrap();
    let expected: BTreeMap<&str, &str> = [
        ("rack", "r1"),
        (labels::PREFIX_KIND, "network"),
        (labels::ADDRESS_FAMILY, "ipv4"),
        (labels::PREFIX_LENGTH, "24"),
        (labels::NSN_NAMESPACE, "default"),
        (labels::NSN_NAME, "bmc-1"),
        (labels::GATEWAY, "10.0.1.1"),
    ]
    .into_iter()
    .collect();
    let actual: BTreeMap<&str, &str> = route.labels().iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    assert_eq!(actual, expected);

    let unmatched = IpAllocation::new("default", "bmc-2", "ni1", PrefixKind::Network).with_selector("purpose", "storage");
    assert!(matches!(ipam.allocate(&unmatched).await, Err(IpamError::ValidationFailed(_))));
}
