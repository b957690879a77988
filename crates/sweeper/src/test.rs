use std::{collections::HashMap, sync::Mutex, time::Duration};

use pretty_assertions::assert_eq;

use crate::*;

#[derive(Clone, Debug, Default)]
struct FakeResource {
    state: String,
    dependents: Vec<DependentRef>,
    attached: Option<String>,
    /// Polls remaining until a pending delete reads back as `deleted`.
    delete_latency: u32,
}

impl FakeResource {
    fn available() -> Self {
        FakeResource {
            state: "available".to_owned(),
            ..Default::default()
        }
    }
}

/// An in-memory stand-in for the provider directory and mutation API.
///
/// Every observing and mutating call appends to `events` so tests can
/// assert protocol ordering, not just end states.
#[derive(Debug, Default)]
struct FakeCloud {
    resources: HashMap<String, FakeResource>,
    events: Vec<String>,
    fail_snapshot: bool,
    snapshot_collides: bool,
    /// State the resource moves to as a side effect of snapshot creation.
    state_after_snapshot: Option<String>,
    fail_release: bool,
}

impl FakeCloud {
    fn with(mut self, id: &str, resource: FakeResource) -> Self {
        self.resources.insert(id.to_owned(), resource);
        self
    }
}

struct Fake {
    kind: ResourceKind,
    awaits: bool,
    /// `Some` restricts mutation to exactly that state; `None` only rules
    /// out `deleted`.
    modifiable_state: Option<&'static str>,
}

fn nat() -> Fake {
    Fake {
        kind: ResourceKind::NatGateway,
        awaits: true,
        modifiable_state: None,
    }
}

fn lb() -> Fake {
    Fake {
        kind: ResourceKind::LoadBalancer,
        awaits: false,
        modifiable_state: None,
    }
}

fn db() -> Fake {
    Fake {
        kind: ResourceKind::DbInstance,
        awaits: false,
        modifiable_state: Some("available"),
    }
}

fn quick_cfg() -> ControllerConfig {
    ControllerConfig {
        wait: WaitConfig {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        },
        ..Default::default()
    }
}

impl Lifecycle for Fake {
    type Provider = Mutex<FakeCloud>;

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn describe(&self, cloud: &Mutex<FakeCloud>, id: &str) -> Result<ManagedResource> {
        let mut cloud = cloud.lock().unwrap();
        if !cloud.resources.contains_key(id) {
            cloud.events.push(format!("describe {id} missing"));
            return NotFoundSnafu {
                kind: self.kind,
                id,
            }
            .fail();
        }
        let resource = cloud.resources.get_mut(id).unwrap();
        // A pending delete advances one step per observation.
        if resource.state == "deleting" {
            if resource.delete_latency == 0 {
                resource.state = "deleted".to_owned();
            } else {
                resource.delete_latency -= 1;
            }
        }
        let snapshot = ManagedResource {
            id: id.to_owned(),
            kind: self.kind,
            state: resource.state.clone(),
            dependents: resource.dependents.clone(),
            cluster_parent: None,
            attached_resource: resource.attached.clone(),
        };
        cloud.events.push(format!("describe {id} {}", snapshot.state));
        Ok(snapshot)
    }

    async fn list(&self, cloud: &Mutex<FakeCloud>) -> Result<Vec<ManagedResource>> {
        let cloud = cloud.lock().unwrap();
        Ok(cloud
            .resources
            .iter()
            .map(|(id, resource)| ManagedResource {
                id: id.clone(),
                kind: self.kind,
                state: resource.state.clone(),
                dependents: Vec::new(),
                cluster_parent: None,
                attached_resource: resource.attached.clone(),
            })
            .collect())
    }

    fn is_modifiable_state(&self, state: &str) -> bool {
        match self.modifiable_state {
            Some(only) => state == only,
            None => state != "deleted",
        }
    }

    async fn delete(&self, cloud: &Mutex<FakeCloud>, resource: &ManagedResource) -> Result<()> {
        let mut cloud = cloud.lock().unwrap();
        cloud.events.push(format!("delete {}", resource.id));
        let stored = cloud.resources.get_mut(&resource.id).unwrap();
        stored.state = "deleting".to_owned();
        Ok(())
    }

    fn awaits_termination(&self) -> bool {
        self.awaits
    }

    async fn create_snapshot(
        &self,
        cloud: &Mutex<FakeCloud>,
        resource: &ManagedResource,
    ) -> Result<String> {
        let mut cloud = cloud.lock().unwrap();
        if cloud.fail_snapshot {
            return Err(Error::provider(
                "CreateDBSnapshot",
                &resource.id,
                "injected snapshot failure".to_owned(),
            ));
        }
        let name = format!("{}-snap", resource.id);
        if cloud.snapshot_collides {
            return SnapshotCollisionSnafu { name }.fail();
        }
        cloud.events.push(format!("snapshot {}", resource.id));
        if let Some(state) = cloud.state_after_snapshot.clone() {
            if let Some(stored) = cloud.resources.get_mut(&resource.id) {
                stored.state = state;
            }
        }
        Ok(name)
    }

    async fn release_attached(&self, cloud: &Mutex<FakeCloud>, attached_id: &str) -> Result<()> {
        let mut cloud = cloud.lock().unwrap();
        if cloud.fail_release {
            return Err(Error::provider(
                "ReleaseAddress",
                attached_id,
                "injected release failure".to_owned(),
            ));
        }
        cloud.events.push(format!("release {attached_id}"));
        Ok(())
    }
}

fn events<L: Lifecycle<Provider = Mutex<FakeCloud>>>(ctl: &Controller<L>) -> Vec<String> {
    ctl.provider().lock().unwrap().events.clone()
}

#[tokio::test]
async fn listener_blocks_load_balancer_deletion() {
    let _ = env_logger::builder().try_init();
    let cloud = FakeCloud::default().with(
        "lb-1",
        FakeResource {
            dependents: vec![DependentRef::new("listener", "Port 443 - Protocol HTTPS")],
            ..FakeResource::available()
        },
    );
    let ctl = Controller::new(Mutex::new(cloud), lb()).with_config(quick_cfg());

    assert_eq!(
        ctl.evaluate("lb-1").await.unwrap(),
        Decision::Blocked {
            reasons: vec!["Port 443 - Protocol HTTPS".to_owned()],
        }
    );

    let outcome = ctl
        .delete("lb-1", ExceptionAction::TerminateWithoutSnapshot)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Blocked { .. }));
    assert!(
        !events(&ctl).iter().any(|e| e.starts_with("delete")),
        "a blocked resource must never see a mutating call"
    );
}

#[tokio::test]
async fn unreferenced_resource_is_deletable_and_evaluate_is_idempotent() {
    let _ = env_logger::builder().try_init();
    let cloud = FakeCloud::default().with("lb-2", FakeResource::available());
    let ctl = Controller::new(Mutex::new(cloud), lb()).with_config(quick_cfg());

    let first = ctl.evaluate("lb-2").await.unwrap();
    let second = ctl.evaluate("lb-2").await.unwrap();
    assert_eq!(first, Decision::Deletable);
    assert_eq!(
        first, second,
        "evaluate must not change the directory it reads"
    );
    assert!(!events(&ctl).iter().any(|e| e.starts_with("delete")));
}

#[tokio::test]
async fn nat_release_happens_only_after_terminal_state() {
    let _ = env_logger::builder().try_init();
    let cloud = FakeCloud::default().with(
        "nat-1",
        FakeResource {
            attached: Some("eipalloc-1".to_owned()),
            delete_latency: 2,
            ..FakeResource::available()
        },
    );
    let ctl = Controller::new(Mutex::new(cloud), nat()).with_config(quick_cfg());

    let outcome = ctl
        .delete("nat-1", ExceptionAction::TerminateWithoutSnapshot)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Deleted);

    let events = events(&ctl);
    let deleted_at = events
        .iter()
        .position(|e| e == "delete nat-1")
        .expect("the delete call must happen");
    let observed_deleted_at = events
        .iter()
        .position(|e| e == "describe nat-1 deleted")
        .expect("the terminal state must be observed");
    let released_at = events
        .iter()
        .position(|e| e == "release eipalloc-1")
        .expect("the elastic IP must be released");
    assert!(deleted_at < observed_deleted_at);
    assert!(
        observed_deleted_at < released_at,
        "release must wait for the observed terminal state: {events:#?}"
    );
}

#[tokio::test]
async fn wait_timeout_is_reported_as_partial_completion() {
    let _ = env_logger::builder().try_init();
    let cloud = FakeCloud::default().with(
        "nat-2",
        FakeResource {
            attached: Some("eipalloc-2".to_owned()),
            delete_latency: 1_000,
            ..FakeResource::available()
        },
    );
    let mut cfg = quick_cfg();
    cfg.wait.timeout = Duration::ZERO;
    let ctl = Controller::new(Mutex::new(cloud), nat()).with_config(cfg);

    let outcome = ctl
        .delete("nat-2", ExceptionAction::TerminateWithoutSnapshot)
        .await
        .unwrap();
    match outcome {
        Outcome::Partial { done, failed } => {
            assert!(done.contains("nat-2"));
            assert!(failed.contains("Timed out"), "{failed}");
        }
        other => panic!("expected a partial outcome, got {other:?}"),
    }
    assert!(
        !events(&ctl).iter().any(|e| e.starts_with("release")),
        "no release without an observed terminal state"
    );
}

#[tokio::test]
async fn release_failure_is_reported_as_partial_completion() {
    let _ = env_logger::builder().try_init();
    let mut cloud = FakeCloud::default().with(
        "nat-3",
        FakeResource {
            attached: Some("eipalloc-3".to_owned()),
            ..FakeResource::available()
        },
    );
    cloud.fail_release = true;
    let ctl = Controller::new(Mutex::new(cloud), nat()).with_config(quick_cfg());

    let outcome = ctl
        .delete("nat-3", ExceptionAction::TerminateWithoutSnapshot)
        .await
        .unwrap();
    match outcome {
        Outcome::Partial { done, failed } => {
            assert!(done.contains("nat-3"));
            assert!(failed.contains("eipalloc-3"), "{failed}");
        }
        other => panic!("expected a partial outcome, got {other:?}"),
    }
    assert!(
        events(&ctl).iter().any(|e| e == "delete nat-3"),
        "the gateway deletion itself did succeed"
    );
}

#[tokio::test]
async fn snapshot_failure_prevents_the_delete() {
    let _ = env_logger::builder().try_init();
    let mut cloud = FakeCloud::default().with("db-1", FakeResource::available());
    cloud.fail_snapshot = true;
    let ctl = Controller::new(Mutex::new(cloud), db()).with_config(quick_cfg());

    let result = ctl.delete("db-1", ExceptionAction::TerminateWithSnapshot).await;
    assert!(matches!(result, Err(Error::Provider { .. })), "{result:?}");
    assert!(
        !events(&ctl).iter().any(|e| e.starts_with("delete")),
        "a failed snapshot must leave the instance untouched"
    );
}

#[tokio::test]
async fn snapshot_precedes_the_delete() {
    let _ = env_logger::builder().try_init();
    let cloud = FakeCloud::default().with("db-2", FakeResource::available());
    let ctl = Controller::new(Mutex::new(cloud), db()).with_config(quick_cfg());

    let outcome = ctl
        .delete("db-2", ExceptionAction::TerminateWithSnapshot)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Deleted);

    let events = events(&ctl);
    let snapshot_at = events.iter().position(|e| e == "snapshot db-2").unwrap();
    let delete_at = events.iter().position(|e| e == "delete db-2").unwrap();
    assert!(snapshot_at < delete_at);
}

#[tokio::test]
async fn snapshot_side_effects_are_rechecked_before_the_delete() {
    let _ = env_logger::builder().try_init();
    let mut cloud = FakeCloud::default().with("db-9", FakeResource::available());
    cloud.state_after_snapshot = Some("backing-up".to_owned());
    let ctl = Controller::new(Mutex::new(cloud), db()).with_config(quick_cfg());

    let outcome = ctl
        .delete("db-9", ExceptionAction::TerminateWithSnapshot)
        .await
        .unwrap();
    match outcome {
        Outcome::Blocked { reasons } => {
            assert!(reasons[0].contains("backing-up"), "{reasons:?}")
        }
        other => panic!("expected the fresh check to block, got {other:?}"),
    }

    let events = events(&ctl);
    assert!(
        !events.iter().any(|e| e.starts_with("delete")),
        "no delete against an instance the snapshot left unmodifiable: {events:#?}"
    );
    let snapshot_at = events.iter().position(|e| e == "snapshot db-9").unwrap();
    assert!(
        events[snapshot_at..]
            .iter()
            .any(|e| e == "describe db-9 backing-up"),
        "a fresh describe must follow the snapshot: {events:#?}"
    );
}

#[tokio::test]
async fn reused_snapshot_collision_proceeds_to_delete() {
    let _ = env_logger::builder().try_init();
    let mut cloud = FakeCloud::default().with("db-4", FakeResource::available());
    cloud.snapshot_collides = true;
    let mut cfg = quick_cfg();
    cfg.snapshot_collision = SnapshotCollisionPolicy::ReuseExisting;
    let ctl = Controller::new(Mutex::new(cloud), db()).with_config(cfg);

    let outcome = ctl
        .delete("db-4", ExceptionAction::TerminateWithSnapshot)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Deleted);
    assert!(events(&ctl).iter().any(|e| e == "delete db-4"));
}

#[tokio::test]
async fn snapshot_collision_fails_closed_by_default() {
    let _ = env_logger::builder().try_init();
    let mut cloud = FakeCloud::default().with("db-5", FakeResource::available());
    cloud.snapshot_collides = true;
    let ctl = Controller::new(Mutex::new(cloud), db()).with_config(quick_cfg());

    let result = ctl.delete("db-5", ExceptionAction::TerminateWithSnapshot).await;
    assert!(
        matches!(result, Err(Error::SnapshotCollision { .. })),
        "{result:?}"
    );
    assert!(
        !events(&ctl).iter().any(|e| e.starts_with("delete")),
        "a colliding snapshot must leave the instance untouched"
    );
}

#[tokio::test]
async fn operator_no_action_skips_without_touching_the_directory() {
    let _ = env_logger::builder().try_init();
    let cloud = FakeCloud::default().with("db-3", FakeResource::available());
    let ctl = Controller::new(Mutex::new(cloud), db()).with_config(quick_cfg());

    let outcome = ctl.delete("db-3", ExceptionAction::NoAction).await.unwrap();
    assert_eq!(outcome, Outcome::Skipped);
    assert!(events(&ctl).is_empty());
}

#[tokio::test]
async fn unknown_identifier_is_not_found() {
    let _ = env_logger::builder().try_init();
    let ctl =
        Controller::new(Mutex::new(FakeCloud::default()), nat()).with_config(quick_cfg());
    let result = ctl.evaluate("nat-nope").await;
    assert!(matches!(result, Err(Error::NotFound { .. })), "{result:?}");
}

#[tokio::test]
async fn terminal_state_blocks_further_mutation() {
    let _ = env_logger::builder().try_init();
    let cloud = FakeCloud::default().with(
        "nat-4",
        FakeResource {
            state: "deleted".to_owned(),
            ..Default::default()
        },
    );
    let ctl = Controller::new(Mutex::new(cloud), nat()).with_config(quick_cfg());

    match ctl.evaluate("nat-4").await.unwrap() {
        Decision::Blocked { reasons } => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].contains("not in a modifiable state"), "{reasons:?}");
        }
        Decision::Deletable => panic!("a deleted gateway is not deletable again"),
    }
    let outcome = ctl
        .delete("nat-4", ExceptionAction::TerminateWithoutSnapshot)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Blocked { .. }));
}
