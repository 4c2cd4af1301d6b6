//! End-to-end reconciliation lifecycle scenarios over the in-memory stores.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use reef_inventory::{
    ClusterModel, ClusterStatusKind, ComponentSpec, InMemoryInventory, Inventory,
};
use reef_scheduler::{
    ClusterStatusTransition, ComponentInvoker, InMemoryReconciliationRepository, InvokeError,
    Operation, OperationState, ReconciliationFilter, ReconciliationRepository, Scheduler,
    SchedulerConfig,
};

#[derive(Debug, Clone, Copy)]
enum Step {
    Ok,
    Retriable,
}

/// Replays scripted outcomes per component; unscripted components succeed.
#[derive(Default)]
struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    fn script(self, component: &str, steps: &[Step]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(component.into(), steps.iter().copied().collect());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComponentInvoker for ScriptedInvoker {
    async fn invoke(&self, operation: &Operation) -> Result<(), InvokeError> {
        self.calls.lock().unwrap().push(operation.component.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&operation.component)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Ok);
        match step {
            Step::Ok => Ok(()),
            Step::Retriable => Err(InvokeError::retriable("deploy failed: connection refused")),
        }
    }
}

fn component(name: &str) -> ComponentSpec {
    ComponentSpec {
        name: name.into(),
        namespace: "kyma-system".into(),
        configuration: BTreeMap::new(),
        priority: 2,
    }
}

fn model(cluster: &str, components: &[&str]) -> ClusterModel {
    ClusterModel {
        cluster: cluster.into(),
        kubeconfig: "apiVersion: v1".into(),
        kyma_version: "2.4.0".into(),
        profile: None,
        components: components.iter().map(|name| component(name)).collect(),
    }
}

struct Harness {
    inventory: Arc<InMemoryInventory>,
    repository: Arc<InMemoryReconciliationRepository>,
    invoker: Arc<ScriptedInvoker>,
    scheduler: Scheduler,
}

fn harness(invoker: ScriptedInvoker, pre_components: &[&str]) -> Harness {
    let inventory = Arc::new(InMemoryInventory::new());
    let repository = Arc::new(InMemoryReconciliationRepository::new());
    let invoker = Arc::new(invoker);
    let transition = ClusterStatusTransition::new(inventory.clone(), repository.clone());
    let config = SchedulerConfig {
        pre_components: pre_components.iter().map(ToString::to_string).collect(),
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(transition, invoker.clone(), config);
    Harness {
        inventory,
        repository,
        invoker,
        scheduler,
    }
}

async fn status_trail(harness: &Harness, cluster: &str) -> Vec<ClusterStatusKind> {
    harness
        .inventory
        .status_changes(cluster, std::time::Duration::from_secs(3600))
        .await
        .unwrap()
        .iter()
        .map(|s| s.status)
        .collect()
}

#[tokio::test]
async fn happy_path_runs_both_waves_to_ready() {
    let harness = harness(ScriptedInvoker::default(), &["istio"]);
    harness
        .inventory
        .create_or_update(1, &model("c1", &["istio", "logging"]))
        .await
        .unwrap();

    harness.scheduler.tick().await.unwrap();
    harness.scheduler.tick().await.unwrap();

    // istio (wave 1) before logging (wave 2).
    assert_eq!(
        harness.invoker.calls(),
        vec!["istio".to_string(), "logging".to_string()]
    );

    let trail = status_trail(&harness, "c1").await;
    assert_eq!(
        trail,
        vec![
            ClusterStatusKind::Reconcilable,
            ClusterStatusKind::Reconciling,
            ClusterStatusKind::Ready,
        ]
    );

    let finished = harness
        .repository
        .get_reconciliations(&ReconciliationFilter {
            finished: Some(true),
            ..ReconciliationFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(finished.len(), 1);
    let operations = harness
        .repository
        .get_operations(&finished[0].scheduling_id, None)
        .await
        .unwrap();
    assert!(operations
        .iter()
        .all(|op| op.state == OperationState::Done));
}

#[tokio::test]
async fn transient_failure_recovers_with_recorded_attempts() {
    let invoker = ScriptedInvoker::default().script("logging", &[Step::Retriable, Step::Retriable]);
    let harness = harness(invoker, &[]);
    harness
        .inventory
        .create_or_update(1, &model("c1", &["logging"]))
        .await
        .unwrap();

    for _ in 0..3 {
        harness.scheduler.tick().await.unwrap();
    }

    let finished = harness
        .repository
        .get_reconciliations(&ReconciliationFilter::default())
        .await
        .unwrap();
    let op = &harness
        .repository
        .get_operations(&finished[0].scheduling_id, None)
        .await
        .unwrap()[0];
    assert_eq!(op.state, OperationState::Done);
    assert_eq!(op.retries, 3);
    assert_eq!(
        harness
            .inventory
            .get_latest("c1")
            .await
            .unwrap()
            .status
            .status,
        ClusterStatusKind::Ready
    );
}

#[tokio::test]
async fn duplicate_submission_is_idempotent_while_reconciling() {
    let harness = harness(ScriptedInvoker::default(), &[]);
    let first = harness
        .inventory
        .create_or_update(1, &model("c1", &["istio"]))
        .await
        .unwrap();

    // Enqueue without completing: claim the operation so it stays in flight.
    let transition = ClusterStatusTransition::new(
        harness.inventory.clone() as Arc<dyn Inventory>,
        harness.repository.clone() as Arc<dyn ReconciliationRepository>,
    );
    let recon = transition.start_reconciliation(&first, &[]).await.unwrap();
    let op = harness
        .repository
        .get_operations(&recon.scheduling_id, None)
        .await
        .unwrap()[0]
        .clone();
    harness
        .repository
        .update_operation_state(
            &op.scheduling_id,
            &op.correlation_id,
            OperationState::New,
            OperationState::InProgress,
            None,
        )
        .await
        .unwrap();

    // Identical resubmission: same configuration version, no new
    // reconciliation.
    let resubmitted = harness
        .inventory
        .create_or_update(1, &model("c1", &["istio"]))
        .await
        .unwrap();
    assert_eq!(
        first.configuration.version,
        resubmitted.configuration.version
    );

    let err = transition
        .start_reconciliation(&resubmitted, &[])
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    // A changed submission allocates a new version but stays queued behind
    // the in-flight reconciliation.
    let mut changed = model("c1", &["istio"]);
    changed.kyma_version = "2.5.0".into();
    let queued = harness.inventory.create_or_update(1, &changed).await.unwrap();
    assert_eq!(queued.configuration.version, 2);
    let err = transition.start_reconciliation(&queued, &[]).await.unwrap_err();
    assert!(err.is_duplicate());

    let all = harness
        .repository
        .get_reconciliations(&ReconciliationFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn two_schedulers_process_each_operation_exactly_once() {
    let inventory = Arc::new(InMemoryInventory::new());
    let repository = Arc::new(InMemoryReconciliationRepository::new());
    let invoker = Arc::new(ScriptedInvoker::default());
    let transition = ClusterStatusTransition::new(
        inventory.clone() as Arc<dyn Inventory>,
        repository.clone() as Arc<dyn ReconciliationRepository>,
    );
    let first = Scheduler::new(
        transition.clone(),
        invoker.clone(),
        SchedulerConfig::default(),
    );
    let second = Scheduler::new(
        transition.clone(),
        invoker.clone(),
        SchedulerConfig::default(),
    );

    inventory
        .create_or_update(1, &model("c1", &["istio", "logging", "monitoring"]))
        .await
        .unwrap();

    // Both schedulers tick concurrently over the same stores.
    let (a, b) = tokio::join!(first.tick(), second.tick());
    a.unwrap();
    b.unwrap();
    // Drain any re-queued work and finish bookkeeping.
    first.tick().await.unwrap();

    // Exactly one invocation per component despite the race.
    let mut calls = invoker.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            "istio".to_string(),
            "logging".to_string(),
            "monitoring".to_string()
        ]
    );

    assert_eq!(
        inventory.get_latest("c1").await.unwrap().status.status,
        ClusterStatusKind::Ready
    );
}
