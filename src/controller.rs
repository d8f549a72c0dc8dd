//! StratusCluster Controller
//!
//! This module implements the Kubernetes controller pattern for managing
//! StratusCluster custom resources. It watches for changes and reconciles
//! the actual cluster state to match the desired specification: cluster CA
//! first, then the broker resources, then the gateway component pipeline.

use crate::ca::{CaConfig, CertificateAuthority};
use crate::component::ComponentReconciler;
use crate::crd::{ClusterCondition, ClusterPhase, StratusCluster, StratusClusterStatus};
use crate::error::{OperatorError, Result};
use crate::maintenance::is_maintenance_window_satisfied;
use crate::pvc::delete_claim_allowed;
use crate::resource_operator::ResourceOperator;
use crate::resources::ResourceBuilder;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

/// Finalizer name for cleanup operations
pub const FINALIZER_NAME: &str = "stratus.io/cluster-finalizer";

/// Default requeue interval for successful reconciliations
const DEFAULT_REQUEUE_SECONDS: u64 = 300; // 5 minutes

/// Requeue interval for error cases (base for exponential backoff)
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Context passed to the controller
pub struct ControllerContext {
    /// Kubernetes client
    pub client: Client,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-cluster error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Counter for CA renewals
    pub ca_renewals: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("stratus_operator_reconciliations_total"),
            errors: metrics::counter!("stratus_operator_reconciliation_errors_total"),
            ca_renewals: metrics::counter!("stratus_operator_ca_renewals_total"),
            duration: metrics::histogram!("stratus_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the StratusCluster controller
pub async fn run_controller(client: Client, namespace: Option<String>) -> Result<()> {
    let clusters: Api<StratusCluster> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let ctx = Arc::new(ControllerContext {
        client: client.clone(),
        metrics: Some(ControllerMetrics::new()),
        error_counts: dashmap::DashMap::new(),
    });

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting StratusCluster controller"
    );

    // Watch related resources for changes
    let statefulsets = match &namespace {
        Some(ns) => Api::<StatefulSet>::namespaced(client.clone(), ns),
        None => Api::<StatefulSet>::all(client.clone()),
    };

    let deployments = match &namespace {
        Some(ns) => Api::<Deployment>::namespaced(client.clone(), ns),
        None => Api::<Deployment>::all(client.clone()),
    };

    let services = match &namespace {
        Some(ns) => Api::<Service>::namespaced(client.clone(), ns),
        None => Api::<Service>::all(client.clone()),
    };

    Controller::new(clusters.clone(), Config::default())
        .owns(statefulsets, Config::default())
        .owns(deployments, Config::default())
        .owns(services, Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
async fn reconcile(cluster: Arc<StratusCluster>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let start = std::time::Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let cluster_name = cluster.name_any();
    let clusters: Api<StratusCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&clusters, FINALIZER_NAME, cluster, |event| async {
        match event {
            FinalizerEvent::Apply(cluster) => apply_cluster(cluster, ctx.clone()).await,
            FinalizerEvent::Cleanup(cluster) => cleanup_cluster(cluster, ctx.clone()).await,
        }
    })
    .await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    // Reset error backoff counter on success
    if result.is_ok() {
        ctx.error_counts.remove(&cluster_name);
    }

    result.map_err(|e| {
        if let Some(ref metrics) = ctx.metrics {
            metrics.errors.increment(1);
        }
        // Unwrap the reconciler error so the error policy sees its
        // retryability; finalizer bookkeeping failures stay retryable.
        match e {
            kube::runtime::finalizer::Error::ApplyFailed(e)
            | kube::runtime::finalizer::Error::CleanupFailed(e) => e,
            other => OperatorError::FinalizerError(other.to_string()),
        }
    })
}

/// Apply (create/update) the cluster resources. On failure a Failed status
/// with a stable condition reason is written before the error propagates.
#[instrument(skip(cluster, ctx))]
async fn apply_cluster(
    cluster: Arc<StratusCluster>,
    ctx: Arc<ControllerContext>,
) -> Result<Action> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());

    match apply_cluster_inner(&cluster, &ctx, &name, &namespace).await {
        Ok(action) => Ok(action),
        Err(e) => {
            let status = build_failure_status(&cluster, &e);
            if let Err(status_err) = update_status(&ctx.client, &namespace, &name, status).await {
                warn!(
                    name = %name,
                    error = %status_err,
                    "Failed to record failure status"
                );
            }
            Err(e)
        }
    }
}

async fn apply_cluster_inner(
    cluster: &Arc<StratusCluster>,
    ctx: &Arc<ControllerContext>,
    name: &str,
    namespace: &str,
) -> Result<Action> {
    info!(name = %name, namespace = %namespace, "Reconciling StratusCluster");

    // Validate the cluster spec before reconciliation
    if let Err(errors) = cluster.spec.validate() {
        let error_messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {:?}", field, e.message))
            })
            .collect();
        let error_msg = error_messages.join("; ");
        warn!(name = %name, errors = %error_msg, "Cluster spec validation failed");
        return Err(OperatorError::InvalidConfig(error_msg));
    }
    validate_cluster_config(cluster)?;

    // CaConfig::new also enforces renewal < validity
    let ca_config = CaConfig::new(
        cluster.spec.ca.validity_days,
        cluster.spec.ca.renewal_days,
        cluster.spec.ca.bundle_grace_days,
    )?;

    let now = Utc::now();
    let maintenance_window_satisfied =
        is_maintenance_window_satisfied(cluster.spec.maintenance_time_windows.as_ref(), now)?;

    let builder = ResourceBuilder::new(cluster)?;

    // The CA reconciles before anything that consumes it; this function is
    // its single writer within a cycle.
    let ca = CertificateAuthority::reconcile(
        ctx.client.clone(),
        namespace,
        name,
        ca_config,
        cluster.spec.get_labels(name, "ca"),
        builder.owner_reference(),
        maintenance_window_satisfied,
        now,
    )
    .await?;

    if ca.renewed_this_cycle() {
        if let Some(ref metrics) = ctx.metrics {
            metrics.ca_renewals.increment(1);
        }
        info!(
            name = %name,
            generation = ca.generation(),
            "Cluster CA was renewed"
        );
    }

    // Broker resources
    let configmaps: ResourceOperator<ConfigMap> =
        ResourceOperator::new(ctx.client.clone(), namespace);
    let configmap = builder.build_configmap();
    let configmap_name = format!("{}-config", builder.broker_name());
    configmaps
        .reconcile(namespace, &configmap_name, Some(configmap))
        .await?;

    let services: ResourceOperator<Service> =
        ResourceOperator::new(ctx.client.clone(), namespace);
    let headless_name = format!("{}-headless", builder.broker_name());
    services
        .reconcile(namespace, &headless_name, Some(builder.build_headless_service()))
        .await?;
    let client_svc_name = format!("stratus-{}", name);
    services
        .reconcile(namespace, &client_svc_name, Some(builder.build_client_service()))
        .await?;

    let statefulsets: ResourceOperator<StatefulSet> =
        ResourceOperator::new(ctx.client.clone(), namespace);
    let broker_name = builder.broker_name();
    let mut result = statefulsets
        .reconcile(
            namespace,
            &broker_name,
            Some(builder.build_statefulset(ca.generation(), None)),
        )
        .await?;

    // Withdrawn trust must reach broker pods even when the StatefulSet
    // itself converged without a patch.
    if result.is_noop() && result.resource().is_some() && ca.certs_removed() {
        info!(name = %name, "Rolling brokers after trust bundle pruning");
        result = statefulsets
            .reconcile(
                namespace,
                &broker_name,
                Some(builder.build_statefulset(ca.generation(), Some(&now.to_rfc3339()))),
            )
            .await?;
    }

    let sts_status = result.resource().and_then(|s| s.status.clone());

    let pdbs: ResourceOperator<PodDisruptionBudget> =
        ResourceOperator::new(ctx.client.clone(), namespace);
    let pdb_name = format!("{}-pdb", builder.broker_name());
    pdbs.reconcile(namespace, &pdb_name, builder.build_pdb())
        .await?;

    // Gateway component pipeline; a disabled gateway tears itself down here
    let components = ComponentReconciler::new(ctx.client.clone(), namespace);
    components
        .reconcile_gateway(cluster, &ca, maintenance_window_satisfied, now)
        .await?;

    // Update cluster status
    let status = build_status(cluster, sts_status, ca.generation());
    update_status(&ctx.client, namespace, name, status).await?;

    info!(name = %name, "Reconciliation complete");

    Ok(Action::requeue(Duration::from_secs(
        DEFAULT_REQUEUE_SECONDS,
    )))
}

/// Cross-field validations that single-field validators cannot express
fn validate_cluster_config(cluster: &StratusCluster) -> Result<()> {
    let spec = &cluster.spec;

    // Validate replication factor vs replicas
    if spec.config.default_replication_factor > spec.replicas {
        return Err(OperatorError::InvalidConfig(format!(
            "Replication factor ({}) cannot exceed replica count ({})",
            spec.config.default_replication_factor, spec.replicas
        )));
    }

    // Warn if running with single replica in production
    if spec.replicas == 1 {
        warn!(
            cluster = cluster.name_any(),
            "Running with single replica - not recommended for production"
        );
    }

    Ok(())
}

/// Cleanup resources when cluster is deleted
#[instrument(skip(cluster, ctx))]
async fn cleanup_cluster(
    cluster: Arc<StratusCluster>,
    ctx: Arc<ControllerContext>,
) -> Result<Action> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());

    info!(name = %name, namespace = %namespace, "Cleaning up StratusCluster resources");

    // Resources with owner references (StatefulSet, Deployment, Service,
    // ConfigMap, Secrets, PDB) are garbage-collected by Kubernetes when the
    // CR is deleted. PVCs created by StatefulSet volumeClaimTemplates do NOT
    // get owner refs and must be deleted explicitly, honoring their
    // delete-claim annotation.
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &namespace);
    let lp = ListParams::default().labels(&format!("app.kubernetes.io/instance={}", name));

    match pvcs.list(&lp).await {
        Ok(pvc_list) => {
            for pvc in pvc_list.items {
                let Some(pvc_name) = pvc.metadata.name.as_deref() else {
                    continue;
                };
                if !delete_claim_allowed(&pvc) {
                    info!(
                        name = %name,
                        pvc = %pvc_name,
                        "Keeping PVC: not annotated for deletion"
                    );
                    continue;
                }
                info!(name = %name, pvc = %pvc_name, "Deleting PVC");
                if let Err(e) = pvcs.delete(pvc_name, &DeleteParams::default()).await {
                    warn!(
                        name = %name,
                        pvc = %pvc_name,
                        error = %e,
                        "Failed to delete PVC (may have already been removed)"
                    );
                }
            }
        }
        Err(e) => {
            warn!(
                name = %name,
                error = %e,
                "Failed to list PVCs for cleanup"
            );
        }
    }

    info!(name = %name, "Cleanup complete");

    Ok(Action::await_change())
}

/// Build cluster status from StatefulSet status
fn build_status(
    cluster: &StratusCluster,
    sts_status: Option<StatefulSetStatus>,
    ca_generation: i64,
) -> StratusClusterStatus {
    let now = Utc::now().to_rfc3339();

    let (replicas, ready_replicas, updated_replicas) = sts_status
        .map(|s| {
            (
                s.replicas,
                s.ready_replicas.unwrap_or(0),
                s.updated_replicas.unwrap_or(0),
            )
        })
        .unwrap_or((0, 0, 0));

    let desired_replicas = cluster.spec.replicas;

    // Determine phase based on state
    let phase = if ready_replicas == 0 {
        ClusterPhase::Provisioning
    } else if ready_replicas < desired_replicas {
        if updated_replicas < desired_replicas {
            ClusterPhase::Updating
        } else {
            ClusterPhase::Degraded
        }
    } else if ready_replicas == desired_replicas {
        ClusterPhase::Running
    } else {
        ClusterPhase::Degraded
    };

    let conditions = vec![
        ClusterCondition {
            condition_type: "Ready".to_string(),
            status: if ready_replicas >= desired_replicas {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: Some(format!(
                "{}/{} replicas ready",
                ready_replicas, desired_replicas
            )),
            message: None,
            last_transition_time: Some(now.clone()),
        },
        ClusterCondition {
            condition_type: "Available".to_string(),
            status: if ready_replicas > 0 {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: Some(
                if ready_replicas > 0 {
                    "AtLeastOneReplicaReady"
                } else {
                    "NoReplicasReady"
                }
                .to_string(),
            ),
            message: None,
            last_transition_time: Some(now.clone()),
        },
    ];

    StratusClusterStatus {
        phase,
        replicas,
        ready_replicas,
        updated_replicas,
        observed_generation: cluster.metadata.generation.unwrap_or(0),
        ca_generation,
        conditions,
        last_updated: Some(now),
        message: None,
    }
}

/// Build a Failed status carrying the error's stable condition reason
fn build_failure_status(cluster: &StratusCluster, error: &OperatorError) -> StratusClusterStatus {
    let now = Utc::now().to_rfc3339();
    let previous = cluster.status.clone().unwrap_or_default();

    StratusClusterStatus {
        phase: ClusterPhase::Failed,
        observed_generation: cluster.metadata.generation.unwrap_or(0),
        conditions: vec![ClusterCondition {
            condition_type: "Ready".to_string(),
            status: "False".to_string(),
            reason: Some(error.condition_reason().to_string()),
            message: Some(error.to_string()),
            last_transition_time: Some(now.clone()),
        }],
        last_updated: Some(now),
        message: Some(error.to_string()),
        ..previous
    }
}

/// Update the cluster status subresource
async fn update_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: StratusClusterStatus,
) -> Result<()> {
    let api: Api<StratusCluster> = Api::namespaced(client.clone(), namespace);

    debug!(name = %name, phase = ?status.phase, "Updating cluster status");

    let patch = serde_json::json!({
        "status": status
    });

    let patch_params = PatchParams::default();
    api.patch_status(name, &patch_params, &Patch::Merge(&patch))
        .await
        .map_err(OperatorError::from)?;

    Ok(())
}

/// Error policy for the controller. Configuration and programming errors
/// are not retried until the resource changes; everything else backs off
/// exponentially.
fn error_policy(
    cluster: Arc<StratusCluster>,
    error: &OperatorError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = cluster.name_any();

    if !error.is_retryable() {
        warn!(
            error = %error,
            "Reconciliation error for '{}' is not retryable; waiting for resource change",
            key
        );
        return Action::await_change();
    }

    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    // 30s → 60s → 120s → 240s → 480s → 600s (capped)
    let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
    let backoff = base * 2u32.saturating_pow((retries - 1).min(5));
    let delay = backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS));

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StratusClusterSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn create_test_cluster() -> StratusCluster {
        StratusCluster {
            metadata: ObjectMeta {
                name: Some("test-cluster".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: serde_json::from_str::<StratusClusterSpec>("{}").unwrap(),
            status: None,
        }
    }

    #[test]
    fn test_build_status_provisioning() {
        let cluster = create_test_cluster();
        let status = build_status(&cluster, None, 0);

        assert_eq!(status.phase, ClusterPhase::Provisioning);
        assert_eq!(status.replicas, 0);
        assert_eq!(status.ready_replicas, 0);
        assert_eq!(status.ca_generation, 0);
    }

    #[test]
    fn test_build_status_running() {
        let cluster = create_test_cluster();
        let sts_status = StatefulSetStatus {
            replicas: 3,
            ready_replicas: Some(3),
            updated_replicas: Some(3),
            ..Default::default()
        };

        let status = build_status(&cluster, Some(sts_status), 2);

        assert_eq!(status.phase, ClusterPhase::Running);
        assert_eq!(status.replicas, 3);
        assert_eq!(status.ready_replicas, 3);
        assert_eq!(status.ca_generation, 2);
    }

    #[test]
    fn test_build_status_degraded() {
        let cluster = create_test_cluster();
        let sts_status = StatefulSetStatus {
            replicas: 3,
            ready_replicas: Some(2),
            updated_replicas: Some(3),
            ..Default::default()
        };

        let status = build_status(&cluster, Some(sts_status), 0);

        assert_eq!(status.phase, ClusterPhase::Degraded);
    }

    #[test]
    fn test_build_status_updating() {
        let cluster = create_test_cluster();
        let sts_status = StatefulSetStatus {
            replicas: 3,
            ready_replicas: Some(2),
            updated_replicas: Some(1),
            ..Default::default()
        };

        let status = build_status(&cluster, Some(sts_status), 0);

        assert_eq!(status.phase, ClusterPhase::Updating);
    }

    #[test]
    fn test_conditions() {
        let cluster = create_test_cluster();
        let sts_status = StatefulSetStatus {
            replicas: 3,
            ready_replicas: Some(3),
            updated_replicas: Some(3),
            ..Default::default()
        };

        let status = build_status(&cluster, Some(sts_status), 0);

        assert_eq!(status.conditions.len(), 2);

        let ready_cond = status
            .conditions
            .iter()
            .find(|c| c.condition_type == "Ready")
            .unwrap();
        assert_eq!(ready_cond.status, "True");

        let available_cond = status
            .conditions
            .iter()
            .find(|c| c.condition_type == "Available")
            .unwrap();
        assert_eq!(available_cond.status, "True");
    }

    #[test]
    fn test_failure_status_carries_condition_reason() {
        let cluster = create_test_cluster();
        let err = OperatorError::InvalidConfig("cannot shrink".to_string());
        let status = build_failure_status(&cluster, &err);

        assert_eq!(status.phase, ClusterPhase::Failed);
        assert_eq!(
            status.conditions[0].reason.as_deref(),
            Some("InvalidConfig")
        );
        assert!(status.message.unwrap().contains("cannot shrink"));
    }

    #[test]
    fn test_replication_factor_validation() {
        let mut cluster = create_test_cluster();
        cluster.spec.replicas = 1;
        cluster.spec.config.default_replication_factor = 3;
        assert!(validate_cluster_config(&cluster).is_err());

        cluster.spec.replicas = 3;
        assert!(validate_cluster_config(&cluster).is_ok());
    }
}
