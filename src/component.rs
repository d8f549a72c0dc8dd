//! Component Reconciliation Pipeline
//!
//! Drives one optional cluster component (the gateway) through its full
//! reconciliation sequence: service account, persistent claims, server
//! certificate secret, workload, readiness wait, orphaned claim cleanup.
//! A disabled component runs the same pipeline with nothing desired, so
//! its resources are torn down through the same code path.

use crate::ca::CertificateAuthority;
use crate::cert_secret::{existing_certs_differ, SecretCertBuilder};
use crate::crd::StratusCluster;
use crate::error::{OperatorError, Result};
use crate::pvc::PvcReconciler;
use crate::resource_operator::ResourceOperator;
use crate::resources::ResourceBuilder;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, ServiceAccount};
use kube::api::Api;
use kube::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Poll interval while waiting for the workload to become ready
const READINESS_POLL: Duration = Duration::from_secs(1);

/// How long to wait for the workload before giving up on this cycle
const READINESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Observations accumulated while the pipeline runs. They feed the
/// rolling-restart decision at the workload step.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconciliationState {
    /// A claim could not be resized in place, so its pod must restart
    pub pvc_changed: bool,
    /// The server certificate secret changed in a way running pods see
    pub existing_certs_changed: bool,
}

/// A workload that converged without a patch still needs a restart when
/// its storage or certificates moved underneath it, or when trust in an
/// old CA certificate was withdrawn.
pub fn needs_rolling_restart(
    workload_unchanged: bool,
    state: ReconciliationState,
    ca_certs_removed: bool,
) -> bool {
    workload_unchanged && (state.pvc_changed || state.existing_certs_changed || ca_certs_removed)
}

/// True once the Deployment controller has observed the latest generation
/// and all desired replicas report ready.
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let generation = deployment.metadata.generation.unwrap_or(0);
    let Some(status) = &deployment.status else {
        return false;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    status.observed_generation.unwrap_or(0) >= generation
        && status.ready_replicas.unwrap_or(0) >= desired
}

/// Render a label map as a list-selector string
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Reconciler for the gateway component of one cluster.
pub struct ComponentReconciler {
    client: Client,
    namespace: String,
}

impl ComponentReconciler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// Run the gateway pipeline. `spec.gateway` absent means the component
    /// is disabled: every step then reconciles against nothing desired and
    /// existing resources are removed, claims subject to their delete-claim
    /// annotation.
    pub async fn reconcile_gateway(
        &self,
        cluster: &StratusCluster,
        ca: &CertificateAuthority,
        maintenance_window_satisfied: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let builder = ResourceBuilder::new(cluster)?;
        let enabled = cluster.spec.gateway.is_some();
        let cluster_name = ca.cluster();
        let name = builder.gateway_name();
        let labels = cluster.spec.get_labels(cluster_name, "gateway");
        let selector = selector_string(&cluster.spec.get_selector_labels(cluster_name, "gateway"));

        let mut state = ReconciliationState::default();

        // 1. Service account
        let service_accounts: ResourceOperator<ServiceAccount> =
            ResourceOperator::new(self.client.clone(), &self.namespace);
        service_accounts
            .reconcile(
                &self.namespace,
                &name,
                enabled.then(|| builder.build_gateway_service_account()),
            )
            .await?;

        // 2. Persistent claims
        let pvc_operator: ResourceOperator<PersistentVolumeClaim> =
            ResourceOperator::new(self.client.clone(), &self.namespace);
        let existing_pvcs = pvc_operator.list(&selector).await?;

        let desired_pvcs = if enabled {
            let storage = cluster
                .spec
                .gateway
                .as_ref()
                .map(|g| g.storage.clone())
                .unwrap_or_default();
            builder.build_component_pvcs("gateway", &name, &storage.flatten(), 0)
        } else {
            Vec::new()
        };

        let pvcs = PvcReconciler::new(self.client.clone(), &self.namespace);
        if enabled {
            let restart_pods = pvcs.resize_and_reconcile(&desired_pvcs).await?;
            state.pvc_changed = !restart_pods.is_empty();
        }

        // 3. Server certificate secret
        let secrets: ResourceOperator<Secret> =
            ResourceOperator::new(self.client.clone(), &self.namespace);
        let cert_secret_name = builder.gateway_certs_secret_name();
        let existing_secret = secrets.get(&cert_secret_name).await?;

        let desired_secret = if enabled {
            let service_name = format!("stratus-{}", cluster_name);
            let alt_names = vec![
                service_name.clone(),
                format!("{}.{}", service_name, self.namespace),
                format!("{}.{}.svc", service_name, self.namespace),
                format!("{}.{}.svc.cluster.local", service_name, self.namespace),
            ];
            let cert_builder = SecretCertBuilder::new(
                ca,
                &self.namespace,
                &cert_secret_name,
                "gateway",
                &name,
                &alt_names,
                labels,
                builder.owner_reference(),
            );
            Some(cert_builder.build(existing_secret.as_ref(), maintenance_window_satisfied, now))
        } else {
            None
        };

        if let (Some(existing), Some(desired)) = (&existing_secret, &desired_secret) {
            state.existing_certs_changed = existing_certs_differ(existing, desired);
        }

        secrets
            .reconcile(&self.namespace, &cert_secret_name, desired_secret)
            .await?;

        // 4. Workload
        let deployments: ResourceOperator<Deployment> =
            ResourceOperator::new(self.client.clone(), &self.namespace);
        let result = deployments
            .reconcile(
                &self.namespace,
                &name,
                enabled.then(|| builder.build_gateway_deployment(ca.generation(), None)),
            )
            .await?;

        if enabled
            && needs_rolling_restart(
                result.is_noop() && result.resource().is_some(),
                state,
                ca.certs_removed(),
            )
        {
            info!(
                component = %name,
                pvc_changed = state.pvc_changed,
                certs_changed = state.existing_certs_changed,
                ca_certs_removed = ca.certs_removed(),
                "Rolling gateway pod"
            );
            let restarted = builder
                .build_gateway_deployment(ca.generation(), Some(&now.to_rfc3339()));
            deployments
                .reconcile(&self.namespace, &name, Some(restarted))
                .await?;
        }

        // 5. Readiness
        if enabled {
            self.wait_for_deployment_readiness(&name).await?;
        }

        // 6. Orphaned claim cleanup, last so data outlives a failed rollout
        pvcs.delete_persistent_claims(&existing_pvcs, &desired_pvcs)
            .await?;

        Ok(())
    }

    /// Poll the Deployment until it is ready or the timeout elapses.
    async fn wait_for_deployment_readiness(&self, name: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let deadline = tokio::time::Instant::now() + READINESS_TIMEOUT;

        loop {
            if let Some(deployment) = api.get_opt(name).await? {
                if deployment_ready(&deployment) {
                    debug!(deployment = %name, "Deployment is ready");
                    return Ok(());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(OperatorError::Timeout(format!(
                    "deployment {} did not become ready within {}s",
                    name,
                    READINESS_TIMEOUT.as_secs()
                )));
            }

            tokio::time::sleep(READINESS_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(generation: i64, observed: i64, desired: i32, ready: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(generation),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(observed),
                ready_replicas: Some(ready),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_rolling_restart_only_when_unchanged() {
        let dirty = ReconciliationState {
            pvc_changed: true,
            existing_certs_changed: false,
        };
        // A workload that was just patched restarts on its own rollout
        assert!(!needs_rolling_restart(false, dirty, false));
        assert!(needs_rolling_restart(true, dirty, false));
    }

    #[test]
    fn test_rolling_restart_triggers() {
        let clean = ReconciliationState::default();
        assert!(!needs_rolling_restart(true, clean, false));
        assert!(needs_rolling_restart(true, clean, true));
        assert!(needs_rolling_restart(
            true,
            ReconciliationState {
                pvc_changed: false,
                existing_certs_changed: true,
            },
            false
        ));
    }

    #[test]
    fn test_deployment_ready() {
        assert!(deployment_ready(&deployment(3, 3, 1, 1)));
        // Controller has not seen the latest generation yet
        assert!(!deployment_ready(&deployment(4, 3, 1, 1)));
        // Pod not ready
        assert!(!deployment_ready(&deployment(3, 3, 1, 0)));
    }

    #[test]
    fn test_deployment_without_status_not_ready() {
        let mut d = deployment(1, 1, 1, 1);
        d.status = None;
        assert!(!deployment_ready(&d));
    }

    #[test]
    fn test_selector_string() {
        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/name".to_string(), "stratus".to_string());
        labels.insert("app.kubernetes.io/component".to_string(), "gateway".to_string());
        assert_eq!(
            selector_string(&labels),
            "app.kubernetes.io/component=gateway,app.kubernetes.io/name=stratus"
        );
    }
}
