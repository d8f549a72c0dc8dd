//! # Stratus Kubernetes Operator
//!
//! Production-grade Kubernetes operator for deploying and managing Stratus
//! distributed streaming clusters.
//!
//! This crate provides the core functionality for the Stratus Kubernetes
//! operator, enabling declarative management of Stratus infrastructure using
//! Custom Resource Definitions (CRDs).
//!
//! ## Features
//!
//! - **Custom Resource Definition**: a `StratusCluster` CRD for declarative
//!   management of brokers, storage, certificates, and the gateway component
//! - **Automated Reconciliation**: idempotent convergence of every managed
//!   resource through a single generic [`resource_operator::ResourceOperator`]
//! - **Cluster CA Lifecycle**: a self-signed certificate authority with
//!   generation tracking, scheduled renewal inside maintenance windows, and
//!   a dual-trust bundle for zero-downtime rotation
//! - **Storage Management**: single-disk and JBOD persistent claims with
//!   in-place expansion where the StorageClass allows it and safe,
//!   annotation-gated claim deletion where it does not
//! - **Observability**: Prometheus-compatible operator metrics
//! - **High Availability**: PodDisruptionBudget support for safe upgrades
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stratus_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Create Kubernetes client from default config
//!     let client = Client::try_default().await?;
//!
//!     // Run the operator controller
//!     run_controller(client, None).await
//! }
//! ```
//!
//! ## Architecture
//!
//! The operator follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch**: Monitor StratusCluster resources and the workloads they own
//! 2. **Reconcile**: Compare desired state (CRD spec) with actual state
//!    (K8s resources); the cluster CA reconciles first so every later step
//!    reads consistent certificate state
//! 3. **Act**: Create, patch, or delete resources to match desired state,
//!    rolling pods when storage or trust changed underneath an otherwise
//!    converged workload
//! 4. **Status**: Update CRD status with phase, conditions, and the current
//!    CA generation
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types with validation
//! - [`controller`] - StratusCluster reconciliation logic and controller setup
//! - [`resource_operator`] - Generic idempotent resource convergence
//! - [`ca`] - Cluster certificate authority lifecycle
//! - [`cert_secret`] - Server certificate secret construction
//! - [`pvc`] - Persistent claim resize and cleanup
//! - [`component`] - Gateway component reconciliation pipeline
//! - [`maintenance`] - Maintenance window evaluation
//! - [`resources`] - Kubernetes resource builders (StatefulSet, Deployment,
//!   Service, ConfigMap)
//! - [`error`] - Error types for operator operations
//!
//! ## Custom Resource Definition
//!
//! ```yaml
//! apiVersion: stratus.io/v1alpha1
//! kind: StratusCluster
//! metadata:
//!   name: production
//! spec:
//!   replicas: 3
//!   version: "0.1.0"
//!   storage:
//!     type: jbod
//!     volumes:
//!       - type: persistentClaim
//!         id: 0
//!         size: 100Gi
//!       - type: persistentClaim
//!         id: 1
//!         size: 100Gi
//!         deleteClaim: false
//!   ca:
//!     validityDays: 365
//!     renewalDays: 30
//!   maintenanceTimeWindows:
//!     - "* * 0-4 ? * SUN"
//!   gateway:
//!     storage:
//!       type: persistentClaim
//!       size: 20Gi
//! ```
//!
//! ## Security
//!
//! The operator applies secure defaults:
//!
//! - **Non-root containers**: `runAsNonRoot: true`
//! - **Read-only filesystem**: `readOnlyRootFilesystem: true`
//! - **Dropped capabilities**: All capabilities dropped
//! - **Seccomp profiles**: RuntimeDefault seccomp profile
//! - **Managed PKI**: per-cluster CA and gateway server certificates with
//!   automatic rotation
//!
//! ## Metrics
//!
//! The operator exposes Prometheus metrics:
//!
//! - `stratus_operator_reconciliations_total` - Total reconciliation attempts
//! - `stratus_operator_reconciliation_errors_total` - Reconciliation errors
//! - `stratus_operator_ca_renewals_total` - Cluster CA renewals
//! - `stratus_operator_reconciliation_duration_seconds` - Reconciliation latency

pub mod ca;
pub mod cert_secret;
pub mod component;
pub mod controller;
pub mod crd;
pub mod error;
pub mod maintenance;
pub mod pvc;
pub mod resource_operator;
pub mod resources;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::ca::{CaConfig, CertAndKey, CertificateAuthority};
    pub use crate::cert_secret::SecretCertBuilder;
    pub use crate::component::{ComponentReconciler, ReconciliationState};
    pub use crate::controller::{run_controller, ControllerContext, ControllerMetrics};
    pub use crate::crd::{
        BrokerConfig, CaSpec, ClusterCondition, ClusterPhase, DataVolume, GatewaySpec,
        MetricsSpec, PdbSpec, Storage, StratusCluster, StratusClusterSpec, StratusClusterStatus,
    };
    pub use crate::error::{OperatorError, Result};
    pub use crate::maintenance::is_maintenance_window_satisfied;
    pub use crate::pvc::PvcReconciler;
    pub use crate::resource_operator::{ReconcileResult, ResourceOperator};
    pub use crate::resources::ResourceBuilder;
}
