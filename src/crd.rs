//! Custom Resource Definitions for the Stratus Kubernetes Operator
//!
//! This module defines the `StratusCluster` CRD that represents a Stratus
//! distributed streaming cluster in Kubernetes, including its storage
//! layout, cluster CA settings, maintenance windows and the optional
//! gateway component.

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Regex for validating Kubernetes resource quantities (e.g., "10Gi", "100Mi")
static QUANTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").unwrap());

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Validate a Kubernetes resource quantity string
fn validate_quantity_str(value: &str) -> Result<(), ValidationError> {
    if QUANTITY_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_quantity")
            .with_message(format!("'{}' is not a valid Kubernetes quantity", value).into()))
    }
}

/// Validate a container image reference
fn validate_image(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty is allowed (uses default)
    }
    if value.len() > 255 {
        return Err(ValidationError::new("image_too_long")
            .with_message("image reference exceeds 255 characters".into()));
    }
    // Basic format check - not overly strict to allow various registries
    if value.contains("..") || value.starts_with('/') || value.starts_with('-') {
        return Err(ValidationError::new("invalid_image")
            .with_message(format!("'{}' is not a valid container image", value).into()));
    }
    Ok(())
}

/// Validate a Kubernetes name (RFC 1123 subdomain)
fn validate_k8s_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty is allowed for optional fields
    }
    if value.len() > 63 {
        return Err(
            ValidationError::new("name_too_long").with_message("name exceeds 63 characters".into())
        );
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// StratusCluster custom resource definition
///
/// Represents a Stratus distributed event streaming cluster deployment.
/// The operator watches these resources and reconciles the actual cluster
/// state to match the desired specification.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "stratus.io",
    version = "v1alpha1",
    kind = "StratusCluster",
    plural = "stratusclusters",
    shortname = "sc",
    namespaced,
    status = "StratusClusterStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"CA Gen", "type":"integer", "jsonPath":".status.caGeneration"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StratusClusterSpec {
    /// Number of broker replicas (1-100)
    #[serde(default = "default_replicas")]
    #[validate(range(min = 1, max = 100, message = "replicas must be between 1 and 100"))]
    pub replicas: i32,

    /// Stratus version to deploy
    #[serde(default = "default_version")]
    #[validate(length(min = 1, max = 64, message = "version must be 1-64 characters"))]
    pub version: String,

    /// Container image (overrides version-based default)
    #[serde(default)]
    #[validate(custom(function = "validate_optional_image"))]
    pub image: Option<String>,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default = "default_image_pull_policy")]
    #[validate(custom(function = "validate_pull_policy"))]
    pub image_pull_policy: String,

    /// Image pull secrets (max 10 secrets)
    #[serde(default)]
    #[validate(length(max = 10, message = "maximum 10 image pull secrets allowed"))]
    pub image_pull_secrets: Vec<String>,

    /// Broker storage configuration
    #[serde(default = "default_storage")]
    #[validate(custom(function = "validate_storage"))]
    pub storage: Storage,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(skip)]
    pub resources: Option<ResourceRequirements>,

    /// Broker configuration parameters
    #[serde(default)]
    #[validate(nested)]
    pub config: BrokerConfig,

    /// Cluster certificate authority configuration
    #[serde(default)]
    #[validate(nested)]
    pub ca: CaSpec,

    /// Cron expressions restricting disruptive operations (CA renewal,
    /// certificate rotation) to maintenance windows. Absent means no
    /// restriction.
    #[serde(default)]
    #[validate(length(max = 20, message = "maximum 20 maintenance windows allowed"))]
    pub maintenance_time_windows: Option<Vec<String>>,

    /// Optional gateway component exposing the cluster to external clients
    #[serde(default)]
    #[validate(nested)]
    pub gateway: Option<GatewaySpec>,

    /// Metrics configuration
    #[serde(default)]
    #[validate(nested)]
    pub metrics: MetricsSpec,

    /// Pod disruption budget configuration
    #[serde(default)]
    #[validate(nested)]
    pub pod_disruption_budget: PdbSpec,

    /// Node selector for pod scheduling (max 20 selectors)
    #[serde(default)]
    #[validate(custom(function = "validate_node_selector"))]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations for pod scheduling
    #[serde(default)]
    #[schemars(skip)]
    pub tolerations: Vec<k8s_openapi::api::core::v1::Toleration>,

    /// Additional pod annotations (max 50)
    #[serde(default)]
    #[validate(custom(function = "validate_annotations"))]
    pub pod_annotations: BTreeMap<String, String>,

    /// Additional pod labels (max 20)
    #[serde(default)]
    #[validate(custom(function = "validate_labels"))]
    pub pod_labels: BTreeMap<String, String>,
}

/// Validate optional image reference
fn validate_optional_image(image: &str) -> Result<(), ValidationError> {
    validate_image(image)
}

/// Validate image pull policy
fn validate_pull_policy(policy: &str) -> Result<(), ValidationError> {
    match policy {
        "Always" | "IfNotPresent" | "Never" => Ok(()),
        _ => Err(ValidationError::new("invalid_pull_policy")
            .with_message("imagePullPolicy must be Always, IfNotPresent, or Never".into())),
    }
}

/// Validate node selector map
fn validate_node_selector(selectors: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if selectors.len() > 20 {
        return Err(ValidationError::new("too_many_selectors")
            .with_message("maximum 20 node selectors allowed".into()));
    }
    for (key, value) in selectors {
        if key.len() > 253 || value.len() > 63 {
            return Err(ValidationError::new("selector_too_long")
                .with_message("selector key max 253 chars, value max 63 chars".into()));
        }
    }
    Ok(())
}

/// Validate optional Kubernetes name (for use with Option<String> fields)
fn validate_optional_k8s_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Ok(());
    }
    validate_k8s_name(name)
}

/// Validate annotations map
fn validate_annotations(annotations: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if annotations.len() > 50 {
        return Err(ValidationError::new("too_many_annotations")
            .with_message("maximum 50 annotations allowed".into()));
    }
    for (key, value) in annotations {
        if key.len() > 253 {
            return Err(ValidationError::new("annotation_key_too_long")
                .with_message(format!("annotation key '{}' exceeds 253 characters", key).into()));
        }
        if value.len() > 262144 {
            return Err(ValidationError::new("annotation_value_too_long")
                .with_message(format!("annotation '{}' value exceeds 256KB", key).into()));
        }
    }
    Ok(())
}

/// Validate labels map
fn validate_labels(labels: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if labels.len() > 20 {
        return Err(ValidationError::new("too_many_labels")
            .with_message("maximum 20 labels allowed".into()));
    }
    for (key, value) in labels {
        if key.len() > 253 || value.len() > 63 {
            return Err(ValidationError::new("label_too_long")
                .with_message("label key max 253 chars, value max 63 chars".into()));
        }
        // Labels must not override managed labels
        if key.starts_with("app.kubernetes.io/") {
            return Err(ValidationError::new("reserved_label").with_message(
                format!("label '{}' uses reserved prefix app.kubernetes.io/", key).into(),
            ));
        }
    }
    Ok(())
}

/// Storage configuration for broker or gateway data.
///
/// A sum type: exactly one of the variants applies, discriminated by the
/// `type` field. JBOD composes multiple single volumes, each of which must
/// carry a unique `id` so its claims can be told apart.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Storage {
    /// No persistent storage; data lives in an emptyDir and is lost on
    /// pod restart
    Ephemeral,

    /// A single persistent volume claim per pod
    #[serde(rename_all = "camelCase")]
    PersistentClaim {
        /// Requested size (e.g., "20Gi")
        #[serde(default = "default_storage_size")]
        size: String,

        /// Storage class name (empty uses the cluster default)
        #[serde(default)]
        storage_class_name: Option<String>,

        /// Volume id, required when used inside a JBOD array
        #[serde(default)]
        id: Option<i32>,

        /// Whether the claim is deleted when the cluster or component is
        /// scaled down or removed
        #[serde(default = "default_true")]
        delete_claim: bool,

        /// Label selector restricting which persistent volumes may be bound
        #[serde(default)]
        selector: Option<BTreeMap<String, String>>,
    },

    /// Just a bunch of disks: multiple single volumes per pod
    #[serde(rename_all = "camelCase")]
    Jbod {
        /// Component volumes; each must be a persistentClaim or ephemeral
        /// entry with a unique id
        volumes: Vec<Storage>,
    },
}

impl Default for Storage {
    fn default() -> Self {
        default_storage()
    }
}

/// One persistent volume flattened out of a [`Storage`] tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DataVolume {
    /// Volume id; `None` for a top-level single volume
    pub id: Option<i32>,
    pub size: String,
    pub storage_class_name: Option<String>,
    pub delete_claim: bool,
    pub selector: Option<BTreeMap<String, String>>,
}

impl Storage {
    /// Flatten the storage tree into the persistent volumes it describes.
    /// Ephemeral storage contributes none.
    pub fn flatten(&self) -> Vec<DataVolume> {
        match self {
            Storage::Ephemeral => Vec::new(),
            Storage::PersistentClaim {
                size,
                storage_class_name,
                id,
                delete_claim,
                selector,
            } => vec![DataVolume {
                id: *id,
                size: size.clone(),
                storage_class_name: storage_class_name.clone(),
                delete_claim: *delete_claim,
                selector: selector.clone(),
            }],
            Storage::Jbod { volumes } => volumes.iter().flat_map(|v| v.flatten()).collect(),
        }
    }

    /// True when at least one persistent volume is configured
    pub fn is_persistent(&self) -> bool {
        !self.flatten().is_empty()
    }
}

/// Validate a storage tree: quantities must parse, JBOD arrays must be
/// non-empty and flat, and every JBOD member must carry a unique id.
fn validate_storage(storage: &Storage) -> Result<(), ValidationError> {
    match storage {
        Storage::Ephemeral => Ok(()),
        Storage::PersistentClaim {
            size,
            storage_class_name,
            ..
        } => {
            validate_quantity_str(size)?;
            if let Some(class) = storage_class_name {
                validate_optional_k8s_name(class)?;
            }
            Ok(())
        }
        Storage::Jbod { volumes } => {
            if volumes.is_empty() {
                return Err(ValidationError::new("empty_jbod")
                    .with_message("JBOD storage requires at least one volume".into()));
            }
            let mut seen = std::collections::BTreeSet::new();
            for volume in volumes {
                match volume {
                    Storage::Jbod { .. } => {
                        return Err(ValidationError::new("nested_jbod")
                            .with_message("JBOD volumes cannot be nested".into()));
                    }
                    Storage::PersistentClaim { id, .. } => {
                        let id = id.ok_or_else(|| {
                            ValidationError::new("missing_volume_id")
                                .with_message("JBOD volumes must carry an id".into())
                        })?;
                        if !seen.insert(id) {
                            return Err(ValidationError::new("duplicate_volume_id")
                                .with_message(
                                    format!("JBOD volume id {} is used twice", id).into(),
                                ));
                        }
                        validate_storage(volume)?;
                    }
                    Storage::Ephemeral => {}
                }
            }
            Ok(())
        }
    }
}

/// Broker configuration parameters
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Default number of partitions for new streams (1-1000)
    #[serde(default = "default_partitions")]
    #[validate(range(min = 1, max = 1000, message = "partitions must be between 1 and 1000"))]
    pub default_partitions: i32,

    /// Default replication factor for new streams (1-10)
    #[serde(default = "default_replication_factor")]
    #[validate(range(
        min = 1,
        max = 10,
        message = "replication factor must be between 1 and 10"
    ))]
    pub default_replication_factor: i32,

    /// Log retention period in hours (1-8760, i.e., 1 hour to 1 year)
    #[serde(default = "default_log_retention_hours")]
    #[validate(range(
        min = 1,
        max = 8760,
        message = "retention hours must be between 1 and 8760"
    ))]
    pub log_retention_hours: i32,

    /// Compression algorithm (lz4, zstd, none)
    #[serde(default = "default_compression")]
    #[validate(custom(function = "validate_compression_type"))]
    pub compression_type: String,

    /// Additional raw configuration overrides (max 50 entries)
    #[serde(default)]
    #[validate(custom(function = "validate_raw_config"))]
    pub raw: BTreeMap<String, String>,
}

/// Validate compression type
fn validate_compression_type(compression: &str) -> Result<(), ValidationError> {
    match compression {
        "lz4" | "zstd" | "none" | "snappy" | "gzip" => Ok(()),
        _ => Err(ValidationError::new("invalid_compression")
            .with_message("compression must be one of: lz4, zstd, none, snappy, gzip".into())),
    }
}

/// Validate raw config map
fn validate_raw_config(config: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if config.len() > 50 {
        return Err(ValidationError::new("too_many_raw_configs")
            .with_message("maximum 50 raw configuration entries allowed".into()));
    }
    for (key, value) in config {
        if key.len() > 128 || value.len() > 4096 {
            return Err(ValidationError::new("raw_config_too_long")
                .with_message("raw config key max 128 chars, value max 4096 chars".into()));
        }
        // Prevent injection of dangerous config keys
        let forbidden_keys = ["command", "args", "image", "securityContext", "volumes"];
        if forbidden_keys.contains(&key.as_str()) {
            return Err(ValidationError::new("forbidden_raw_config")
                .with_message(format!("raw config key '{}' is not allowed", key).into()));
        }
    }
    Ok(())
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_partitions: default_partitions(),
            default_replication_factor: default_replication_factor(),
            log_retention_hours: default_log_retention_hours(),
            compression_type: default_compression(),
            raw: BTreeMap::new(),
        }
    }
}

/// Cluster certificate authority configuration.
///
/// Non-positive periods fall back to the defaults (365 / 30 days) at
/// reconciliation time.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CaSpec {
    /// Certificate validity period in days
    #[serde(default = "default_ca_validity_days")]
    #[validate(range(max = 3650, message = "validity must be at most 3650 days"))]
    pub validity_days: i32,

    /// Renewal period in days: certificates are renewed once they are this
    /// close to expiry (inside a maintenance window)
    #[serde(default = "default_ca_renewal_days")]
    #[validate(range(max = 3650, message = "renewal period must be at most 3650 days"))]
    pub renewal_days: i32,

    /// Days an expired CA certificate is retained in the trust bundle
    /// before removal
    #[serde(default)]
    #[validate(range(min = 0, max = 365, message = "grace period must be 0-365 days"))]
    pub bundle_grace_days: i32,
}

impl Default for CaSpec {
    fn default() -> Self {
        Self {
            validity_days: default_ca_validity_days(),
            renewal_days: default_ca_renewal_days(),
            bundle_grace_days: 0,
        }
    }
}

/// Gateway component configuration. One gateway pod per cluster.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Container image (overrides version-based default)
    #[serde(default)]
    #[validate(custom(function = "validate_optional_image"))]
    pub image: Option<String>,

    /// Gateway storage configuration
    #[serde(default = "default_storage")]
    #[validate(custom(function = "validate_storage"))]
    pub storage: Storage,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(skip)]
    pub resources: Option<ResourceRequirements>,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port (1024-65535, must be unprivileged)
    #[serde(default = "default_metrics_port")]
    #[validate(range(
        min = 1024,
        max = 65535,
        message = "metrics port must be between 1024 and 65535"
    ))]
    pub port: i32,
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

/// Pod Disruption Budget configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PdbSpec {
    /// Enable PDB creation
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum available pods (mutually exclusive with maxUnavailable)
    /// Can be an integer or percentage (e.g., "50%")
    #[serde(default)]
    #[validate(custom(function = "validate_optional_int_or_percent"))]
    pub min_available: Option<String>,

    /// Maximum unavailable pods
    /// Can be an integer or percentage (e.g., "25%")
    #[serde(default = "default_max_unavailable")]
    #[validate(custom(function = "validate_optional_int_or_percent"))]
    pub max_unavailable: Option<String>,
}

/// Validate integer or percentage string (for Option<String> fields)
fn validate_optional_int_or_percent(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    static INT_OR_PERCENT_REGEX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([0-9]+|[0-9]+%)$").unwrap());
    if !INT_OR_PERCENT_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_int_or_percent").with_message(
            format!(
                "'{}' must be an integer or percentage (e.g., '1' or '25%')",
                value
            )
            .into(),
        ));
    }
    Ok(())
}

impl Default for PdbSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            min_available: None,
            max_unavailable: Some("1".to_string()),
        }
    }
}

/// Status of a StratusCluster resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StratusClusterStatus {
    /// Current phase of the cluster
    pub phase: ClusterPhase,

    /// Total number of broker replicas
    pub replicas: i32,

    /// Number of ready broker replicas
    pub ready_replicas: i32,

    /// Number of updated broker replicas
    pub updated_replicas: i32,

    /// Current observed generation
    pub observed_generation: i64,

    /// Generation of the cluster CA certificate
    pub ca_generation: i64,

    /// Conditions describing cluster state
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,

    /// Last time the status was updated
    pub last_updated: Option<String>,

    /// Error message if any
    pub message: Option<String>,
}

/// Phase of the cluster lifecycle
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Cluster is being created
    #[default]
    Pending,
    /// Cluster is being provisioned
    Provisioning,
    /// Cluster is running and healthy
    Running,
    /// Cluster is updating/rolling
    Updating,
    /// Cluster is in degraded state
    Degraded,
    /// Cluster has failed
    Failed,
    /// Cluster is being deleted
    Terminating,
}

/// Condition describing an aspect of cluster state
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, Unknown)
    pub status: String,

    /// Reason for the condition
    pub reason: Option<String>,

    /// Human-readable message
    pub message: Option<String>,

    /// Last transition time
    pub last_transition_time: Option<String>,
}

// Default value functions
fn default_replicas() -> i32 {
    3
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_storage_size() -> String {
    "20Gi".to_string()
}

fn default_storage() -> Storage {
    Storage::PersistentClaim {
        size: default_storage_size(),
        storage_class_name: None,
        id: None,
        delete_claim: true,
        selector: None,
    }
}

fn default_partitions() -> i32 {
    3
}

fn default_replication_factor() -> i32 {
    2
}

fn default_log_retention_hours() -> i32 {
    168 // 7 days
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_ca_validity_days() -> i32 {
    365
}

fn default_ca_renewal_days() -> i32 {
    30
}

fn default_metrics_port() -> i32 {
    9090
}

fn default_max_unavailable() -> Option<String> {
    Some("1".to_string())
}

fn default_true() -> bool {
    true
}

impl StratusClusterSpec {
    /// Get the full broker container image including version
    pub fn get_image(&self) -> String {
        if let Some(ref image) = self.image {
            image.clone()
        } else {
            format!("ghcr.io/stratus-io/stratus:{}", self.version)
        }
    }

    /// Get the gateway container image
    pub fn get_gateway_image(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.image.clone())
            .unwrap_or_else(|| format!("ghcr.io/stratus-io/stratus-gateway:{}", self.version))
    }

    /// Get labels for managed resources of a component
    pub fn get_labels(&self, cluster_name: &str, component: &str) -> BTreeMap<String, String> {
        let mut labels = self.get_selector_labels(cluster_name, component);
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "stratus-operator".to_string(),
        );
        labels.insert(
            "app.kubernetes.io/version".to_string(),
            self.version.clone(),
        );
        labels
    }

    /// Get selector labels for managed resources of a component
    pub fn get_selector_labels(
        &self,
        cluster_name: &str,
        component: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/name".to_string(), "stratus".to_string());
        labels.insert(
            "app.kubernetes.io/instance".to_string(),
            cluster_name.to_string(),
        );
        labels.insert(
            "app.kubernetes.io/component".to_string(),
            component.to_string(),
        );
        labels
    }
}
