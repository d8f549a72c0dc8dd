//! Generic idempotent resource reconciliation
//!
//! Every Kubernetes resource the operator manages (Secret, Deployment,
//! ServiceAccount, ConfigMap, ...) goes through the same contract: fetch the
//! current object, compare it against the desired object, and converge with
//! the minimal operation. The outcome is reported as a [`ReconcileResult`] so
//! callers can distinguish "nothing to do" from "something changed" without
//! re-reading the cluster.

use crate::error::{OperatorError, Result};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// Field manager used for server-side apply patches
pub const FIELD_MANAGER: &str = "stratus-operator";

/// Label identifying resources owned by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Outcome of a single resource reconciliation.
///
/// `Noop` carries the current state of the resource (if any) so that callers
/// deciding on rolling restarts can inspect what is actually deployed.
#[derive(Debug, Clone)]
pub enum ReconcileResult<K> {
    /// The resource did not exist and was created
    Created(K),
    /// The resource existed but differed and was patched
    Patched(K),
    /// Desired and current state already matched (or both were absent)
    Noop(Option<K>),
    /// The resource existed but is no longer desired and was deleted
    Deleted,
}

impl<K> ReconcileResult<K> {
    /// The resource after reconciliation, if one exists
    pub fn resource(&self) -> Option<&K> {
        match self {
            ReconcileResult::Created(k) | ReconcileResult::Patched(k) => Some(k),
            ReconcileResult::Noop(k) => k.as_ref(),
            ReconcileResult::Deleted => None,
        }
    }

    /// True if the cluster state was already converged
    pub fn is_noop(&self) -> bool {
        matches!(self, ReconcileResult::Noop(_))
    }

    /// True if a patch was applied
    pub fn is_patched(&self) -> bool {
        matches!(self, ReconcileResult::Patched(_))
    }

    /// True if the resource was created
    pub fn is_created(&self) -> bool {
        matches!(self, ReconcileResult::Created(_))
    }
}

/// Idempotent operator over a single namespaced resource type.
pub struct ResourceOperator<K> {
    api: Api<K>,
    namespace: String,
}

impl<K> ResourceOperator<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    /// Create an operator scoped to a namespace
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    /// Fetch the current state of a resource, `None` if it does not exist
    pub async fn get(&self, name: &str) -> Result<Option<K>> {
        self.api.get_opt(name).await.map_err(OperatorError::from)
    }

    /// List resources matching a label selector
    pub async fn list(&self, label_selector: &str) -> Result<Vec<K>> {
        let lp = ListParams::default().labels(label_selector);
        let list = self.api.list(&lp).await?;
        Ok(list.items)
    }

    /// Converge the named resource towards `desired`.
    ///
    /// * `desired = Some(_)` and no current resource: create.
    /// * `desired = Some(_)` and current differs: server-side apply patch
    ///   (after an ownership check so resources managed by other controllers
    ///   are never hijacked).
    /// * `desired = Some(_)` and current matches: noop, carrying current.
    /// * `desired = None` and a current resource exists: delete.
    /// * `desired = None` and nothing exists: noop.
    ///
    /// A namespace/name mismatch between the arguments and the desired
    /// object's metadata is a programming error, reported as
    /// [`OperatorError::Internal`] and never retried.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        desired: Option<K>,
    ) -> Result<ReconcileResult<K>> {
        let kind = K::kind(&());

        if let Some(ref d) = desired {
            let meta = d.meta();
            let desired_name = meta.name.as_deref().unwrap_or_default();
            let desired_ns = meta.namespace.as_deref().unwrap_or_default();
            if desired_name != name || desired_ns != namespace {
                return Err(OperatorError::Internal(format!(
                    "desired {} is {}/{} but reconcile was called for {}/{}",
                    kind, desired_ns, desired_name, namespace, name
                )));
            }
        }
        if namespace != self.namespace {
            return Err(OperatorError::Internal(format!(
                "operator is scoped to namespace {} but was called for {}",
                self.namespace, namespace
            )));
        }

        let current = self.api.get_opt(name).await?;

        match (current, desired) {
            (None, None) => {
                debug!(kind = %kind, name = %name, "Nothing to reconcile");
                Ok(ReconcileResult::Noop(None))
            }
            (None, Some(desired)) => {
                debug!(kind = %kind, name = %name, "Creating resource");
                let created = self.apply(name, &desired).await?;
                Ok(ReconcileResult::Created(created))
            }
            (Some(_), None) => {
                debug!(kind = %kind, name = %name, "Deleting undesired resource");
                self.delete(name).await?;
                Ok(ReconcileResult::Deleted)
            }
            (Some(current), Some(desired)) => {
                let current_json = serde_json::to_value(&current)?;
                let desired_json = serde_json::to_value(&desired)?;
                if !needs_patch(&current_json, &desired_json) {
                    debug!(kind = %kind, name = %name, "Resource up to date");
                    return Ok(ReconcileResult::Noop(Some(current)));
                }
                verify_ownership(&current)?;
                debug!(kind = %kind, name = %name, "Patching resource");
                let patched = self.apply(name, &desired).await?;
                Ok(ReconcileResult::Patched(patched))
            }
        }
    }

    /// Delete a resource, tolerating concurrent deletion
    pub async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Server-side apply with this operator as field manager.
    ///
    /// `force()` takes ownership of every field in the patch, which is why
    /// [`verify_ownership`] runs first on the patch path.
    async fn apply(&self, name: &str, desired: &K) -> Result<K> {
        let patch_params = PatchParams::apply(FIELD_MANAGER).force();
        self.api
            .patch(name, &patch_params, &Patch::Apply(desired))
            .await
            .map_err(OperatorError::from)
    }
}

/// Verify the operator still owns a resource before force-applying.
///
/// Checks the `app.kubernetes.io/managed-by` label. A resource managed by a
/// different controller (Helm, another operator) is never force-applied.
pub fn verify_ownership<K: Resource>(existing: &K) -> Result<()> {
    let labels = existing.meta().labels.as_ref();
    let managed_by = labels.and_then(|l| l.get(MANAGED_BY_LABEL));
    match managed_by {
        Some(manager) if manager != FIELD_MANAGER => {
            let name = existing.meta().name.as_deref().unwrap_or("<unknown>");
            Err(OperatorError::InvalidConfig(format!(
                "resource '{}' is managed by '{}', not {}; \
                 refusing to force-apply to avoid ownership conflict",
                name, manager, FIELD_MANAGER
            )))
        }
        _ => Ok(()),
    }
}

/// Decide whether the current object must be patched to reach the desired
/// object.
///
/// Sections this operator owns outright (`data`, `stringData`, `type`) must
/// match exactly, so removed entries are detected. Everything else (`spec`,
/// desired labels and annotations) is compared as a semantic subset: fields
/// the API server populates (resourceVersion, managedFields, defaulted spec
/// fields, status) never trigger a patch loop.
pub fn needs_patch(current: &Value, desired: &Value) -> bool {
    for key in ["data", "stringData", "type"] {
        if let Some(d) = desired.get(key) {
            if current.get(key) != Some(d) {
                return true;
            }
        }
    }

    if let Some(d_spec) = desired.get("spec") {
        let c_spec = current.get("spec").unwrap_or(&Value::Null);
        if !is_semantic_subset(d_spec, c_spec) {
            return true;
        }
    }

    if let Some(d_meta) = desired.get("metadata") {
        for key in ["labels", "annotations"] {
            if let Some(d) = d_meta.get(key) {
                let c = current
                    .get("metadata")
                    .and_then(|m| m.get(key))
                    .unwrap_or(&Value::Null);
                if !is_semantic_subset(d, c) {
                    return true;
                }
            }
        }
    }

    false
}

/// True when every non-null field of `desired` is present with the same
/// value in `current`. Arrays compare element-wise and must have equal
/// length; scalars compare for equality.
fn is_semantic_subset(desired: &Value, current: &Value) -> bool {
    match desired {
        Value::Null => true,
        Value::Object(fields) => match current {
            Value::Object(current_fields) => fields.iter().all(|(k, v)| {
                v.is_null()
                    || current_fields
                        .get(k)
                        .is_some_and(|cv| is_semantic_subset(v, cv))
            }),
            _ => false,
        },
        Value::Array(items) => match current {
            Value::Array(current_items) => {
                items.len() == current_items.len()
                    && items
                        .iter()
                        .zip(current_items)
                        .all(|(d, c)| is_semantic_subset(d, c))
            }
            _ => false,
        },
        scalar => scalar == current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subset_ignores_server_populated_fields() {
        let desired = json!({
            "metadata": {"name": "x", "labels": {"a": "1"}},
            "spec": {"replicas": 3}
        });
        let current = json!({
            "metadata": {
                "name": "x",
                "labels": {"a": "1", "extra": "server"},
                "resourceVersion": "12345",
                "managedFields": [{"manager": "stratus-operator"}]
            },
            "spec": {"replicas": 3, "revisionHistoryLimit": 10},
            "status": {"readyReplicas": 3}
        });
        assert!(!needs_patch(&current, &desired));
    }

    #[test]
    fn test_changed_spec_field_triggers_patch() {
        let desired = json!({"spec": {"replicas": 5}});
        let current = json!({"spec": {"replicas": 3}});
        assert!(needs_patch(&current, &desired));
    }

    #[test]
    fn test_missing_annotation_triggers_patch() {
        let desired = json!({
            "metadata": {"annotations": {"stratus.io/ca-cert-generation": "2"}}
        });
        let current = json!({
            "metadata": {"annotations": {"stratus.io/ca-cert-generation": "1"}}
        });
        assert!(needs_patch(&current, &desired));
    }

    #[test]
    fn test_data_compares_exactly() {
        // A key removed from desired data must be detected as a change even
        // though the subset rule would call it equal.
        let desired = json!({"data": {"tls.crt": "Zm9v"}});
        let current = json!({"data": {"tls.crt": "Zm9v", "old.crt": "YmFy"}});
        assert!(needs_patch(&current, &desired));

        let same = json!({"data": {"tls.crt": "Zm9v"}});
        assert!(!needs_patch(&same, &desired));
    }

    #[test]
    fn test_nested_template_change_triggers_patch() {
        let desired = json!({
            "spec": {"template": {"metadata": {"annotations": {"stratus.io/restarted-at": "t1"}}}}
        });
        let current = json!({
            "spec": {"template": {"metadata": {"annotations": {"stratus.io/restarted-at": "t0"}}}}
        });
        assert!(needs_patch(&current, &desired));
        assert!(!needs_patch(&desired, &desired));
    }

    #[test]
    fn test_array_length_mismatch_triggers_patch() {
        let desired = json!({"spec": {"containers": [{"name": "a"}, {"name": "b"}]}});
        let current = json!({"spec": {"containers": [{"name": "a"}]}});
        assert!(needs_patch(&current, &desired));
    }

    #[test]
    fn test_idempotent_after_apply() {
        // After an apply the current object is a superset of desired, so a
        // second pass must report no patch needed.
        let desired = json!({
            "metadata": {"name": "gw", "labels": {"app.kubernetes.io/name": "stratus"}},
            "spec": {
                "replicas": 1,
                "template": {"spec": {"containers": [{"name": "gateway", "image": "img:1"}]}}
            }
        });
        let mut current = desired.clone();
        current["metadata"]["resourceVersion"] = json!("99");
        current["spec"]["progressDeadlineSeconds"] = json!(600);
        current["spec"]["template"]["spec"]["containers"][0]["imagePullPolicy"] =
            json!("IfNotPresent");
        assert!(!needs_patch(&current, &desired));
    }

    #[test]
    fn test_verify_ownership_rejects_foreign_manager() {
        use k8s_openapi::api::core::v1::ConfigMap;
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
        use std::collections::BTreeMap;

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), "helm".to_string());
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("other".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(verify_ownership(&cm).is_err());

        let unlabeled = ConfigMap::default();
        assert!(verify_ownership(&unlabeled).is_ok());
    }
}
