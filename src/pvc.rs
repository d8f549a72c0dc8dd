//! Persistent volume claim reconciliation
//!
//! PVCs are immutable apart from their requested size, and even size changes
//! depend on the bound StorageClass. This module creates missing claims,
//! grows claims in place where the StorageClass allows it, marks the owning
//! pod for restart where it does not, and deletes orphaned claims that opted
//! in via the delete-claim annotation.

use crate::error::{OperatorError, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Annotation opting a claim into deletion when its cluster or component is
/// scaled down or removed
pub const ANNO_DELETE_CLAIM: &str = "stratus.io/delete-claim";

/// What to do about an existing claim whose size differs from the desired
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResizeAction {
    /// Sizes match
    None,
    /// StorageClass supports expansion and the size grows: patch in place
    Expand,
    /// StorageClass supports expansion but the size shrinks: reject
    RejectShrink,
    /// StorageClass does not support expansion: leave the claim untouched
    /// and restart the owning pod so it can observe the mismatch
    RestartPod,
}

fn resize_action(current: i128, desired: i128, expansion_supported: bool) -> ResizeAction {
    if current == desired {
        ResizeAction::None
    } else if !expansion_supported {
        ResizeAction::RestartPod
    } else if desired > current {
        ResizeAction::Expand
    } else {
        ResizeAction::RejectShrink
    }
}

/// Reconciler for a component's persistent volume claims.
pub struct PvcReconciler {
    pvcs: Api<PersistentVolumeClaim>,
    storage_classes: Api<StorageClass>,
}

impl PvcReconciler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pvcs: Api::namespaced(client.clone(), namespace),
            storage_classes: Api::all(client),
        }
    }

    /// Converge the desired claims, returning the set of pod indices that
    /// need a restart because their claim could not be resized in place.
    ///
    /// Shrinking a claim on an expansion-capable StorageClass is a
    /// configuration error; the claim is never mutated.
    pub async fn resize_and_reconcile(
        &self,
        desired: &[PersistentVolumeClaim],
    ) -> Result<BTreeSet<i32>> {
        let mut restart_pods = BTreeSet::new();

        for pvc in desired {
            let name = pvc.metadata.name.as_deref().ok_or_else(|| {
                OperatorError::Internal("desired PVC is missing metadata.name".to_string())
            })?;

            let current = match self.pvcs.get_opt(name).await? {
                Some(current) => current,
                None => {
                    info!(pvc = %name, "Creating PersistentVolumeClaim");
                    let patch_params =
                        PatchParams::apply(crate::resource_operator::FIELD_MANAGER).force();
                    self.pvcs.patch(name, &patch_params, &Patch::Apply(pvc)).await?;
                    continue;
                }
            };

            let desired_size = requested_storage(pvc)?;
            let current_size = requested_storage(&current)?;
            let expansion_supported = self.allows_expansion(&current).await?;

            match resize_action(current_size, desired_size, expansion_supported) {
                ResizeAction::None => {
                    debug!(pvc = %name, "PersistentVolumeClaim up to date");
                }
                ResizeAction::Expand => {
                    info!(pvc = %name, "Expanding PersistentVolumeClaim in place");
                    self.patch_size(name, pvc).await?;
                }
                ResizeAction::RejectShrink => {
                    return Err(OperatorError::InvalidConfig(format!(
                        "cannot shrink PersistentVolumeClaim {}: decreasing storage is not supported",
                        name
                    )));
                }
                ResizeAction::RestartPod => {
                    let index = pod_index(name)?;
                    info!(
                        pvc = %name,
                        pod_index = index,
                        "StorageClass does not support volume expansion; marking pod for restart"
                    );
                    restart_pods.insert(index);
                }
            }
        }

        Ok(restart_pods)
    }

    /// Delete claims that exist but are no longer desired. Only claims whose
    /// delete-claim annotation is `true` are removed; all others are kept
    /// and logged. Idempotent: concurrent deletion is tolerated.
    pub async fn delete_persistent_claims(
        &self,
        existing: &[PersistentVolumeClaim],
        desired: &[PersistentVolumeClaim],
    ) -> Result<()> {
        let desired_names: BTreeSet<&str> = desired
            .iter()
            .filter_map(|p| p.metadata.name.as_deref())
            .collect();

        for pvc in existing {
            let Some(name) = pvc.metadata.name.as_deref() else {
                continue;
            };
            if desired_names.contains(name) {
                continue;
            }

            if delete_claim_allowed(pvc) {
                info!(pvc = %name, "Deleting orphaned PersistentVolumeClaim");
                match self.pvcs.delete(name, &DeleteParams::default()).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            } else {
                info!(
                    pvc = %name,
                    "Orphaned PersistentVolumeClaim is not annotated for deletion; keeping it"
                );
            }
        }

        Ok(())
    }

    async fn allows_expansion(&self, current: &PersistentVolumeClaim) -> Result<bool> {
        let class_name = current
            .spec
            .as_ref()
            .and_then(|s| s.storage_class_name.as_deref());
        let Some(class_name) = class_name else {
            return Ok(false);
        };
        match self.storage_classes.get_opt(class_name).await? {
            Some(class) => Ok(class.allow_volume_expansion.unwrap_or(false)),
            None => {
                warn!(storage_class = %class_name, "StorageClass not found; assuming no expansion support");
                Ok(false)
            }
        }
    }

    async fn patch_size(&self, name: &str, desired: &PersistentVolumeClaim) -> Result<()> {
        let size = desired
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .ok_or_else(|| {
                OperatorError::Internal(format!("desired PVC {} has no storage request", name))
            })?;

        let patch = serde_json::json!({
            "spec": {"resources": {"requests": {"storage": size}}}
        });
        self.pvcs
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// True when the claim opted into deletion via [`ANNO_DELETE_CLAIM`]
pub fn delete_claim_allowed(pvc: &PersistentVolumeClaim) -> bool {
    pvc.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNO_DELETE_CLAIM))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// The requested storage of a claim, in bytes
fn requested_storage(pvc: &PersistentVolumeClaim) -> Result<i128> {
    let name = pvc.metadata.name.as_deref().unwrap_or("<unnamed>");
    let quantity = pvc
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .ok_or_else(|| {
            OperatorError::InvalidConfig(format!("PVC {} has no storage request", name))
        })?;
    parse_quantity(quantity)
}

/// Parse a Kubernetes resource quantity into bytes. Supports plain integers,
/// decimal fractions, decimal exponents (`123e6`), binary suffixes (Ki..Ei)
/// and SI suffixes (k..E). All arithmetic is exact integer arithmetic, so
/// values beyond f64's 53-bit mantissa compare correctly; sub-byte remainders
/// round to the nearest byte.
pub fn parse_quantity(quantity: &Quantity) -> Result<i128> {
    let s = quantity.0.trim();
    let invalid = || OperatorError::InvalidConfig(format!("'{}' is not a valid quantity", s));

    // Find where the number ends and the suffix begins. An 'e'/'E' followed
    // by a (signed) digit belongs to the number as a decimal exponent; a
    // bare trailing 'E' is the exa suffix.
    let bytes = s.as_bytes();
    let mut split = s.len();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_digit() || c == b'.' {
            i += 1;
        } else if (c == b'e' || c == b'E')
            && matches!(bytes.get(i + 1), Some(b) if b.is_ascii_digit() || *b == b'+' || *b == b'-')
        {
            i += 2;
        } else {
            split = i;
            break;
        }
    }
    let (number, suffix) = s.split_at(split);

    let multiplier: i128 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        _ => {
            return Err(OperatorError::InvalidConfig(format!(
                "'{}' has an unsupported quantity suffix",
                s
            )))
        }
    };

    let (base, exp) = match number.split_once(['e', 'E']) {
        Some((base, exp)) => (base, exp.parse::<i32>().map_err(|_| invalid())?),
        None => (number, 0),
    };
    let (int_part, frac_part) = match base.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (base, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let mut mantissa: i128 = 0;
    for digit in int_part.bytes().chain(frac_part.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add((digit - b'0') as i128))
            .ok_or_else(invalid)?;
    }

    let value = mantissa.checked_mul(multiplier).ok_or_else(invalid)?;
    let net_exp = exp - frac_part.len() as i32;
    if net_exp >= 0 {
        (0..net_exp)
            .try_fold(value, |v, _| v.checked_mul(10))
            .ok_or_else(invalid)
    } else {
        let divisor = (0..-net_exp)
            .try_fold(1i128, |d, _| d.checked_mul(10))
            .ok_or_else(invalid)?;
        Ok((value + divisor / 2) / divisor)
    }
}

/// Ordinal of the pod owning a claim, parsed from the trailing `-<n>` of the
/// claim name. Claim names are operator-generated, so a parse failure is a
/// programming error.
pub fn pod_index(pvc_name: &str) -> Result<i32> {
    pvc_name
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            OperatorError::Internal(format!(
                "PVC name '{}' does not end in a pod ordinal",
                pvc_name
            ))
        })
}
