//! Component certificate secrets
//!
//! Builds the desired TLS secret for a component from the cluster CA and the
//! secret currently deployed. Certificates are regenerated only when one of
//! four conditions holds; otherwise the existing material is reused verbatim
//! so that healthy components are never rotated by accident.

use crate::ca::{secret_data_string, CertificateAuthority, ANNO_CA_CERT_GENERATION};
use crate::resource_operator::{FIELD_MANAGER, MANAGED_BY_LABEL};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Builder for a component's certificate secret.
pub struct SecretCertBuilder<'a> {
    ca: &'a CertificateAuthority,
    namespace: &'a str,
    secret_name: &'a str,
    /// Data key prefix, e.g. `gateway` for `gateway.key` / `gateway.crt`
    identity: &'a str,
    common_name: &'a str,
    alt_names: &'a [String],
    labels: BTreeMap<String, String>,
    owner: OwnerReference,
}

impl<'a> SecretCertBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ca: &'a CertificateAuthority,
        namespace: &'a str,
        secret_name: &'a str,
        identity: &'a str,
        common_name: &'a str,
        alt_names: &'a [String],
        labels: BTreeMap<String, String>,
        owner: OwnerReference,
    ) -> Self {
        Self {
            ca,
            namespace,
            secret_name,
            identity,
            common_name,
            alt_names,
            labels,
            owner,
        }
    }

    fn key_key(&self) -> String {
        format!("{}.key", self.identity)
    }

    fn cert_key(&self) -> String {
        format!("{}.crt", self.identity)
    }

    fn keystore_key(&self) -> String {
        format!("{}.p12", self.identity)
    }

    fn password_key(&self) -> String {
        format!("{}.password", self.identity)
    }

    /// Build the desired secret.
    ///
    /// Regeneration happens when any of these hold, checked in order:
    /// 1. no existing secret (or it lacks the key/cert entries),
    /// 2. the CA key was created or renewed this cycle,
    /// 3. the certificate is expiring and a maintenance window is open,
    /// 4. the existing secret was stamped by a different CA generation.
    ///
    /// Otherwise the existing key and certificate are reused; an existing
    /// keystore and password are carried over, and legacy secrets that lack
    /// them get a keystore synthesized without re-signing.
    ///
    /// A signing failure never fails the cycle: the previous contents are
    /// retained and a warning is logged, trading forced rotation for
    /// availability.
    pub fn build(
        &self,
        existing: Option<&Secret>,
        maintenance_window_satisfied: bool,
        now: DateTime<Utc>,
    ) -> Secret {
        let mut reasons = Vec::new();

        let has_material = existing.is_some_and(|s| {
            secret_data_string(s, &self.key_key()).is_some()
                && secret_data_string(s, &self.cert_key()).is_some()
        });
        if !has_material {
            reasons.push("missing secret or certificate material");
        }
        if self.ca.key_replaced_this_cycle() {
            reasons.push("CA key was created or renewed");
        }
        if let Some(existing) = existing {
            if has_material
                && maintenance_window_satisfied
                && self.ca.is_expiring(existing, &self.cert_key(), now)
            {
                reasons.push("certificate is within its renewal period");
            }
            if self.ca.has_ca_cert_generation_changed(existing) {
                reasons.push("CA certificate generation changed");
            }
        }

        let data = match (reasons.is_empty(), existing) {
            (true, Some(existing)) => self.reuse_data(existing),
            _ => {
                debug!(
                    secret = self.secret_name,
                    reasons = ?reasons,
                    "Regenerating certificate secret"
                );
                self.regenerate_data(existing, now)
            }
        };

        self.assemble(data)
    }

    /// Carry over the deployed material, synthesizing the keystore entries
    /// for legacy secrets that only hold key and cert.
    fn reuse_data(&self, existing: &Secret) -> BTreeMap<String, ByteString> {
        let mut data = BTreeMap::new();
        for key in [self.key_key(), self.cert_key()] {
            if let Some(value) = existing.data.as_ref().and_then(|d| d.get(&key)) {
                data.insert(key, value.clone());
            }
        }

        let keystore = existing.data.as_ref().and_then(|d| d.get(&self.keystore_key()));
        let password = existing.data.as_ref().and_then(|d| d.get(&self.password_key()));
        match (keystore, password) {
            (Some(keystore), Some(password)) => {
                data.insert(self.keystore_key(), keystore.clone());
                data.insert(self.password_key(), password.clone());
            }
            _ => {
                // reuse_data callers have checked both entries exist
                let key_pem = secret_data_string(existing, &self.key_key()).unwrap_or_default();
                let cert_pem = secret_data_string(existing, &self.cert_key()).unwrap_or_default();
                match self.ca.build_keystore(&key_pem, &cert_pem) {
                    Ok((keystore, password)) => {
                        debug!(
                            secret = self.secret_name,
                            "Synthesized keystore for legacy certificate secret"
                        );
                        data.insert(self.keystore_key(), ByteString(keystore));
                        data.insert(self.password_key(), ByteString(password.into_bytes()));
                    }
                    Err(e) => {
                        warn!(
                            secret = self.secret_name,
                            error = %e,
                            "Failed to synthesize keystore; keeping key and certificate only"
                        );
                    }
                }
            }
        }
        data
    }

    fn regenerate_data(
        &self,
        existing: Option<&Secret>,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, ByteString> {
        match self
            .ca
            .generate_signed_cert(self.common_name, self.alt_names, now)
        {
            Ok(issued) => BTreeMap::from([
                (self.key_key(), ByteString(issued.key.into_bytes())),
                (self.cert_key(), ByteString(issued.cert.into_bytes())),
                (self.keystore_key(), ByteString(issued.keystore)),
                (
                    self.password_key(),
                    ByteString(issued.store_password.into_bytes()),
                ),
            ]),
            Err(e) => {
                warn!(
                    secret = self.secret_name,
                    error = %e,
                    "Certificate generation failed; retaining previous secret contents"
                );
                existing
                    .and_then(|s| s.data.clone())
                    .unwrap_or_default()
            }
        }
    }

    fn assemble(&self, data: BTreeMap<String, ByteString>) -> Secret {
        let mut labels = self.labels.clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string());

        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNO_CA_CERT_GENERATION.to_string(),
            self.ca.generation().to_string(),
        );

        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name.to_string()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                owner_references: Some(vec![self.owner.clone()]),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// True only when a data key present in **both** secrets changed value.
/// Entries that exist on just one side (scale-up, scale-down) do not count
/// as a certificate change.
pub fn existing_certs_differ(current: &Secret, desired: &Secret) -> bool {
    let (Some(current_data), Some(desired_data)) = (&current.data, &desired.data) else {
        return false;
    };
    for (key, current_value) in current_data {
        if let Some(desired_value) = desired_data.get(key) {
            if current_value != desired_value {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{ca_cert_generation, CaConfig, INIT_GENERATION};

    fn test_config(validity: i32, renewal: i32) -> CaConfig {
        CaConfig::new(validity, renewal, 0).unwrap()
    }

    /// A CA as if loaded from its secrets, optionally stamped with a
    /// different generation.
    fn loaded_ca(config: CaConfig, generation: Option<i64>) -> CertificateAuthority {
        let ca = CertificateAuthority::bootstrap("prod", config, Utc::now()).unwrap();
        let (key_secret, mut cert_secret) =
            ca.build_secrets("default", BTreeMap::new(), OwnerReference::default());
        if let Some(generation) = generation {
            cert_secret
                .metadata
                .annotations
                .as_mut()
                .unwrap()
                .insert(ANNO_CA_CERT_GENERATION.to_string(), generation.to_string());
        }
        CertificateAuthority::from_secrets("prod", config, &key_secret, &cert_secret).unwrap()
    }

    fn builder<'a>(ca: &'a CertificateAuthority) -> SecretCertBuilder<'a> {
        SecretCertBuilder::new(
            ca,
            "default",
            "stratus-prod-gateway-certs",
            "gateway",
            "stratus-prod-gateway",
            &[],
            BTreeMap::new(),
            OwnerReference::default(),
        )
    }

    #[test]
    fn test_missing_secret_generates_material() {
        let ca = loaded_ca(test_config(365, 30), None);
        let secret = builder(&ca).build(None, true, Utc::now());

        let data = secret.data.as_ref().unwrap();
        assert!(data.contains_key("gateway.key"));
        assert!(data.contains_key("gateway.crt"));
        assert!(data.contains_key("gateway.p12"));
        assert!(data.contains_key("gateway.password"));
        assert_eq!(ca_cert_generation(&secret), INIT_GENERATION);
    }

    #[test]
    fn test_healthy_certificate_is_reused() {
        // Certificate valid for 40 days, renewal period 30 days: untouched.
        let now = Utc::now();
        let ca = loaded_ca(test_config(40, 30), None);
        let first = builder(&ca).build(None, true, now);

        let second = builder(&ca).build(Some(&first), true, now);

        assert_eq!(first.data, second.data);
        assert!(!existing_certs_differ(&first, &second));
    }

    #[test]
    fn test_expiring_certificate_regenerates_inside_window() {
        // Certificate valid for 10 days, renewal period 30 days (from a CA
        // stamped generation 3): regenerated, new annotation carried.
        let now = Utc::now();
        let issuing_ca = loaded_ca(test_config(10, 5), None);
        let deployed = builder(&issuing_ca).build(None, true, now);

        let ca = loaded_ca(test_config(365, 30), Some(3));
        let desired = builder(&ca).build(Some(&deployed), true, now);

        assert_ne!(
            deployed.data.as_ref().unwrap().get("gateway.crt"),
            desired.data.as_ref().unwrap().get("gateway.crt")
        );
        assert_eq!(
            desired
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(ANNO_CA_CERT_GENERATION),
            Some(&"3".to_string())
        );
        assert!(existing_certs_differ(&deployed, &desired));
    }

    #[test]
    fn test_expiring_certificate_kept_outside_window() {
        let now = Utc::now();
        let issuing_ca = loaded_ca(test_config(10, 5), None);
        let deployed = builder(&issuing_ca).build(None, true, now);

        // Generation matches, CA not renewed, window closed: reuse
        let ca = loaded_ca(test_config(365, 30), None);
        let desired = builder(&ca).build(Some(&deployed), false, now);

        assert_eq!(deployed.data, desired.data);
    }

    #[test]
    fn test_ca_renewal_forces_regeneration() {
        let now = Utc::now();
        let mut ca = loaded_ca(test_config(365, 30), None);
        let deployed = builder(&ca).build(None, true, now);

        ca.maybe_renew(true, false, now).unwrap();
        assert!(ca.key_replaced_this_cycle());

        let desired = builder(&ca).build(Some(&deployed), false, now);

        assert_ne!(
            deployed.data.as_ref().unwrap().get("gateway.crt"),
            desired.data.as_ref().unwrap().get("gateway.crt")
        );
        assert_eq!(
            desired
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(ANNO_CA_CERT_GENERATION),
            Some(&"1".to_string())
        );
    }

    #[test]
    fn test_generation_drift_forces_regeneration() {
        let now = Utc::now();
        let issuing_ca = loaded_ca(test_config(365, 30), None);
        let deployed = builder(&issuing_ca).build(None, true, now);

        // Same material but stamped generation 2
        let ca = loaded_ca(test_config(365, 30), Some(2));
        let desired = builder(&ca).build(Some(&deployed), false, now);

        assert_ne!(
            deployed.data.as_ref().unwrap().get("gateway.crt"),
            desired.data.as_ref().unwrap().get("gateway.crt")
        );
    }

    #[test]
    fn test_legacy_secret_gets_keystore_without_resigning() {
        let now = Utc::now();
        let ca = loaded_ca(test_config(365, 30), None);
        let mut deployed = builder(&ca).build(None, true, now);

        // Strip the keystore entries, as an old operator version would have
        // written the secret
        let data = deployed.data.as_mut().unwrap();
        let old_crt = data.get("gateway.crt").cloned().unwrap();
        data.remove("gateway.p12");
        data.remove("gateway.password");

        let desired = builder(&ca).build(Some(&deployed), true, now);
        let desired_data = desired.data.as_ref().unwrap();

        assert_eq!(desired_data.get("gateway.crt"), Some(&old_crt));
        assert!(desired_data.contains_key("gateway.p12"));
        assert!(desired_data.contains_key("gateway.password"));
    }

    #[test]
    fn test_existing_certs_differ_ignores_one_sided_keys() {
        let a = Secret {
            data: Some(BTreeMap::from([
                ("gw-0.crt".to_string(), ByteString(b"aaa".to_vec())),
                ("gw-1.crt".to_string(), ByteString(b"bbb".to_vec())),
            ])),
            ..Default::default()
        };
        // Scale-up: gw-2 added, shared entries unchanged
        let b = Secret {
            data: Some(BTreeMap::from([
                ("gw-0.crt".to_string(), ByteString(b"aaa".to_vec())),
                ("gw-1.crt".to_string(), ByteString(b"bbb".to_vec())),
                ("gw-2.crt".to_string(), ByteString(b"ccc".to_vec())),
            ])),
            ..Default::default()
        };
        assert!(!existing_certs_differ(&a, &b));

        // Shared entry changed
        let c = Secret {
            data: Some(BTreeMap::from([
                ("gw-0.crt".to_string(), ByteString(b"zzz".to_vec())),
                ("gw-1.crt".to_string(), ByteString(b"bbb".to_vec())),
            ])),
            ..Default::default()
        };
        assert!(existing_certs_differ(&a, &c));
        assert!(!existing_certs_differ(&Secret::default(), &a));
    }
}
