//! Cluster certificate authority lifecycle
//!
//! Each cluster owns a self-signed CA whose state lives in two secrets:
//! `<cluster>-ca` holds the private key (`ca.key`) and `<cluster>-ca-cert`
//! holds the current certificate (`ca.crt`) plus retained old certificates
//! under `ca-<generation>-<not-after>.crt` keys. The cert secret carries a monotonically
//! increasing generation counter as an annotation; every certificate signed
//! by the CA is stamped with the generation that signed it, which is how
//! downstream secrets detect that they were issued by an outdated CA.

use crate::error::{OperatorError, Result};
use crate::resource_operator::{ResourceOperator, MANAGED_BY_LABEL};
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::Client;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// Annotation carrying the CA generation that signed a secret's certificates
pub const ANNO_CA_CERT_GENERATION: &str = "stratus.io/ca-cert-generation";

/// Annotation on the CA cert secret requesting an immediate renewal
pub const ANNO_FORCE_RENEW: &str = "stratus.io/force-renew";

/// Generation assigned to a freshly created CA
pub const INIT_GENERATION: i64 = 0;

/// Data key for the CA private key in the key secret
pub const CA_KEY: &str = "ca.key";

/// Data key for the current CA certificate in the cert secret
pub const CA_CRT: &str = "ca.crt";

const DEFAULT_VALIDITY_DAYS: i32 = 365;
const DEFAULT_RENEWAL_DAYS: i32 = 30;

/// Name of the secret holding the CA private key
pub fn ca_key_secret_name(cluster: &str) -> String {
    format!("{}-ca", cluster)
}

/// Name of the secret holding the CA certificate and trust bundle
pub fn ca_cert_secret_name(cluster: &str) -> String {
    format!("{}-ca-cert", cluster)
}

/// Validity and renewal configuration for a CA.
///
/// Periods are whole days. Non-positive values fall back to the defaults
/// (365 / 30); a renewal period that is not shorter than the validity period
/// is a configuration error.
#[derive(Debug, Clone, Copy)]
pub struct CaConfig {
    validity_days: i32,
    renewal_days: i32,
    bundle_grace_days: i32,
}

impl CaConfig {
    pub fn new(validity_days: i32, renewal_days: i32, bundle_grace_days: i32) -> Result<Self> {
        let validity_days = if validity_days <= 0 {
            DEFAULT_VALIDITY_DAYS
        } else {
            validity_days
        };
        let renewal_days = if renewal_days <= 0 {
            DEFAULT_RENEWAL_DAYS
        } else {
            renewal_days
        };
        if renewal_days >= validity_days {
            return Err(OperatorError::InvalidConfig(format!(
                "CA renewal period ({} days) must be shorter than the validity period ({} days)",
                renewal_days, validity_days
            )));
        }
        Ok(Self {
            validity_days,
            renewal_days,
            bundle_grace_days: bundle_grace_days.max(0),
        })
    }

    pub fn validity(&self) -> Duration {
        Duration::days(self.validity_days as i64)
    }

    pub fn renewal(&self) -> Duration {
        Duration::days(self.renewal_days as i64)
    }

    pub fn bundle_grace(&self) -> Duration {
        Duration::days(self.bundle_grace_days as i64)
    }
}

/// A freshly issued private key and certificate, with the PKCS#12 keystore
/// form most operands consume.
pub struct CertAndKey {
    /// Private key, PEM
    pub key: String,
    /// Certificate, PEM
    pub cert: String,
    /// PKCS#12 keystore containing key, cert and the issuing CA cert
    pub keystore: Vec<u8>,
    /// Password protecting the keystore
    pub store_password: String,
}

/// In-memory CA state for one reconciliation cycle.
pub struct CertificateAuthority {
    cluster: String,
    config: CaConfig,
    key_pem: String,
    cert_pem: String,
    generation: i64,
    /// Retained old certificates, keyed `ca-<generation>-<not-after>.crt`
    trust_bundle: BTreeMap<String, String>,
    generated_this_cycle: bool,
    renewed_this_cycle: bool,
    certs_removed: bool,
}

impl CertificateAuthority {
    /// Create a brand-new self-signed CA at [`INIT_GENERATION`].
    pub fn bootstrap(
        cluster: &str,
        config: CaConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let (key_pem, cert_pem) = generate_ca_cert(cluster, &config, now)?;
        info!(cluster = %cluster, "Generated new cluster CA");
        Ok(Self {
            cluster: cluster.to_string(),
            config,
            key_pem,
            cert_pem,
            generation: INIT_GENERATION,
            trust_bundle: BTreeMap::new(),
            generated_this_cycle: true,
            renewed_this_cycle: false,
            certs_removed: false,
        })
    }

    /// Restore CA state loaded from the secret pair.
    pub fn from_state(
        cluster: &str,
        config: CaConfig,
        key_pem: String,
        cert_pem: String,
        generation: i64,
        trust_bundle: BTreeMap<String, String>,
    ) -> Result<Self> {
        KeyPair::from_pem(&key_pem)
            .map_err(|e| OperatorError::CertificateError(format!("invalid CA key: {}", e)))?;
        cert_not_after(&cert_pem)?;
        Ok(Self {
            cluster: cluster.to_string(),
            config,
            key_pem,
            cert_pem,
            generation,
            trust_bundle,
            generated_this_cycle: false,
            renewed_this_cycle: false,
            certs_removed: false,
        })
    }

    /// Load the CA from its secrets, renew it if due, prune the trust bundle
    /// and persist both secrets. Runs exactly once per cluster cycle, before
    /// any component pipeline reads the CA.
    #[allow(clippy::too_many_arguments)]
    pub async fn reconcile(
        client: Client,
        namespace: &str,
        cluster: &str,
        config: CaConfig,
        labels: BTreeMap<String, String>,
        owner: OwnerReference,
        maintenance_window_satisfied: bool,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let secrets: ResourceOperator<Secret> = ResourceOperator::new(client, namespace);

        let key_secret = secrets.get(&ca_key_secret_name(cluster)).await?;
        let cert_secret = secrets.get(&ca_cert_secret_name(cluster)).await?;

        let force_renew = cert_secret
            .as_ref()
            .map(force_renew_requested)
            .unwrap_or(false);

        let mut ca = match (key_secret, cert_secret) {
            (Some(key_secret), Some(cert_secret)) => {
                Self::from_secrets(cluster, config, &key_secret, &cert_secret)?
            }
            _ => Self::bootstrap(cluster, config, now)?,
        };

        ca.maybe_renew(force_renew, maintenance_window_satisfied, now)?;
        ca.prune_trust_bundle(now);

        let (key_secret, cert_secret) = ca.build_secrets(namespace, labels, owner);
        secrets
            .reconcile(namespace, &ca_key_secret_name(cluster), Some(key_secret))
            .await?;
        secrets
            .reconcile(namespace, &ca_cert_secret_name(cluster), Some(cert_secret))
            .await?;

        Ok(ca)
    }

    /// Parse CA state out of the secret pair.
    pub fn from_secrets(
        cluster: &str,
        config: CaConfig,
        key_secret: &Secret,
        cert_secret: &Secret,
    ) -> Result<Self> {
        let key_pem = secret_data_string(key_secret, CA_KEY).ok_or_else(|| {
            OperatorError::CertificateError(format!(
                "CA key secret for {} is missing {}",
                cluster, CA_KEY
            ))
        })?;
        let cert_pem = secret_data_string(cert_secret, CA_CRT).ok_or_else(|| {
            OperatorError::CertificateError(format!(
                "CA cert secret for {} is missing {}",
                cluster, CA_CRT
            ))
        })?;

        let generation = ca_cert_generation(cert_secret);

        let mut trust_bundle = BTreeMap::new();
        if let Some(data) = &cert_secret.data {
            for (key, value) in data {
                if key != CA_CRT && key.starts_with("ca-") && key.ends_with(".crt") {
                    trust_bundle
                        .insert(key.clone(), String::from_utf8_lossy(&value.0).into_owned());
                }
            }
        }

        Self::from_state(cluster, config, key_pem, cert_pem, generation, trust_bundle)
    }

    /// Renew the CA if forced or if it is expiring inside an open maintenance
    /// window. On renewal the generation increments by exactly one and the
    /// previous certificate moves into the trust bundle.
    pub fn maybe_renew(
        &mut self,
        force: bool,
        maintenance_window_satisfied: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.generated_this_cycle {
            return Ok(());
        }

        let expiring = is_cert_expiring(&self.cert_pem, self.config.renewal(), now);
        if !(force || (expiring && maintenance_window_satisfied)) {
            if expiring {
                info!(
                    cluster = %self.cluster,
                    "CA certificate is expiring but no maintenance window is open; deferring renewal"
                );
            }
            return Ok(());
        }

        let reason = if force { "forced" } else { "expiring" };
        let old_cert = std::mem::take(&mut self.cert_pem);
        let (key_pem, cert_pem) = generate_ca_cert(&self.cluster, &self.config, now)?;
        self.key_pem = key_pem;
        self.cert_pem = cert_pem;

        if let Ok(not_after) = cert_not_after(&old_cert) {
            self.trust_bundle
                .insert(retained_cert_key(self.generation, not_after), old_cert);
        } else {
            warn!(
                cluster = %self.cluster,
                "Could not parse outgoing CA certificate; dropping it from the trust bundle"
            );
        }

        self.generation += 1;
        self.renewed_this_cycle = true;
        info!(
            cluster = %self.cluster,
            reason = reason,
            generation = self.generation,
            "Renewed cluster CA"
        );
        Ok(())
    }

    /// Drop trust-bundle entries whose own validity (plus the configured
    /// grace period) has passed. Sets `certs_removed` only when an entry was
    /// actually dropped.
    pub fn prune_trust_bundle(&mut self, now: DateTime<Utc>) {
        let grace = self.config.bundle_grace();
        let mut expired = Vec::new();
        for (key, pem) in &self.trust_bundle {
            match cert_not_after(pem) {
                Ok(not_after) if not_after + grace < now => expired.push(key.clone()),
                Ok(_) => {}
                Err(e) => {
                    warn!(cluster = %self.cluster, key = %key, error = %e,
                        "Unparsable retained CA certificate; keeping it");
                }
            }
        }
        for key in expired {
            debug!(cluster = %self.cluster, key = %key, "Dropping expired CA certificate from trust bundle");
            self.trust_bundle.remove(&key);
            self.certs_removed = true;
        }
    }

    /// Issue a certificate signed by the current CA key.
    pub fn generate_signed_cert(
        &self,
        common_name: &str,
        alt_names: &[String],
        now: DateTime<Utc>,
    ) -> Result<CertAndKey> {
        let mut params = CertificateParams::new(alt_names.to_vec()).map_err(|e| {
            OperatorError::CertificateError(format!("invalid subject alt names: {}", e))
        })?;

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("Stratus".to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.not_before = to_offset(now)?;
        params.not_after = to_offset(now + self.config.validity())?;

        let key_pair = KeyPair::generate().map_err(|e| {
            OperatorError::CertificateError(format!("failed to generate key: {}", e))
        })?;
        let ca_key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| OperatorError::CertificateError(format!("invalid CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| OperatorError::CertificateError(format!("invalid CA cert: {}", e)))?;
        let cert = params.signed_by(&key_pair, &issuer).map_err(|e| {
            OperatorError::CertificateError(format!("failed to sign certificate: {}", e))
        })?;

        let key_pem = key_pair.serialize_pem();
        let cert_pem = cert.pem();
        let (keystore, store_password) = self.build_keystore(&key_pem, &cert_pem)?;

        Ok(CertAndKey {
            key: key_pem,
            cert: cert_pem,
            keystore,
            store_password,
        })
    }

    /// Assemble a PKCS#12 keystore for an existing key/cert pair without
    /// re-signing. Used for legacy secrets that hold only key and cert.
    pub fn build_keystore(&self, key_pem: &str, cert_pem: &str) -> Result<(Vec<u8>, String)> {
        let key_der = KeyPair::from_pem(key_pem)
            .map_err(|e| OperatorError::CertificateError(format!("invalid key: {}", e)))?
            .serialize_der();
        let cert_der = pem_to_der(cert_pem)?;
        let ca_der = pem_to_der(&self.cert_pem)?;

        let password = random_store_password();
        let pfx = p12::PFX::new(&cert_der, &key_der, Some(&ca_der), &password, "stratus")
            .ok_or_else(|| {
                OperatorError::CertificateError("failed to assemble PKCS#12 keystore".to_string())
            })?;
        Ok((pfx.to_der(), password))
    }

    /// True when the certificate stored at `cert_key` in `secret` enters its
    /// renewal period before `now + renewal`. Missing or unparsable data is
    /// reported as not expiring (and logged), never as an error.
    pub fn is_expiring(&self, secret: &Secret, cert_key: &str, now: DateTime<Utc>) -> bool {
        match secret_data_string(secret, cert_key) {
            Some(pem) => is_cert_expiring(&pem, self.config.renewal(), now),
            None => {
                warn!(
                    secret = secret.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    key = cert_key,
                    "Secret has no certificate at expected key; treating as not expiring"
                );
                false
            }
        }
    }

    /// True when `secret` was stamped by a different CA generation than the
    /// current one.
    pub fn has_ca_cert_generation_changed(&self, secret: &Secret) -> bool {
        ca_cert_generation(secret) != self.generation
    }

    /// Build the desired key and cert secrets for this CA state.
    ///
    /// The cert secret pins the force-renew annotation to `"false"`: applying
    /// it takes ownership of the field and overwrites a user-set `"true"`, so
    /// a renewal request is consumed by the cycle that acted on it.
    pub fn build_secrets(
        &self,
        namespace: &str,
        labels: BTreeMap<String, String>,
        owner: OwnerReference,
    ) -> (Secret, Secret) {
        let mut labels = labels;
        labels.insert(
            MANAGED_BY_LABEL.to_string(),
            crate::resource_operator::FIELD_MANAGER.to_string(),
        );
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNO_CA_CERT_GENERATION.to_string(), self.generation.to_string());

        let key_secret = Secret {
            metadata: ObjectMeta {
                name: Some(ca_key_secret_name(&self.cluster)),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                annotations: Some(annotations.clone()),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([(
                CA_KEY.to_string(),
                ByteString(self.key_pem.clone().into_bytes()),
            )])),
            ..Default::default()
        };

        let mut cert_data = BTreeMap::new();
        cert_data.insert(
            CA_CRT.to_string(),
            ByteString(self.cert_pem.clone().into_bytes()),
        );
        for (key, pem) in &self.trust_bundle {
            cert_data.insert(key.clone(), ByteString(pem.clone().into_bytes()));
        }

        let mut cert_annotations = annotations;
        cert_annotations.insert(ANNO_FORCE_RENEW.to_string(), "false".to_string());

        let cert_secret = Secret {
            metadata: ObjectMeta {
                name: Some(ca_cert_secret_name(&self.cluster)),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                annotations: Some(cert_annotations),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(cert_data),
            ..Default::default()
        };

        (key_secret, cert_secret)
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn trust_bundle(&self) -> &BTreeMap<String, String> {
        &self.trust_bundle
    }

    /// A new CA was created from scratch this cycle
    pub fn generated_this_cycle(&self) -> bool {
        self.generated_this_cycle
    }

    /// The CA key and cert were renewed this cycle
    pub fn renewed_this_cycle(&self) -> bool {
        self.renewed_this_cycle
    }

    /// The CA key was created or renewed this cycle (certificates signed by
    /// the old key must be regenerated)
    pub fn key_replaced_this_cycle(&self) -> bool {
        self.generated_this_cycle || self.renewed_this_cycle
    }

    /// At least one retained certificate was dropped from the trust bundle
    pub fn certs_removed(&self) -> bool {
        self.certs_removed
    }
}

/// Read the generation annotation from a secret, defaulting to
/// [`INIT_GENERATION`] when absent or unparsable.
pub fn ca_cert_generation(secret: &Secret) -> i64 {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNO_CA_CERT_GENERATION))
        .and_then(|v| v.parse().ok())
        .unwrap_or(INIT_GENERATION)
}

/// True when the cert secret carries a pending force-renew request
pub fn force_renew_requested(secret: &Secret) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNO_FORCE_RENEW))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Read a UTF-8 value out of a secret's data section
pub fn secret_data_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

/// Trust-bundle key for a retained certificate. The generation that issued
/// the certificate keeps keys distinct even when two retired certificates
/// share a notAfter second.
fn retained_cert_key(generation: i64, not_after: DateTime<Utc>) -> String {
    // Secret data keys cannot contain ':'
    format!(
        "ca-{}-{}.crt",
        generation,
        not_after.format("%Y-%m-%dT%H-%M-%SZ")
    )
}

fn generate_ca_cert(
    cluster: &str,
    config: &CaConfig,
    now: DateTime<Utc>,
) -> Result<(String, String)> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(format!("{}-ca", cluster)),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("Stratus".to_string()),
    );
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = to_offset(now)?;
    params.not_after = to_offset(now + config.validity())?;

    let key_pair = KeyPair::generate()
        .map_err(|e| OperatorError::CertificateError(format!("failed to generate CA key: {}", e)))?;
    let cert = params.self_signed(&key_pair).map_err(|e| {
        OperatorError::CertificateError(format!("failed to create CA certificate: {}", e))
    })?;

    Ok((key_pair.serialize_pem(), cert.pem()))
}

/// Expiry timestamp of a PEM-encoded certificate
pub fn cert_not_after(cert_pem: &str) -> Result<DateTime<Utc>> {
    let der = pem_to_der(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| OperatorError::CertificateError(format!("failed to parse certificate: {}", e)))?;
    let ts = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(ts, 0).ok_or_else(|| {
        OperatorError::CertificateError(format!("certificate notAfter out of range: {}", ts))
    })
}

fn is_cert_expiring(cert_pem: &str, renewal: Duration, now: DateTime<Utc>) -> bool {
    match cert_not_after(cert_pem) {
        Ok(not_after) => not_after - now < renewal,
        Err(e) => {
            warn!(error = %e, "Could not determine certificate expiry; treating as not expiring");
            false
        }
    }
}

fn pem_to_der(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = pem::parse(pem_data.as_bytes())
        .map_err(|e| OperatorError::CertificateError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

fn to_offset(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| OperatorError::CertificateError(format!("timestamp out of range: {}", e)))
}

fn random_store_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(validity: i32, renewal: i32) -> CaConfig {
        CaConfig::new(validity, renewal, 0).unwrap()
    }

    #[test]
    fn test_config_defaults_on_non_positive_values() {
        let config = CaConfig::new(0, -5, 0).unwrap();
        assert_eq!(config.validity(), Duration::days(365));
        assert_eq!(config.renewal(), Duration::days(30));
    }

    #[test]
    fn test_config_rejects_renewal_longer_than_validity() {
        assert!(CaConfig::new(30, 60, 0).is_err());
        assert!(CaConfig::new(30, 30, 0).is_err());
    }

    #[test]
    fn test_bootstrap_starts_at_init_generation() {
        let ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), Utc::now()).unwrap();
        assert_eq!(ca.generation(), INIT_GENERATION);
        assert!(ca.generated_this_cycle());
        assert!(!ca.renewed_this_cycle());
        assert!(ca.trust_bundle().is_empty());
        assert!(cert_not_after(ca.cert_pem()).is_ok());
    }

    #[test]
    fn test_forced_renewal_increments_generation_by_one() {
        let now = Utc::now();
        let mut ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();
        // Pretend the CA was loaded from secrets rather than freshly created
        ca.generated_this_cycle = false;
        let old_cert = ca.cert_pem().to_string();

        ca.maybe_renew(true, false, now).unwrap();

        assert_eq!(ca.generation(), INIT_GENERATION + 1);
        assert!(ca.renewed_this_cycle());
        assert_eq!(ca.trust_bundle().len(), 1);
        assert_eq!(ca.trust_bundle().values().next().unwrap(), &old_cert);
        assert_ne!(ca.cert_pem(), old_cert);
    }

    #[test]
    fn test_expiring_ca_renews_only_inside_maintenance_window() {
        let now = Utc::now();
        // Bootstrapped 35 days ago with 40 days validity: 5 days left,
        // well inside the 30-day renewal period
        let mut ca =
            CertificateAuthority::bootstrap("prod", test_config(40, 30), now - Duration::days(35))
                .unwrap();
        ca.generated_this_cycle = false;

        ca.maybe_renew(false, false, now).unwrap();
        assert!(!ca.renewed_this_cycle());
        assert_eq!(ca.generation(), INIT_GENERATION);

        ca.maybe_renew(false, true, now).unwrap();
        assert!(ca.renewed_this_cycle());
        assert_eq!(ca.generation(), INIT_GENERATION + 1);
    }

    #[test]
    fn test_force_renew_request_is_consumed() {
        let now = Utc::now();
        let ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();
        let owner = OwnerReference::default();
        let (key_secret, mut cert_secret) =
            ca.build_secrets("default", BTreeMap::new(), owner.clone());
        assert!(!force_renew_requested(&cert_secret));

        // A user annotates the cert secret to request a renewal
        cert_secret
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert(ANNO_FORCE_RENEW.to_string(), "true".to_string());
        assert!(force_renew_requested(&cert_secret));

        let mut restored =
            CertificateAuthority::from_secrets("prod", test_config(365, 30), &key_secret, &cert_secret)
                .unwrap();
        restored
            .maybe_renew(force_renew_requested(&cert_secret), false, now)
            .unwrap();
        assert_eq!(restored.generation(), INIT_GENERATION + 1);

        // The rebuilt cert secret pins the annotation back to "false": the
        // next cycle must not renew again off the same request
        let (_, next_cert_secret) = restored.build_secrets("default", BTreeMap::new(), owner);
        assert!(!force_renew_requested(&next_cert_secret));
        assert_eq!(
            next_cert_secret
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(ANNO_FORCE_RENEW)
                .map(String::as_str),
            Some("false")
        );
    }

    #[test]
    fn test_retained_certs_with_same_expiry_keep_distinct_keys() {
        let now = Utc::now();
        let mut ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();
        ca.generated_this_cycle = false;

        // Two renewals at the same instant: both retired certificates carry
        // the same notAfter second, yet both must stay in the bundle
        ca.maybe_renew(true, false, now).unwrap();
        ca.maybe_renew(true, false, now).unwrap();

        assert_eq!(ca.generation(), INIT_GENERATION + 2);
        assert_eq!(ca.trust_bundle().len(), 2);
        assert!(!ca.certs_removed());
    }

    #[test]
    fn test_healthy_ca_does_not_renew() {
        let now = Utc::now();
        let mut ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();
        ca.generated_this_cycle = false;

        ca.maybe_renew(false, true, now).unwrap();
        assert!(!ca.renewed_this_cycle());
        assert_eq!(ca.generation(), INIT_GENERATION);
    }

    #[test]
    fn test_prune_removes_only_expired_entries() {
        let now = Utc::now();
        let mut ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();

        // One cert that expired 35 days ago, one still valid
        let (_, expired) =
            generate_ca_cert("prod", &test_config(365, 30), now - Duration::days(400)).unwrap();
        let (_, valid) = generate_ca_cert("prod", &test_config(365, 30), now).unwrap();
        ca.trust_bundle.insert("ca-old.crt".to_string(), expired);
        ca.trust_bundle.insert("ca-new.crt".to_string(), valid);

        ca.prune_trust_bundle(now);

        assert!(ca.certs_removed());
        assert_eq!(ca.trust_bundle().len(), 1);
        assert!(ca.trust_bundle().contains_key("ca-new.crt"));
    }

    #[test]
    fn test_prune_respects_grace_period() {
        let now = Utc::now();
        let config = CaConfig::new(365, 30, 60).unwrap();
        let mut ca = CertificateAuthority::bootstrap("prod", config, now).unwrap();

        // Expired 35 days ago, within the 60-day grace
        let (_, recent) =
            generate_ca_cert("prod", &test_config(365, 30), now - Duration::days(400)).unwrap();
        ca.trust_bundle.insert("ca-recent.crt".to_string(), recent);

        ca.prune_trust_bundle(now);

        assert!(!ca.certs_removed());
        assert_eq!(ca.trust_bundle().len(), 1);
    }

    #[test]
    fn test_generate_signed_cert() {
        let now = Utc::now();
        let ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();

        let issued = ca
            .generate_signed_cert(
                "stratus-prod-gateway",
                &["stratus-prod-gateway.default.svc".to_string()],
                now,
            )
            .unwrap();

        let not_after = cert_not_after(&issued.cert).unwrap();
        let delta = not_after - now;
        assert!(delta > Duration::days(364) && delta <= Duration::days(366));
        assert!(!issued.keystore.is_empty());
        assert_eq!(issued.store_password.len(), 16);
        assert!(issued.key.contains("PRIVATE KEY"));

        // Leaf issuance must not move the generation
        assert_eq!(ca.generation(), INIT_GENERATION);
    }

    #[test]
    fn test_is_expiring_scenarios() {
        let now = Utc::now();
        let ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();

        // Expires in ~40 days with a 30-day renewal period: not expiring
        let (_, cert_40d) = generate_ca_cert("x", &test_config(40, 30), now).unwrap();
        let secret_40d = secret_with_cert(&cert_40d);
        assert!(!ca.is_expiring(&secret_40d, "gateway.crt", now));

        // Expires in ~10 days: expiring
        let (_, cert_10d) = generate_ca_cert("x", &test_config(10, 5), now).unwrap();
        let secret_10d = secret_with_cert(&cert_10d);
        assert!(ca.is_expiring(&secret_10d, "gateway.crt", now));

        // Missing key: not expiring
        assert!(!ca.is_expiring(&Secret::default(), "gateway.crt", now));
    }

    #[test]
    fn test_generation_annotation_round_trip() {
        let now = Utc::now();
        let mut ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();
        ca.generated_this_cycle = false;
        ca.maybe_renew(true, false, now).unwrap();
        ca.maybe_renew(true, false, now + Duration::days(1)).unwrap();

        let owner = OwnerReference::default();
        let (key_secret, cert_secret) = ca.build_secrets("default", BTreeMap::new(), owner);

        assert_eq!(ca_cert_generation(&cert_secret), 2);
        assert!(secret_data_string(&key_secret, CA_KEY).is_some());
        assert!(secret_data_string(&cert_secret, CA_CRT).is_some());
        // Two renewals retain two old certificates
        let data = cert_secret.data.as_ref().unwrap();
        assert_eq!(data.len(), 3);

        let restored =
            CertificateAuthority::from_secrets("prod", test_config(365, 30), &key_secret, &cert_secret)
                .unwrap();
        assert_eq!(restored.generation(), 2);
        assert_eq!(restored.trust_bundle().len(), 2);
        assert!(!restored.renewed_this_cycle());
    }

    #[test]
    fn test_build_keystore_for_existing_pair() {
        let now = Utc::now();
        let ca = CertificateAuthority::bootstrap("prod", test_config(365, 30), now).unwrap();
        let issued = ca.generate_signed_cert("gw", &[], now).unwrap();

        let (keystore, password) = ca.build_keystore(&issued.key, &issued.cert).unwrap();
        assert!(!keystore.is_empty());
        assert_eq!(password.len(), 16);
    }

    fn secret_with_cert(cert_pem: &str) -> Secret {
        Secret {
            data: Some(BTreeMap::from([(
                "gateway.crt".to_string(),
                ByteString(cert_pem.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }
}
