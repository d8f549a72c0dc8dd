//! Kubernetes Resource Builders
//!
//! This module generates Kubernetes manifests (StatefulSet, Deployment,
//! Service, ConfigMap, PVCs, etc.) from StratusCluster specifications.

use crate::ca::ANNO_CA_CERT_GENERATION;
use crate::crd::{DataVolume, StratusCluster, StratusClusterSpec};
use crate::error::{OperatorError, Result};
use crate::pvc::ANNO_DELETE_CLAIM;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, SecretVolumeSource, Service, ServiceAccount, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Annotation stamped into pod templates to trigger a rolling restart
pub const ANNO_RESTARTED_AT: &str = "stratus.io/restarted-at";

/// Builder for generating Kubernetes resources from a StratusCluster
pub struct ResourceBuilder<'a> {
    cluster: &'a StratusCluster,
    name: String,
    namespace: String,
}

/// Name of the volume claim for a flattened data volume
pub fn volume_name(id: Option<i32>) -> String {
    match id {
        Some(id) => format!("data-{}", id),
        None => "data".to_string(),
    }
}

/// Name of the PVC bound to one pod of a component,
/// e.g., `data-0-stratus-prod-gateway-0`
pub fn pvc_name(component_name: &str, id: Option<i32>, pod_index: i32) -> String {
    format!("{}-{}-{}", volume_name(id), component_name, pod_index)
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder
    pub fn new(cluster: &'a StratusCluster) -> Result<Self> {
        let name =
            cluster.metadata.name.clone().ok_or_else(|| {
                OperatorError::InvalidConfig("cluster name is required".to_string())
            })?;

        let namespace = cluster
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            cluster,
            name,
            namespace,
        })
    }

    /// Name of the broker StatefulSet and prefix for broker resources
    pub fn broker_name(&self) -> String {
        format!("stratus-{}-broker", self.name)
    }

    /// Name of the gateway Deployment and prefix for gateway resources
    pub fn gateway_name(&self) -> String {
        format!("stratus-{}-gateway", self.name)
    }

    /// Name of the secret holding the gateway server certificate
    pub fn gateway_certs_secret_name(&self) -> String {
        format!("{}-certs", self.gateway_name())
    }

    /// Get owner reference for managed resources
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: "stratus.io/v1alpha1".to_string(),
            kind: "StratusCluster".to_string(),
            name: self.name.clone(),
            uid: self.cluster.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Build the broker StatefulSet. The pod template carries the CA
    /// certificate generation so a CA replacement rolls the brokers, and
    /// an optional restart timestamp for explicit rolls.
    pub fn build_statefulset(
        &self,
        ca_generation: i64,
        restarted_at: Option<&str>,
    ) -> StatefulSet {
        let spec = &self.cluster.spec;
        let name = self.broker_name();
        let labels = spec.get_labels(&self.name, "broker");
        let selector_labels = spec.get_selector_labels(&self.name, "broker");

        let volumes = spec.storage.flatten();
        let container = self.build_broker_container(spec, &volumes);

        let mut pod_labels = selector_labels.clone();
        pod_labels.extend(spec.pod_labels.clone());

        let mut pod_annotations = BTreeMap::new();
        if spec.metrics.enabled {
            pod_annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
            pod_annotations.insert(
                "prometheus.io/port".to_string(),
                spec.metrics.port.to_string(),
            );
        }
        pod_annotations.extend(spec.pod_annotations.clone());
        pod_annotations.insert(
            ANNO_CA_CERT_GENERATION.to_string(),
            ca_generation.to_string(),
        );
        if let Some(ts) = restarted_at {
            pod_annotations.insert(ANNO_RESTARTED_AT.to_string(), ts.to_string());
        }

        let pod_spec = PodSpec {
            containers: vec![container],
            security_context: Some(default_pod_security_context()),
            node_selector: if spec.node_selector.is_empty() {
                None
            } else {
                Some(spec.node_selector.clone())
            },
            tolerations: if spec.tolerations.is_empty() {
                None
            } else {
                Some(spec.tolerations.clone())
            },
            image_pull_secrets: if spec.image_pull_secrets.is_empty() {
                None
            } else {
                Some(
                    spec.image_pull_secrets
                        .iter()
                        .map(|s| k8s_openapi::api::core::v1::LocalObjectReference {
                            name: s.clone(),
                        })
                        .collect(),
                )
            },
            // Ephemeral storage gets an emptyDir in place of claims
            volumes: if volumes.is_empty() {
                Some(vec![Volume {
                    name: "data".to_string(),
                    empty_dir: Some(Default::default()),
                    ..Default::default()
                }])
            } else {
                None
            },
            automount_service_account_token: Some(false),
            ..Default::default()
        };

        StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                service_name: Some(format!("{}-headless", name)),
                replicas: Some(spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector_labels),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        annotations: Some(pod_annotations),
                        ..Default::default()
                    }),
                    spec: Some(pod_spec),
                },
                volume_claim_templates: if volumes.is_empty() {
                    None
                } else {
                    Some(
                        volumes
                            .iter()
                            .map(|v| self.build_pvc_template(v))
                            .collect(),
                    )
                },
                pod_management_policy: Some("Parallel".to_string()),
                update_strategy: Some(k8s_openapi::api::apps::v1::StatefulSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    rolling_update: Some(
                        k8s_openapi::api::apps::v1::RollingUpdateStatefulSetStrategy {
                            max_unavailable: Some(IntOrString::Int(1)),
                            partition: Some(0),
                        },
                    ),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the main container for the broker pod
    fn build_broker_container(
        &self,
        spec: &StratusClusterSpec,
        volumes: &[DataVolume],
    ) -> Container {
        let name = self.broker_name();

        let mut env = vec![
            EnvVar {
                name: "STRATUS_BIND_ADDRESS".to_string(),
                value: Some("0.0.0.0".to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "STRATUS_PORT".to_string(),
                value: Some("9092".to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "STRATUS_CLUSTER_NAME".to_string(),
                value: Some(self.name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "STRATUS_POD_NAME".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.name".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "STRATUS_POD_NAMESPACE".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.namespace".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "STRATUS_SERVICE_NAME".to_string(),
                value: Some(format!("{}-headless", name)),
                ..Default::default()
            },
            EnvVar {
                name: "STRATUS_DATA_DIRS".to_string(),
                value: Some(data_dirs(volumes)),
                ..Default::default()
            },
        ];

        if spec.metrics.enabled {
            env.push(EnvVar {
                name: "STRATUS_METRICS_PORT".to_string(),
                value: Some(spec.metrics.port.to_string()),
                ..Default::default()
            });
        }

        let mut ports = vec![
            ContainerPort {
                name: Some("broker".to_string()),
                container_port: 9092,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("peer".to_string()),
                container_port: 9093,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ];

        if spec.metrics.enabled {
            ports.push(ContainerPort {
                name: Some("metrics".to_string()),
                container_port: spec.metrics.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }

        let volume_mounts = if volumes.is_empty() {
            vec![VolumeMount {
                name: "data".to_string(),
                mount_path: "/data".to_string(),
                ..Default::default()
            }]
        } else {
            volumes
                .iter()
                .map(|v| VolumeMount {
                    name: volume_name(v.id),
                    mount_path: format!("/{}", volume_name(v.id)),
                    ..Default::default()
                })
                .collect()
        };

        Container {
            name: "broker".to_string(),
            image: Some(spec.get_image()),
            image_pull_policy: Some(spec.image_pull_policy.clone()),
            command: Some(vec!["stratusd".to_string()]),
            args: Some(vec![
                "--config".to_string(),
                "/etc/stratus/config.yaml".to_string(),
            ]),
            env: Some(env),
            ports: Some(ports),
            resources: spec.resources.clone(),
            liveness_probe: Some(http_probe("/health", 9092, 30)),
            readiness_probe: Some(http_probe("/ready", 9092, 10)),
            volume_mounts: Some(volume_mounts),
            security_context: Some(default_container_security_context()),
            ..Default::default()
        }
    }

    /// Build one PVC template of the broker StatefulSet
    fn build_pvc_template(&self, volume: &DataVolume) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(volume.size.clone()));

        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNO_DELETE_CLAIM.to_string(),
            volume.delete_claim.to_string(),
        );

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(volume_name(volume.id)),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: volume.storage_class_name.clone(),
                selector: volume.selector.as_ref().map(|s| LabelSelector {
                    match_labels: Some(s.clone()),
                    ..Default::default()
                }),
                resources: Some(k8s_openapi::api::core::v1::VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the PVCs for one pod of a component. Used for the gateway
    /// Deployment, whose claims are not templated by a StatefulSet.
    pub fn build_component_pvcs(
        &self,
        component: &str,
        component_name: &str,
        volumes: &[DataVolume],
        pod_index: i32,
    ) -> Vec<PersistentVolumeClaim> {
        let spec = &self.cluster.spec;
        let labels = spec.get_labels(&self.name, component);

        volumes
            .iter()
            .map(|volume| {
                let mut requests = BTreeMap::new();
                requests.insert("storage".to_string(), Quantity(volume.size.clone()));

                let mut annotations = BTreeMap::new();
                annotations.insert(
                    ANNO_DELETE_CLAIM.to_string(),
                    volume.delete_claim.to_string(),
                );

                PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some(pvc_name(component_name, volume.id, pod_index)),
                        namespace: Some(self.namespace.clone()),
                        labels: Some(labels.clone()),
                        annotations: Some(annotations),
                        // Claims marked for deletion are garbage collected
                        // with the cluster; retained claims outlive it.
                        owner_references: if volume.delete_claim {
                            Some(vec![self.owner_reference()])
                        } else {
                            None
                        },
                        ..Default::default()
                    },
                    spec: Some(PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                        storage_class_name: volume.storage_class_name.clone(),
                        selector: volume.selector.as_ref().map(|s| LabelSelector {
                            match_labels: Some(s.clone()),
                            ..Default::default()
                        }),
                        resources: Some(
                            k8s_openapi::api::core::v1::VolumeResourceRequirements {
                                requests: Some(requests),
                                ..Default::default()
                            },
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            })
            .collect()
    }

    /// Build the service account for the gateway pod
    pub fn build_gateway_service_account(&self) -> ServiceAccount {
        let spec = &self.cluster.spec;
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some(self.gateway_name()),
                namespace: Some(self.namespace.clone()),
                labels: Some(spec.get_labels(&self.name, "gateway")),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Build the gateway Deployment. Always a single replica: the gateway
    /// holds a per-pod persistent claim and a server certificate.
    pub fn build_gateway_deployment(
        &self,
        ca_generation: i64,
        restarted_at: Option<&str>,
    ) -> Deployment {
        let spec = &self.cluster.spec;
        let name = self.gateway_name();
        let labels = spec.get_labels(&self.name, "gateway");
        let selector_labels = spec.get_selector_labels(&self.name, "gateway");

        let gateway = spec.gateway.clone().unwrap_or_default();
        let volumes = gateway.storage.flatten();

        let mut pod_annotations = BTreeMap::new();
        pod_annotations.insert(
            ANNO_CA_CERT_GENERATION.to_string(),
            ca_generation.to_string(),
        );
        if let Some(ts) = restarted_at {
            pod_annotations.insert(ANNO_RESTARTED_AT.to_string(), ts.to_string());
        }

        let mut pod_volumes = vec![
            Volume {
                name: "gateway-certs".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(self.gateway_certs_secret_name()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "cluster-ca".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(crate::ca::ca_cert_secret_name(&self.name)),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];

        let mut volume_mounts = vec![
            VolumeMount {
                name: "gateway-certs".to_string(),
                mount_path: "/etc/stratus/certs".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "cluster-ca".to_string(),
                mount_path: "/etc/stratus/ca".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ];

        if volumes.is_empty() {
            pod_volumes.push(Volume {
                name: "data".to_string(),
                empty_dir: Some(Default::default()),
                ..Default::default()
            });
            volume_mounts.push(VolumeMount {
                name: "data".to_string(),
                mount_path: "/data".to_string(),
                ..Default::default()
            });
        } else {
            for volume in &volumes {
                let vol_name = volume_name(volume.id);
                pod_volumes.push(Volume {
                    name: vol_name.clone(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: pvc_name(&name, volume.id, 0),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
                volume_mounts.push(VolumeMount {
                    name: vol_name.clone(),
                    mount_path: format!("/{}", vol_name),
                    ..Default::default()
                });
            }
        }

        let container = Container {
            name: "gateway".to_string(),
            image: Some(spec.get_gateway_image()),
            image_pull_policy: Some(spec.image_pull_policy.clone()),
            env: Some(vec![
                EnvVar {
                    name: "STRATUS_GATEWAY_BROKER_SERVICE".to_string(),
                    value: Some(format!("stratus-{}", self.name)),
                    ..Default::default()
                },
                EnvVar {
                    name: "STRATUS_GATEWAY_CERTS_DIR".to_string(),
                    value: Some("/etc/stratus/certs".to_string()),
                    ..Default::default()
                },
                EnvVar {
                    name: "STRATUS_GATEWAY_CA_DIR".to_string(),
                    value: Some("/etc/stratus/ca".to_string()),
                    ..Default::default()
                },
            ]),
            ports: Some(vec![ContainerPort {
                name: Some("gateway".to_string()),
                container_port: 8080,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            resources: gateway.resources.clone(),
            liveness_probe: Some(http_probe("/health", 8080, 30)),
            readiness_probe: Some(http_probe("/ready", 8080, 10)),
            volume_mounts: Some(volume_mounts),
            security_context: Some(default_container_security_context()),
            ..Default::default()
        };

        Deployment {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(selector_labels.clone()),
                    ..Default::default()
                },
                // Recreate: the claim and certificate belong to one pod
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector_labels),
                        annotations: Some(pod_annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        service_account_name: Some(name),
                        security_context: Some(default_pod_security_context()),
                        volumes: Some(pod_volumes),
                        image_pull_secrets: if spec.image_pull_secrets.is_empty() {
                            None
                        } else {
                            Some(
                                spec.image_pull_secrets
                                    .iter()
                                    .map(|s| k8s_openapi::api::core::v1::LocalObjectReference {
                                        name: s.clone(),
                                    })
                                    .collect(),
                            )
                        },
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the headless service for broker pod discovery
    pub fn build_headless_service(&self) -> Service {
        let spec = &self.cluster.spec;
        let name = format!("{}-headless", self.broker_name());
        let labels = spec.get_labels(&self.name, "broker");
        let selector_labels = spec.get_selector_labels(&self.name, "broker");

        Service {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector: Some(selector_labels),
                ports: Some(vec![
                    ServicePort {
                        name: Some("broker".to_string()),
                        port: 9092,
                        target_port: Some(IntOrString::Int(9092)),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    },
                    ServicePort {
                        name: Some("peer".to_string()),
                        port: 9093,
                        target_port: Some(IntOrString::Int(9093)),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    },
                ]),
                publish_not_ready_addresses: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the client-facing service
    pub fn build_client_service(&self) -> Service {
        let spec = &self.cluster.spec;
        let name = format!("stratus-{}", self.name);
        let labels = spec.get_labels(&self.name, "broker");
        let selector_labels = spec.get_selector_labels(&self.name, "broker");

        let mut ports = vec![ServicePort {
            name: Some("broker".to_string()),
            port: 9092,
            target_port: Some(IntOrString::Int(9092)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }];

        if spec.metrics.enabled {
            ports.push(ServicePort {
                name: Some("metrics".to_string()),
                port: spec.metrics.port,
                target_port: Some(IntOrString::Int(spec.metrics.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }

        Service {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build ConfigMap for broker configuration
    pub fn build_configmap(&self) -> ConfigMap {
        let spec = &self.cluster.spec;
        let name = format!("{}-config", self.broker_name());
        let labels = spec.get_labels(&self.name, "broker");

        let mut config = BTreeMap::new();
        config.insert(
            "default_partitions".to_string(),
            spec.config.default_partitions.to_string(),
        );
        config.insert(
            "default_replication_factor".to_string(),
            spec.config.default_replication_factor.to_string(),
        );
        config.insert(
            "log_retention_hours".to_string(),
            spec.config.log_retention_hours.to_string(),
        );
        config.insert(
            "compression_type".to_string(),
            spec.config.compression_type.clone(),
        );

        // Raw overrides win
        for (k, v) in &spec.config.raw {
            config.insert(k.clone(), v.clone());
        }

        let config_yaml = serde_yaml::to_string(&config).unwrap_or_default();

        let mut data = BTreeMap::new();
        data.insert("config.yaml".to_string(), config_yaml);

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    /// Build PodDisruptionBudget
    pub fn build_pdb(&self) -> Option<PodDisruptionBudget> {
        let spec = &self.cluster.spec;

        if !spec.pod_disruption_budget.enabled {
            return None;
        }

        let name = format!("{}-pdb", self.broker_name());
        let labels = spec.get_labels(&self.name, "broker");
        let selector_labels = spec.get_selector_labels(&self.name, "broker");

        Some(PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(selector_labels),
                    ..Default::default()
                }),
                min_available: spec
                    .pod_disruption_budget
                    .min_available
                    .as_ref()
                    .map(|v| IntOrString::String(v.clone())),
                max_unavailable: spec
                    .pod_disruption_budget
                    .max_unavailable
                    .as_ref()
                    .map(|v| IntOrString::String(v.clone())),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Comma-separated data directories for the flattened volumes
fn data_dirs(volumes: &[DataVolume]) -> String {
    if volumes.is_empty() {
        return "/data".to_string();
    }
    volumes
        .iter()
        .map(|v| format!("/{}", volume_name(v.id)))
        .collect::<Vec<_>>()
        .join(",")
}

fn http_probe(path: &str, port: i32, initial_delay: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn default_pod_security_context() -> k8s_openapi::api::core::v1::PodSecurityContext {
    k8s_openapi::api::core::v1::PodSecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(1000),
        run_as_group: Some(1000),
        fs_group: Some(1000),
        seccomp_profile: Some(k8s_openapi::api::core::v1::SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_container_security_context() -> k8s_openapi::api::core::v1::SecurityContext {
    k8s_openapi::api::core::v1::SecurityContext {
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(true),
        run_as_user: Some(1000),
        run_as_group: Some(1000),
        capabilities: Some(k8s_openapi::api::core::v1::Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: Some(k8s_openapi::api::core::v1::SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GatewaySpec, Storage};

    fn create_test_cluster(name: &str) -> StratusCluster {
        let mut spec: StratusClusterSpec = serde_json::from_str("{}").unwrap();
        spec.gateway = Some(GatewaySpec {
            image: None,
            storage: Storage::default(),
            resources: None,
        });
        StratusCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid-123".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn test_build_statefulset() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let sts = builder.build_statefulset(2, None);

        assert_eq!(
            sts.metadata.name,
            Some("stratus-my-cluster-broker".to_string())
        );
        let sts_spec = sts.spec.as_ref().unwrap();
        assert_eq!(sts_spec.replicas, Some(3));
        assert_eq!(
            sts_spec.service_name.as_deref(),
            Some("stratus-my-cluster-broker-headless")
        );

        let annotations = sts_spec
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap();
        assert_eq!(annotations.get(ANNO_CA_CERT_GENERATION).unwrap(), "2");
        assert!(!annotations.contains_key(ANNO_RESTARTED_AT));

        let templates = sts_spec.volume_claim_templates.as_ref().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].metadata.name.as_deref(), Some("data"));
    }

    #[test]
    fn test_statefulset_restart_annotation() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let sts = builder.build_statefulset(0, Some("2026-08-23T10:00:00Z"));

        let annotations = sts
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap()
            .clone();
        assert_eq!(
            annotations.get(ANNO_RESTARTED_AT).map(String::as_str),
            Some("2026-08-23T10:00:00Z")
        );
    }

    #[test]
    fn test_jbod_claim_templates() {
        let mut cluster = create_test_cluster("my-cluster");
        cluster.spec.storage = serde_json::from_str(
            r#"{"type": "jbod", "volumes": [
                {"type": "persistentClaim", "id": 0, "size": "50Gi"},
                {"type": "persistentClaim", "id": 1, "size": "100Gi", "deleteClaim": false}
            ]}"#,
        )
        .unwrap();

        let builder = ResourceBuilder::new(&cluster).unwrap();
        let sts = builder.build_statefulset(0, None);
        let templates = sts
            .spec
            .as_ref()
            .unwrap()
            .volume_claim_templates
            .as_ref()
            .unwrap()
            .clone();

        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].metadata.name.as_deref(), Some("data-0"));
        assert_eq!(templates[1].metadata.name.as_deref(), Some("data-1"));
        assert_eq!(
            templates[1]
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(ANNO_DELETE_CLAIM)
                .map(String::as_str),
            Some("false")
        );
    }

    #[test]
    fn test_ephemeral_storage_uses_empty_dir() {
        let mut cluster = create_test_cluster("my-cluster");
        cluster.spec.storage = Storage::Ephemeral;

        let builder = ResourceBuilder::new(&cluster).unwrap();
        let sts = builder.build_statefulset(0, None);
        let sts_spec = sts.spec.as_ref().unwrap();

        assert!(sts_spec.volume_claim_templates.is_none());
        let pod_volumes = sts_spec
            .template
            .spec
            .as_ref()
            .unwrap()
            .volumes
            .as_ref()
            .unwrap();
        assert!(pod_volumes.iter().any(|v| v.empty_dir.is_some()));
    }

    #[test]
    fn test_gateway_deployment() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let deployment = builder.build_gateway_deployment(1, None);

        assert_eq!(
            deployment.metadata.name,
            Some("stratus-my-cluster-gateway".to_string())
        );
        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.strategy.as_ref().unwrap().type_.as_deref(),
            Some("Recreate")
        );

        let pod_spec = spec.template.spec.as_ref().unwrap();
        let volumes = pod_spec.volumes.as_ref().unwrap();
        let cert_volume = volumes.iter().find(|v| v.name == "gateway-certs").unwrap();
        assert_eq!(
            cert_volume
                .secret
                .as_ref()
                .unwrap()
                .secret_name
                .as_deref(),
            Some("stratus-my-cluster-gateway-certs")
        );
        let claim_volume = volumes.iter().find(|v| v.name == "data").unwrap();
        assert_eq!(
            claim_volume
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "data-stratus-my-cluster-gateway-0"
        );
    }

    #[test]
    fn test_gateway_pvcs() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let gateway = cluster.spec.gateway.as_ref().unwrap();
        let pvcs = builder.build_component_pvcs(
            "gateway",
            &builder.gateway_name(),
            &gateway.storage.flatten(),
            0,
        );

        assert_eq!(pvcs.len(), 1);
        assert_eq!(
            pvcs[0].metadata.name.as_deref(),
            Some("data-stratus-my-cluster-gateway-0")
        );
        // delete_claim defaults to true, so the claim is owned
        assert!(pvcs[0].metadata.owner_references.is_some());
        assert_eq!(
            pvcs[0]
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(ANNO_DELETE_CLAIM)
                .map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_retained_pvc_has_no_owner() {
        let mut cluster = create_test_cluster("my-cluster");
        cluster.spec.gateway = Some(GatewaySpec {
            image: None,
            storage: serde_json::from_str(
                r#"{"type": "persistentClaim", "size": "10Gi", "deleteClaim": false}"#,
            )
            .unwrap(),
            resources: None,
        });

        let builder = ResourceBuilder::new(&cluster).unwrap();
        let gateway = cluster.spec.gateway.as_ref().unwrap();
        let pvcs = builder.build_component_pvcs(
            "gateway",
            &builder.gateway_name(),
            &gateway.storage.flatten(),
            0,
        );
        assert!(pvcs[0].metadata.owner_references.is_none());
    }

    #[test]
    fn test_build_headless_service() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let svc = builder.build_headless_service();

        assert_eq!(
            svc.metadata.name,
            Some("stratus-my-cluster-broker-headless".to_string())
        );
        assert_eq!(
            svc.spec.as_ref().unwrap().cluster_ip,
            Some("None".to_string())
        );
    }

    #[test]
    fn test_build_client_service() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let svc = builder.build_client_service();

        assert_eq!(svc.metadata.name, Some("stratus-my-cluster".to_string()));
        assert_eq!(
            svc.spec.as_ref().unwrap().type_,
            Some("ClusterIP".to_string())
        );
    }

    #[test]
    fn test_build_configmap() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let cm = builder.build_configmap();

        assert_eq!(
            cm.metadata.name,
            Some("stratus-my-cluster-broker-config".to_string())
        );
        assert!(cm.data.as_ref().unwrap().contains_key("config.yaml"));
    }

    #[test]
    fn test_build_pdb() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let pdb = builder.build_pdb().unwrap();
        assert_eq!(
            pdb.metadata.name,
            Some("stratus-my-cluster-broker-pdb".to_string())
        );
    }

    #[test]
    fn test_owner_references() {
        let cluster = create_test_cluster("my-cluster");
        let builder = ResourceBuilder::new(&cluster).unwrap();
        let sts = builder.build_statefulset(0, None);

        let owner_refs = sts.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owner_refs.len(), 1);
        assert_eq!(owner_refs[0].kind, "StratusCluster");
        assert_eq!(owner_refs[0].name, "my-cluster");
    }

    #[test]
    fn test_pvc_name() {
        assert_eq!(pvc_name("stratus-c-gateway", None, 0), "data-stratus-c-gateway-0");
        assert_eq!(
            pvc_name("stratus-c-gateway", Some(2), 0),
            "data-2-stratus-c-gateway-0"
        );
    }
}
