//! Kubernetes object literals for the cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    Probe, ResourceRequirements, SecretVolumeSource, Service, ServiceAccount, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::api::policy::v1beta1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::pki::node_secret_name;
use crate::resources::set_canonical_labels;

use super::{Spec, CLUSTER_NAME, HTTP_PORT, SQL_PORT};

pub const PDB_NAME: &str = "cockroachdb-budget";

const COMPONENT_LABEL: &str = "corral.dev/component";
const COMPONENT: &str = "cockroachdb";

const CERTS_DIR: &str = "/cockroach/cockroach-certs";
const DATA_DIR: &str = "/cockroach/cockroach-data";

pub fn public_service_name() -> String {
    format!("{}-public", CLUSTER_NAME)
}

/// Label selector matching every object of the cluster, including the
/// volume claims stamped from the claim template.
pub fn cluster_selector() -> String {
    format!("{}={}", COMPONENT_LABEL, COMPONENT)
}

fn cluster_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    set_canonical_labels(&mut labels);
    labels.insert(COMPONENT_LABEL.into(), COMPONENT.into());
    labels
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(cluster_labels()),
        ..Default::default()
    }
}

fn cluster_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(cluster_labels()),
        ..Default::default()
    }
}

pub fn service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(namespace, CLUSTER_NAME),
        ..Default::default()
    }
}

/// Members read and create secrets while bootstrapping their certificates.
pub fn role(namespace: &str) -> Role {
    Role {
        metadata: meta(namespace, CLUSTER_NAME),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["".into()]),
            resources: Some(vec!["secrets".into()]),
            verbs: vec!["create".into(), "get".into(), "update".into()],
            ..Default::default()
        }]),
    }
}

pub fn role_binding(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: meta(namespace, CLUSTER_NAME),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".into(),
            kind: "Role".into(),
            name: CLUSTER_NAME.into(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".into(),
            name: CLUSTER_NAME.into(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Members file certificate signing requests on join.
pub fn cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: cluster_meta(CLUSTER_NAME),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["certificates.k8s.io".into()]),
            resources: Some(vec!["certificatesigningrequests".into()]),
            verbs: vec!["create".into(), "get".into(), "watch".into()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn cluster_role_binding(namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: cluster_meta(CLUSTER_NAME),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".into(),
            kind: "ClusterRole".into(),
            name: CLUSTER_NAME.into(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".into(),
            name: CLUSTER_NAME.into(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

fn service_ports() -> Vec<ServicePort> {
    vec![
        ServicePort {
            name: Some("grpc".into()),
            port: SQL_PORT,
            target_port: Some(IntOrString::Int(SQL_PORT)),
            ..Default::default()
        },
        ServicePort {
            name: Some("http".into()),
            port: HTTP_PORT,
            target_port: Some(IntOrString::Int(HTTP_PORT)),
            ..Default::default()
        },
    ]
}

/// Headless service giving each member its stable DNS name. Not-ready
/// members stay published so that a cold cluster can discover its peers.
pub fn headless_service(namespace: &str) -> Service {
    Service {
        metadata: meta(namespace, CLUSTER_NAME),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".into()),
            ports: Some(service_ports()),
            publish_not_ready_addresses: Some(true),
            selector: Some(cluster_labels()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Client-facing service fronting the healthy members.
pub fn public_service(namespace: &str) -> Service {
    Service {
        metadata: meta(namespace, &public_service_name()),
        spec: Some(ServiceSpec {
            ports: Some(service_ports()),
            selector: Some(cluster_labels()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn stateful_set(namespace: &str, spec: &Spec) -> StatefulSet {
    let replicas = spec.replicas();
    let join = (0..replicas)
        .map(|ordinal| format!("{}-{}.{}", CLUSTER_NAME, ordinal, CLUSTER_NAME))
        .collect::<Vec<_>>()
        .join(",");
    let start = format!(
        "exec /cockroach/cockroach start --logtostderr --certs-dir {} --advertise-host $(hostname -f) --http-addr 0.0.0.0 --join {} --cache 25% --max-sql-memory 25%",
        CERTS_DIR, join
    );

    let container = Container {
        name: CLUSTER_NAME.into(),
        image: Some(spec.image().to_string()),
        image_pull_policy: Some("IfNotPresent".into()),
        command: Some(vec!["/bin/bash".into(), "-ecx".into(), start]),
        ports: Some(vec![
            ContainerPort {
                name: Some("grpc".into()),
                container_port: SQL_PORT,
                ..Default::default()
            },
            ContainerPort {
                name: Some("http".into()),
                container_port: HTTP_PORT,
                ..Default::default()
            },
        ]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health?ready=1".into()),
                port: IntOrString::Int(HTTP_PORT),
                scheme: Some("HTTPS".into()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            failure_threshold: Some(2),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "datadir".into(),
                mount_path: DATA_DIR.into(),
                ..Default::default()
            },
            VolumeMount {
                name: "certs".into(),
                mount_path: CERTS_DIR.into(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(spec.storage_capacity().to_string()));

    StatefulSet {
        metadata: meta(namespace, CLUSTER_NAME),
        spec: Some(StatefulSetSpec {
            service_name: CLUSTER_NAME.into(),
            replicas: Some(replicas),
            pod_management_policy: Some("Parallel".into()),
            selector: LabelSelector {
                match_labels: Some(cluster_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(cluster_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(CLUSTER_NAME.into()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: "certs".into(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(node_secret_name(CLUSTER_NAME)),
                            default_mode: Some(0o400),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("datadir".into()),
                    labels: Some(cluster_labels()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".into()]),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    storage_class_name: spec.storage_class.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod_disruption_budget(namespace: &str) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: meta(namespace, PDB_NAME),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(cluster_labels()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
