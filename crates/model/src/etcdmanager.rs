//! etcd-manager static pods and the control files it reads from the backup store

use std::collections::BTreeSet;

use awstasks::ManagedFile;
use crds::EtcdClusterSpec;
use fi::featureflag::API_SERVER_NODES;
use fi::{ModelBuilderContext, Resource};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::ModelBuilder;
use crate::context::{ModelContext, TAG_CLUSTER_OWNERSHIP_PREFIX, TAG_ROLE_PREFIX};
use crate::error::ModelError;
use crate::mastervolume::TAG_ETCD_PREFIX;

const DEFAULT_IMAGE: &str = "registry.k8s.io/etcdadm/etcd-manager-slim:v3.0.20240209";
const DEFAULT_LOG_LEVEL: i32 = 6;

/// Location of the API server health check static pod, relative to the config base
pub const HEALTHCHECK_MANIFEST: &str = "manifests/static/kube-apiserver-healthcheck.yaml";

/// Ports of one etcd cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtcdPorts {
    pub client: u16,
    pub peer: u16,
    pub grpc: u16,
    pub quarantine: u16,
}

/// Ports by cluster name; clusters outside main, events and cilium are rejected
pub fn ports_for(name: &str) -> Option<EtcdPorts> {
    let ports = match name {
        "main" => EtcdPorts { client: 4001, peer: 2380, grpc: 3996, quarantine: 3994 },
        "events" => EtcdPorts { client: 4002, peer: 2381, grpc: 3997, quarantine: 3995 },
        "cilium" => EtcdPorts { client: 4003, peer: 2382, grpc: 3998, quarantine: 3993 },
        _ => return None,
    };
    Some(ports)
}

/// Contents of `control/etcd-cluster-spec`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EtcdClusterControlSpec<'a> {
    member_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    etcd_version: Option<&'a str>,
}

/// Emits the etcd-manager manifests and cluster control files
#[derive(Debug, Default)]
pub struct EtcdManagerBuilder;

impl EtcdManagerBuilder {
    /// Host part of the client URLs
    ///
    /// With `APIServerNodes` the API servers live outside the control plane and
    /// reach etcd through a DNS name instead of the member's own address.
    fn client_host(model: &ModelContext, etcd: &EtcdClusterSpec) -> String {
        if model.features.enabled(API_SERVER_NODES) {
            format!("{}.etcd.{}", etcd.name, model.cluster_name())
        } else {
            "__name__".to_string()
        }
    }

    fn pod(
        model: &ModelContext,
        etcd: &EtcdClusterSpec,
        ports: EtcdPorts,
        backup_store: &str,
        instance_group: &str,
    ) -> Value {
        let manager = etcd.manager.clone().unwrap_or_default();
        let cluster_name = if etcd.name == "main" {
            "etcd".to_string()
        } else {
            format!("etcd-{}", etcd.name)
        };
        let pod_name = format!("etcd-manager-{}", etcd.name);
        let cpu = if etcd.name == "main" { "200m" } else { "100m" };
        let client_host = Self::client_host(model, etcd);
        let cluster = model.cluster_name();

        let mut args = vec![
            format!("--v={}", manager.log_level.unwrap_or(DEFAULT_LOG_LEVEL)),
            "--containerized=true".to_string(),
            format!("--cluster-name={cluster_name}"),
            format!("--backup-store={backup_store}"),
            format!("--client-urls=https://{client_host}:{}", ports.client),
            format!("--peer-urls=https://__name__:{}", ports.peer),
            format!("--quarantine-client-urls=https://__name__:{}", ports.quarantine),
            format!("--grpc-port={}", ports.grpc),
            format!("--dns-suffix=.internal.{cluster}"),
            "--volume-provider=aws".to_string(),
            format!("--volume-tag={TAG_CLUSTER_OWNERSHIP_PREFIX}{cluster}=owned"),
            format!("--volume-tag={TAG_ETCD_PREFIX}{}", etcd.name),
            format!("--volume-tag={TAG_ROLE_PREFIX}control-plane=1"),
            format!("--volume-name-tag={TAG_ETCD_PREFIX}{}", etcd.name),
        ];
        if let Some(interval) = &manager.backup_interval {
            args.push(format!("--backup-interval={interval}"));
        }
        let env: Vec<Value> = manager
            .env
            .iter()
            .map(|e| json!({ "name": e.name, "value": e.value }))
            .collect();

        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": pod_name,
                "namespace": "kube-system",
                "labels": { "k8s-app": pod_name, "kops.k8s.io/instancegroup": instance_group },
                "annotations": { "scheduler.alpha.kubernetes.io/critical-pod": "" },
            },
            "spec": {
                "hostNetwork": true,
                "priorityClassName": "system-cluster-critical",
                "containers": [{
                    "name": "etcd-manager",
                    "image": manager.image.as_deref().unwrap_or(DEFAULT_IMAGE),
                    "command": ["/etcd-manager"],
                    "args": args,
                    "env": env,
                    "resources": { "requests": { "cpu": cpu } },
                    "securityContext": { "privileged": true },
                    "volumeMounts": [
                        { "name": "rootfs", "mountPath": "/rootfs" },
                        { "name": "varlogetcd", "mountPath": "/var/log/etcd.log" },
                    ],
                }],
                "volumes": [
                    { "name": "rootfs", "hostPath": { "path": "/", "type": "Directory" } },
                    {
                        "name": "varlogetcd",
                        "hostPath": { "path": format!("/var/log/{cluster_name}.log"), "type": "FileOrCreate" },
                    },
                ],
            },
        })
    }

    fn healthcheck_pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "kube-apiserver-healthcheck", "namespace": "kube-system" },
            "spec": {
                "containers": [{
                    "name": "healthcheck",
                    "image": "registry.k8s.io/kops/kube-apiserver-healthcheck:1.29.0",
                    "command": ["/kube-apiserver-healthcheck"],
                    "args": ["--ca-cert=/secrets/ca.crt", "--client-cert=/secrets/client.crt", "--client-key=/secrets/client.key"],
                    "livenessProbe": {
                        "httpGet": { "host": "127.0.0.1", "path": "/.kube-apiserver-healthcheck/healthz", "port": 3990 },
                        "initialDelaySeconds": 5,
                        "timeoutSeconds": 5,
                    },
                }],
            },
        })
    }

    fn yaml(what: &str, value: &Value) -> Result<Resource, ModelError> {
        serde_yaml::to_string(value)
            .map(Resource::from_string)
            .map_err(|e| ModelError::Task {
                what: what.to_string(),
                source: e.into(),
            })
    }

    fn build_cluster(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        index: usize,
        etcd: &EtcdClusterSpec,
    ) -> Result<(), ModelError> {
        let path = format!("spec.etcdClusters[{index}]");
        let ports = ports_for(&etcd.name)
            .ok_or_else(|| ModelError::invalid(format!("{path}.name"), format!("unknown etcd cluster {:?}", etcd.name)))?;
        let backup_store = etcd
            .backups
            .as_ref()
            .map(|b| b.backup_store.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ModelError::invalid(
                    format!("{path}.backups.backupStore"),
                    "backupStore must be set for use with etcd-manager",
                )
            })?;

        let groups: BTreeSet<&str> = etcd.members.iter().map(|m| m.instance_group.as_str()).collect();
        for ig in groups {
            let name = format!("{}-{ig}", etcd.name);
            let pod = Self::pod(model, etcd, ports, backup_store, ig);
            c.add(ManagedFile::new(
                format!("manifests-etcdmanager-{name}"),
                format!("manifests/etcd/{name}.yaml"),
                Self::yaml(&format!("etcd manifest {name}"), &pod)?,
            ))?;
        }

        let control = EtcdClusterControlSpec {
            member_count: etcd.members.len(),
            etcd_version: etcd.version.as_deref(),
        };
        let contents = serde_json::to_string_pretty(&control).map_err(|source| ModelError::Encode {
            what: format!("etcd-cluster-spec of {}", etcd.name),
            source,
        })?;
        c.add(ManagedFile::new(
            format!("etcd-cluster-spec-{}", etcd.name),
            format!("backups/etcd/{}/control/etcd-cluster-spec", etcd.name),
            Resource::from_string(contents),
        ))?;
        debug!(etcd = %etcd.name, members = etcd.members.len(), "Built etcd-manager files");
        Ok(())
    }
}

/// Manifest locations a control-plane group fetches, relative to the config base
pub fn manifests_for_group(model: &ModelContext, group: &str) -> Vec<String> {
    model
        .cluster
        .spec
        .etcd_clusters
        .iter()
        .filter(|etcd| etcd.members.iter().any(|m| m.instance_group == group))
        .map(|etcd| format!("manifests/etcd/{}-{group}.yaml", etcd.name))
        .collect()
}

impl ModelBuilder for EtcdManagerBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        for (i, etcd) in model.cluster.spec.etcd_clusters.iter().enumerate() {
            Self::build_cluster(model, c, i, etcd)?;
        }
        if !model.cluster.spec.etcd_clusters.is_empty() {
            c.add(ManagedFile::new(
                "manifests-static-kube-apiserver-healthcheck",
                HEALTHCHECK_MANIFEST,
                Self::yaml("kube-apiserver-healthcheck manifest", &Self::healthcheck_pod())?,
            ))?;
        }
        Ok(())
    }
}
