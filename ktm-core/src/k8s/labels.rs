use serde_json::{
    Map,
    Value,
    json,
};

use crate::constants::*;
use crate::prelude::*;

// app.kubernetes.io/* well-known label -> our `kube_app_*` field name.
const APP_LABEL_FIELDS: &[(&str, &str)] = &[
    (APP_KUBERNETES_IO_COMPONENT_KEY, "kube_app_component"),
    (APP_KUBERNETES_IO_INSTANCE_KEY, "kube_app_instance"),
    (APP_KUBERNETES_IO_MANAGED_BY_KEY, "kube_app_managed_by"),
    (APP_KUBERNETES_IO_NAME_KEY, "kube_app_name"),
    (APP_KUBERNETES_IO_PART_OF_KEY, "kube_app_part_of"),
    (APP_KUBERNETES_IO_VERSION_KEY, "kube_app_version"),
];

/// Emits the `kube_namespace`, `pod_name`, and (when present) `kube_node`/`kube_qos`/
/// `kube_priority_class`/`kube_runtime_class` fields, plus owner-reference and
/// `app.kubernetes.io/*` labels, shared by every record about a given pod.
pub fn common_pod_labels(pod: &corev1::Pod) -> Map<String, Value> {
    let mut labels = Map::new();
    labels.insert("kube_namespace".into(), json!(pod.namespace().unwrap_or_default()));
    labels.insert("pod_name".into(), json!(pod.name_any()));

    if let Some(spec) = pod.spec.as_ref() {
        if let Some(node) = spec.node_name.as_ref() {
            labels.insert("kube_node".into(), json!(node));
        }
        if let Some(pc) = spec.priority_class_name.as_ref() {
            labels.insert("kube_priority_class".into(), json!(pc));
        }
        if let Some(rc) = spec.runtime_class_name.as_ref() {
            labels.insert("kube_runtime_class".into(), json!(rc));
        }
    }
    if let Some(status) = pod.status.as_ref() {
        if let Some(qos) = status.qos_class.as_ref() {
            labels.insert("kube_qos".into(), json!(qos));
        }
    }

    owner_ref_labels(pod, &mut labels);
    app_labels(pod, &mut labels);
    labels
}

/// Emits `container_name` and the parsed image labels for one container of a pod.
pub fn common_container_labels(container_name: &str, image: &str) -> Map<String, Value> {
    let mut labels = Map::new();
    labels.insert("container_name".into(), json!(container_name));
    image_labels(image, &mut labels);
    labels
}

fn owner_ref_labels(pod: &corev1::Pod, labels: &mut Map<String, Value>) {
    let Some(owner) = pod.owner_references().iter().find(|o| o.controller.unwrap_or(false)) else {
        return;
    };

    let kind = owner.kind.to_ascii_lowercase();
    labels.insert("kube_ownerref_kind".into(), json!(kind));
    labels.insert("kube_ownerref_name".into(), json!(owner.name));

    let alias = match owner.kind.as_str() {
        "DaemonSet" => Some("kube_daemon_set"),
        "Job" => Some("kube_job"),
        "ReplicaSet" => Some("kube_replica_set"),
        "StatefulSet" => Some("kube_stateful_set"),
        _ => None,
    };
    if let Some(alias) = alias {
        labels.insert(alias.into(), json!(owner.name));
    }
}

fn app_labels(pod: &corev1::Pod, labels: &mut Map<String, Value>) {
    let Some(pod_labels) = pod.metadata.labels.as_ref() else { return };
    for (key, field) in APP_LABEL_FIELDS {
        if let Some(value) = pod_labels.get(*key) {
            labels.insert((*field).into(), json!(value));
        }
    }
}

/// Splits a container image reference into `image_name` (the repository), `short_image` (the
/// basename of the repository path), and `image_tag` (the tag, or the digest if no tag is
/// present). Mirrors `k8s.io/kubernetes/pkg/util/parsers.ParseImageName`'s three-way split without
/// depending on the full registry-reference grammar: digests are recognized by an `@` separator,
/// tags by the last `:` appearing after the last `/`.
fn image_labels(image: &str, labels: &mut Map<String, Value>) {
    let (repo_and_tag, digest) = match image.split_once('@') {
        Some((repo_and_tag, digest)) => (repo_and_tag, Some(digest)),
        None => (image, None),
    };

    let (repo, tag) = match repo_and_tag.rsplit_once(':') {
        Some((repo, tag)) if !repo.is_empty() && !tag.contains('/') => (repo, Some(tag)),
        _ => (repo_and_tag, None),
    };

    let short = repo.rsplit('/').next().unwrap_or(repo);

    labels.insert("image_name".into(), json!(repo));
    labels.insert("short_image".into(), json!(short));
    labels.insert("image_tag".into(), json!(tag.or(digest).unwrap_or_default()));
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::tagged("registry.example.com/library/nginx:1.27", "registry.example.com/library/nginx", "nginx", "1.27")]
    #[case::untagged_with_digest(
        "registry.example.com/library/nginx@sha256:abcd",
        "registry.example.com/library/nginx",
        "nginx",
        "sha256:abcd"
    )]
    #[case::no_tag_no_digest("busybox", "busybox", "busybox", "")]
    fn test_image_labels(#[case] image: &str, #[case] name: &str, #[case] short: &str, #[case] tag: &str) {
        let mut labels = Map::new();
        image_labels(image, &mut labels);
        assert_eq!(labels["image_name"], json!(name));
        assert_eq!(labels["short_image"], json!(short));
        assert_eq!(labels["image_tag"], json!(tag));
    }
}
