mod container_state;
mod labels;
mod pod_ext;

pub use container_state::*;
pub use labels::*;
pub use pod_ext::*;

use crate::errors::*;
use crate::prelude::*;

err_impl! {KubernetesError,
    #[error("field not found in struct: {0}")]
    FieldNotFound(String),
}

pub trait PodExt {
    fn spec(&self) -> anyhow::Result<&corev1::PodSpec>;
    fn status(&self) -> anyhow::Result<&corev1::PodStatus>;
}

/// A Pod's namespace/name pair, carried by value wherever a statistic needs to reference "the pod
/// it describes" without holding onto (or racing on) the Pod object itself.
pub trait KubeResourceExt {
    fn namespaced_name(&self) -> (String, String);
}

impl KubeResourceExt for corev1::Pod {
    fn namespaced_name(&self) -> (String, String) {
        (self.namespace().unwrap_or_default(), self.name_any())
    }
}
