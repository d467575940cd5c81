use ktm_core::errors::*;

err_impl! {StartupError,
    #[error("could not read kubeconfig at {0}")]
    KubeconfigUnreadable(String),

    #[error("could not build kube client: {0}")]
    ClientBuildFailed(String),
}
