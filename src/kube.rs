use k8s_openapi::api::core::v1::Namespace as ApiCoreV1Namespace;
use kube::api::ListParams;
use kube::config::Config as ApiConfig;
use kube::config::KubeConfigOptions as ApiConfigOptions;
use kube::config::Kubeconfig as ApiKubeconfig;
use kube::Api;
use kube::Client as KubeClient;
use log::debug;

use crate::config::Config;
use crate::errors::{BoxError, Error, Result};
use crate::kubeconfig::KubeConfigStore;

/// Source of namespace names for a context.
#[allow(async_fn_in_trait)]
pub trait NamespaceLister {
    async fn list_namespaces(
        &self,
        kubeconfig: &KubeConfigStore,
        context: &str,
    ) -> Result<Vec<String>>;
}

/// Lists namespaces from the cluster behind a context, unless the context
/// has a static `ns_alias` list configured.
pub struct KubeLister<'a> {
    cfg: &'a Config,
}

impl KubeLister<'_> {
    pub fn new(cfg: &Config) -> KubeLister {
        KubeLister { cfg }
    }

    async fn list_from_cluster(
        kubeconfig: &KubeConfigStore,
        context: &str,
    ) -> std::result::Result<Vec<String>, BoxError> {
        let api_kubeconfig = to_api_kubeconfig(kubeconfig)?;
        let opts = ApiConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let api_config = ApiConfig::from_custom_kubeconfig(api_kubeconfig, &opts).await?;

        let client = KubeClient::try_from(api_config)?;
        let ns_api: Api<ApiCoreV1Namespace> = Api::all(client);
        let namespaces = ns_api.list(&ListParams::default()).await?;

        Ok(namespaces
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}

/// Built from the in-memory model, so a context selected earlier in the same
/// switch and not yet written is listed correctly.
fn to_api_kubeconfig(
    kubeconfig: &KubeConfigStore,
) -> std::result::Result<ApiKubeconfig, BoxError> {
    let value = serde_yaml::to_value(kubeconfig.resolved_config())?;
    Ok(serde_yaml::from_value(value)?)
}

impl NamespaceLister for KubeLister<'_> {
    async fn list_namespaces(
        &self,
        kubeconfig: &KubeConfigStore,
        context: &str,
    ) -> Result<Vec<String>> {
        if let Some(alias) = self.cfg.match_ns_alias(context) {
            debug!("Use ns_alias for context '{context}': {alias:?}");
            return Ok(alias);
        }

        debug!("List namespaces from cluster of context '{context}'");
        Self::list_from_cluster(kubeconfig, context)
            .await
            .map_err(|source| Error::ListFailed {
                context: context.to_string(),
                source,
            })
    }
}
