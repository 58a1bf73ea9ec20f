//! CRD registry and installation
//!
//! The operator's CRDs are collected in a [`CrdRegistry`] built once at
//! startup. The same registry feeds `--crd` output and server-side apply
//! installation, so the two can never disagree.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use ndd_common::crd::{DeviceDriver, NetworkNode};

/// Field manager used when applying CRDs
const CRD_FIELD_MANAGER: &str = "ndd-operator";

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

/// The CRDs this operator serves
pub struct CrdRegistry {
    defs: Vec<CrdDef>,
}

impl CrdRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Registry with every ndd resource type
    pub fn ndd() -> Self {
        Self::new().register::<NetworkNode>().register::<DeviceDriver>()
    }

    /// Add a resource type
    pub fn register<K: CustomResourceExt>(mut self) -> Self {
        self.defs.push(CrdDef {
            name: K::crd_name(),
            crd: K::crd(),
        });
        self
    }

    /// Full CRD names, in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.defs.iter().map(|d| d.name).collect()
    }

    /// Multi-document YAML of every registered CRD
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        let docs = self
            .defs
            .iter()
            .map(|d| {
                serde_yaml::to_string(&d.crd)
                    .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", d.name, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(docs.join("---\n"))
    }

    /// Install or update every registered CRD using server-side apply
    pub async fn install(&self, client: &Client) -> anyhow::Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
        let params = PatchParams::apply(CRD_FIELD_MANAGER).force();

        for def in &self.defs {
            tracing::info!(crd = def.name, "installing CRD");
            crds.patch(def.name, &params, &Patch::Apply(&def.crd))
                .await
                .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
        }

        tracing::info!(count = self.defs.len(), "CRDs installed/updated");
        Ok(())
    }
}

impl Default for CrdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndd_registry_holds_both_resource_types() {
        assert_eq!(
            CrdRegistry::ndd().names(),
            vec!["networknodes.dvr.ndd.dev", "devicedrivers.dvr.ndd.dev"]
        );
    }

    #[test]
    fn yaml_has_one_document_per_crd() {
        let yaml = CrdRegistry::ndd().to_yaml().unwrap();
        let docs: Vec<CustomResourceDefinition> = yaml
            .split("---\n")
            .map(|doc| serde_yaml::from_str(doc).unwrap())
            .collect();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].spec.names.kind, "NetworkNode");
        assert_eq!(docs[1].spec.names.kind, "DeviceDriver");
    }

    #[test]
    fn empty_registry_prints_nothing() {
        assert!(CrdRegistry::default().to_yaml().unwrap().is_empty());
    }
}
