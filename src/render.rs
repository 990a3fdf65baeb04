//! Deployment documents
//!
//! A [`DeploymentDocument`] is the rendered form of a resource graph: every
//! resource with its module, parameters and `dependsOn` list, plus the
//! deployment waves. Secrets are written as the redaction marker and output
//! references as `{"$ref": "<node>.outputs.<field>"}`, so a document can be
//! loaded back into a graph and validated.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{GraphError, Param, ResourceGraph, ResourceNode};
use crate::params::DeploymentParameters;
use crate::resources::{ModuleSource, ResourceKind};

/// Schema identifier written into every document.
pub const DOCUMENT_SCHEMA: &str = "vmcrypt/deployment/v1";

/// Serialization format of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick a format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

/// One resource in a rendered document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResource {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub flow: String,
    pub module: ModuleSource,
    /// Producers this resource reads outputs from
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub params: Param,
}

impl From<DocumentResource> for ResourceNode {
    fn from(resource: DocumentResource) -> Self {
        ResourceNode::new(
            resource.id,
            resource.kind,
            resource.name,
            resource.flow,
            resource.module,
            resource.params,
        )
    }
}

/// A rendered deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDocument {
    #[serde(rename = "$schema")]
    pub schema: String,
    pub generator: String,
    pub generated_at: DateTime<Utc>,
    /// Parameters the graph was rendered from, password redacted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<DeploymentParameters>,
    pub resources: Vec<DocumentResource>,
    /// Resource ids grouped by deployment wave
    #[serde(default)]
    pub waves: Vec<Vec<String>>,
}

impl DeploymentDocument {
    /// Render a graph. Fails when the graph cannot be ordered.
    pub fn from_graph(
        graph: &ResourceGraph,
        parameters: Option<&DeploymentParameters>,
    ) -> Result<Self> {
        let waves = graph.waves()?;
        let resources = graph
            .nodes()
            .map(|node| DocumentResource {
                id: node.id.clone(),
                kind: node.kind,
                name: node.name.clone(),
                flow: node.flow.clone(),
                module: node.module.clone(),
                depends_on: graph
                    .dependencies(&node.id)
                    .into_iter()
                    .map(String::from)
                    .collect(),
                params: node.params.clone(),
            })
            .collect();

        Ok(Self {
            schema: DOCUMENT_SCHEMA.to_string(),
            generator: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            generated_at: Utc::now(),
            parameters: parameters.cloned(),
            resources,
            waves,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_format(&self, format: DocumentFormat) -> Result<String> {
        match format {
            DocumentFormat::Json => self.to_json(),
            DocumentFormat::Yaml => self.to_yaml(),
        }
    }

    /// Parse a document. JSON is tried when the text starts with `{`, YAML
    /// otherwise.
    pub fn parse(content: &str) -> Result<Self> {
        let document: Self = if content.trim_start().starts_with('{') {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        if document.schema != DOCUMENT_SCHEMA {
            return Err(GraphError::InvalidDocument(format!(
                "unsupported schema '{}', expected '{}'",
                document.schema, DOCUMENT_SCHEMA
            ))
            .into());
        }
        Ok(document)
    }

    /// Read a document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let document = Self::parse(&content)?;
        tracing::debug!(
            path = %path.display(),
            resources = document.resources.len(),
            "loaded deployment document"
        );
        Ok(document)
    }

    /// Rebuild the graph. Edges come from the parameter references; the
    /// `dependsOn` lists are informational and checked against them.
    pub fn into_graph(self) -> Result<ResourceGraph> {
        let declared: Vec<(String, Vec<String>)> = self
            .resources
            .iter()
            .map(|r| (r.id.clone(), r.depends_on.clone()))
            .collect();

        let graph = ResourceGraph::from_nodes(self.resources.into_iter().map(ResourceNode::from))?;

        for (id, depends_on) in declared {
            let derived = graph.dependencies(&id);
            if !depends_on.is_empty() && depends_on.iter().map(String::as_str).ne(derived.iter().copied()) {
                tracing::warn!(
                    resource = %id,
                    declared = ?depends_on,
                    derived = ?derived,
                    "dependsOn does not match the parameter references"
                );
            }
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Template;
    use crate::graph::REDACTED;

    const SUBNET: &str = "/subscriptions/0000/resourceGroups/net/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default";

    fn document() -> DeploymentDocument {
        let template = Template::new(DeploymentParameters::new("westeurope", SUBNET));
        let graph = template.render().unwrap();
        DeploymentDocument::from_graph(&graph, Some(template.parameters())).unwrap()
    }

    #[test]
    fn test_document_depends_on() {
        let doc = document();
        assert_eq!(doc.resources.len(), 8);
        let des = doc
            .resources
            .iter()
            .find(|r| r.id == "sseDiskEncryptionSet")
            .unwrap();
        assert_eq!(
            des.depends_on,
            vec!["sseResourceGroup", "sseIdentity", "sseKeyVault"]
        );
        assert_eq!(doc.waves.len(), 5);
    }

    #[test]
    fn test_json_redacts_password() {
        let json = document().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["$schema"], DOCUMENT_SCHEMA);
        assert_eq!(value["parameters"]["adminPassword"], REDACTED);
        let vm = value["resources"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["id"] == "adeVirtualMachine")
            .unwrap();
        assert_eq!(vm["params"]["adminPassword"], REDACTED);
        assert_eq!(
            vm["params"]["extensionAzureDiskEncryptionConfig"]["settings"]["KeyVaultURL"]["$ref"],
            "adeKeyVault.outputs.uri"
        );
    }

    #[test]
    fn test_yaml_document_loads_back() {
        let original = document();
        let yaml = original.to_yaml().unwrap();
        let graph = DeploymentDocument::parse(&yaml).unwrap().into_graph().unwrap();
        assert_eq!(graph.node_count(), 8);
        assert_eq!(graph.edge_count(), original_edge_count());
        assert!(graph.dangling().is_empty());
    }

    fn original_edge_count() -> usize {
        Template::new(DeploymentParameters::new("westeurope", SUBNET))
            .render()
            .unwrap()
            .edge_count()
    }

    #[test]
    fn test_rejects_unknown_schema() {
        let mut doc = document();
        doc.schema = "other/v9".to_string();
        let json = serde_json::to_string(&doc).unwrap();
        assert!(DeploymentDocument::parse(&json).is_err());
    }
}
