//! Resource group builder.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `name` | Yes | Resource group name |
//! | `location` | Yes | Azure region |
//! | `tags` | No | Resource tags |

use indexmap::IndexMap;

use super::{insert_tags, ModuleSource, ResourceKind};
use crate::graph::{Param, ResourceNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroupSpec {
    pub name: String,
    pub location: String,
    pub tags: IndexMap<String, String>,
}

impl ResourceGroupSpec {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            tags: IndexMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: IndexMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn into_node(self, id: &str, flow: &str, module: ModuleSource) -> ResourceNode {
        let mut params = Param::object([
            ("name", Param::from(self.name.as_str())),
            ("location", Param::from(self.location.as_str())),
        ]);
        insert_tags(&mut params, &self.tags);

        ResourceNode::new(id, ResourceKind::ResourceGroup, self.name, flow, module, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ModuleCatalog;

    #[test]
    fn test_resource_group_node() {
        let mut tags = IndexMap::new();
        tags.insert("env".to_string(), "dev".to_string());
        let node = ResourceGroupSpec::new("rg-vmAde", "westeurope")
            .with_tags(tags)
            .into_node(
                "adeResourceGroup",
                "ade",
                ModuleCatalog::default().source(ResourceKind::ResourceGroup),
            );

        assert_eq!(node.name, "rg-vmAde");
        assert_eq!(node.kind, ResourceKind::ResourceGroup);
        assert_eq!(node.scope(), None);
        assert_eq!(
            node.params.pointer("location").and_then(Param::as_str),
            Some("westeurope")
        );
        assert_eq!(
            node.params.pointer("tags/env").and_then(Param::as_str),
            Some("dev")
        );
    }
}
