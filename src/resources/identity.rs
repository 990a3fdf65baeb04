//! User-assigned managed identity builder.
//!
//! The identity's `principalId` receives the key vault role assignment and its
//! `resourceId` is bound to the disk encryption set.

use indexmap::IndexMap;

use super::{insert_tags, ModuleSource, ResourceKind};
use crate::graph::{OutputRef, Param, ResourceNode};

#[derive(Debug, Clone, PartialEq)]
pub struct UserAssignedIdentitySpec {
    pub name: String,
    pub location: String,
    pub resource_group: OutputRef,
    pub tags: IndexMap<String, String>,
}

impl UserAssignedIdentitySpec {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        resource_group: OutputRef,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            resource_group,
            tags: IndexMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: IndexMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn into_node(self, id: &str, flow: &str, module: ModuleSource) -> ResourceNode {
        let mut params = Param::object([
            ("resourceGroupName", Param::Ref(self.resource_group)),
            ("name", Param::from(self.name.as_str())),
            ("location", Param::from(self.location.as_str())),
        ]);
        insert_tags(&mut params, &self.tags);

        ResourceNode::new(
            id,
            ResourceKind::UserAssignedIdentity,
            self.name,
            flow,
            module,
            params,
        )
    }
}
