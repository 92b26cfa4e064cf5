//! Cluster resources and resource groups
//!
//! A resource group is an ordered list of resources that the cluster manager
//! moves between nodes as a unit. Which groups exist, and how to ask whether a
//! resource runs on a node, is cluster-manager specific and supplied by the
//! driver.

use std::fmt;

/// One resource: a type and an optional instance argument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceSpec {
    pub resource_type: String,
    pub instance: Option<String>,
}

impl ResourceSpec {
    pub fn new(resource_type: impl Into<String>, instance: Option<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            instance,
        }
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{{{}::{}}}", self.resource_type, instance),
            None => write!(f, "{{{}}}", self.resource_type),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGroup {
    pub resources: Vec<ResourceSpec>,
}

impl ResourceGroup {
    pub fn new(resources: Vec<ResourceSpec>) -> Self {
        Self { resources }
    }

    /// The resource whose location stands for the whole group
    pub fn primary(&self) -> Option<&ResourceSpec> {
        self.resources.first()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl fmt::Display for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.resources.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
