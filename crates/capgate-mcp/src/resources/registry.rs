//! Resource listing and reads for the negotiated protocol.

use crate::registry::Binding;
use crate::types::{McpResult, ReadResourceResult, ResourceListResult};

/// Resources declared by a protocol, read through its adapter.
pub struct ResourceRegistry;

impl ResourceRegistry {
    /// Every resource (or resource template) the descriptor declares.
    pub fn list_resources(binding: &Binding) -> ResourceListResult {
        ResourceListResult {
            resources: binding.descriptor.capabilities.resources.clone(),
        }
    }

    /// Fetch one resource from the adapter.
    pub async fn read(binding: &Binding, uri: &str) -> McpResult<ReadResourceResult> {
        let contents = binding.adapter.read_resource(uri).await?;
        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }

    /// Filesystem path behind a `file://` URI, for root checks.
    pub fn scoped_path(uri: &str) -> Option<&str> {
        uri.strip_prefix("file://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_file_uris_are_root_scoped() {
        assert_eq!(ResourceRegistry::scoped_path("file:///srv/a.txt"), Some("/srv/a.txt"));
        assert_eq!(ResourceRegistry::scoped_path("https://example.com"), None);
    }
}
