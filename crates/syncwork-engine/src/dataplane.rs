//! Dataplane group resolution.
//!
//! Every operation resolves through the workspace's configured group. An
//! empty group means "use the default fleet".

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::errors::EngineError;

/// Workspace lookup failure reported by a [`WorkspaceDirectory`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The directory answered with a non-success status.
    #[error("workspace lookup returned status {status}")]
    Status { status: u16 },
    #[error("workspace directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of per-workspace dataplane configuration.
pub trait WorkspaceDirectory: Send + Sync {
    /// Configured dataplane group of `workspace_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if the workspace can't be looked up.
    fn dataplane_group(&self, workspace_id: Uuid) -> Result<Option<String>, DirectoryError>;
}

/// Directory backed by a fixed workspace → group map.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkspaceDirectory {
    groups: BTreeMap<Uuid, String>,
}

impl StaticWorkspaceDirectory {
    #[must_use]
    pub fn new(groups: BTreeMap<Uuid, String>) -> Self {
        Self { groups }
    }
}

impl WorkspaceDirectory for StaticWorkspaceDirectory {
    fn dataplane_group(&self, workspace_id: Uuid) -> Result<Option<String>, DirectoryError> {
        Ok(self.groups.get(&workspace_id).cloned())
    }
}

/// Picks the dataplane group a workload is dispatched to.
#[derive(Clone)]
pub struct DataplaneResolver {
    directory: Arc<dyn WorkspaceDirectory>,
}

impl DataplaneResolver {
    pub fn new(directory: Arc<dyn WorkspaceDirectory>) -> Self {
        Self { directory }
    }

    /// # Errors
    ///
    /// Returns [`EngineError::WorkspaceNotFound`] if the lookup fails.
    pub fn resolve_for_check(
        &self,
        organization_id: Option<Uuid>,
        workspace_id: Uuid,
    ) -> Result<String, EngineError> {
        self.resolve("check", organization_id, workspace_id)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::WorkspaceNotFound`] if the lookup fails.
    pub fn resolve_for_discover(
        &self,
        organization_id: Option<Uuid>,
        workspace_id: Uuid,
    ) -> Result<String, EngineError> {
        self.resolve("discover", organization_id, workspace_id)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::WorkspaceNotFound`] if the lookup fails.
    pub fn resolve_for_spec(
        &self,
        organization_id: Option<Uuid>,
        workspace_id: Uuid,
    ) -> Result<String, EngineError> {
        self.resolve("spec", organization_id, workspace_id)
    }

    /// Connection-level overrides are not supported yet; syncs use the
    /// workspace default.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::WorkspaceNotFound`] if the lookup fails.
    pub fn resolve_for_sync(
        &self,
        organization_id: Option<Uuid>,
        workspace_id: Uuid,
        connection_id: Option<Uuid>,
    ) -> Result<String, EngineError> {
        tracing::trace!(connection_id = ?connection_id, "Resolving sync dataplane");
        self.resolve("sync", organization_id, workspace_id)
    }

    fn resolve(
        &self,
        operation: &str,
        organization_id: Option<Uuid>,
        workspace_id: Uuid,
    ) -> Result<String, EngineError> {
        let group = self
            .directory
            .dataplane_group(workspace_id)
            .map_err(|e| EngineError::WorkspaceNotFound {
                workspace_id,
                deleted: matches!(e, DirectoryError::Status { status: 404 }),
                reason: e.to_string(),
            })?
            .unwrap_or_default();
        tracing::debug!(
            operation,
            organization_id = ?organization_id,
            workspace_id = %workspace_id,
            dataplane_group = group,
            "Resolved dataplane group"
        );
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingDirectory(DirectoryError);

    impl WorkspaceDirectory for FailingDirectory {
        fn dataplane_group(&self, _: Uuid) -> Result<Option<String>, DirectoryError> {
            Err(self.0.clone())
        }
    }

    #[test]
    fn test_configured_group_is_used_for_every_operation() {
        let ws = Uuid::new_v4();
        let resolver = DataplaneResolver::new(Arc::new(StaticWorkspaceDirectory::new(
            BTreeMap::from([(ws, "eu-west".to_string())]),
        )));
        assert_eq!(resolver.resolve_for_check(None, ws).unwrap(), "eu-west");
        assert_eq!(resolver.resolve_for_discover(None, ws).unwrap(), "eu-west");
        assert_eq!(resolver.resolve_for_spec(None, ws).unwrap(), "eu-west");
        assert_eq!(
            resolver
                .resolve_for_sync(None, ws, Some(Uuid::new_v4()))
                .unwrap(),
            "eu-west"
        );
    }

    #[test]
    fn test_unconfigured_workspace_is_empty_not_error() {
        let resolver = DataplaneResolver::new(Arc::new(StaticWorkspaceDirectory::default()));
        assert_eq!(resolver.resolve_for_check(None, Uuid::new_v4()).unwrap(), "");
    }

    #[test]
    fn test_404_means_deleted() {
        let resolver = DataplaneResolver::new(Arc::new(FailingDirectory(
            DirectoryError::Status { status: 404 },
        )));
        let err = resolver.resolve_for_spec(None, Uuid::nil()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::WorkspaceNotFound { deleted: true, .. }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_failures_are_transient() {
        for failure in [
            DirectoryError::Status { status: 503 },
            DirectoryError::Unavailable("connection refused".into()),
        ] {
            let resolver = DataplaneResolver::new(Arc::new(FailingDirectory(failure)));
            let err = resolver.resolve_for_check(None, Uuid::nil()).unwrap_err();
            assert!(matches!(
                err,
                EngineError::WorkspaceNotFound { deleted: false, .. }
            ));
            assert!(err.is_retryable());
        }
    }
}
