//! Per-run state.
//!
//! A [`RunContext`] owns the resource group handle for the duration of a
//! run and the handles later steps consume. It is created by
//! [`Orchestrator::run`](super::Orchestrator::run) and handed to both the
//! provisioning phase and the teardown phase.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::azure::{ResourceHandle, ResourceKind};

/// Phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing has been created.
    NotStarted,
    /// The resource group exists.
    RootScopeCreated,
    /// Plan steps are running.
    StepsExecuting,
    /// Every step succeeded.
    Completed,
    /// A step failed and the remaining steps were skipped.
    Aborted,
    /// The resource group was deleted.
    TornDown,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::RootScopeCreated => "root scope created",
            Self::StepsExecuting => "steps executing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::TornDown => "torn down",
        };
        write!(f, "{s}")
    }
}

/// State of a single run.
#[derive(Debug)]
pub struct RunContext {
    /// Identifier of this run.
    run_id: Uuid,
    /// Phases visited, in order.
    phases: Vec<RunPhase>,
    /// The resource group, while it exists.
    root: Option<ResourceHandle>,
    /// Handles created by earlier steps, keyed by logical name.
    handles: HashMap<(ResourceKind, String), ResourceHandle>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Creates a context for a new run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phases: vec![RunPhase::NotStarted],
            root: None,
            handles: HashMap::new(),
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::NotStarted)
    }

    /// Returns every phase visited so far.
    #[must_use]
    pub fn phases(&self) -> &[RunPhase] {
        &self.phases
    }

    /// Moves to `phase`.
    pub fn advance(&mut self, phase: RunPhase) {
        debug!("Run {} is now {phase}", self.run_id);
        self.phases.push(phase);
    }

    /// Records the resource group and moves to [`RunPhase::RootScopeCreated`].
    pub fn set_root(&mut self, handle: ResourceHandle) {
        self.root = Some(handle);
        self.advance(RunPhase::RootScopeCreated);
    }

    /// Returns the resource group, if it exists.
    #[must_use]
    pub const fn root(&self) -> Option<&ResourceHandle> {
        self.root.as_ref()
    }

    /// Removes the resource group handle, leaving the context without one.
    pub fn take_root(&mut self) -> Option<ResourceHandle> {
        self.handles.clear();
        self.root.take()
    }

    /// Stores the handle created for `logical`.
    pub fn insert(&mut self, kind: ResourceKind, logical: &str, handle: ResourceHandle) {
        self.handles.insert((kind, logical.to_string()), handle);
    }

    /// Returns the handle created for `logical`.
    #[must_use]
    pub fn handle(&self, kind: ResourceKind, logical: &str) -> Option<&ResourceHandle> {
        self.handles.get(&(kind, logical.to_string()))
    }

    /// Removes and returns the handle created for `logical`.
    pub fn remove(&mut self, kind: ResourceKind, logical: &str) -> Option<ResourceHandle> {
        self.handles.remove(&(kind, logical.to_string()))
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if let Some(root) = &self.root {
            warn!(
                "Run {} ended without deleting resource group {}; delete it manually",
                self.run_id,
                root.id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ResourceId;
    use std::collections::BTreeMap;

    fn handle(kind: ResourceKind, name: &str) -> ResourceHandle {
        let rg = ResourceId::subscription("sub").child(ResourceKind::ResourceGroup, "rg");
        ResourceHandle {
            id: if kind == ResourceKind::ResourceGroup {
                rg
            } else {
                rg.child(kind, name)
            },
            kind,
            location: Some(String::from("eastus")),
            tags: BTreeMap::new(),
            properties: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_phases() {
        let mut ctx = RunContext::new();
        assert_eq!(ctx.phase(), RunPhase::NotStarted);

        ctx.set_root(handle(ResourceKind::ResourceGroup, "rg"));
        ctx.advance(RunPhase::StepsExecuting);
        assert_eq!(ctx.phase(), RunPhase::StepsExecuting);
        assert_eq!(
            ctx.phases(),
            &[RunPhase::NotStarted, RunPhase::RootScopeCreated, RunPhase::StepsExecuting]
        );

        assert!(ctx.take_root().is_some());
        assert!(ctx.take_root().is_none());
    }

    #[test]
    fn test_handles_by_logical_name() {
        let mut ctx = RunContext::new();
        ctx.insert(
            ResourceKind::VirtualNetwork,
            "vnet1",
            handle(ResourceKind::VirtualNetwork, "vnet1-abc"),
        );

        assert_eq!(
            ctx.handle(ResourceKind::VirtualNetwork, "vnet1").map(ResourceHandle::name),
            Some("vnet1-abc")
        );
        assert!(ctx.handle(ResourceKind::NetworkSecurityGroup, "vnet1").is_none());
        assert!(ctx.remove(ResourceKind::VirtualNetwork, "vnet1").is_some());
        assert!(ctx.handle(ResourceKind::VirtualNetwork, "vnet1").is_none());
    }
}
