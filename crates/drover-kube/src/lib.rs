//! Drover Kube - the cluster-facing half of the declarative controller engine
//!
//! Everything here operates on schema-less [`kube::core::DynamicObject`]s
//! through the [`cluster::ClusterDriver`] seam, so the same reconciliation
//! logic runs against a real cluster or the in-memory mock:
//! - `api`: controller definition types (`CompositeController`, strategies)
//! - `claim`: the ownership adopt/release state machine
//! - `children`: observed-vs-desired child reconciliation
//! - `revisions`: the persisted `ControllerRevision` record
//! - `composite`: the per-parent sync pass and the revision-tracked rollout
//! - `controller`: kube-runtime watch/queue wiring

pub mod api;
pub mod children;
pub mod claim;
pub mod cluster;
pub mod composite;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod object;
pub mod revisions;
pub mod selector;

pub use api::{ChildUpdateMethod, CompositeController, UpdateStrategyMap};
pub use children::ChildReconciler;
pub use claim::ClaimManager;
pub use cluster::{ClusterDriver, KubeDriver, MockClusterDriver, ResourceKey};
pub use composite::{CompositeSyncer, RelatedObjects, SyncOutcome};
pub use controller::RuntimeConfig;
pub use error::{Result, SyncError};
pub use object::ChildMap;
pub use revisions::ControllerRevision;
pub use selector::Selector;
