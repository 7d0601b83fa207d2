//! Watch/queue wiring on top of [`kube::runtime`]
//!
//! One [`CompositeSyncer`] becomes one controller loop: the parent resource
//! is watched across all namespaces, every child kind feeds back into the
//! queue through its controller owner reference, and each dequeued parent
//! goes through a full sync pass.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::Client;
use kube::api::Api;
use kube::core::DynamicObject;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use tracing::{debug, info, warn};

use crate::composite::{CompositeSyncer, SyncOutcome};
use crate::error::SyncError;

/// Tunables for one controller loop.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Parents reconciled concurrently.
    pub concurrency: u16,
    /// Requeue delay after a failed sync pass.
    pub error_requeue: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            error_requeue: Duration::from_secs(5),
        }
    }
}

struct Ctx {
    syncer: CompositeSyncer,
    resync_period: Option<Duration>,
    error_requeue: Duration,
}

/// The requeue interval after a successful pass: what the decision function
/// asked for, or the definition's periodic resync.
fn requeue_after(outcome: &SyncOutcome, resync_period: Option<Duration>) -> Option<Duration> {
    outcome.resync_after.or(resync_period)
}

async fn reconcile(
    parent: Arc<DynamicObject>,
    ctx: Arc<Ctx>,
) -> std::result::Result<Action, SyncError> {
    let outcome = ctx.syncer.sync(&parent).await?;
    Ok(match requeue_after(&outcome, ctx.resync_period) {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

fn error_policy(parent: Arc<DynamicObject>, error: &SyncError, ctx: Arc<Ctx>) -> Action {
    warn!(
        "sync of {} failed: {}",
        crate::object::display_name(&parent),
        error
    );
    Action::requeue(ctx.error_requeue)
}

/// Run one controller loop until shutdown.
///
/// The parent watch covers all namespaces; child watches map events back to
/// the owning parent through their controller owner reference, so a child
/// changing under us re-queues exactly one parent.
pub async fn run(client: Client, syncer: CompositeSyncer, config: RuntimeConfig) {
    let parent_ar = syncer.parent_key().api_resource();
    let parent_api: Api<DynamicObject> = Api::all_with(client.clone(), &parent_ar);
    let wc = watcher::Config::default();

    info!(
        "starting controller for {} ({} child kinds)",
        syncer.parent_key().kind,
        syncer.child_keys().count()
    );
    let mut watches = Controller::new_with(parent_api, wc.clone(), parent_ar);
    for key in syncer.child_keys() {
        let ar = key.api_resource();
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
        watches = watches.owns_with(api, ar, wc.clone());
    }

    let ctx = Arc::new(Ctx {
        resync_period: syncer.resync_period(),
        error_requeue: config.error_requeue,
        syncer,
    });

    watches
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((parent, _)) => debug!("reconciled {parent}"),
                Err(err) => warn!("reconciliation error: {err}"),
            }
        })
        .await;
}
