//! Scatter/gather over the servers owning a set of keys.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::Arc;

use hotrod_core::{HotRodError, Result};
use parking_lot::Mutex;
use tokio::task::JoinSet;

/// Groups items by the primary owner of their key.
///
/// Items whose owner is unknown share the `None` group.
pub(crate) fn partition_by_owner<K, F>(
    items: impl IntoIterator<Item = K>,
    owner: F,
) -> HashMap<Option<SocketAddr>, Vec<K>>
where
    F: Fn(&K) -> Option<SocketAddr>,
{
    let mut groups: HashMap<Option<SocketAddr>, Vec<K>> = HashMap::new();
    for item in items {
        groups.entry(owner(&item)).or_default().push(item);
    }
    groups
}

/// Runs `run` once per group and merges the partial results.
///
/// No groups yields `C::default()`. A single group runs on the caller's
/// task. Otherwise every group runs on its own task and the partial results
/// are merged in completion order. The first failure is returned and the
/// remaining groups are aborted.
pub(crate) async fn scatter<K, T, C, F, Fut, M>(
    mut groups: Vec<Vec<K>>,
    run: F,
    merge: M,
) -> Result<C>
where
    K: Send + 'static,
    T: Send + 'static,
    C: Default + Send + 'static,
    F: Fn(Vec<K>) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    M: Fn(&mut C, T) + Send + Sync + 'static,
{
    if groups.len() <= 1 {
        let mut collector = C::default();
        if let Some(group) = groups.pop() {
            merge(&mut collector, run(group).await?);
        }
        return Ok(collector);
    }

    let collector = Arc::new(Mutex::new(C::default()));
    let merge = Arc::new(merge);
    let mut tasks = JoinSet::new();
    for group in groups {
        let part = run(group);
        let collector = Arc::clone(&collector);
        let merge = Arc::clone(&merge);
        tasks.spawn(async move {
            let result = part.await?;
            merge(&mut collector.lock(), result);
            Ok::<_, HotRodError>(())
        });
    }

    tracing::trace!(groups = tasks.len(), "scattered request");
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.unwrap_or_else(|e| {
            Err(HotRodError::Internal(format!("scatter task failed: {e}")))
        });
        if let Err(e) = outcome {
            tasks.abort_all();
            return Err(e);
        }
    }

    let merged = std::mem::take(&mut *collector.lock());
    Ok(merged)
}
