//! Server-side iteration over the entries of a remote cache.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use hotrod_core::protocol::{Flags, IterationStartParams, NamedFactory};
use hotrod_core::{HotRodError, Result};

use crate::connection::Channel;
use crate::operations::{CacheOperationsFactory, IterationEntry};

/// Options of a remote iteration.
#[derive(Debug, Clone)]
pub struct IterationOptions {
    segments: Option<Vec<u32>>,
    filter_converter: Option<NamedFactory>,
    batch_size: u32,
    metadata: bool,
}

impl IterationOptions {
    /// Iterates every segment in batches of `batch_size` entries.
    pub fn new(batch_size: u32) -> Self {
        Self {
            segments: None,
            filter_converter: None,
            batch_size,
            metadata: false,
        }
    }

    /// Restricts the iteration to these segments.
    pub fn segments(mut self, segments: impl IntoIterator<Item = u32>) -> Self {
        self.segments = Some(segments.into_iter().collect());
        self
    }

    /// Filters or converts entries on the server.
    pub fn filter_converter(mut self, factory: NamedFactory) -> Self {
        self.filter_converter = Some(factory);
        self
    }

    /// Includes entry metadata.
    pub fn with_metadata(mut self, metadata: bool) -> Self {
        self.metadata = metadata;
        self
    }

    fn start_params(&self, segments: Option<Vec<u32>>) -> IterationStartParams {
        IterationStartParams {
            segments,
            filter_converter: self.filter_converter.clone(),
            batch_size: self.batch_size,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug)]
struct ActiveIteration {
    id: String,
    channel: Arc<Channel>,
}

/// Iterator over remote entries, fetched batch by batch.
///
/// The iteration lives on the server that started it, so every batch is
/// requested on the same channel. When that channel is lost the iteration
/// restarts on another server for the segments not yet finished; keys
/// already returned are skipped.
///
/// # Example
///
/// ```ignore
/// let mut entries = cache.entries(IterationOptions::new(100)).await?;
/// while let Some(entry) = entries.next().await? {
///     println!("{:?}", entry.key);
/// }
/// entries.close().await?;
/// ```
pub struct RemoteEntryIterator {
    factory: CacheOperationsFactory,
    options: IterationOptions,
    active: Option<ActiveIteration>,
    buffer: VecDeque<IterationEntry>,
    seen_keys: HashSet<Bytes>,
    finished_segments: HashSet<u32>,
    restarts: u32,
    exhausted: bool,
}

impl std::fmt::Debug for RemoteEntryIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEntryIterator")
            .field("cache", &String::from_utf8_lossy(self.factory.cache_name()))
            .field("iteration_id", &self.active.as_ref().map(|a| a.id.as_str()))
            .field("buffered", &self.buffer.len())
            .field("finished_segments", &self.finished_segments.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl RemoteEntryIterator {
    pub(crate) fn new(factory: CacheOperationsFactory, options: IterationOptions) -> Self {
        Self {
            factory,
            options,
            active: None,
            buffer: VecDeque::new(),
            seen_keys: HashSet::new(),
            finished_segments: HashSet::new(),
            restarts: 0,
            exhausted: false,
        }
    }

    /// Id of the server-side iteration, once started.
    pub fn iteration_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id.as_str())
    }

    /// Segments the server reported as completely returned.
    pub fn finished_segments(&self) -> &HashSet<u32> {
        &self.finished_segments
    }

    /// Returns the next entry, or `None` once every entry was returned.
    pub async fn next(&mut self) -> Result<Option<IterationEntry>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch().await?;
        }
    }

    /// Reads every remaining entry.
    pub async fn collect_remaining(&mut self) -> Result<Vec<IterationEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Releases the server-side iteration.
    pub async fn close(&mut self) -> Result<()> {
        self.exhausted = true;
        self.buffer.clear();
        match self.active.take() {
            Some(active) => self.end(active).await,
            None => Ok(()),
        }
    }

    async fn end(&self, active: ActiveIteration) -> Result<()> {
        let outcome = self
            .factory
            .iteration_end(active.id.clone())
            .execute_on(&active.channel)
            .await;
        self.factory
            .context()
            .channel_factory
            .release_channel(&active.channel);
        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(iteration_id = %active.id, "server no longer knew the iteration");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn remaining_segments(&self) -> Option<Vec<u32>> {
        if self.finished_segments.is_empty() {
            return self.options.segments.clone();
        }
        let requested: Vec<u32> = match &self.options.segments {
            Some(segments) => segments.clone(),
            None => {
                let ctx = self.factory.context();
                let (_, num_segments) = ctx.channel_factory.segment_of(&ctx.cache_name, &[])?;
                (0..num_segments as u32).collect()
            }
        };
        Some(
            requested
                .into_iter()
                .filter(|s| !self.finished_segments.contains(s))
                .collect(),
        )
    }

    async fn start(&mut self) -> Result<()> {
        let params = self.options.start_params(self.remaining_segments());
        let (id, channel) = self
            .factory
            .iteration_start(params, Flags::NONE)
            .execute_with_channel()
            .await?;
        tracing::debug!(iteration_id = %id, address = %channel.address(), "iteration started");
        self.active = Some(ActiveIteration { id, channel });
        Ok(())
    }

    async fn fetch(&mut self) -> Result<()> {
        let (id, channel) = match &self.active {
            Some(active) => (active.id.clone(), Arc::clone(&active.channel)),
            None => {
                self.start().await?;
                return Ok(());
            }
        };

        match self.factory.iteration_next(id).execute_on(&channel).await {
            Ok(batch) => {
                self.finished_segments.extend(batch.finished_segments.iter().copied());
                if batch.is_empty() {
                    self.exhausted = true;
                    if let Some(active) = self.active.take() {
                        self.end(active).await?;
                    }
                    return Ok(());
                }
                for entry in batch.entries {
                    if self.seen_keys.insert(entry.key.clone()) {
                        self.buffer.push_back(entry);
                    }
                }
                Ok(())
            }
            Err(e) if e.is_transport() => self.restart(e),
            Err(e) => Err(e),
        }
    }

    fn restart(&mut self, cause: HotRodError) -> Result<()> {
        let max_restarts = self.factory.context().channel_factory.max_retries();
        self.active = None;
        self.restarts += 1;
        if self.restarts > max_restarts {
            return Err(cause);
        }
        tracing::warn!(
            error = %cause,
            finished_segments = self.finished_segments.len(),
            restart = self.restarts,
            "iteration channel lost, restarting on unfinished segments"
        );
        Ok(())
    }
}

impl Drop for RemoteEntryIterator {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let operation = self.factory.iteration_end(active.id);
        runtime.spawn(async move {
            let _ = operation.execute_on(&active.channel).await;
        });
    }
}
