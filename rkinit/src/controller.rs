use std::sync::Arc;
use std::time::Duration;

use common::{Node, Object, WorkloadGroup};
use etcd_client::EventType;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::{debug, error, info, warn};

use crate::predicate::{CreateOnly, Event};
use crate::queue::WorkQueue;
use crate::reconcile::{NodeInitReconciler, ReconcileError, ReconcileKey};
use crate::store::{NODES_PREFIX, Revision, StoreError, WORKLOAD_GROUPS_PREFIX, XlineStore};

const MIN_WATCH_BACKOFF: Duration = Duration::from_millis(100);
const MAX_WATCH_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Put,
    Delete,
}

/// The parts of a watch event the controller looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub key: String,
    /// Number of writes to the key since it was created; 1 on creation.
    pub version: i64,
    pub value: Option<Vec<u8>>,
    pub prev_value: Option<Vec<u8>>,
}

impl RawEvent {
    pub fn from_etcd(ev: &etcd_client::Event) -> Option<Self> {
        let kv = ev.kv()?;
        let kind = match ev.event_type() {
            EventType::Put => RawKind::Put,
            EventType::Delete => RawKind::Delete,
        };
        Some(Self {
            kind,
            key: String::from_utf8_lossy(kv.key()).to_string(),
            version: kv.version(),
            value: (!kv.value().is_empty()).then(|| kv.value().to_vec()),
            prev_value: ev.prev_kv().map(|p| p.value().to_vec()),
        })
    }

    /// An object that already existed when the controller started.
    pub fn existing(key: String, value: String) -> Self {
        Self {
            kind: RawKind::Put,
            key,
            version: 1,
            value: Some(value.into_bytes()),
            prev_value: None,
        }
    }
}

/// Maps a watch event onto the lifecycle event it stands for.
///
/// - put at version 1: `Create`
/// - put with a previous value: `Update`
/// - put without a previous value: `Generic`
/// - delete with a previous value: `Delete`
///
/// Deletes without a previous value carry no object and yield `None`.
pub fn decode_event<T: DeserializeOwned>(
    raw: &RawEvent,
) -> Option<Result<Event<T>, serde_yaml::Error>> {
    let decode = |bytes: &[u8]| serde_yaml::from_slice::<T>(bytes);
    let event = match raw.kind {
        RawKind::Put => {
            let new = match decode(raw.value.as_deref()?) {
                Ok(obj) => obj,
                Err(e) => return Some(Err(e)),
            };
            if raw.version == 1 {
                Ok(Event::Create(new))
            } else if let Some(prev) = raw.prev_value.as_deref() {
                decode(prev).map(|old| Event::Update { old, new })
            } else {
                Ok(Event::Generic(new))
            }
        }
        RawKind::Delete => decode(raw.prev_value.as_deref()?).map(Event::Delete),
    };
    Some(event)
}

/// Enqueues the object's key when the filter admits the event.
pub fn dispatch<T: Object>(
    filter: &CreateOnly<T>,
    event: &Event<T>,
    queue: &WorkQueue<ReconcileKey>,
) -> bool {
    if !filter.admits(event) {
        return false;
    }
    let key = ReconcileKey::for_object(event.object());
    debug!("enqueue {key} on {:?}", event.kind());
    queue.add(key);
    true
}

/// Puts a processed key back according to how its reconcile went.
pub fn requeue(
    queue: &WorkQueue<ReconcileKey>,
    key: &ReconcileKey,
    result: &Result<(), ReconcileError>,
) {
    match result {
        Ok(()) => queue.forget(key),
        Err(e) => match e.retry_after() {
            Some(delay) => {
                warn!("reconcile {key} failed: {e}, retrying in {delay:?}");
                queue.add_after(key.clone(), delay);
            }
            None => {
                let delay = queue.add_rate_limited(key.clone());
                error!("reconcile {key} failed: {e}, backing off {delay:?}");
            }
        },
    }
}

/// Watches nodes and tenant backends and runs the node-init reconciler for
/// every object that appears.
pub struct Controller {
    store: XlineStore,
    reconciler: Arc<NodeInitReconciler>,
    queue: WorkQueue<ReconcileKey>,
    workers: usize,
}

impl Controller {
    pub fn new(store: XlineStore, reconciler: NodeInitReconciler, workers: usize) -> Self {
        Self {
            store,
            reconciler: Arc::new(reconciler),
            queue: WorkQueue::new(),
            workers: workers.max(1),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut watches = JoinSet::new();
        watches.spawn(watch_kind::<Node>(
            self.store.clone(),
            NODES_PREFIX,
            CreateOnly::all(),
            self.queue.clone(),
            shutdown.clone(),
        ));
        watches.spawn(watch_kind::<WorkloadGroup>(
            self.store.clone(),
            WORKLOAD_GROUPS_PREFIX,
            CreateOnly::tenant_backends(),
            self.queue.clone(),
            shutdown.clone(),
        ));

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(run_worker(id, self.queue.clone(), self.reconciler.clone()));
        }
        info!("controller started with {} workers", self.workers);

        shutdown.cancelled().await;
        info!("controller shutting down");
        self.queue.shutdown();
        while watches.join_next().await.is_some() {}
        while workers.join_next().await.is_some() {}
    }
}

async fn run_worker(
    id: usize,
    queue: WorkQueue<ReconcileKey>,
    reconciler: Arc<NodeInitReconciler>,
) {
    while let Some(key) = queue.get().await {
        let result = reconciler.reconcile(&key).await;
        requeue(&queue, &key, &result);
        queue.done(&key);
    }
    debug!("worker {id} stopped");
}

/// How a broken watch is picked up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchRestart {
    /// Reconnect from the next unseen revision.
    Resume,
    /// The revision is gone from history: list again and replay.
    Resync,
}

impl WatchRestart {
    /// xline cancels a watch whose start revision was compacted and reports
    /// the compaction point.
    pub fn after_cancel(compact_revision: Revision) -> Self {
        if compact_revision > 0 {
            WatchRestart::Resync
        } else {
            WatchRestart::Resume
        }
    }

    pub fn after_error(err: &StoreError) -> Self {
        if is_index_too_small(err) {
            WatchRestart::Resync
        } else {
            WatchRestart::Resume
        }
    }
}

pub fn is_index_too_small(err: &StoreError) -> bool {
    if let StoreError::Xline(boxed_err) = err
        && let etcd_client::Error::GRpcStatus(status) = &**boxed_err
    {
        return status.code() == Code::OutOfRange
            && status
                .message()
                .contains("required revision has been compacted");
    }
    false
}

/// Replays the current objects under `prefix` as creates and returns the
/// revision to watch from. `None` once shutdown was requested.
async fn resync<T>(
    store: &XlineStore,
    prefix: &'static str,
    filter: &CreateOnly<T>,
    queue: &WorkQueue<ReconcileKey>,
    shutdown: &CancellationToken,
) -> Option<Revision>
where
    T: DeserializeOwned + Object,
{
    let mut backoff = MIN_WATCH_BACKOFF;
    loop {
        match store.snapshot_with_rev(prefix).await {
            Ok((items, rev)) => {
                info!("replaying {} objects under {prefix} at revision {rev}", items.len());
                for (key, value) in items {
                    handle_raw(&RawEvent::existing(key, value), filter, queue);
                }
                return Some(rev + 1);
            }
            Err(e) => {
                error!("failed to list {prefix}: {e}");
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_WATCH_BACKOFF);
            }
        }
    }
}

/// Replays the current objects under `prefix` as creates, then follows the
/// prefix from the snapshot revision on. Reconnects with backoff when the
/// watch breaks and relists when its revision was compacted.
async fn watch_kind<T>(
    store: XlineStore,
    prefix: &'static str,
    filter: CreateOnly<T>,
    queue: WorkQueue<ReconcileKey>,
    shutdown: CancellationToken,
) where
    T: DeserializeOwned + Object,
{
    let Some(mut since) = resync(&store, prefix, &filter, &queue, &shutdown).await else {
        return;
    };
    let mut backoff = MIN_WATCH_BACKOFF;

    loop {
        info!("watching {prefix} from revision {since}");
        let restart = match store.watch_prefix(prefix, since).await {
            Ok((_watcher, mut stream)) => {
                backoff = MIN_WATCH_BACKOFF;
                loop {
                    let resp = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        resp = stream.next() => resp,
                    };
                    let resp = match resp {
                        Some(Ok(resp)) => resp,
                        Some(Err(e)) => {
                            error!("watch on {prefix} failed: {e}");
                            break WatchRestart::after_error(&StoreError::from(e));
                        }
                        None => break WatchRestart::Resume,
                    };
                    if resp.canceled() {
                        warn!("watch on {prefix} canceled, reconnecting...");
                        break WatchRestart::after_cancel(resp.compact_revision());
                    }
                    for ev in resp.events() {
                        if let Some(raw) = RawEvent::from_etcd(ev) {
                            handle_raw(&raw, &filter, &queue);
                        }
                    }
                    if let Some(header) = resp.header() {
                        since = since.max(header.revision() + 1);
                    }
                }
            }
            Err(e) => {
                error!("failed to watch {prefix}: {e}");
                WatchRestart::after_error(&e)
            }
        };

        if restart == WatchRestart::Resync {
            warn!("revision {since} of {prefix} was compacted, relisting");
            match resync(&store, prefix, &filter, &queue, &shutdown).await {
                Some(rev) => since = rev,
                None => return,
            }
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_WATCH_BACKOFF);
    }
}

fn handle_raw<T: DeserializeOwned + Object>(
    raw: &RawEvent,
    filter: &CreateOnly<T>,
    queue: &WorkQueue<ReconcileKey>,
) {
    match decode_event::<T>(raw) {
        Some(Ok(Event::Delete(obj))) => queue.forget(&ReconcileKey::for_object(&obj)),
        Some(Ok(event)) => {
            dispatch(filter, &event, queue);
        }
        Some(Err(e)) => warn!("ignoring undecodable object {}: {e}", raw.key),
        None => {}
    }
}
