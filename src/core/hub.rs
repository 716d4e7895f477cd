//! # Broadcast Hub Module / 广播中心模块
//!
//! This module decouples delta production (the run consumption loops) from
//! delivery to subscribers. Per run it keeps a fold-of-deltas snapshot and a
//! bounded broadcast feed behind one brief lock, which is what makes the
//! late-join guarantee hold: `subscribe` captures the snapshot and opens the
//! live feed atomically, so no delta is missed and none is double-applied.
//!
//! 此模块将增量的产生（运行消费循环）与向订阅者的投递解耦。
//! 对每次运行，它在一把短暂持有的锁后维护一个由增量折叠而成的快照
//! 和一个有界广播通道；`subscribe` 原子地捕获快照并打开实时通道，
//! 因此不会丢失或重复应用任何增量。
//!
//! A slow subscriber only hurts itself: when it falls behind the bounded
//! feed it observes a lag error, is expected to drop its state and
//! re-subscribe for a fresh snapshot. Delivery to everyone else never
//! blocks on it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::core::models::{Delta, RunId, RunSnapshot};

/// Per-subscriber buffering bound of each run's delta feed.
/// 每次运行增量通道的单订阅者缓冲上限。
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Announces hub-level changes to "all runs" subscribers.
#[derive(Debug, Clone)]
pub enum HubNotice {
    /// A new run was registered and can now be subscribed to.
    RunOpened { run: RunId, name: String },
}

/// What a subscriber receives on subscription: the full current tree and a
/// live feed beginning strictly after `snapshot.seq`.
///
/// Dropping the receiver is the unsubscribe operation; it releases all
/// per-subscriber resources and is trivially idempotent.
pub struct Subscription {
    pub snapshot: RunSnapshot,
    pub deltas: broadcast::Receiver<Delta>,
}

/// Subscribing to a run the hub has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown run {0}")]
pub struct UnknownRun(pub RunId);

struct RunChannel {
    state: Mutex<RunSnapshot>,
    feed: broadcast::Sender<Delta>,
}

/// Fans deltas out from all active runs to their subscribers and replays
/// current state to late joiners.
/// 将所有活动运行的增量分发给订阅者，并向迟加入者重放当前状态。
pub struct BroadcastHub {
    runs: Mutex<HashMap<RunId, Arc<RunChannel>>>,
    notices: broadcast::Sender<HubNotice>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(capacity.max(16));
        Self {
            runs: Mutex::new(HashMap::new()),
            notices,
            capacity,
        }
    }

    /// Registers a run so subscribers can find it. Called by the supervisor
    /// before the runner process is spawned, so even a run that never leaves
    /// its queued phase is observable.
    pub async fn open_run(&self, run: RunId, name: &str) {
        let (feed, _) = broadcast::channel(self.capacity);
        let channel = Arc::new(RunChannel {
            state: Mutex::new(RunSnapshot::new(run, name)),
            feed,
        });
        self.runs.lock().await.insert(run, channel);
        // No listeners yet is fine; late joiners list runs instead.
        // 尚无监听者也没关系；迟加入者会改为列出运行。
        let _ = self.notices.send(HubNotice::RunOpened {
            run,
            name: name.to_string(),
        });
    }

    /// Folds `deltas` into the run's snapshot and fans them out to every
    /// current subscriber of that run. Never blocks on any subscriber.
    ///
    /// 将 `deltas` 折叠进该运行的快照，并分发给其当前的每个订阅者。
    pub async fn publish(&self, run: RunId, deltas: Vec<Delta>) {
        if deltas.is_empty() {
            return;
        }
        let Some(channel) = self.channel(run).await else {
            debug!(%run, "dropping deltas for unregistered run");
            return;
        };
        let mut state = channel.state.lock().await;
        for delta in deltas {
            state.apply(&delta);
            // Err means no subscriber right now; the snapshot already
            // absorbed the delta, so nothing is lost.
            let _ = channel.feed.send(delta);
        }
    }

    /// Atomically captures the run's current tree and opens a live feed
    /// starting strictly after the snapshot's sequence number.
    pub async fn subscribe(&self, run: RunId) -> Result<Subscription, UnknownRun> {
        let channel = self.channel(run).await.ok_or(UnknownRun(run))?;
        let state = channel.state.lock().await;
        let deltas = channel.feed.subscribe();
        Ok(Subscription {
            snapshot: state.clone(),
            deltas,
        })
    }

    /// Immutable copy of the run's current state.
    pub async fn snapshot(&self, run: RunId) -> Option<RunSnapshot> {
        match self.channel(run).await {
            Some(channel) => Some(channel.state.lock().await.clone()),
            None => None,
        }
    }

    /// Snapshots of every registered run, oldest first.
    pub async fn list(&self) -> Vec<RunSnapshot> {
        let channels: Vec<Arc<RunChannel>> = {
            let runs = self.runs.lock().await;
            let mut entries: Vec<_> = runs.iter().map(|(id, c)| (*id, Arc::clone(c))).collect();
            entries.sort_by_key(|(id, _)| *id);
            entries.into_iter().map(|(_, c)| c).collect()
        };
        let mut snapshots = Vec::with_capacity(channels.len());
        for channel in channels {
            snapshots.push(channel.state.lock().await.clone());
        }
        snapshots
    }

    /// Feed of hub-level notices, for "all runs" subscribers that need to
    /// attach to runs started after them.
    pub fn notices(&self) -> broadcast::Receiver<HubNotice> {
        self.notices.subscribe()
    }

    async fn channel(&self, run: RunId) -> Option<Arc<RunChannel>> {
        self.runs.lock().await.get(&run).cloned()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
