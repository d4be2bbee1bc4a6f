/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use blazar_common::MessageId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Redelivery entry point the tracker hands aged-out batches to.
///
/// Dispatch is best-effort: when a batch cannot be delivered (connection
/// down, consumer closing) it is dropped and the broker's own timeout takes
/// over.
pub trait RedeliverOverflow: Send + Sync {
    fn redeliver_overflow(&self, ids: Vec<MessageId>);
}

#[derive(Default)]
struct Buckets {
    current: HashSet<MessageId>,
    old: HashSet<MessageId>,
}

struct TrackerShared {
    buckets: Mutex<Buckets>,
    sink: Arc<dyn RedeliverOverflow>,
}

impl TrackerShared {
    fn lock(&self) -> MutexGuard<'_, Buckets> {
        // The mutex is only held for set operations; a poisoned lock means
        // a panic mid-insert and the bucket content is still usable.
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tick(&self) {
        let aged_out = {
            let mut buckets = self.lock();
            let aged_out = std::mem::take(&mut buckets.old);
            buckets.old = std::mem::take(&mut buckets.current);
            aged_out
        };

        if aged_out.is_empty() {
            return;
        }

        debug!(
            count = aged_out.len(),
            "Requesting redelivery of unacked messages"
        );
        self.sink.redeliver_overflow(aged_out.into_iter().collect());
    }
}

/// Tracks message ids delivered to the application but not yet
/// acknowledged, and requests their redelivery once they age out.
///
/// Two rolling buckets ticked every `timeout / 2` avoid keeping a timer
/// per id: an id sits one full tick in the current bucket and one in the
/// old bucket before it is handed to the redelivery sink.
pub struct UnackedMessageTracker {
    shared: Arc<TrackerShared>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl UnackedMessageTracker {
    pub fn new(sink: Arc<dyn RedeliverOverflow>) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                buckets: Mutex::new(Buckets::default()),
                sink,
            }),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Records an id in the current bucket. Ids already tracked in either
    /// bucket stay where they are, so re-receiving a message does not
    /// extend its deadline.
    pub fn add(&self, id: MessageId) {
        let mut buckets = self.shared.lock();
        if buckets.old.contains(&id) {
            return;
        }
        buckets.current.insert(id);
    }

    /// Forgets an id, wherever it currently lives.
    pub fn remove(&self, id: MessageId) {
        let mut buckets = self.shared.lock();
        buckets.current.remove(&id);
        buckets.old.remove(&id);
    }

    pub fn clear(&self) {
        let mut buckets = self.shared.lock();
        buckets.current.clear();
        buckets.old.clear();
    }

    /// Begins the periodic ticks. Must be called at most once; the timer
    /// task lives until [`UnackedMessageTracker::stop`].
    pub fn start(&self, timeout: Duration) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Unacked message tracker already started");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.clone();
        let period = timeout / 2;
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticks.tick() => shared.tick(),
                }
            }
            debug!("Unacked message tracker stopped");
        });
    }

    /// Ceases ticking. Idempotent; tracked ids stay in place.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    #[cfg(test)]
    fn tick(&self) {
        self.shared.tick();
    }

    #[cfg(test)]
    fn contains(&self, id: MessageId) -> bool {
        let buckets = self.shared.lock();
        buckets.current.contains(&id) || buckets.old.contains(&id)
    }
}
