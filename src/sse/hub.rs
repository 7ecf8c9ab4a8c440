//! Live fan-out of poll snapshots.
//!
//! Each subscription owns a bounded buffer. Publishing never waits on a
//! subscriber: an observer whose buffer is full is dropped and its stream
//! reports [`PollError::SubscriptionOverflow`].

use crate::db::Poll;
use crate::error::PollError;
use crate::sse::models::{FeedEvent, FeedSender, ObserverHandle};
use crate::store::PollStore;
use futures::stream::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{self, Context};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

#[derive(Default)]
struct SlotSignal {
    overflowed: AtomicBool,
    released: AtomicBool,
}

struct Slot {
    generation: u64,
    tx: mpsc::Sender<Poll>,
    signal: Arc<SlotSignal>,
}

/// Watched polls only; a poll's entry goes away with its last observer.
type Observers = Arc<Mutex<HashMap<Uuid, HashMap<ObserverHandle, Slot>>>>;

fn remove_slot(
    observers: &mut HashMap<Uuid, HashMap<ObserverHandle, Slot>>,
    poll_id: Uuid,
    observer: ObserverHandle,
    generation: Option<u64>,
) -> Option<Slot> {
    let slots = observers.get_mut(&poll_id)?;
    let matches = slots
        .get(&observer)
        .is_some_and(|slot| generation.is_none_or(|g| slot.generation == g));
    let removed = if matches { slots.remove(&observer) } else { None };
    if slots.is_empty() {
        observers.remove(&poll_id);
    }
    removed
}

pub struct SubscriptionHub {
    store: Arc<PollStore>,
    observers: Observers,
    buffer: usize,
    next_generation: AtomicU64,
    feed: FeedSender,
}

impl SubscriptionHub {
    pub fn new(store: Arc<PollStore>, buffer: usize, feed_capacity: usize) -> Self {
        let (feed, _rx) = broadcast::channel(feed_capacity.max(1));
        Self {
            store,
            observers: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
            next_generation: AtomicU64::new(0),
            feed,
        }
    }

    /// Starts watching a poll. The first item is the poll's current state;
    /// after that one snapshot arrives per accepted vote, in commit order.
    ///
    /// Subscribing again with the same handle replaces the earlier stream.
    pub async fn subscribe(
        &self,
        poll_id: Uuid,
        observer: ObserverHandle,
    ) -> Result<Subscription, PollError> {
        // holding the writer keeps votes out between snapshot and registration
        let writer = self.store.writer(poll_id).await?;
        let snapshot = writer.snapshot().await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        if tx.try_send(snapshot).is_err() {
            return Err(PollError::SubscriptionOverflow);
        }

        let signal = Arc::new(SlotSignal::default());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut observers = self.observers.lock();
            let slot = Slot {
                generation,
                tx,
                signal: Arc::clone(&signal),
            };
            if let Some(previous) = observers.entry(poll_id).or_default().insert(observer, slot) {
                previous.signal.released.store(true, Ordering::Release);
            }
        }
        drop(writer);

        debug!(%poll_id, %observer, "observer subscribed");
        Ok(Subscription {
            poll_id,
            observer,
            generation,
            rx,
            signal,
            observers: Arc::clone(&self.observers),
            done: false,
        })
    }

    /// Stops delivery to `observer`. Unknown observers are ignored.
    pub fn unsubscribe(&self, poll_id: Uuid, observer: ObserverHandle) {
        let removed = remove_slot(&mut self.observers.lock(), poll_id, observer, None);
        if let Some(slot) = removed {
            slot.signal.released.store(true, Ordering::Release);
            debug!(%poll_id, %observer, "observer unsubscribed");
        }
    }

    /// Delivers a snapshot to every observer of its poll.
    ///
    /// Callers hold the poll's writer so all observers see one order.
    pub fn publish(&self, poll: &Poll) {
        let mut observers = self.observers.lock();
        let Some(slots) = observers.get_mut(&poll.id()) else {
            return;
        };

        slots.retain(|observer, slot| match slot.tx.try_send(poll.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                slot.signal.overflowed.store(true, Ordering::Release);
                warn!(poll_id = %poll.id(), %observer, "subscriber buffer full, dropping observer");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        if slots.is_empty() {
            observers.remove(&poll.id());
        }
    }

    pub fn subscriber_count(&self, poll_id: Uuid) -> usize {
        self.observers
            .lock()
            .get(&poll_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn announce(&self, event: FeedEvent) {
        // no receivers is fine
        let _ = self.feed.send(event);
    }

    pub fn feed(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}

/// Live stream of one poll's snapshots for one observer.
///
/// Dropping it releases the slot, which is how a closed transport cancels.
pub struct Subscription {
    poll_id: Uuid,
    observer: ObserverHandle,
    generation: u64,
    rx: mpsc::Receiver<Poll>,
    signal: Arc<SlotSignal>,
    observers: Observers,
    done: bool,
}

impl Subscription {
    pub fn poll_id(&self) -> Uuid {
        self.poll_id
    }

    fn finish(&mut self) {
        self.done = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Stream for Subscription {
    type Item = Result<Poll, PollError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return task::Poll::Ready(None);
        }
        if this.signal.released.load(Ordering::Acquire) {
            this.finish();
            return task::Poll::Ready(None);
        }
        if this.signal.overflowed.load(Ordering::Acquire) {
            this.finish();
            return task::Poll::Ready(Some(Err(PollError::SubscriptionOverflow)));
        }

        match this.rx.poll_recv(cx) {
            task::Poll::Ready(Some(poll)) => task::Poll::Ready(Some(Ok(poll))),
            task::Poll::Ready(None) => {
                this.finish();
                if this.signal.overflowed.load(Ordering::Acquire) {
                    task::Poll::Ready(Some(Err(PollError::SubscriptionOverflow)))
                } else {
                    task::Poll::Ready(None)
                }
            }
            task::Poll::Pending => task::Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // a replaced stream must leave its successor's slot alone
        remove_slot(
            &mut self.observers.lock(),
            self.poll_id,
            self.observer,
            Some(self.generation),
        );
    }
}
