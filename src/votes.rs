use crate::db::{Poll, PollSummary, Vote, VoteRecord};
use crate::error::PollError;
use crate::sse::{FeedEvent, SubscriptionHub};
use crate::store::PollStore;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    pub poll_id: Uuid,
    pub option_index: usize,
    /// True when this exact vote had been counted by an earlier submission.
    pub already_applied: bool,
    pub snapshot: Poll,
}

pub struct VoteProcessor {
    store: Arc<PollStore>,
    hub: Arc<SubscriptionHub>,
}

impl VoteProcessor {
    pub fn new(store: Arc<PollStore>, hub: Arc<SubscriptionHub>) -> Self {
        Self { store, hub }
    }

    /// Counts one vote.
    ///
    /// The (poll, voter) record is committed before the tally moves, so a
    /// failure between the two can only under-count, never count twice.
    /// Resubmitting an already counted vote returns the current state with
    /// `already_applied` set, even after the poll closed; the same voter
    /// picking a different option is a `DuplicateVote`.
    pub async fn submit_vote(
        &self,
        poll_id: Uuid,
        option_index: usize,
        voter_id: &str,
    ) -> Result<VoteReceipt, PollError> {
        let writer = self.store.writer(poll_id).await?;
        let poll = writer.snapshot().await?;

        if option_index >= poll.options().len() {
            return Err(PollError::InvalidOption(format!(
                "option {option_index} does not exist, poll has {} options",
                poll.options().len()
            )));
        }

        if !poll.accepts_votes() {
            // a retry of a vote counted before the close still succeeds
            return match writer.find_vote(voter_id).await? {
                Some(prior) if prior.option_index == option_index => Ok(VoteReceipt {
                    poll_id,
                    option_index,
                    already_applied: true,
                    snapshot: poll,
                }),
                _ => Err(PollError::PollClosed),
            };
        }

        let vote = Vote::new(poll_id, option_index, voter_id);
        match writer.record_vote_if_absent(&vote).await? {
            VoteRecord::Inserted => {}
            VoteRecord::Existing(prior) if prior.option_index == option_index => {
                debug!(%poll_id, option_index, "vote already applied");
                return Ok(VoteReceipt {
                    poll_id,
                    option_index,
                    already_applied: true,
                    snapshot: poll,
                });
            }
            VoteRecord::Existing(_) => return Err(PollError::DuplicateVote),
        }

        let updated = writer.increment_option(option_index).await?;
        self.hub.publish(&updated);
        self.hub.announce(FeedEvent::PollUpdated {
            poll: PollSummary::from(&updated),
        });
        drop(writer);

        info!(%poll_id, option_index, total = updated.total_votes(), "vote accepted");
        Ok(VoteReceipt {
            poll_id,
            option_index,
            already_applied: false,
            snapshot: updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryBackend, NewPoll};
    use crate::sse::ObserverHandle;
    use crate::store::RetryPolicy;
    use crate::store::tests::{FlakyBackend, lunch};
    use std::time::Duration;
    use futures::StreamExt;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        store: Arc<PollStore>,
        hub: Arc<SubscriptionHub>,
        votes: Arc<VoteProcessor>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(PollStore::new(
            backend.clone(),
            RetryPolicy::default(),
            None,
        ));
        let hub = Arc::new(SubscriptionHub::new(Arc::clone(&store), 64, 16));
        let votes = Arc::new(VoteProcessor::new(Arc::clone(&store), Arc::clone(&hub)));
        Fixture {
            backend,
            store,
            hub,
            votes,
        }
    }

    #[tokio::test]
    async fn lunch_scenario_tallies_once_per_voter() {
        let f = fixture();
        let poll = f.store.create(lunch()).await.unwrap();

        let first = f.votes.submit_vote(poll.id(), 0, "voterA").await.unwrap();
        assert!(!first.already_applied);
        f.votes.submit_vote(poll.id(), 0, "voterB").await.unwrap();
        let retry = f.votes.submit_vote(poll.id(), 0, "voterA").await.unwrap();
        assert!(retry.already_applied);

        let poll = f.store.get(poll.id()).await.unwrap();
        assert_eq!(poll.count_for(0), Some(2));
        assert_eq!(poll.count_for(1), Some(0));
        assert_eq!(f.backend.vote_count().await, 2);
    }

    #[tokio::test]
    async fn changing_the_choice_is_a_duplicate() {
        let f = fixture();
        let poll = f.store.create(lunch()).await.unwrap();

        f.votes.submit_vote(poll.id(), 0, "voterA").await.unwrap();
        assert_eq!(
            f.votes.submit_vote(poll.id(), 1, "voterA").await,
            Err(PollError::DuplicateVote)
        );
        assert_eq!(f.store.get(poll.id()).await.unwrap().total_votes(), 1);
    }

    #[tokio::test]
    async fn rejects_unknown_poll_and_option() {
        let f = fixture();
        let poll = f.store.create(lunch()).await.unwrap();

        assert_eq!(
            f.votes.submit_vote(Uuid::new_v4(), 0, "voterA").await,
            Err(PollError::NotFound)
        );
        assert!(matches!(
            f.votes.submit_vote(poll.id(), 2, "voterA").await,
            Err(PollError::InvalidOption(_))
        ));
        // the rejected attempt left no dedupe record behind
        assert_eq!(f.backend.vote_count().await, 0);
        f.votes.submit_vote(poll.id(), 1, "voterA").await.unwrap();
    }

    #[tokio::test]
    async fn closed_polls_refuse_new_votes() {
        let f = fixture();
        let poll = f.store.create(lunch()).await.unwrap();
        f.votes.submit_vote(poll.id(), 1, "voterA").await.unwrap();
        f.store.close(poll.id(), "owner").await.unwrap();

        assert_eq!(
            f.votes.submit_vote(poll.id(), 0, "voterB").await,
            Err(PollError::PollClosed)
        );
        assert_eq!(f.backend.vote_count().await, 1);
        assert_eq!(f.store.get(poll.id()).await.unwrap().total_votes(), 1);
    }

    #[tokio::test]
    async fn counted_votes_can_be_retried_after_close() {
        let f = fixture();
        let poll = f.store.create(lunch()).await.unwrap();
        f.votes.submit_vote(poll.id(), 0, "voterA").await.unwrap();
        f.store.close(poll.id(), "owner").await.unwrap();

        let retry = f.votes.submit_vote(poll.id(), 0, "voterA").await.unwrap();
        assert!(retry.already_applied);
        assert_eq!(retry.snapshot.count_for(0), Some(1));

        assert_eq!(
            f.votes.submit_vote(poll.id(), 1, "voterA").await,
            Err(PollError::PollClosed)
        );

        f.store.archive(poll.id(), "owner").await.unwrap();
        let retry = f.votes.submit_vote(poll.id(), 0, "voterA").await.unwrap();
        assert!(retry.already_applied);
        assert_eq!(f.backend.vote_count().await, 1);
    }

    fn flaky_fixture() -> (Arc<FlakyBackend>, Arc<PollStore>, VoteProcessor) {
        let backend = Arc::new(FlakyBackend::new(0));
        let store = Arc::new(PollStore::new(
            backend.clone(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            None,
        ));
        let hub = Arc::new(SubscriptionHub::new(Arc::clone(&store), 8, 8));
        let votes = VoteProcessor::new(Arc::clone(&store), hub);
        (backend, store, votes)
    }

    #[tokio::test]
    async fn transient_vote_failures_are_retried() {
        let (backend, store, votes) = flaky_fixture();
        let poll = store.create(lunch()).await.unwrap();

        backend.fail_next("record_vote_if_absent", 2);
        votes.submit_vote(poll.id(), 0, "voterA").await.unwrap();

        backend.fail_next("atomic_increment", 2);
        votes.submit_vote(poll.id(), 1, "voterB").await.unwrap();

        let poll = store.get(poll.id()).await.unwrap();
        assert_eq!(poll.count_for(0), Some(1));
        assert_eq!(poll.count_for(1), Some(1));
    }

    #[tokio::test]
    async fn exhausted_vote_retries_are_unavailable() {
        let (backend, store, votes) = flaky_fixture();
        let poll = store.create(lunch()).await.unwrap();

        backend.fail_next("record_vote_if_absent", 3);
        assert_eq!(
            votes.submit_vote(poll.id(), 0, "voterA").await,
            Err(PollError::Unavailable)
        );
        assert_eq!(backend.inner.vote_count().await, 0);

        backend.fail_next("atomic_increment", 3);
        assert_eq!(
            votes.submit_vote(poll.id(), 0, "voterB").await,
            Err(PollError::Unavailable)
        );
        assert_eq!(store.get(poll.id()).await.unwrap().total_votes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_voters_are_all_counted() {
        let f = fixture();
        let options = (1..=6).map(|i| format!("slot {i}")).collect();
        let poll = f
            .store
            .create(NewPoll::new("Standup time", options, "owner").unwrap())
            .await
            .unwrap();
        let poll_id = poll.id();

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let votes = Arc::clone(&f.votes);
                tokio::spawn(async move {
                    votes
                        .submit_vote(poll_id, 3, &format!("voter-{i}"))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let poll = f.store.get(poll_id).await.unwrap();
        assert_eq!(poll.count_for(3), Some(64));
        assert_eq!(poll.total_votes(), 64);
    }

    #[tokio::test]
    async fn accepted_votes_reach_subscribers_and_the_feed() {
        let f = fixture();
        let poll = f.store.create(lunch()).await.unwrap();
        let mut feed = f.hub.feed();
        let mut sub = f
            .hub
            .subscribe(poll.id(), ObserverHandle::new())
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().total_votes(), 0);

        f.votes.submit_vote(poll.id(), 1, "voterA").await.unwrap();
        // duplicates publish nothing
        f.votes.submit_vote(poll.id(), 1, "voterA").await.unwrap();
        f.votes.submit_vote(poll.id(), 0, "voterB").await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.count_for(1), Some(1));
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.total_votes(), 2);

        match feed.recv().await.unwrap() {
            FeedEvent::PollUpdated { poll: summary } => assert_eq!(summary.total_votes, 1),
            other => panic!("unexpected feed event {other:?}"),
        }
    }
}
