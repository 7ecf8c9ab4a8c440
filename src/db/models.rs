use crate::error::PollError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Open,
    Closed,
    Archived,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Open => "open",
            PollStatus::Closed => "closed",
            PollStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PollStatus::Open),
            "closed" => Ok(PollStatus::Closed),
            "archived" => Ok(PollStatus::Archived),
            other => Err(format!("unknown poll status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOption {
    pub label: String,
    pub votes: u64,
}

/// Creation input that already passed validation.
///
/// The only way to obtain one is [`NewPoll::new`], so every persisted poll
/// satisfies the option-count and label invariants.
#[derive(Debug, Clone)]
pub struct NewPoll {
    name: String,
    labels: Vec<String>,
    owner_id: String,
}

impl NewPoll {
    pub fn new(
        name: impl Into<String>,
        labels: Vec<String>,
        owner_id: impl Into<String>,
    ) -> Result<Self, PollError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(PollError::InvalidPoll("poll name is empty".into()));
        }

        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&labels.len()) {
            return Err(PollError::InvalidPoll(format!(
                "a poll needs between {MIN_OPTIONS} and {MAX_OPTIONS} options, got {}",
                labels.len()
            )));
        }

        let labels: Vec<String> = labels.iter().map(|l| l.trim().to_string()).collect();
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if label.is_empty() {
                return Err(PollError::InvalidPoll("option text is empty".into()));
            }
            // "Pizza" and "pizza" would render as the same bar
            if !seen.insert(label.to_lowercase()) {
                return Err(PollError::InvalidPoll(format!(
                    "duplicate option '{label}'"
                )));
            }
        }

        Ok(Self {
            name,
            labels,
            owner_id: owner_id.into(),
        })
    }
}

/// Point-in-time state of one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Poll {
    id: Uuid,
    name: String,
    options: Vec<PollOption>,
    #[serde(skip)]
    owner_id: String,
    status: PollStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn open(new_poll: NewPoll, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: new_poll.name,
            options: new_poll
                .labels
                .into_iter()
                .map(|label| PollOption { label, votes: 0 })
                .collect(),
            owner_id: new_poll.owner_id,
            status: PollStatus::Open,
            created_at: now,
            updated_at: now,
            archived_at: None,
        }
    }

    /// Rebuilds a poll read back from a backend. Rows are only ever written
    /// from validated polls, so the option invariant is rechecked but not
    /// reported in detail.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid,
        name: String,
        options: Vec<PollOption>,
        owner_id: String,
        status: PollStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        archived_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
            return None;
        }
        Some(Self {
            id,
            name,
            options,
            owner_id,
            status,
            created_at,
            updated_at,
            archived_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &[PollOption] {
        &self.options
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn status(&self) -> PollStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    pub fn accepts_votes(&self) -> bool {
        self.status == PollStatus::Open
    }

    pub fn count_for(&self, option_index: usize) -> Option<u64> {
        self.options.get(option_index).map(|o| o.votes)
    }

    pub(crate) fn increment(&mut self, option_index: usize, at: DateTime<Utc>) -> bool {
        match self.options.get_mut(option_index) {
            Some(option) => {
                option.votes += 1;
                self.updated_at = at;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_status(&mut self, status: PollStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        if status == PollStatus::Archived {
            self.archived_at = Some(at);
        }
    }
}

/// Row shown in "recent polls" listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub id: Uuid,
    pub name: String,
    pub options: Vec<PollOption>,
    pub total_votes: u64,
    pub status: PollStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<&Poll> for PollSummary {
    fn from(poll: &Poll) -> Self {
        Self {
            id: poll.id,
            name: poll.name.clone(),
            options: poll.options.clone(),
            total_votes: poll.total_votes(),
            status: poll.status,
            updated_at: poll.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub poll_id: Uuid,
    pub option_index: usize,
    pub voter_id: String,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(poll_id: Uuid, option_index: usize, voter_id: impl Into<String>) -> Self {
        Self {
            poll_id,
            option_index,
            voter_id: voter_id.into(),
            cast_at: Utc::now(),
        }
    }
}

/// Outcome of `record_vote_if_absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteRecord {
    Inserted,
    Existing(Vote),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_two_to_six_options() {
        for n in MIN_OPTIONS..=MAX_OPTIONS {
            let options = (0..n).map(|i| format!("option {i}")).collect();
            let new_poll = NewPoll::new("Lunch", options, "owner").unwrap();
            let poll = Poll::open(new_poll, Utc::now());
            assert_eq!(poll.options().len(), n);
            assert!(poll.options().iter().all(|o| o.votes == 0));
            assert_eq!(poll.status(), PollStatus::Open);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        let cases = [
            NewPoll::new("", labels(&["a", "b"]), "owner"),
            NewPoll::new("   ", labels(&["a", "b"]), "owner"),
            NewPoll::new("Lunch", labels(&["a"]), "owner"),
            NewPoll::new("Lunch", labels(&["a", "b", "c", "d", "e", "f", "g"]), "owner"),
            NewPoll::new("Lunch", labels(&["Pizza", "Pizza"]), "owner"),
            NewPoll::new("Lunch", labels(&["Pizza", "pizza"]), "owner"),
            NewPoll::new("Lunch", labels(&["Pizza", ""]), "owner"),
            NewPoll::new("Lunch", labels(&["Pizza", "Pizza "]), "owner"),
            NewPoll::new("Lunch", labels(&[" pizza", "PIZZA"]), "owner"),
            NewPoll::new("Lunch", labels(&["Pizza", " \t"]), "owner"),
        ];
        for case in cases {
            assert!(matches!(case, Err(PollError::InvalidPoll(_))));
        }
    }

    #[test]
    fn stores_trimmed_text() {
        let poll = Poll::open(
            NewPoll::new("  Lunch  ", labels(&[" Pizza", "Salad "]), "owner").unwrap(),
            Utc::now(),
        );
        assert_eq!(poll.name(), "Lunch");
        assert_eq!(poll.options()[0].label, "Pizza");
        assert_eq!(poll.options()[1].label, "Salad");
    }

    #[test]
    fn increment_touches_updated_at() {
        let created = Utc::now();
        let mut poll = Poll::open(
            NewPoll::new("Lunch", labels(&["Pizza", "Salad"]), "owner").unwrap(),
            created,
        );
        let later = created + chrono::Duration::seconds(5);

        assert!(poll.increment(1, later));
        assert!(!poll.increment(2, later));
        assert_eq!(poll.count_for(1), Some(1));
        assert_eq!(poll.total_votes(), 1);
        assert_eq!(poll.updated_at(), later);
        assert_eq!(poll.created_at(), created);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [PollStatus::Open, PollStatus::Closed, PollStatus::Archived] {
            assert_eq!(status.as_str().parse::<PollStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<PollStatus>().is_err());
    }
}
