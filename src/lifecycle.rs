//! Load generations.
//!
//! Every load cycle gets a generation number and a cancellation token.
//! Starting a new cycle cancels the previous token, which drops that
//! cycle's in-flight requests. Results are tagged with their generation so
//! the session can discard any that arrive after being superseded.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::feeds::{FeedAdapter, FeedQuery};
use crate::models::{Agency, RawRecord};

/// Identifies one load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handed to a load cycle when it starts.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: Generation,
    token: CancellationToken,
}

impl LoadTicket {
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Tracks the one live load generation.
#[derive(Debug, Default)]
pub struct LoadController {
    current: Option<LoadTicket>,
    issued: u64,
}

impl LoadController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersede the live generation (if any) and start a new one.
    pub fn start_load(&mut self) -> LoadTicket {
        if let Some(previous) = self.current.take() {
            debug!(generation = %previous.generation, "superseding load");
            previous.token.cancel();
        }

        self.issued += 1;
        let ticket = LoadTicket {
            generation: Generation(self.issued),
            token: CancellationToken::new(),
        };
        self.current = Some(ticket.clone());
        ticket
    }

    /// Whether `generation` is the live one.
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    #[must_use]
    pub fn current(&self) -> Option<Generation> {
        self.current.as_ref().map(|t| t.generation)
    }
}

/// What one adapter produced.
#[derive(Debug)]
pub enum FeedResult {
    Fetched(Vec<RawRecord>),
    /// The adapter had nothing to contribute to this query
    Declined,
    Failed(String),
}

/// One adapter's settled result.
#[derive(Debug)]
pub struct FeedOutcome {
    pub agency: Agency,
    pub result: FeedResult,
}

/// All adapters' results for one generation.
#[derive(Debug)]
pub struct LoadReport {
    pub generation: Generation,
    pub outcomes: Vec<FeedOutcome>,
}

impl LoadReport {
    /// Agencies whose fetch failed, with the reason.
    #[must_use]
    pub fn failures(&self) -> Vec<(Agency, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                FeedResult::Failed(reason) => Some((o.agency, reason.as_str())),
                FeedResult::Fetched(_) | FeedResult::Declined => None,
            })
            .collect()
    }

    /// True when something was attempted and every attempt failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        let mut attempted = self
            .outcomes
            .iter()
            .filter(|o| !matches!(o.result, FeedResult::Declined))
            .peekable();
        attempted.peek().is_some() && attempted.all(|o| matches!(o.result, FeedResult::Failed(_)))
    }

    /// Every fetched record, in adapter order.
    #[must_use]
    pub fn into_records(self) -> Vec<RawRecord> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o.result {
                FeedResult::Fetched(records) => Some(records),
                FeedResult::Declined | FeedResult::Failed(_) => None,
            })
            .flatten()
            .collect()
    }
}

/// Run every adapter concurrently and wait for all of them to settle.
///
/// Returns `None` if the ticket is cancelled first; in-flight requests are
/// dropped.
pub async fn fetch_all(
    adapters: &[Arc<dyn FeedAdapter>],
    query: &FeedQuery,
    ticket: &LoadTicket,
) -> Option<LoadReport> {
    let fetches = adapters.iter().map(|adapter| async move {
        let agency = adapter.agency();
        let result = match adapter.fetch(query).await {
            Ok(Some(records)) => {
                debug!(%agency, count = records.len(), "feed settled");
                FeedResult::Fetched(records)
            }
            Ok(None) => FeedResult::Declined,
            Err(e) => {
                warn!(%agency, "feed fetch failed: {e}");
                FeedResult::Failed(e.to_string())
            }
        };
        FeedOutcome { agency, result }
    });

    tokio::select! {
        () = ticket.token.cancelled() => {
            debug!(generation = %ticket.generation, "load cancelled");
            None
        }
        outcomes = join_all(fetches) => Some(LoadReport {
            generation: ticket.generation,
            outcomes,
        }),
    }
}

/// Run `fetch_all` as a task and send the report to `tx`.
///
/// Cancelled loads send nothing.
pub fn spawn_load(
    adapters: Vec<Arc<dyn FeedAdapter>>,
    query: FeedQuery,
    ticket: LoadTicket,
    tx: mpsc::UnboundedSender<LoadReport>,
) {
    tokio::spawn(async move {
        if let Some(report) = fetch_all(&adapters, &query, &ticket).await {
            // receiver gone means the session is shutting down
            let _ = tx.send(report);
        }
    });
}
