//! Optimistic-concurrency updates.
//!
//! `update_doc` runs fetch → mutate → write and, when the write loses a
//! revision race, refetches and mutates again. Attempts are bounded by
//! `UpdateRetryConfig::max_attempts` with doubling backoff between them.
//! Mutators are reapplied to fresh copies, so they must be pure with respect
//! to their input.

use std::time::Duration;

use serde_json::Value;
use sofa_core::config::UpdateRetryConfig;
use sofa_core::models::{Document, UpdateAllSummary, WriteResult};
use sofa_core::query::QueryParams;
use sofa_core::seq::Seq;

use crate::database::{Database, PutOptions};
use crate::{ClientError, Result};

/// Doubling delay between conflicting attempts, capped
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(config: &UpdateRetryConfig) -> Self {
        Self {
            next: config.initial_backoff().min(config.max_backoff()),
            max: config.max_backoff(),
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

fn id_changed(expected: &str, got: &str) -> ClientError {
    ClientError::InvalidDocument(format!(
        "update mutator changed document id from {} to {}",
        expected, got
    ))
}

impl Database {
    fn max_attempts(&self) -> u32 {
        self.retry.max_attempts.max(1)
    }

    /// Read-modify-write a document until the write wins
    ///
    /// A missing document starts as a bare `{_id}`. The mutator's error aborts
    /// the loop. Exhausting the attempt budget yields
    /// `ClientError::ConflictRetriesExhausted`.
    pub async fn update_doc<F>(&self, id: &str, mut mutator: F) -> Result<WriteResult>
    where
        F: FnMut(Document) -> anyhow::Result<Document>,
    {
        let max_attempts = self.max_attempts();
        let mut backoff = Backoff::new(&self.retry);
        let mut current = self
            .get_doc(id)
            .await?
            .unwrap_or_else(|| Document::new(id));

        for attempt in 1..=max_attempts {
            let updated = mutator(current).map_err(ClientError::Mutator)?;
            if updated.id != id {
                return Err(id_changed(id, &updated.id));
            }
            let result = self.put_doc(&updated, PutOptions::conflict_ok()).await?;
            if result.ok {
                return Ok(result);
            }

            tracing::debug!(id = %id, attempt, "revision conflict, refetching");
            if attempt == max_attempts {
                break;
            }
            tokio::time::sleep(backoff.next_delay()).await;
            current = self
                .get_doc(id)
                .await?
                .unwrap_or_else(|| Document::new(id));
        }

        tracing::warn!(id = %id, attempts = max_attempts, "giving up on contended document");
        Err(ClientError::ConflictRetriesExhausted {
            id: id.to_string(),
            attempts: max_attempts,
        })
    }

    /// Walk the change feed up to the current update sequence and offer every
    /// live document to `mutator`
    ///
    /// `Ok(Some(doc))` writes `doc` (retrying conflicts against the latest
    /// revision), `Ok(None)` leaves the document alone. Changes recorded after
    /// the pass started are not visited.
    pub async fn update_all<F>(&self, mut mutator: F) -> Result<UpdateAllSummary>
    where
        F: FnMut(&Document) -> anyhow::Result<Option<Document>>,
    {
        let info = self.info().await?;
        let max_seq = Seq::from(info.update_seq);
        let mut since = Value::from(0);
        let mut docs_changed = 0;

        'feed: while !Seq::from(since.clone()).is_at_or_after(&max_seq) {
            let params = QueryParams::new()
                .set("since", since.clone())
                .set("include_docs", true)
                .set("limit", self.changes_batch_size);
            let page = self.changes(&params).await?;
            if page.results.is_empty() {
                break;
            }

            for change in page.results {
                if !Seq::from(change.seq.clone()).is_at_or_before(&max_seq) {
                    break 'feed;
                }
                since = change.seq;

                if change.deleted {
                    continue;
                }
                if let Some(doc) = change.doc.filter(|doc| !doc.is_deleted()) {
                    if self.update_existing(doc, &mut mutator).await? {
                        docs_changed += 1;
                    }
                }
            }
        }

        tracing::debug!(db = %self.name(), docs_changed, "update pass finished");
        Ok(UpdateAllSummary {
            ok: true,
            docs_changed,
            max_seq: max_seq.into_value(),
        })
    }

    /// One document of an update_all pass. Returns whether a write happened.
    async fn update_existing<F>(&self, doc: Document, mutator: &mut F) -> Result<bool>
    where
        F: FnMut(&Document) -> anyhow::Result<Option<Document>>,
    {
        let max_attempts = self.max_attempts();
        let mut backoff = Backoff::new(&self.retry);
        let mut current = doc;

        for attempt in 1..=max_attempts {
            let Some(updated) = mutator(&current).map_err(ClientError::Mutator)? else {
                return Ok(false);
            };
            if updated.id != current.id {
                return Err(id_changed(&current.id, &updated.id));
            }
            let result = self.put_doc(&updated, PutOptions::conflict_ok()).await?;
            if result.ok {
                return Ok(true);
            }

            tracing::debug!(id = %current.id, attempt, "revision conflict, refetching");
            if attempt == max_attempts {
                break;
            }
            tokio::time::sleep(backoff.next_delay()).await;
            current = match self.get_doc(&current.id).await? {
                Some(doc) => doc,
                // Deleted underneath us
                None => return Ok(false),
            };
        }

        Err(ClientError::ConflictRetriesExhausted {
            id: current.id,
            attempts: max_attempts,
        })
    }
}
