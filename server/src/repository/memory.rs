//! In-memory repository for tests and database-less runs.

use super::{decide, Decision, PushOutcome, Repository};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tideline_engine::{Change, RecordId, Seq};

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<RecordId, (Seq, Change)>,
    last_seq: Seq,
}

/// Documents held in a `HashMap` behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn apply(&self, changes: &[Change]) -> Result<Vec<PushOutcome>> {
        let mut inner = self.lock();
        let mut outcomes = Vec::with_capacity(changes.len());

        for change in changes {
            let stored = inner.documents.get(&change.id).map(|(_, c)| c);
            let outcome = match decide(change, stored) {
                Decision::Store => {
                    inner.last_seq += 1;
                    let seq = inner.last_seq;
                    inner
                        .documents
                        .insert(change.id.clone(), (seq, change.clone()));
                    PushOutcome::Stored(seq)
                }
                Decision::Unchanged => PushOutcome::Unchanged,
                Decision::Keep(winning_updated_at) => PushOutcome::Rejected { winning_updated_at },
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn changes_since(&self, since: Seq, limit: usize) -> Result<Vec<(Seq, Change)>> {
        let inner = self.lock();
        let mut page: Vec<(Seq, Change)> = inner
            .documents
            .values()
            .filter(|(seq, _)| *seq > since)
            .cloned()
            .collect();
        page.sort_by_key(|(seq, _)| *seq);
        page.truncate(limit);
        Ok(page)
    }

    async fn get(&self, id: &str) -> Result<Option<Change>> {
        Ok(self.lock().documents.get(id).map(|(_, c)| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideline_engine::Fields;

    fn change(id: &str, updated_at: u64) -> Change {
        Change {
            id: id.into(),
            doc_type: "note".into(),
            fields: Fields::new(),
            created_at: 1,
            updated_at,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn rewrite_moves_document_to_the_end() {
        let repo = MemoryRepository::new();
        repo.apply(&[change("a", 1), change("b", 1)]).await.unwrap();
        let outcomes = repo.apply(&[change("a", 2)]).await.unwrap();
        assert_eq!(outcomes, vec![PushOutcome::Stored(3)]);

        let ids: Vec<_> = repo
            .changes_since(0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|(seq, c)| (seq, c.id))
            .collect();
        assert_eq!(ids, vec![(2, "b".to_string()), (3, "a".to_string())]);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn pages_respect_since_and_limit() {
        let repo = MemoryRepository::new();
        let batch: Vec<_> = (0..5).map(|i| change(&format!("d{i}"), 1)).collect();
        repo.apply(&batch).await.unwrap();

        let page = repo.changes_since(2, 2).await.unwrap();
        let seqs: Vec<_> = page.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(repo.changes_since(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_push_is_rejected() {
        let repo = MemoryRepository::new();
        repo.apply(&[change("a", 10)]).await.unwrap();

        let outcomes = repo.apply(&[change("a", 10), change("a", 3)]).await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                PushOutcome::Unchanged,
                PushOutcome::Rejected {
                    winning_updated_at: 10
                }
            ]
        );
        assert_eq!(repo.get("a").await.unwrap().unwrap().updated_at, 10);
    }
}
