use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ai::llm::Message;
use crate::ingest::{Transaction, TransactionTable};

/// File id of the table that holds transactions added by hand.
pub const MANUAL_FILE_ID: &str = "manual";
const MANUAL_FILENAME: &str = "manual entries";

/// Chat turns kept per session.
const MAX_HISTORY: usize = 40;

#[derive(Debug, Clone)]
pub struct StoredTable {
    pub file_id: String,
    pub filename: String,
    pub table: Arc<TransactionTable>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub tables: Vec<StoredTable>,
    pub income: Option<Decimal>,
    pub budget: Option<BTreeMap<String, Decimal>>,
    pub history: Vec<Message>,
    pub created_at: SystemTime,
    pub last_accessed: SystemTime,
}

impl Session {
    fn new(id: String) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            tables: Vec::new(),
            income: None,
            budget: None,
            history: Vec::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    /// Tables whose file id is listed, or every table when `file_ids` is empty.
    pub fn select_tables(&self, file_ids: &[String]) -> Vec<StoredTable> {
        self.tables
            .iter()
            .filter(|t| file_ids.is_empty() || file_ids.iter().any(|id| *id == t.file_id))
            .cloned()
            .collect()
    }

    pub fn transaction_count(&self) -> usize {
        self.tables.iter().map(|t| t.table.row_count()).sum()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Unknown session '{0}'")]
    UnknownSession(String),
    #[error("No data uploaded yet. Please upload a file first.")]
    NoData,
}

pub type Mutation<'a> = Box<dyn FnOnce(&mut Session) + Send + 'a>;

/// Session storage used by the API. Mutations of one session are applied
/// one at a time; different sessions are independent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `session_id` when it names a live session, otherwise a new id.
    async fn create_or_get(&self, session_id: Option<&str>) -> String;

    /// Snapshot of the session.
    async fn get(&self, session_id: &str) -> Result<Session, StoreError>;

    /// Run `mutation` while holding the session's lock.
    async fn mutate<'a>(&self, session_id: &str, mutation: Mutation<'a>) -> Result<(), StoreError>;

    async fn add_table(
        &self,
        session_id: &str,
        filename: String,
        table: TransactionTable,
    ) -> Result<String, StoreError> {
        let file_id = Uuid::new_v4().to_string();
        let stored = StoredTable {
            file_id: file_id.clone(),
            filename,
            table: Arc::new(table),
            uploaded_at: Utc::now(),
        };
        self.mutate(session_id, Box::new(move |s| s.tables.push(stored)))
            .await?;
        Ok(file_id)
    }

    /// Selected tables in upload order. Fails with `NoData` when nothing
    /// is selected.
    async fn get_tables(
        &self,
        session_id: &str,
        file_ids: &[String],
    ) -> Result<Vec<StoredTable>, StoreError> {
        let tables = self.get(session_id).await?.select_tables(file_ids);
        if tables.is_empty() {
            return Err(StoreError::NoData);
        }
        Ok(tables)
    }

    async fn set_income(&self, session_id: &str, income: Decimal) -> Result<(), StoreError> {
        self.mutate(session_id, Box::new(move |s| s.income = Some(income)))
            .await
    }

    async fn set_budget(
        &self,
        session_id: &str,
        budget: BTreeMap<String, Decimal>,
    ) -> Result<(), StoreError> {
        self.mutate(session_id, Box::new(move |s| s.budget = Some(budget)))
            .await
    }

    /// Append to the hand-entered table, creating it on first use.
    async fn add_transaction(
        &self,
        session_id: &str,
        tx: Transaction,
    ) -> Result<String, StoreError> {
        self.mutate(
            session_id,
            Box::new(move |s| {
                if let Some(manual) = s.tables.iter_mut().find(|t| t.file_id == MANUAL_FILE_ID) {
                    let table = Arc::make_mut(&mut manual.table);
                    table.transactions.push(tx);
                } else {
                    s.tables.push(StoredTable {
                        file_id: MANUAL_FILE_ID.to_string(),
                        filename: MANUAL_FILENAME.to_string(),
                        table: Arc::new(TransactionTable {
                            transactions: vec![tx],
                            column_count: 4,
                            warnings: Vec::new(),
                        }),
                        uploaded_at: Utc::now(),
                    });
                }
            }),
        )
        .await?;
        Ok(MANUAL_FILE_ID.to_string())
    }

    async fn append_history(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        self.mutate(
            session_id,
            Box::new(move |s| {
                s.history.extend(messages);
                let overflow = s.history.len().saturating_sub(MAX_HISTORY);
                s.history.drain(..overflow);
            }),
        )
        .await
    }
}

#[derive(Clone)]
pub struct InMemorySessionStore {
    inner: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
    ttl: Option<Duration>,
}

impl InMemorySessionStore {
    /// `ttl` of `None` keeps sessions until the process exits.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    fn is_expired(&self, session: &Session, now: SystemTime) -> bool {
        match (self.ttl, now.duration_since(session.last_accessed)) {
            (Some(ttl), Ok(elapsed)) => elapsed >= ttl,
            _ => false,
        }
    }

    /// Drop idle sessions. Sessions currently locked are in use and kept.
    fn evict_expired(&self, store: &mut HashMap<String, Arc<Mutex<Session>>>) {
        if self.ttl.is_none() {
            return;
        }
        let now = SystemTime::now();
        let before = store.len();

        store.retain(|_, entry| match entry.try_lock() {
            Ok(session) => !self.is_expired(&session, now),
            Err(_) => true,
        });

        let evicted = before - store.len();
        if evicted > 0 {
            info!(evicted, remaining = store.len(), "expired sessions evicted");
        }
    }

    /// Locked handle to a live session. Expired sessions are removed here
    /// as well as during eviction.
    async fn entry(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, StoreError> {
        let entry = self
            .inner
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;

        let expired = {
            let session = entry.lock().await;
            self.is_expired(&session, SystemTime::now())
        };
        if expired {
            self.inner.write().await.remove(session_id);
            debug!(session_id, "session expired on access");
            return Err(StoreError::UnknownSession(session_id.to_string()));
        }

        Ok(entry)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_or_get(&self, session_id: Option<&str>) -> String {
        if let Some(id) = session_id.filter(|s| !s.trim().is_empty()) {
            if let Ok(entry) = self.entry(id).await {
                entry.lock().await.last_accessed = SystemTime::now();
                return id.to_string();
            }
        }

        let id = Uuid::new_v4().to_string();
        let mut store = self.inner.write().await;
        self.evict_expired(&mut store);
        store.insert(id.clone(), Arc::new(Mutex::new(Session::new(id.clone()))));
        info!(session_id = %id, sessions = store.len(), "session created");
        id
    }

    async fn get(&self, session_id: &str) -> Result<Session, StoreError> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        session.last_accessed = SystemTime::now();
        Ok(session.clone())
    }

    async fn mutate<'a>(&self, session_id: &str, mutation: Mutation<'a>) -> Result<(), StoreError> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        mutation(&mut session);
        session.last_accessed = SystemTime::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn table(rows: usize) -> TransactionTable {
        let transactions = (0..rows)
            .map(|i| Transaction {
                date: NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap(),
                description: format!("row {}", i),
                amount: dec!(-1),
                category: None,
            })
            .collect();
        TransactionTable {
            transactions,
            column_count: 3,
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_unknown_id_gets_fresh_session() {
        let store = InMemorySessionStore::default();
        let id = store.create_or_get(Some("made-up")).await;
        assert_ne!(id, "made-up");
        assert_eq!(store.create_or_get(Some(&id)).await, id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_uploads_accumulate() {
        let store = InMemorySessionStore::default();
        let id = store.create_or_get(None).await;

        let first = store.add_table(&id, "a.csv".into(), table(3)).await.unwrap();
        let second = store.add_table(&id, "b.csv".into(), table(2)).await.unwrap();
        assert_ne!(first, second);

        let tables = store.get_tables(&id, &[]).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables.iter().map(|t| t.table.row_count()).sum::<usize>(), 5);

        let only_second = store.get_tables(&id, &[second.clone()]).await.unwrap();
        assert_eq!(only_second.len(), 1);
        assert_eq!(only_second[0].filename, "b.csv");
    }

    #[tokio::test]
    async fn test_empty_session_has_no_data() {
        let store = InMemorySessionStore::default();
        let id = store.create_or_get(None).await;
        assert_eq!(store.get_tables(&id, &[]).await.unwrap_err(), StoreError::NoData);
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let store = InMemorySessionStore::default();
        let err = store.set_income("nope", dec!(1)).await.unwrap_err();
        assert_eq!(err, StoreError::UnknownSession("nope".to_string()));
    }

    #[tokio::test]
    async fn test_income_last_write_wins() {
        let store = InMemorySessionStore::default();
        let id = store.create_or_get(None).await;
        store.set_income(&id, dec!(1000)).await.unwrap();
        store.set_income(&id, dec!(2500)).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().income, Some(dec!(2500)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_uploads_are_not_lost() {
        let store = InMemorySessionStore::default();
        let id = store.create_or_get(None).await;

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    store.add_table(&id, format!("{}.csv", i), table(1)).await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(store.get(&id).await.unwrap().tables.len(), 20);
    }

    #[tokio::test]
    async fn test_manual_transactions_share_one_table() {
        let store = InMemorySessionStore::default();
        let id = store.create_or_get(None).await;
        let tx = table(1).transactions.remove(0);

        assert_eq!(store.add_transaction(&id, tx.clone()).await.unwrap(), MANUAL_FILE_ID);
        store.add_transaction(&id, tx).await.unwrap();

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.tables.len(), 1);
        assert_eq!(session.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let store = InMemorySessionStore::default();
        let id = store.create_or_get(None).await;
        let messages: Vec<Message> = (0..MAX_HISTORY + 5)
            .map(|i| Message::user(format!("q{}", i)))
            .collect();
        store.append_history(&id, messages).await.unwrap();

        let history = store.get(&id).await.unwrap().history;
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].content, "q5");
    }

    #[tokio::test]
    async fn test_expired_sessions_are_evicted() {
        let store = InMemorySessionStore::new(Some(Duration::from_millis(20)));
        let old = store.create_or_get(None).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = store.create_or_get(None).await;
        assert_eq!(store.len().await, 1);
        assert!(matches!(store.get(&old).await, Err(StoreError::UnknownSession(_))));
        assert!(store.get(&fresh).await.is_ok());
    }
}
