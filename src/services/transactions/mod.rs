//! Time-windowed transaction view backing the co-occurrence channel.
//!
//! The store is the one potentially expensive shared resource in the core:
//! the window views are derived once, lazily on first use, reused across
//! requests, and released explicitly via [`TransactionStore::close`].

use crate::models::{ItemId, Transaction, UserId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Provider of raw transaction events for one window snapshot.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Transaction>>;
}

/// JSON-lines snapshot file, one `Transaction` per line.
pub struct JsonlTransactionSource {
    path: PathBuf,
}

impl JsonlTransactionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TransactionSource for JsonlTransactionSource {
    async fn load(&self) -> Result<Vec<Transaction>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read transactions snapshot {}", self.path.display()))?;

        let mut events = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: Transaction = serde_json::from_str(line).with_context(|| {
                format!(
                    "malformed transaction record at {}:{}",
                    self.path.display(),
                    line_no + 1
                )
            })?;
            events.push(event);
        }
        Ok(events)
    }
}

/// In-memory event source, used by tests and embedded callers.
pub struct MemoryTransactionSource {
    events: Vec<Transaction>,
}

impl MemoryTransactionSource {
    pub fn new(events: Vec<Transaction>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl TransactionSource for MemoryTransactionSource {
    async fn load(&self) -> Result<Vec<Transaction>> {
        Ok(self.events.clone())
    }
}

/// Immutable indexes over the bounded window, shared by reference across
/// concurrent requests.
pub struct WindowView {
    max_date: NaiveDate,
    by_user: HashMap<UserId, Vec<(ItemId, NaiveDate)>>,
    by_item: HashMap<ItemId, Vec<(UserId, NaiveDate)>>,
}

impl WindowView {
    fn build(mut events: Vec<Transaction>, lookback_days: i64) -> Self {
        // Deterministic index contents regardless of source order.
        events.sort_by(|a, b| {
            a.t_dat
                .cmp(&b.t_dat)
                .then_with(|| a.customer_id.cmp(&b.customer_id))
                .then_with(|| a.article_id.cmp(&b.article_id))
        });

        let max_date = events
            .iter()
            .map(|e| e.t_dat)
            .max()
            .unwrap_or(NaiveDate::MIN);
        let cutoff = max_date
            .checked_sub_signed(Duration::days(lookback_days))
            .unwrap_or(NaiveDate::MIN);

        let mut by_user: HashMap<UserId, Vec<(ItemId, NaiveDate)>> = HashMap::new();
        let mut by_item: HashMap<ItemId, Vec<(UserId, NaiveDate)>> = HashMap::new();

        for event in events {
            if event.t_dat < cutoff {
                continue;
            }
            by_user
                .entry(event.customer_id.clone())
                .or_default()
                .push((event.article_id.clone(), event.t_dat));
            by_item
                .entry(event.article_id)
                .or_default()
                .push((event.customer_id, event.t_dat));
        }

        Self {
            max_date,
            by_user,
            by_item,
        }
    }

    /// Days between an in-window event and the most recent event in the
    /// whole window. Scoring ages against the snapshot edge, not "now",
    /// keeps results reproducible for a fixed snapshot.
    pub fn age_days(&self, date: NaiveDate) -> f64 {
        (self.max_date - date).num_days().max(0) as f64
    }

    /// The user's distinct purchased items, most recent purchase first,
    /// `article_id` ascending on date ties, truncated to `n`.
    pub fn recent_items(&self, user_id: &str, n: usize) -> Vec<(ItemId, NaiveDate)> {
        let mut latest: HashMap<&ItemId, NaiveDate> = HashMap::new();
        for (item, date) in self.purchases_of(user_id) {
            let entry = latest.entry(item).or_insert(*date);
            if *date > *entry {
                *entry = *date;
            }
        }

        let mut items: Vec<(ItemId, NaiveDate)> = latest
            .into_iter()
            .map(|(item, date)| (item.clone(), date))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items.truncate(n);
        items
    }

    pub fn purchases_of(&self, user_id: &str) -> &[(ItemId, NaiveDate)] {
        self.by_user.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn purchasers_of(&self, article_id: &str) -> &[(UserId, NaiveDate)] {
        self.by_item
            .get(article_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Lazily-opened holder of the current window views.
pub struct TransactionStore {
    lookback_days: i64,
    source: Box<dyn TransactionSource>,
    view: RwLock<Option<Arc<WindowView>>>,
}

impl TransactionStore {
    pub fn new(source: Box<dyn TransactionSource>, lookback_days: i64) -> Self {
        Self {
            lookback_days,
            source,
            view: RwLock::new(None),
        }
    }

    /// Force the window views to be built now instead of on first use.
    pub async fn open(&self) -> Result<()> {
        self.view().await.map(|_| ())
    }

    /// Release the window views. The next access rebuilds them from the
    /// source.
    pub async fn close(&self) {
        let mut guard = self.view.write().await;
        if guard.take().is_some() {
            info!("transaction window released");
        }
    }

    /// Current window views, building them on first access.
    pub async fn view(&self) -> Result<Arc<WindowView>> {
        {
            let guard = self.view.read().await;
            if let Some(view) = guard.as_ref() {
                return Ok(Arc::clone(view));
            }
        }

        let mut guard = self.view.write().await;
        // A concurrent caller may have built the views while we waited.
        if let Some(view) = guard.as_ref() {
            return Ok(Arc::clone(view));
        }

        let events = self.source.load().await?;
        let event_count = events.len();
        let view = Arc::new(WindowView::build(events, self.lookback_days));
        debug!(
            event_count,
            lookback_days = self.lookback_days,
            users = view.by_user.len(),
            items = view.by_item.len(),
            "transaction window built"
        );
        *guard = Some(Arc::clone(&view));
        Ok(view)
    }
}
