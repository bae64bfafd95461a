//! In-process test doubles for the consumed interfaces.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::config::Config;
use crate::line::ReplyDispatcher;
use crate::store::{ExpenseRecord, ExpenseStore, InventoryItem, NewExpense, NewMessageLog};

/// Config fixture with test credentials and default thresholds.
pub fn test_config() -> Config {
    toml::from_str(
        r#"
        [line]
        channel_secret = "test-secret"
        channel_access_token = "test-token"

        [store]
        url = "https://test.supabase.co"
        api_key = "test-key"
        "#,
    )
    .unwrap()
}

/// In-memory `ExpenseStore`. Inserted records become immediately visible
/// to subsequent queries, newest first, mirroring the real store's
/// `created_at.desc` ordering.
#[derive(Default)]
pub struct MockStore {
    pub records: Mutex<Vec<ExpenseRecord>>,
    pub inserted: Mutex<Vec<NewExpense>>,
    pub logs: Mutex<Vec<NewMessageLog>>,
    pub inventory: Mutex<Vec<InventoryItem>>,
    pub next_id: AtomicUsize,
    pub fail_inserts: bool,
    pub insert_without_id: bool,
    pub fail_queries: bool,
    pub fail_inventory: bool,
}

impl MockStore {
    pub fn with_records(records: Vec<ExpenseRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn insert_count(&self) -> usize {
        self.inserted.lock().unwrap().len()
    }
}

#[async_trait]
impl ExpenseStore for MockStore {
    async fn insert_expense(&self, expense: &NewExpense) -> Result<ExpenseRecord> {
        if self.fail_inserts {
            anyhow::bail!("mock insert failure");
        }
        self.inserted.lock().unwrap().push(expense.clone());

        let id = if self.insert_without_id {
            None
        } else {
            Some(format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
        };
        let record = ExpenseRecord {
            id,
            amount: expense.amount,
            category: expense.category.clone(),
            subcategory: expense.subcategory.clone(),
            description: expense.description.clone(),
            expense_date: expense.expense_date,
            vendor: expense.vendor.clone(),
            payment_method: expense.payment_method.clone(),
            user_id: expense.user_id.clone(),
            notes: Some(expense.notes.clone()),
            created_at: Some(Utc::now()),
        };
        self.records.lock().unwrap().insert(0, record.clone());
        Ok(record)
    }

    async fn expenses_since(&self, since: NaiveDate, limit: usize) -> Result<Vec<ExpenseRecord>> {
        if self.fail_queries {
            anyhow::bail!("mock query failure");
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.expense_date >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_expense(&self) -> Result<Option<ExpenseRecord>> {
        if self.fail_queries {
            anyhow::bail!("mock query failure");
        }
        Ok(self.records.lock().unwrap().first().cloned())
    }

    async fn delete_expense(&self, id: &str) -> Result<Option<ExpenseRecord>> {
        if self.fail_queries {
            anyhow::bail!("mock delete failure");
        }
        let mut records = self.records.lock().unwrap();
        let position = records.iter().position(|r| r.id.as_deref() == Some(id));
        Ok(position.map(|i| records.remove(i)))
    }

    async fn inventory_items(&self) -> Result<Vec<InventoryItem>> {
        if self.fail_queries || self.fail_inventory {
            anyhow::bail!("mock query failure");
        }
        Ok(self
            .inventory
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.min_stock > 0.0)
            .cloned()
            .collect())
    }

    async fn log_message(&self, log: &NewMessageLog) -> Result<()> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(())
    }
}

/// Recording `ReplyDispatcher`.
#[derive(Default)]
pub struct MockDispatcher {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl MockDispatcher {
    pub fn reply_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl ReplyDispatcher for MockDispatcher {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("mock reply failure");
        }
        self.sent
            .lock()
            .unwrap()
            .push((reply_token.to_string(), text.to_string()));
        Ok(())
    }
}

/// Expense row fixture.
pub fn make_record(id: &str, amount: f64, description: &str, date: NaiveDate) -> ExpenseRecord {
    ExpenseRecord {
        id: Some(id.to_string()),
        amount,
        category: "other".to_string(),
        subcategory: None,
        description: description.to_string(),
        expense_date: date,
        vendor: None,
        payment_method: "cash".to_string(),
        user_id: None,
        notes: None,
        created_at: Some(Utc::now()),
    }
}

pub fn make_item(name: &str, current: f64, min: f64) -> InventoryItem {
    InventoryItem {
        name: name.to_string(),
        current_stock: current,
        min_stock: min,
        unit: Some("กก.".to_string()),
    }
}
