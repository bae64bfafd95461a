use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StoreConfig;
use crate::extract::ExtractedExpense;

/// A persisted expense row as Supabase returns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpenseRecord {
    pub id: Option<String>,
    pub amount: f64,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub description: String,
    pub expense_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ExpenseRecord {
    /// A record only counts as persisted when the store handed back a
    /// non-empty identifier.
    pub fn confirmed_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Insert payload for a new expense row. The store mints id/created_at.
#[derive(Debug, Clone, Serialize)]
pub struct NewExpense {
    pub amount: f64,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub description: String,
    pub expense_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub payment_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub notes: String,
}

impl NewExpense {
    pub fn from_extracted(expense: &ExtractedExpense, user_id: Option<&str>) -> Self {
        Self {
            amount: expense.amount,
            category: expense.category.clone(),
            subcategory: expense.subcategory.clone(),
            description: expense.description.clone(),
            expense_date: expense
                .expense_date
                .unwrap_or_else(|| Local::now().date_naive()),
            vendor: expense.vendor.clone(),
            payment_method: expense.payment_method.clone(),
            user_id: user_id.map(str::to_string),
            // The raw message rides along for audit
            notes: format!("ข้อความต้นฉบับ: {}", expense.original_message),
        }
    }
}

/// Raw inbound message audit row, written best-effort for every event.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessageLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub message_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    pub current_stock: f64,
    pub min_stock: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Persistence consumed by the pipeline and the command processor.
/// Implementations must apply a short request timeout; a timed-out call
/// surfaces as an error, which callers treat as "not persisted".
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn insert_expense(&self, expense: &NewExpense) -> Result<ExpenseRecord>;

    /// Expense rows with `expense_date >= since`, most recent first.
    async fn expenses_since(&self, since: NaiveDate, limit: usize) -> Result<Vec<ExpenseRecord>>;

    /// The most recently created expense row (by creation timestamp,
    /// not business date).
    async fn latest_expense(&self) -> Result<Option<ExpenseRecord>>;

    /// Delete by id, returning the deleted row when one existed.
    async fn delete_expense(&self, id: &str) -> Result<Option<ExpenseRecord>>;

    /// Inventory rows with a meaningful minimum (`min_stock > 0`).
    async fn inventory_items(&self) -> Result<Vec<InventoryItem>>;

    async fn log_message(&self, log: &NewMessageLog) -> Result<()>;
}

/// Supabase PostgREST client.
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build store HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Supabase {action} failed ({status}): {body}");
        }
        Ok(response)
    }
}

#[async_trait]
impl ExpenseStore for SupabaseStore {
    async fn insert_expense(&self, expense: &NewExpense) -> Result<ExpenseRecord> {
        debug!(category = %expense.category, "inserting expense");

        let response = self
            .with_auth(self.client.post(self.table_url("expenses")))
            .header("Prefer", "return=representation")
            .json(expense)
            .send()
            .await
            .context("Failed to send expense insert")?;

        let rows: Vec<ExpenseRecord> = Self::check(response, "insert")
            .await?
            .json()
            .await
            .context("Failed to parse insert response")?;

        rows.into_iter()
            .next()
            .context("Insert returned no rows")
    }

    async fn expenses_since(&self, since: NaiveDate, limit: usize) -> Result<Vec<ExpenseRecord>> {
        let response = self
            .with_auth(self.client.get(self.table_url("expenses")))
            .query(&[
                ("select", "*".to_string()),
                ("expense_date", format!("gte.{since}")),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("Failed to query expenses")?;

        Self::check(response, "query")
            .await?
            .json()
            .await
            .context("Failed to parse expense rows")
    }

    async fn latest_expense(&self) -> Result<Option<ExpenseRecord>> {
        let response = self
            .with_auth(self.client.get(self.table_url("expenses")))
            .query(&[
                ("select", "*"),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ])
            .send()
            .await
            .context("Failed to query latest expense")?;

        let rows: Vec<ExpenseRecord> = Self::check(response, "query")
            .await?
            .json()
            .await
            .context("Failed to parse expense rows")?;

        Ok(rows.into_iter().next())
    }

    async fn delete_expense(&self, id: &str) -> Result<Option<ExpenseRecord>> {
        let response = self
            .with_auth(self.client.delete(self.table_url("expenses")))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .send()
            .await
            .context("Failed to send expense delete")?;

        let rows: Vec<ExpenseRecord> = Self::check(response, "delete")
            .await?
            .json()
            .await
            .context("Failed to parse delete response")?;

        Ok(rows.into_iter().next())
    }

    async fn inventory_items(&self) -> Result<Vec<InventoryItem>> {
        // PostgREST cannot compare two columns in a filter, so only the
        // min_stock > 0 half happens here; current <= min is applied by
        // the caller.
        let response = self
            .with_auth(self.client.get(self.table_url("inventory")))
            .query(&[("select", "*"), ("min_stock", "gt.0")])
            .send()
            .await
            .context("Failed to query inventory")?;

        Self::check(response, "query")
            .await?
            .json()
            .await
            .context("Failed to parse inventory rows")
    }

    async fn log_message(&self, log: &NewMessageLog) -> Result<()> {
        let response = self
            .with_auth(self.client.post(self.table_url("message_logs")))
            .json(log)
            .send()
            .await
            .context("Failed to send message log")?;

        Self::check(response, "insert").await?;
        Ok(())
    }
}
