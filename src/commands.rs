use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};

use crate::pipeline::AppState;

/// How many line items a period summary shows before collapsing the rest
/// into an overflow count.
const SUMMARY_ITEMS: usize = 5;
const STOCK_ITEMS: usize = 10;

/// Rows fetched for a period aggregate.
const QUERY_LIMIT: usize = 500;

enum Window {
    Today,
    Week,
    Month,
}

impl Window {
    fn start(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Window::Today => today,
            Window::Week => today - Duration::days(7),
            Window::Month => today - Duration::days(30),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Window::Today => "วันนี้",
            Window::Week => "7 วันล่าสุด",
            Window::Month => "30 วันล่าสุด",
        }
    }
}

/// Dispatch a wake-word-stripped command and build the reply text.
///
/// `text` arrives trimmed and lower-cased from the wake-word gate, so
/// matching is plain substring containment.
pub async fn handle(state: &AppState, text: &str) -> Result<String> {
    let text = text.trim();

    if text.is_empty() || text.contains("ช่วยเหลือ") || text.contains("help") {
        return Ok(help_text(&state.config.line.wake_word));
    }
    if text.contains("สต็อก") || text.contains("stock") {
        return low_stock_digest(state).await;
    }
    if text.contains("ลบรายการล่าสุด") || text.contains("ลบล่าสุด") {
        return delete_latest(state).await;
    }
    if text.contains("สถิติ") {
        return statistics(state).await;
    }
    if text.contains("วันนี้") || text.contains("today") {
        return period_summary(state, Window::Today).await;
    }
    if text.contains("สัปดาห์") || text.contains("week") {
        return period_summary(state, Window::Week).await;
    }
    if text.contains("เดือน") || text.contains("month") {
        return period_summary(state, Window::Month).await;
    }

    Ok(format!(
        "ไม่เข้าใจคำสั่งครับ 🙏 พิมพ์ \"{} ช่วยเหลือ\" เพื่อดูคำสั่งทั้งหมด",
        state.config.line.wake_word
    ))
}

fn help_text(wake_word: &str) -> String {
    format!(
        "คำสั่งที่ใช้ได้ 📋\n\
         • {w} วันนี้ — สรุปค่าใช้จ่ายวันนี้\n\
         • {w} สัปดาห์ — สรุป 7 วันล่าสุด\n\
         • {w} เดือน — สรุป 30 วันล่าสุด\n\
         • {w} สถิติ — ยอดรวมแยกตามหมวด\n\
         • {w} สต็อก — วัตถุดิบใกล้หมด\n\
         • {w} ลบรายการล่าสุด — ลบรายการที่เพิ่งบันทึก\n\n\
         ส่งรายการค่าใช้จ่ายมาได้ตลอด เช่น \"ค่าไฟ 500 บาท\"",
        w = wake_word
    )
}

/// Format an amount the way a Thai shopkeeper writes it: no decimals for
/// whole baht, two places otherwise.
pub fn baht(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        format!("{amount:.2}")
    }
}

async fn period_summary(state: &AppState, window: Window) -> Result<String> {
    let today = Local::now().date_naive();
    let records = state
        .store
        .expenses_since(window.start(today), QUERY_LIMIT)
        .await
        .context("Failed to load expenses for summary")?;

    if records.is_empty() {
        return Ok(format!("ไม่มีรายการค่าใช้จ่าย{}ครับ", window.label()));
    }

    let total: f64 = records.iter().map(|r| r.amount).sum();
    let mut out = format!(
        "📊 ค่าใช้จ่าย{}\n💰 รวม {} บาท ({} รายการ)\n",
        window.label(),
        baht(total),
        records.len()
    );
    for record in records.iter().take(SUMMARY_ITEMS) {
        out.push_str(&format!(
            "• {} {} บาท ({})\n",
            record.description,
            baht(record.amount),
            record.expense_date.format("%d/%m/%Y")
        ));
    }
    if records.len() > SUMMARY_ITEMS {
        out.push_str(&format!("…และอีก {} รายการ", records.len() - SUMMARY_ITEMS));
    }

    Ok(out.trim_end().to_string())
}

async fn low_stock_digest(state: &AppState) -> Result<String> {
    let items = state
        .store
        .inventory_items()
        .await
        .context("Failed to load inventory")?;

    // min_stock > 0 comes prefiltered from the store; the column-to-column
    // comparison happens here.
    let low: Vec<_> = items
        .iter()
        .filter(|item| item.min_stock > 0.0 && item.current_stock <= item.min_stock)
        .collect();

    if low.is_empty() {
        return Ok("✅ วัตถุดิบทุกรายการยังเกินขั้นต่ำ".to_string());
    }

    let mut out = format!("📦 วัตถุดิบใกล้หมด ({} รายการ)\n", low.len());
    for item in low.iter().take(STOCK_ITEMS) {
        let unit = item.unit.as_deref().unwrap_or("");
        out.push_str(&format!(
            "• {}: เหลือ {} {} (ขั้นต่ำ {})\n",
            item.name,
            baht(item.current_stock),
            unit,
            baht(item.min_stock)
        ));
    }
    if low.len() > STOCK_ITEMS {
        out.push_str(&format!("…และอีก {} รายการ", low.len() - STOCK_ITEMS));
    }

    Ok(out.trim_end().to_string())
}

async fn delete_latest(state: &AppState) -> Result<String> {
    let Some(latest) = state
        .store
        .latest_expense()
        .await
        .context("Failed to look up the latest expense")?
    else {
        return Ok("ไม่มีรายการให้ลบครับ".to_string());
    };

    let id = latest
        .confirmed_id()
        .context("Latest expense row has no id")?;

    match state.store.delete_expense(id).await? {
        Some(deleted) => Ok(format!(
            "🗑 ลบรายการล่าสุดแล้ว\n📝 {} {} บาท ({})",
            deleted.description,
            baht(deleted.amount),
            deleted.expense_date.format("%d/%m/%Y")
        )),
        None => Ok("ไม่มีรายการให้ลบครับ".to_string()),
    }
}

async fn statistics(state: &AppState) -> Result<String> {
    let since = Local::now().date_naive() - Duration::days(30);
    let records = state
        .store
        .expenses_since(since, QUERY_LIMIT)
        .await
        .context("Failed to load expenses for statistics")?;

    if records.is_empty() {
        return Ok("ยังไม่มีข้อมูลค่าใช้จ่ายใน 30 วันล่าสุดครับ".to_string());
    }

    let total: f64 = records.iter().map(|r| r.amount).sum();

    let mut by_category: HashMap<&str, f64> = HashMap::new();
    for record in &records {
        *by_category.entry(record.category.as_str()).or_default() += record.amount;
    }
    let mut breakdown: Vec<(&str, f64)> = by_category.into_iter().collect();
    breakdown.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut out = format!("📈 สถิติ 30 วันล่าสุด\n💰 รวม {} บาท\n", baht(total));
    for (category, amount) in breakdown {
        out.push_str(&format!(
            "• {}: {} บาท ({:.1}%)\n",
            category,
            baht(amount),
            amount / total * 100.0
        ));
    }

    Ok(out.trim_end().to_string())
}
