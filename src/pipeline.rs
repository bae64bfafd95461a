use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local};
use tracing::{error, info, warn};

use crate::commands;
use crate::config::Config;
use crate::dedup::DuplicateDetector;
use crate::events::{FollowEvent, MessageContent, MessageEvent, WebhookEvent};
use crate::extract::{self, ExtractedExpense};
use crate::line::ReplyDispatcher;
use crate::store::{ExpenseRecord, ExpenseStore, NewExpense, NewMessageLog};

/// Rows pulled from the store for one duplicate check.
const DUP_QUERY_LIMIT: usize = 100;

/// Shared application state, built once at startup.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ExpenseStore>,
    pub replies: Arc<dyn ReplyDispatcher>,
}

/// Process one webhook event. Errors returned here are caught at the
/// per-event boundary in the server loop, so a failing event never takes
/// down its batch siblings.
pub async fn process_event(state: &AppState, event: &WebhookEvent) -> Result<()> {
    match event {
        WebhookEvent::Message(message) => handle_message(state, message).await,
        WebhookEvent::Follow(follow) => handle_follow(state, follow).await,
        WebhookEvent::Unfollow(unfollow) => {
            info!(source = ?unfollow.source.sender_id(), "user unfollowed");
            Ok(())
        }
        WebhookEvent::Postback(postback) => {
            info!(
                source = ?postback.source.sender_id(),
                data = %postback.postback.data,
                "ignoring postback event"
            );
            Ok(())
        }
        WebhookEvent::Unknown => {
            info!("ignoring unknown event kind");
            Ok(())
        }
    }
}

async fn handle_message(state: &AppState, event: &MessageEvent) -> Result<()> {
    let user_id = event.source.sender_id();
    let reply_token = event.reply_token.as_deref();

    match &event.message {
        MessageContent::Text { text, .. } => {
            info!(
                source = %event.source.kind,
                user = ?user_id,
                "message: {text}"
            );
            log_raw_message(state, user_id, "text", text).await;
            handle_text(state, reply_token, user_id, text).await
        }
        MessageContent::Image { id } => {
            // OCR is not implemented; only a placeholder reference is kept.
            let placeholder = format!("[image {}]", id.as_deref().unwrap_or("?"));
            log_raw_message(state, user_id, "image", &placeholder).await;
            Ok(())
        }
        MessageContent::Other => {
            log_raw_message(state, user_id, "other", "[unsupported message]").await;
            Ok(())
        }
    }
}

async fn handle_text(
    state: &AppState,
    reply_token: Option<&str>,
    user_id: Option<&str>,
    text: &str,
) -> Result<()> {
    // Passive expense monitoring runs on every text message, wake word or
    // not. Its failure must not block the command pipeline below.
    if let Err(e) = record_expense(state, reply_token, user_id, text).await {
        error!("expense pipeline failed: {e:#}");
    }

    if let Some(command) = strip_wake_word(text, &state.config.line.wake_word) {
        let reply_text = commands::handle(state, &command).await?;
        send_reply(state, reply_token, &reply_text).await;
    }

    Ok(())
}

/// The persist-then-confirm pipeline. The user is told "recorded" only
/// when the insert came back with an identifier; a duplicate gets its
/// notice without any write; every other failure stays silent.
async fn record_expense(
    state: &AppState,
    reply_token: Option<&str>,
    user_id: Option<&str>,
    text: &str,
) -> Result<()> {
    let Some(candidate) = extract::extract(text) else {
        return Ok(());
    };
    info!(
        amount = candidate.amount,
        category = %candidate.category,
        "expense candidate extracted"
    );

    // The duplicate check must complete before the insert; if the window
    // query fails we stop here, unconfirmed and unreplied.
    let window_start =
        Local::now().date_naive() - Duration::days(state.config.detector.lookback_days);
    let recent = state
        .store
        .expenses_since(window_start, DUP_QUERY_LIMIT)
        .await
        .context("duplicate-window query failed, expense not recorded")?;

    let detector = DuplicateDetector::new(&state.config.detector);
    if let Some(found) = detector.find_match(&candidate, &recent) {
        info!(similarity = found.similarity, "duplicate detected, nothing written");
        send_reply(state, reply_token, &duplicate_notice(found.record)).await;
        return Ok(());
    }

    // Two concurrent invocations can both reach this point for the same
    // real-world expense; the store has no check-then-insert guarantee.
    let new_expense = NewExpense::from_extracted(&candidate, user_id);
    match state.store.insert_expense(&new_expense).await {
        Ok(record) => match record.confirmed_id() {
            Some(id) => {
                info!(id, "expense recorded");
                send_reply(state, reply_token, &success_notice(&candidate, &record)).await;
            }
            None => {
                warn!("insert returned a record without an id, confirmation suppressed");
            }
        },
        Err(e) => {
            // No reply on an unconfirmed write, only a log line.
            error!("expense insert failed, confirmation suppressed: {e:#}");
        }
    }

    Ok(())
}

async fn handle_follow(state: &AppState, event: &FollowEvent) -> Result<()> {
    info!(source = ?event.source.sender_id(), "new follower");
    let welcome = format!(
        "สวัสดีครับ 🙏 ขอบคุณที่เพิ่มเพื่อน\n\
         ส่งรายการค่าใช้จ่ายมาได้เลย เช่น \"ค่าไฟ 500 บาท\"\n\
         พิมพ์ \"{} ช่วยเหลือ\" เพื่อดูคำสั่งทั้งหมด",
        state.config.line.wake_word
    );
    send_reply(state, event.reply_token.as_deref(), &welcome).await;
    Ok(())
}

/// Best-effort audit log of the raw inbound message. A failed write is a
/// warning, never a reason to skip the pipelines.
async fn log_raw_message(state: &AppState, user_id: Option<&str>, kind: &str, content: &str) {
    let log = NewMessageLog {
        user_id: user_id.map(str::to_string),
        message_type: kind.to_string(),
        content: content.to_string(),
    };
    if let Err(e) = state.store.log_message(&log).await {
        warn!("message log write failed: {e:#}");
    }
}

/// Fire the single reply this event gets, if it carried a token. The
/// token is single-use and short-lived, so failures are logged and
/// never retried.
async fn send_reply(state: &AppState, reply_token: Option<&str>, text: &str) {
    let Some(token) = reply_token else {
        return;
    };
    if let Err(e) = state.replies.reply(token, text).await {
        warn!("reply dispatch failed, not retrying: {e:#}");
    }
}

/// Locate the wake word anywhere in the message, case-insensitively, and
/// return the rest of the text (lower-cased, trimmed) for command
/// matching. `None` means this is not a command.
fn strip_wake_word(text: &str, wake_word: &str) -> Option<String> {
    let haystack = text.to_lowercase();
    let needle = wake_word.to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let start = haystack.find(&needle)?;
    let mut rest = String::with_capacity(haystack.len() - needle.len());
    rest.push_str(&haystack[..start]);
    rest.push_str(&haystack[start + needle.len()..]);
    Some(rest.trim().to_string())
}

fn success_notice(candidate: &ExtractedExpense, record: &ExpenseRecord) -> String {
    format!(
        "บันทึกค่าใช้จ่ายเรียบร้อยแล้ว ✅\n\
         💰 {} บาท\n\
         📝 {}\n\
         📅 {}",
        commands::baht(record.amount),
        candidate.description,
        record.expense_date.format("%d/%m/%Y")
    )
}

fn duplicate_notice(existing: &ExpenseRecord) -> String {
    format!(
        "⚠️ รายการนี้ถูกบันทึกไปแล้ว ไม่ได้บันทึกซ้ำ\n\
         📝 {} {} บาท ({})",
        existing.description,
        commands::baht(existing.amount),
        existing.expense_date.format("%d/%m/%Y")
    )
}
