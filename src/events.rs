use serde::Deserialize;

/// Decoded webhook request body: a batch of events.
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

/// One inbound platform event. Unknown event kinds deserialize to
/// `Unknown` instead of failing the whole batch; their payloads carry
/// nothing this pipeline acts on.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookEvent {
    Message(MessageEvent),
    Follow(FollowEvent),
    Unfollow(UnfollowEvent),
    Postback(PostbackEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub reply_token: Option<String>,
    pub source: EventSource,
    pub message: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEvent {
    pub reply_token: Option<String>,
    pub source: EventSource,
}

#[derive(Debug, Deserialize)]
pub struct UnfollowEvent {
    pub source: EventSource,
}

#[derive(Debug, Deserialize)]
pub struct PostbackEvent {
    pub source: EventSource,
    pub postback: PostbackContent,
}

#[derive(Debug, Deserialize)]
pub struct PostbackContent {
    pub data: String,
}

/// Message payloads we distinguish. Text drives both pipelines; anything
/// else only gets a placeholder entry in the message log.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text { id: Option<String>, text: String },
    Image { id: Option<String> },
    #[serde(other)]
    Other,
}

/// Where a message came from: a 1:1 chat, a group, or a room.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub room_id: Option<String>,
}

impl EventSource {
    /// The id replies and logs should be attributed to: the user when
    /// known, otherwise the group/room the message arrived in.
    pub fn sender_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.group_id.as_deref())
            .or(self.room_id.as_deref())
    }
}
