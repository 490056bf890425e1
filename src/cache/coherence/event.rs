//! Domain mutation events and key/tag derivation
//!
//! Every cache-relevant mutation in the surrounding system arrives here as a
//! [`MutationEvent`]. Event kinds are a closed enum with typed payloads, so an
//! unmapped event type is a compile error rather than a silently ignored
//! string. Derivation expands each event into the [`KeySet`] of exact keys,
//! wildcard prefixes and tags whose cached views the mutation may have
//! invalidated; a payload field that is unknown at emission time degrades the
//! corresponding exact key into a wildcard prefix.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::keys::{CacheKey, Tag};

/// Moderation decision carried by comment moderation events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Approved,
    Hidden,
    Deleted,
    Flagged,
}

/// Typed mutation payloads, one variant per event type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    CommentCreated {
        comment_id: String,
        platform: String,
        #[serde(default)]
        post_id: Option<String>,
        author_id: String,
    },
    CommentUpdated {
        comment_id: String,
        platform: String,
        #[serde(default)]
        post_id: Option<String>,
        author_id: String,
    },
    CommentDeleted {
        comment_id: String,
        platform: String,
        #[serde(default)]
        post_id: Option<String>,
        author_id: String,
    },
    CommentModerated {
        comment_id: String,
        platform: String,
        action: ModerationAction,
    },
    SentimentScored {
        comment_id: String,
        platform: String,
    },
    PostPublished {
        post_id: String,
        platform: String,
        author_id: String,
    },
    PostUpdated {
        post_id: String,
        platform: String,
        author_id: String,
    },
    AccountLinked {
        platform: String,
        account_id: String,
        owner_id: String,
    },
    AccountUnlinked {
        platform: String,
        account_id: String,
        owner_id: String,
    },
}

impl EventKind {
    /// Stable name matching the wire `type` field
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::CommentCreated { .. } => "comment_created",
            EventKind::CommentUpdated { .. } => "comment_updated",
            EventKind::CommentDeleted { .. } => "comment_deleted",
            EventKind::CommentModerated { .. } => "comment_moderated",
            EventKind::SentimentScored { .. } => "sentiment_scored",
            EventKind::PostPublished { .. } => "post_published",
            EventKind::PostUpdated { .. } => "post_updated",
            EventKind::AccountLinked { .. } => "account_linked",
            EventKind::AccountUnlinked { .. } => "account_unlinked",
        }
    }
}

/// A single domain mutation, immutable once emitted
///
/// Events may arrive duplicated and out of order; consumers must treat them
/// as at-least-once hints, never as an ordered log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Producer-assigned event id
    pub id: String,
    /// Typed event payload
    #[serde(flatten)]
    pub kind: EventKind,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Acting user, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Monotonic per-entity version stamped by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Post-mutation read model, when the producer includes one; enables
    /// versioned overwrite instead of plain invalidation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
}

impl MutationEvent {
    /// Create an event stamped now with a fresh id
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            user_id: None,
            version: None,
            snapshot: None,
        }
    }

    /// Attach the acting user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the entity version
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Attach the post-mutation read model
    pub fn with_snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Effective version for conflict detection; unversioned events rank
    /// below any explicitly versioned cache entry
    pub fn effective_version(&self) -> u64 {
        self.version.unwrap_or(0)
    }
}

/// The cache footprint of one event: exact keys, wildcard prefixes and tags
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeySet {
    pub exact: Vec<CacheKey>,
    pub prefixes: Vec<String>,
    pub tags: Vec<Tag>,
}

impl KeySet {
    /// Whether the event touches nothing cached
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.tags.is_empty()
    }

    fn key(&mut self, namespace: &str, suffix: String) {
        match CacheKey::new(format!("{}:{}", namespace, suffix)) {
            Ok(key) => self.exact.push(key),
            Err(err) => debug!("skipping underivable cache key {}: {}", suffix, err),
        }
    }

    fn prefix(&mut self, namespace: &str, prefix: String) {
        self.prefixes.push(format!("{}:{}", namespace, prefix));
    }

    fn tag(&mut self, tag: Tag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}

/// Expand an event into the set of keys and tags it may have invalidated
pub fn derive_key_set(event: &MutationEvent, namespace: &str) -> KeySet {
    let mut set = KeySet::default();
    match &event.kind {
        EventKind::CommentCreated {
            platform,
            post_id,
            author_id,
            ..
        }
        | EventKind::CommentUpdated {
            platform,
            post_id,
            author_id,
            ..
        }
        | EventKind::CommentDeleted {
            platform,
            post_id,
            author_id,
            ..
        } => {
            match post_id {
                Some(post_id) => {
                    set.key(namespace, format!("comments:{}:{}", platform, post_id))
                }
                // Unknown post: every comment list on the platform may be stale
                None => set.prefix(namespace, format!("comments:{}:", platform)),
            }
            set.key(namespace, format!("user:{}:comments", author_id));
            set.key(namespace, format!("stats:comments:{}", platform));
            if let EventKind::CommentUpdated { comment_id, .. }
            | EventKind::CommentDeleted { comment_id, .. } = &event.kind
            {
                set.key(namespace, format!("comment:{}", comment_id));
            }
            set.tag(Tag::new("comments"));
            set.tag(Tag::scoped("platform", platform));
            set.tag(Tag::scoped("user", author_id));
        }
        EventKind::CommentModerated {
            comment_id,
            platform,
            ..
        } => {
            set.key(namespace, format!("comment:{}", comment_id));
            set.key(namespace, format!("stats:moderation:{}", platform));
            set.tag(Tag::new("comments"));
            set.tag(Tag::new("moderation"));
            set.tag(Tag::scoped("platform", platform));
        }
        EventKind::SentimentScored {
            comment_id,
            platform,
        } => {
            set.key(namespace, format!("comment:{}", comment_id));
            set.tag(Tag::new("sentiment"));
            set.tag(Tag::scoped("platform", platform));
        }
        EventKind::PostPublished {
            post_id,
            platform,
            author_id,
        }
        | EventKind::PostUpdated {
            post_id,
            platform,
            author_id,
        } => {
            set.key(namespace, format!("post:{}", post_id));
            set.key(namespace, format!("posts:{}", platform));
            set.key(namespace, format!("user:{}:posts", author_id));
            set.tag(Tag::new("posts"));
            set.tag(Tag::scoped("platform", platform));
            set.tag(Tag::scoped("user", author_id));
        }
        EventKind::AccountLinked {
            platform, owner_id, ..
        }
        | EventKind::AccountUnlinked {
            platform, owner_id, ..
        } => {
            set.key(namespace, format!("user:{}:accounts", owner_id));
            set.tag(Tag::new("accounts"));
            set.tag(Tag::scoped("platform", platform));
            set.tag(Tag::scoped("user", owner_id));
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_created_touches_lists_stats_and_tags() {
        let event = MutationEvent::new(EventKind::CommentCreated {
            comment_id: "c1".to_string(),
            platform: "tiktok".to_string(),
            post_id: Some("p9".to_string()),
            author_id: "42".to_string(),
        });
        let set = derive_key_set(&event, "sm");

        assert!(set
            .exact
            .contains(&CacheKey::new("sm:comments:tiktok:p9").unwrap()));
        assert!(set
            .exact
            .contains(&CacheKey::new("sm:user:42:comments").unwrap()));
        assert!(set.prefixes.is_empty());
        assert!(set.tags.contains(&Tag::new("comments")));
        assert!(set.tags.contains(&Tag::scoped("user", 42)));
    }

    #[test]
    fn missing_post_id_degrades_to_wildcard_prefix() {
        let event = MutationEvent::new(EventKind::CommentCreated {
            comment_id: "c1".to_string(),
            platform: "tiktok".to_string(),
            post_id: None,
            author_id: "42".to_string(),
        });
        let set = derive_key_set(&event, "sm");
        assert_eq!(set.prefixes, vec!["sm:comments:tiktok:".to_string()]);
    }

    #[test]
    fn wire_shape_round_trips() {
        let event = MutationEvent::new(EventKind::CommentModerated {
            comment_id: "c7".to_string(),
            platform: "youtube".to_string(),
            action: ModerationAction::Hidden,
        })
        .with_user("99")
        .with_version(12);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "comment_moderated");
        assert_eq!(json["payload"]["action"], "hidden");

        let back: MutationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.effective_version(), 12);
        assert_eq!(back.kind.name(), "comment_moderated");
    }

    #[test]
    fn unversioned_events_rank_below_versioned_entries() {
        let event = MutationEvent::new(EventKind::SentimentScored {
            comment_id: "c1".to_string(),
            platform: "x".to_string(),
        });
        assert_eq!(event.effective_version(), 0);
    }
}
