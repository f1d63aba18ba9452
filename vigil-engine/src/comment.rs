//! Comments
//!
//! Operator and system annotations attached to a checkable. Removal by
//! entry type spares persistent acknowledgement comments; a 60 s sweep
//! expires comments with an expiry timestamp.

use crate::checkable::Checkable;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::signals::CommentEvent;
use crate::types::CommentEntryType;
use std::sync::Arc;

/// A single comment entry
#[derive(Debug)]
pub struct Comment {
    name: String,
    pub host_name: String,
    pub service_name: Option<String>,
    pub author: String,
    pub text: String,
    pub entry_type: CommentEntryType,
    pub entry_time: f64,
    pub persistent: bool,
    /// 0 = never expires
    pub expire_time: f64,
    pub legacy_id: u32,
}

impl Comment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full name of the owning checkable
    pub fn checkable_name(&self) -> String {
        match &self.service_name {
            Some(short) => format!("{}!{}", self.host_name, short),
            None => self.host_name.clone(),
        }
    }

    pub fn is_expired(&self, now: f64) -> bool {
        self.expire_time > 0.0 && self.expire_time <= now
    }
}

/// Attach a comment to a checkable and announce it
pub fn add_comment(
    rt: &Runtime,
    checkable: &Checkable,
    entry_type: CommentEntryType,
    author: &str,
    text: &str,
    persistent: bool,
    expire_time: f64,
) -> EngineResult<Arc<Comment>> {
    let name = format!("{}!{}", checkable.name(), uuid::Uuid::new_v4());
    let (host_name, service_name) = rt.split_checkable_name(checkable);

    let comment = Arc::new(Comment {
        legacy_id: rt.next_comment_legacy_id(&name),
        name,
        host_name,
        service_name,
        author: author.to_string(),
        text: text.to_string(),
        entry_type,
        entry_time: rt.now(),
        persistent,
        expire_time,
    });

    rt.insert_comment(comment.clone(), checkable);

    rt.signals.on_comment_added.emit(&CommentEvent {
        comment: comment.clone(),
    });

    Ok(comment)
}

/// Remove a comment by name and announce the removal
pub fn remove_comment(rt: &Runtime, name: &str) -> EngineResult<()> {
    let comment = rt
        .take_comment(name)
        .ok_or_else(|| EngineError::ObjectNotFound(name.to_string()))?;

    tracing::debug!(
        target: "vigil_engine::comment",
        comment = %name,
        checkable = %comment.checkable_name(),
        "removed comment"
    );

    rt.signals.on_comment_removed.emit(&CommentEvent { comment });

    Ok(())
}

/// Remove all comments of one entry type; persistent acknowledgement
/// comments survive.
pub fn remove_comments_by_type(rt: &Runtime, checkable: &Checkable, ty: CommentEntryType) {
    for name in checkable.comment_names() {
        let Some(comment) = rt.comment(&name) else {
            continue;
        };

        if comment.entry_type == CommentEntryType::Acknowledgement && comment.persistent {
            continue;
        }

        if comment.entry_type == ty {
            let _ = remove_comment(rt, &name);
        }
    }
}

/// Drop comments whose expiry has passed
pub fn sweep_expired(rt: &Runtime) {
    let now = rt.now();

    for comment in rt.comments_snapshot() {
        if comment.is_expired(now) {
            let _ = remove_comment(rt, comment.name());
        }
    }
}
