//! Reason-for-change comments scoped to one flush

/// Maximum stored comment length, in characters
pub const MAX_COMMENT_LEN: usize = 255;

/// Holds the optional reason-for-change for the current flush
///
/// The host sets a comment before a mutation batch; every entry built during
/// that flush reads it without consuming it. The orchestrator clears it on
/// every exit from a flush, error exits included, so a stale comment never
/// leaks into an unrelated transaction.
#[derive(Debug, Clone, Default)]
pub struct CommentContext {
    comment: Option<String>,
}

impl CommentContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pending comment, cutting it at [`MAX_COMMENT_LEN`] characters
    ///
    /// An empty comment counts as no comment.
    pub fn set(&mut self, comment: impl Into<String>) {
        let mut comment = comment.into();
        if let Some((idx, _)) = comment.char_indices().nth(MAX_COMMENT_LEN) {
            comment.truncate(idx);
        }
        self.comment = if comment.is_empty() {
            None
        } else {
            Some(comment)
        };
    }

    /// Get the pending comment without consuming it
    pub fn get(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Check whether no comment is pending
    pub fn is_empty(&self) -> bool {
        self.comment.is_none()
    }

    /// Drop the pending comment
    pub fn clear(&mut self) {
        self.comment = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let context = CommentContext::new();
        assert!(context.is_empty());
        assert!(context.get().is_none());
    }

    #[test]
    fn test_set_get_clear() {
        let mut context = CommentContext::new();
        context.set("migrated from legacy inventory");
        assert!(!context.is_empty());
        assert_eq!(context.get(), Some("migrated from legacy inventory"));

        // Reading does not consume
        assert_eq!(context.get(), Some("migrated from legacy inventory"));

        context.clear();
        assert!(context.is_empty());
    }

    #[test]
    fn test_long_comment_is_cut() {
        let mut context = CommentContext::new();
        context.set("c".repeat(MAX_COMMENT_LEN + 20));
        assert_eq!(context.get().unwrap().chars().count(), MAX_COMMENT_LEN);
    }

    #[test]
    fn test_empty_comment_counts_as_none() {
        let mut context = CommentContext::new();
        context.set("");
        assert!(context.is_empty());
    }
}
