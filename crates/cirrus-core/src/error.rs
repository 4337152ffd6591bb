use thiserror::Error;

use crate::types::{RejectReason, Rejection};

pub type DriveResult<T> = Result<T, DriveError>;

/// Number of rejected items named individually in an aggregate message.
const NAMED_REJECTIONS: usize = 3;

#[derive(Debug, Error)]
pub enum DriveError {
    /// Per-node and non-fatal: siblings in the same batch keep going.
    #[error("decryption failed for node {node_id}: {message}")]
    Decryption { node_id: String, message: String },

    /// Malformed SRP peer values or an out-of-order exchange.
    #[error("authentication protocol error: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(String),

    /// A batch was fully or partially rejected by the remote.
    #[error("{message}")]
    Conflict {
        message: String,
        accepted: Vec<String>,
        rejected: Vec<Rejection>,
    },

    #[error("timed out after {after_secs}s processing node {node_id}")]
    Timeout { node_id: String, after_secs: u64 },

    #[error("integrity check failed for node {node_id}: {message}")]
    Integrity { node_id: String, message: String },

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("a load of folder {folder_id} at offset {offset} is already in flight")]
    Busy { folder_id: String, offset: u64 },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("secrets error: {0}")]
    Secrets(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriveError {
    pub fn decryption(node_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        DriveError::Decryption {
            node_id: node_id.into(),
            message: message.to_string(),
        }
    }

    /// Build the aggregate error for a batch where some items were rejected.
    ///
    /// `labels` maps rejected ids to a display label (usually the decrypted
    /// name); ids without a label are shown as-is.
    pub fn batch_rejected(
        verb: &str,
        total: usize,
        accepted: Vec<String>,
        rejected: Vec<Rejection>,
        label: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let message = summarize_rejections(verb, total, &rejected, label);
        DriveError::Conflict {
            message,
            accepted,
            rejected,
        }
    }

    /// True for errors scoped to a single node that must not abort a batch.
    pub fn is_node_scoped(&self) -> bool {
        matches!(
            self,
            DriveError::Decryption { .. } | DriveError::Timeout { .. } | DriveError::Integrity { .. }
        )
    }
}

/// "Could not move 2 of 5 items: a (name already exists), b (not found)".
///
/// At most three items are named; the remainder is reported as "and N more".
pub fn summarize_rejections(
    verb: &str,
    total: usize,
    rejected: &[Rejection],
    label: impl Fn(&str) -> Option<String>,
) -> String {
    let named: Vec<String> = rejected
        .iter()
        .take(NAMED_REJECTIONS)
        .map(|r| {
            let who = match label(&r.id) {
                Some(name) if name != r.id => format!("{} [{}]", name, r.id),
                _ => r.id.clone(),
            };
            format!("{who} ({})", describe(&r.reason))
        })
        .collect();

    let mut message = if rejected.len() == total {
        format!("Could not {verb} {} item(s): {}", total, named.join(", "))
    } else {
        format!(
            "Could not {verb} {} of {} items: {}",
            rejected.len(),
            total,
            named.join(", ")
        )
    };
    if rejected.len() > NAMED_REJECTIONS {
        message.push_str(&format!(" and {} more", rejected.len() - NAMED_REJECTIONS));
    }
    message
}

fn describe(reason: &RejectReason) -> String {
    match reason {
        RejectReason::NameConflict => "an item with the same name already exists".into(),
        RejectReason::Invalid(detail) => detail.clone(),
        RejectReason::NotFound => "not found".into(),
        RejectReason::SelfReferential => "cannot be moved into itself or a subfolder".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(id: &str, reason: RejectReason) -> Rejection {
        Rejection {
            id: id.into(),
            reason,
        }
    }

    #[test]
    fn summary_names_at_most_three() {
        let rejected = vec![
            rejection("a", RejectReason::NameConflict),
            rejection("b", RejectReason::NotFound),
            rejection("c", RejectReason::SelfReferential),
            rejection("d", RejectReason::NotFound),
            rejection("e", RejectReason::NotFound),
        ];
        let msg = summarize_rejections("move", 6, &rejected, |_| None);

        assert!(msg.starts_with("Could not move 5 of 6 items"));
        assert!(msg.contains("a (an item with the same name already exists)"));
        assert!(msg.contains("c (cannot be moved"));
        assert!(!msg.contains("d ("));
        assert!(msg.ends_with("and 2 more"));
    }

    #[test]
    fn summary_uses_labels() {
        let rejected = vec![rejection("file1", RejectReason::NameConflict)];
        let msg = summarize_rejections("restore", 1, &rejected, |id| {
            (id == "file1").then(|| "report.pdf".to_string())
        });
        assert_eq!(
            msg,
            "Could not restore 1 item(s): report.pdf [file1] (an item with the same name already exists)"
        );
    }

    #[test]
    fn conflict_error_carries_ids() {
        let err = DriveError::batch_rejected(
            "trash",
            2,
            vec!["ok".into()],
            vec![rejection("bad", RejectReason::NotFound)],
            |_| None,
        );
        match err {
            DriveError::Conflict {
                accepted, rejected, ..
            } => {
                assert_eq!(accepted, vec!["ok".to_string()]);
                assert_eq!(rejected[0].id, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn node_scoped_classification() {
        assert!(DriveError::decryption("n1", "bad key").is_node_scoped());
        assert!(!DriveError::Network("down".into()).is_node_scoped());
    }
}
