//! Decides what a failed submission means for a document: resubmit later
//! through contingency, or hand it back for correction.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::AuthorityError;
use crate::signer::SignerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Server,
    Validation,
    Rejection,
    NotFound,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Server => "server",
            FailureKind::Validation => "validation",
            FailureKind::Rejection => "rejection",
            FailureKind::NotFound => "not_found",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Whether the same document may simply be sent again. Unrecognised
    /// failures count as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Network | FailureKind::Server | FailureKind::Unknown
        )
    }

    /// Whether the normal submission path should hand the document to the
    /// contingency queue. Unrecognised failures are queued so a document is never lost.
    pub fn should_queue_for_contingency(&self) -> bool {
        !matches!(self, FailureKind::Validation | FailureKind::Rejection)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an error by walking its source chain for a recognised cause.
pub fn classify(err: &(dyn Error + 'static)) -> FailureKind {
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(authority) = e.downcast_ref::<AuthorityError>() {
            return authority.kind;
        }
        if let Some(signer) = e.downcast_ref::<SignerError>() {
            return signer.failure_kind();
        }
        if let Some(http) = e.downcast_ref::<reqwest::Error>() {
            return classify_reqwest(http);
        }
        current = e.source();
    }
    FailureKind::Unknown
}

pub fn should_queue_for_contingency(err: &(dyn Error + 'static)) -> bool {
    classify(err).should_queue_for_contingency()
}

pub fn is_retryable(err: &(dyn Error + 'static)) -> bool {
    classify(err).is_retryable()
}

/// Map an HTTP status from the authority to a failure kind.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        404 => FailureKind::NotFound,
        429 | 500..=599 => FailureKind::Server,
        400..=499 => FailureKind::Validation,
        _ => FailureKind::Unknown,
    }
}

fn classify_reqwest(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() || err.is_connect() || err.is_body() {
        FailureKind::Network
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16())
    } else if err.is_decode() {
        FailureKind::Validation
    } else {
        FailureKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContingencyError;

    #[test]
    fn authority_kinds_drive_the_decision() {
        let cases = [
            (FailureKind::Network, true, true),
            (FailureKind::Server, true, true),
            (FailureKind::Validation, false, false),
            (FailureKind::Rejection, false, false),
            (FailureKind::NotFound, false, true),
            (FailureKind::Unknown, true, true),
        ];

        for (kind, retryable, queue) in cases {
            let err = AuthorityError::new(kind, "X", "boom");
            assert_eq!(classify(&err), kind);
            assert_eq!(is_retryable(&err), retryable, "{kind}");
            assert_eq!(should_queue_for_contingency(&err), queue, "{kind}");
        }
    }

    #[test]
    fn wrapped_errors_are_classified_by_their_cause() {
        let err = ContingencyError::from(AuthorityError::new(
            FailureKind::Rejection,
            "004",
            "invalid NIT",
        ));
        assert_eq!(classify(&err), FailureKind::Rejection);
        assert!(!should_queue_for_contingency(&err));
    }

    #[test]
    fn signer_outage_is_a_network_failure() {
        let err = SignerError::Unavailable("connection refused".into());
        assert_eq!(classify(&err), FailureKind::Network);

        let err = SignerError::Rejected {
            code: "COD_803".into(),
            message: "bad key".into(),
        };
        assert_eq!(classify(&err), FailureKind::Validation);
    }

    #[test]
    fn unrecognised_errors_are_queued_and_retried() {
        let err = std::io::Error::other("disk on fire");
        assert_eq!(classify(&err), FailureKind::Unknown);
        assert!(should_queue_for_contingency(&err));
        assert!(is_retryable(&err));
    }

    #[test]
    fn status_codes() {
        assert_eq!(classify_status(404), FailureKind::NotFound);
        assert_eq!(classify_status(503), FailureKind::Server);
        assert_eq!(classify_status(429), FailureKind::Server);
        assert_eq!(classify_status(400), FailureKind::Validation);
        assert_eq!(classify_status(302), FailureKind::Unknown);
    }
}
