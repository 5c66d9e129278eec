//! Known-error registry
//!
//! RPC endpoints return unstructured error text. The registry turns that text
//! into a typed `ErrorKind` by substring matching and keeps the named
//! exclusion lists the statistics, alert and report paths filter against.
//!
//! Adding a new error kind means adding an enum variant and one signature
//! entry; nothing is inferred.

/// Typed classification of a raw probe error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BlockhashNotFound,
    AlreadyProcessed,
    RpcDeadlineExceeded,
    ServiceUnavailable,
    TooManyRequests,
    GatewayTimeout,
    NoSuchHost,
    ConnectionRefused,
    EndOfStream,
    SlotsBehind,
    UnconfirmedTimeout,
    Unclassified,
}

impl ErrorKind {
    /// Kinds that indicate the endpoint itself is unhealthy, as opposed to a
    /// one-off request failure. Only these count against a failover budget.
    pub fn is_endpoint_failure(self) -> bool {
        matches!(
            self,
            ErrorKind::TooManyRequests
                | ErrorKind::ServiceUnavailable
                | ErrorKind::GatewayTimeout
                | ErrorKind::NoSuchHost
        )
    }
}

/// One known error shape: the substrings that identify it and a short label
/// used when rendering reports.
#[derive(Debug, Clone)]
pub struct ErrorSignature {
    pub kind: ErrorKind,
    keys: &'static [&'static str],
    pub label: &'static str,
}

impl ErrorSignature {
    pub fn matches(&self, text: &str) -> bool {
        self.keys.iter().any(|k| text.contains(k))
    }
}

/// A raw error string paired with its classification, produced once at the
/// boundary where the raw text is first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub raw: String,
}

/// Immutable registry of known error signatures and the derived exclusion
/// lists. Built once at startup and shared by `Arc`.
#[derive(Debug)]
pub struct ErrorRegistry {
    signatures: Vec<ErrorSignature>,
    /// Errors that must not count as a lost transaction in statistics.
    pub statistic_exclusions: Vec<ErrorKind>,
    /// Errors hidden from the alert error summary.
    pub alert_exclusions: Vec<ErrorKind>,
    /// Errors hidden from periodic reports.
    pub report_exclusions: Vec<ErrorKind>,
    /// Errors that must not contribute a latency sample.
    pub latency_exclusions: Vec<ErrorKind>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        let signatures = vec![
            ErrorSignature {
                kind: ErrorKind::BlockhashNotFound,
                keys: &["BlockhashNotFound", "Blockhash not found"],
                label: "blockhash-not-found",
            },
            ErrorSignature {
                kind: ErrorKind::AlreadyProcessed,
                keys: &["AlreadyProcessed", "already been processed"],
                label: "tx-already-processed",
            },
            ErrorSignature {
                kind: ErrorKind::RpcDeadlineExceeded,
                keys: &["deadline has elapsed", "operation timed out", "submit timed out"],
                label: "rpc-response-timeout",
            },
            ErrorSignature {
                kind: ErrorKind::ServiceUnavailable,
                keys: &["503", "Service Unavailable"],
                label: "503-service-unavailable",
            },
            ErrorSignature {
                kind: ErrorKind::TooManyRequests,
                keys: &["429", "Too Many Requests"],
                label: "429-too-many-requests",
            },
            ErrorSignature {
                kind: ErrorKind::GatewayTimeout,
                keys: &["504", "Gateway Time"],
                label: "504-gateway-timeout",
            },
            ErrorSignature {
                kind: ErrorKind::NoSuchHost,
                keys: &["no such host", "failed to lookup address"],
                label: "no-such-host",
            },
            ErrorSignature {
                kind: ErrorKind::ConnectionRefused,
                keys: &["connection refused"],
                label: "connection-refused",
            },
            ErrorSignature {
                kind: ErrorKind::EndOfStream,
                keys: &["EOF", "end of file"],
                label: "rpc-eof",
            },
            ErrorSignature {
                kind: ErrorKind::SlotsBehind,
                keys: &["numSlotsBehind", "slots behind"],
                label: "node-behind",
            },
            ErrorSignature {
                kind: ErrorKind::UnconfirmedTimeout,
                keys: &["unconfirmed", "confirmation timed out"],
                label: "tx-unconfirmed",
            },
        ];

        // Instant, non-network rejections: neither a lost transaction nor a
        // meaningful latency sample.
        let noise = vec![ErrorKind::BlockhashNotFound, ErrorKind::AlreadyProcessed];

        Self {
            signatures,
            statistic_exclusions: noise.clone(),
            alert_exclusions: noise.clone(),
            report_exclusions: noise.clone(),
            latency_exclusions: noise,
        }
    }

    /// First matching signature's kind, `Unclassified` when nothing matches.
    pub fn classify(&self, text: &str) -> ErrorKind {
        self.signatures
            .iter()
            .find(|s| s.matches(text))
            .map(|s| s.kind)
            .unwrap_or(ErrorKind::Unclassified)
    }

    /// Classify raw text, keeping the original alongside the kind.
    pub fn classify_owned(&self, raw: String) -> ClassifiedError {
        let kind = self.classify(&raw);
        ClassifiedError { kind, raw }
    }

    /// Short display label for raw error text, or the text itself when it
    /// matches no known signature.
    pub fn label<'a>(&self, text: &'a str) -> &'a str {
        self.signatures
            .iter()
            .find(|s| s.matches(text))
            .map(|s| s.label)
            .unwrap_or(text)
    }

    pub fn is_in_list(&self, kind: ErrorKind, list: &[ErrorKind]) -> bool {
        list.contains(&kind)
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_upstream_text() {
        let reg = ErrorRegistry::new();
        let raw = r#"rpc response error: {"code":-32002,"message":"Transaction simulation failed: Blockhash not found","data":{"err":"BlockhashNotFound"}}"#;
        assert_eq!(reg.classify(raw), ErrorKind::BlockhashNotFound);
        assert_eq!(reg.label(raw), "blockhash-not-found");

        assert_eq!(
            reg.classify("HTTP status client error (429 Too Many Requests)"),
            ErrorKind::TooManyRequests
        );
        assert_eq!(
            reg.classify("error sending request: operation timed out"),
            ErrorKind::RpcDeadlineExceeded
        );
        assert_eq!(
            reg.classify("dns error: failed to lookup address information"),
            ErrorKind::NoSuchHost
        );
    }

    #[test]
    fn confirm_wait_texts_classify_as_unconfirmed() {
        let reg = ErrorRegistry::new();
        assert_eq!(
            reg.classify("confirmation timed out after 50s"),
            ErrorKind::UnconfirmedTimeout
        );
        assert_eq!(
            reg.classify("transaction unconfirmed: blockhash expired"),
            ErrorKind::UnconfirmedTimeout
        );
        assert_eq!(
            reg.classify("transaction submit timed out after 10s"),
            ErrorKind::RpcDeadlineExceeded
        );
    }

    #[test]
    fn unknown_text_stays_raw() {
        let reg = ErrorRegistry::new();
        assert_eq!(reg.classify("some novel failure"), ErrorKind::Unclassified);
        assert_eq!(reg.label("some novel failure"), "some novel failure");
    }

    #[test]
    fn exclusion_lists_cover_instant_rejections() {
        let reg = ErrorRegistry::new();
        assert!(reg.is_in_list(ErrorKind::BlockhashNotFound, &reg.statistic_exclusions));
        assert!(reg.is_in_list(ErrorKind::AlreadyProcessed, &reg.latency_exclusions));
        assert!(!reg.is_in_list(ErrorKind::RpcDeadlineExceeded, &reg.statistic_exclusions));
        assert!(!reg.is_in_list(ErrorKind::Unclassified, &reg.alert_exclusions));
    }

    #[test]
    fn endpoint_failure_kinds() {
        assert!(ErrorKind::TooManyRequests.is_endpoint_failure());
        assert!(ErrorKind::ServiceUnavailable.is_endpoint_failure());
        assert!(ErrorKind::GatewayTimeout.is_endpoint_failure());
        assert!(ErrorKind::NoSuchHost.is_endpoint_failure());
        assert!(!ErrorKind::RpcDeadlineExceeded.is_endpoint_failure());
        assert!(!ErrorKind::BlockhashNotFound.is_endpoint_failure());
    }
}
