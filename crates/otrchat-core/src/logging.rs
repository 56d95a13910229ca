//! Log redaction helpers.
//!
//! Message bodies and full fingerprints never appear whole in log output.
//! These wrappers make the redacted form the path of least resistance when
//! formatting log fields.

use crate::identity::Fingerprint;
use std::fmt;

/// Displays a fingerprint as its leading hex bytes plus an ellipsis.
pub struct RedactedFingerprint<'a>(pub &'a Fingerprint);

impl fmt::Display for RedactedFingerprint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        let shown = bytes.len().min(4);
        write!(f, "{}...", hex::encode(&bytes[..shown]))
    }
}

impl fmt::Debug for RedactedFingerprint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Displays a message body as its length only.
pub struct RedactedBody<'a>(pub &'a str);

impl fmt::Display for RedactedBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} chars]", self.0.chars().count())
    }
}

impl fmt::Debug for RedactedBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
