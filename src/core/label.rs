// Validated user-assigned status labels.
use std::fmt;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

pub const MAX_LABEL_BYTES: usize = 128;

/// A status tag attached to a file, e.g. `pending` or `reviewed`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Trims surrounding whitespace and rejects empty, oversized, or
    /// control-character labels.
    pub fn new(value: &str) -> Result<Self, Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::new(ErrorKind::Validation).with_message("label must not be empty"));
        }
        if trimmed.len() > MAX_LABEL_BYTES {
            return Err(Error::new(ErrorKind::Validation)
                .with_message(format!("label exceeds {MAX_LABEL_BYTES} bytes")));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("label must not contain control characters"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Labels read back from the store are trusted as written.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Label {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Label {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::{Label, MAX_LABEL_BYTES};
    use crate::core::error::ErrorKind;

    #[test]
    fn label_is_trimmed() {
        let label = Label::new("  pending ").expect("label");
        assert_eq!(label.as_str(), "pending");
    }

    #[test]
    fn rejects_blank_and_control_chars() {
        for bad in ["", "   ", "pen\nding", "\u{7}"] {
            let err = Label::new(bad).expect_err("invalid");
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn rejects_oversized_label() {
        let long = "x".repeat(MAX_LABEL_BYTES + 1);
        let err = Label::new(&long).expect_err("too long");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let exact = "x".repeat(MAX_LABEL_BYTES);
        assert!(Label::new(&exact).is_ok());
    }
}
