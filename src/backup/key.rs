use chrono::{Datelike, NaiveDateTime};

pub const DEFAULT_KEY_PREFIX: &str = "ios";

/// Layout of remote keys: `<prefix>/<YYYY>/<MM>/<YYYY-MM-DD_HH-MM-SS>_<filename>`.
///
/// The month appears twice (path segment and timestamp); both are zero-padded
/// so keys stay identical to the ones earlier runs already uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyLayout {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn derive(&self, at: &NaiveDateTime, filename: &str) -> String {
        format!(
            "{}/{}/{:02}/{}_{}",
            self.prefix,
            at.year(),
            at.month(),
            at.format("%Y-%m-%d_%H-%M-%S"),
            filename
        )
    }
}
