use std::path::Path;

use crate::error::EtlError;
use crate::period::format_ymdhms;
use crate::types::TimeInterval;

pub const FROM_TOKEN: &str = "{{from}}";
pub const TO_TOKEN: &str = "{{to}}";

/// SQL text with `{{from}}` / `{{to}}` placeholders for the interval bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    text: String,
}

impl SqlTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        SqlTemplate { text: text.into() }
    }

    /// Reads a UTF-8 template file.
    pub fn load(path: &Path) -> Result<Self, EtlError> {
        let text = std::fs::read_to_string(path).map_err(|source| EtlError::Template {
            path: path.display().to_string(),
            source,
        })?;
        Ok(SqlTemplate { text })
    }

    /// Returns true if the template references at least one interval bound.
    pub fn has_placeholders(&self) -> bool {
        self.text.contains(FROM_TOKEN) || self.text.contains(TO_TOKEN)
    }

    /// Substitutes every placeholder with the interval bounds as `YYYY-MM-DD HH:MM:SS`.
    pub fn render(&self, interval: &TimeInterval) -> String {
        self.text
            .replace(FROM_TOKEN, &format_ymdhms(interval.start))
            .replace(TO_TOKEN, &format_ymdhms(interval.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::parse_datetime;

    #[test]
    fn test_render_replaces_all_occurrences() {
        let tpl = SqlTemplate::new(
            "select count(*) from e where t >= '{{from}}' and t < '{{to}}' and '{{from}}' <> ''",
        );
        let iv = TimeInterval::new(
            parse_datetime("2017-08-01").unwrap(),
            parse_datetime("2017-08-01 01:00:00").unwrap(),
        );
        assert_eq!(
            tpl.render(&iv),
            "select count(*) from e where t >= '2017-08-01 00:00:00' and t < '2017-08-01 01:00:00' and '2017-08-01 00:00:00' <> ''"
        );
        assert!(tpl.has_placeholders());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqlTemplate::load(&dir.path().join("missing.sql")).unwrap_err();
        assert!(matches!(err, EtlError::Template { .. }));
    }
}
