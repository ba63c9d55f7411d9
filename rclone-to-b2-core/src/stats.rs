//! Final statistics of a sync run, as reported by the engine.

use serde_json::{Map, Value};

use crate::error::MetricsError;

/// Name → value mapping of the engine's final counters and rates.
///
/// Values are kept as the engine reported them. Typed access happens through
/// [`RunStatistics::counter`] and [`RunStatistics::rate`], which fail instead of
/// substituting defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    values: Map<String, Value>,
}

impl RunStatistics {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Extracts the `stats` object from one rclone JSON log record.
    ///
    /// Returns `None` for lines that are not JSON or carry no statistics.
    pub fn from_log_line(line: &str) -> Option<Self> {
        let record: Value = serde_json::from_str(line.trim()).ok()?;
        match record.get("stats")? {
            Value::Object(stats) => Some(Self::new(stats.clone())),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// An integral counter such as `transfers`.
    pub fn counter(&self, key: &'static str) -> Result<i64, MetricsError> {
        let value = self.values.get(key).ok_or(MetricsError::MissingStat(key))?;
        value.as_i64().ok_or_else(|| MetricsError::WrongType {
            key,
            expected: "integer",
            found: describe(value),
        })
    }

    /// A floating point rate or duration such as `speed`.
    ///
    /// JSON does not keep `12.0` apart from `12`, so any number is accepted.
    pub fn rate(&self, key: &'static str) -> Result<f64, MetricsError> {
        let value = self.values.get(key).ok_or(MetricsError::MissingStat(key))?;
        value.as_f64().ok_or_else(|| MetricsError::WrongType {
            key,
            expected: "number",
            found: describe(value),
        })
    }
}

impl TryFrom<Value> for RunStatistics {
    type Error = MetricsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self::new(map)),
            _ => Err(MetricsError::NotAnObject),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_stats_from_json_log_record() {
        let line = r#"{"level":"info","msg":"\nTransferred: 0 B / 0 B\n","source":"accounting/stats.go:498","stats":{"bytes":13107200,"checks":120,"elapsedTime":12.5,"errors":0,"speed":1048576.0},"time":"2026-10-19T02:00:13Z"}"#;
        let stats = RunStatistics::from_log_line(line).expect("stats record");
        assert_eq!(stats.counter("bytes").unwrap(), 13_107_200);
        assert_eq!(stats.rate("elapsedTime").unwrap(), 12.5);
    }

    #[test]
    fn ignores_records_without_stats() {
        assert!(RunStatistics::from_log_line("Transferred: 1 files").is_none());
        assert!(RunStatistics::from_log_line(r#"{"level":"info","msg":"Copied (new)"}"#).is_none());
        assert!(RunStatistics::from_log_line(r#"{"stats":"broken"}"#).is_none());
    }

    #[test]
    fn counter_rejects_fractional_values() {
        let stats = RunStatistics::try_from(json!({"checks": 1.5})).unwrap();
        assert!(matches!(
            stats.counter("checks"),
            Err(MetricsError::WrongType { key: "checks", .. })
        ));
    }

    #[test]
    fn rate_accepts_integral_json_numbers() {
        let stats = RunStatistics::try_from(json!({"speed": 0})).unwrap();
        assert_eq!(stats.rate("speed").unwrap(), 0.0);
    }

    #[test]
    fn missing_and_non_numeric_values_fail() {
        let stats = RunStatistics::try_from(json!({"speed": "fast"})).unwrap();
        assert!(matches!(stats.rate("speed"), Err(MetricsError::WrongType { .. })));
        assert!(matches!(
            stats.counter("errors"),
            Err(MetricsError::MissingStat("errors"))
        ));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(
            RunStatistics::try_from(json!([1, 2])),
            Err(MetricsError::NotAnObject)
        ));
    }
}
