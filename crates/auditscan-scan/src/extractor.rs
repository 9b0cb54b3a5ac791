use chrono::{DateTime, Utc};

use auditscan_types::{LineError, LineErrorReason, MatchedRecord};

const START_MARKER: &str = r#"ReceivedTimestamp":""#;
const END_MARKER: &str = r#"","stageTimestamp"#;

/// Extracts the received timestamp from an audit log line
pub struct RecordExtractor;

impl RecordExtractor {
    /// Build a record from a matched line.
    ///
    /// The timestamp is the text between `ReceivedTimestamp":"` and the next
    /// `","stageTimestamp`, parsed as RFC3339 and normalized to UTC.
    pub fn extract(line_number: u64, raw: String) -> Result<MatchedRecord, LineError> {
        match Self::timestamp(&raw) {
            Ok(timestamp) => Ok(MatchedRecord::new(line_number, raw, timestamp)),
            Err(reason) => Err(LineError::new(line_number, raw, reason)),
        }
    }

    /// Locate and parse the timestamp field
    pub fn timestamp(line: &str) -> Result<DateTime<Utc>, LineErrorReason> {
        let text = Self::timestamp_text(line)?;
        DateTime::parse_from_rfc3339(text)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| LineErrorReason::TimestampUnparsable)
    }

    fn timestamp_text(line: &str) -> Result<&str, LineErrorReason> {
        let start = line
            .find(START_MARKER)
            .map(|pos| pos + START_MARKER.len())
            .ok_or(LineErrorReason::NoStartMarker)?;
        let len = line[start..]
            .find(END_MARKER)
            .ok_or(LineErrorReason::NoEndMarker)?;
        Ok(&line[start..start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const AUDIT_LINE: &str = r#"{"kind":"Event","apiVersion":"audit.k8s.io/v1","level":"Metadata","auditID":"39aec93e-031b-4002-8c0a-4ddcd92e250b","stage":"ResponseComplete","requestURI":"/api/v1/namespaces/kube-system/endpoints/kube-controller-manager","verb":"get","user":{"username":"system:kube-controller-manager"},"sourceIPs":["::1"],"objectRef":{"resource":"endpoints","namespace":"kube-system","name":"kube-controller-manager","apiVersion":"v1"},"responseStatus":{"metadata":{},"code":200},"requestReceivedTimestamp":"2019-01-02T15:01:16.105964Z","stageTimestamp":"2019-01-02T15:01:16.107286Z","annotations":{"authorization.k8s.io/decision":"allow"}}"#;

    #[test]
    fn test_extract_audit_line() {
        let record = RecordExtractor::extract(1, AUDIT_LINE.to_string()).unwrap();

        let expected = Utc.timestamp_opt(1546441276, 105964000).unwrap();
        assert_eq!(record.timestamp, expected);
        assert_eq!(record.raw, AUDIT_LINE);
        assert_eq!(record.line_number, 1);
    }

    #[test]
    fn test_offset_timestamp_normalized_to_utc() {
        let line = r#"{"requestReceivedTimestamp":"2019-01-02T17:01:16+02:00","stageTimestamp":"x"}"#;
        let ts = RecordExtractor::timestamp(line).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2019, 1, 2, 15, 1, 16).unwrap());
    }

    #[test]
    fn test_missing_start_marker() {
        let err = RecordExtractor::extract(7, r#"{"stageTimestamp":"x"}"#.to_string()).unwrap_err();
        assert_eq!(err.reason, LineErrorReason::NoStartMarker);
        assert_eq!(err.line_number, 7);
    }

    #[test]
    fn test_truncated_line_has_no_end_marker() {
        let truncated = &AUDIT_LINE[..AUDIT_LINE.find("15:01:16.105").unwrap()];
        let err = RecordExtractor::extract(2, truncated.to_string()).unwrap_err();
        assert_eq!(err.reason, LineErrorReason::NoEndMarker);
        assert_eq!(err.raw, truncated);
    }

    #[test]
    fn test_end_marker_before_start_marker() {
        let line = r#"{"a":"","stageTimestamp":"x","requestReceivedTimestamp":"2019-01-02T15:01:16Z"}"#;
        assert_eq!(
            RecordExtractor::timestamp(line).unwrap_err(),
            LineErrorReason::NoEndMarker
        );
    }

    #[test]
    fn test_unparsable_timestamp() {
        let line = r#"{"requestReceivedTimestamp":"yesterday","stageTimestamp":"x"}"#;
        let err = RecordExtractor::extract(1, line.to_string()).unwrap_err();
        assert_eq!(err.reason, LineErrorReason::TimestampUnparsable);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let first = RecordExtractor::extract(1, AUDIT_LINE.to_string());
        let second = RecordExtractor::extract(1, AUDIT_LINE.to_string());
        assert_eq!(first, second);

        let bad = r#"{"stageTimestamp":"x"}"#;
        assert_eq!(
            RecordExtractor::extract(1, bad.to_string()),
            RecordExtractor::extract(1, bad.to_string())
        );
    }
}
