use std::io::{self, Read};
use std::sync::Arc;

use auditscan_types::DurationMap;

/// Adds the time spent in every `read` call to a phase of a [`DurationMap`]
pub struct TrackingReader<R> {
    inner: R,
    phase: &'static str,
    durations: Arc<DurationMap>,
}

impl<R: Read> TrackingReader<R> {
    pub fn new(inner: R, phase: &'static str, durations: Arc<DurationMap>) -> Self {
        Self {
            inner,
            phase,
            durations,
        }
    }
}

impl<R: Read> Read for TrackingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _timer = self.durations.track(self.phase);
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_are_timed_and_passed_through() {
        let durations = Arc::new(DurationMap::new());
        let mut reader =
            TrackingReader::new(Cursor::new(b"abc\n".to_vec()), "download", Arc::clone(&durations));

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();

        assert_eq!(out, "abc\n");
        assert!(durations.get("download").is_some());
        assert!(durations.get("decompress").is_none());
    }
}
