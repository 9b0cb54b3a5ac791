use std::future::Future;
use std::io::{self, Write};

use tokio::sync::mpsc;

use auditscan_types::{Batch, MatchedRecord, SinkError};

/// Destination for batches of matched records.
///
/// Delivery is best-effort per batch: a `SinkError::Delivery` is logged by the
/// dispatcher and draining continues, `SinkError::Disconnected` ends the scan.
pub trait BatchSink: Send {
    fn send_batch(&mut self, batch: Batch) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Resolves once the receiving side has gone away.
    ///
    /// Sinks that cannot observe their receiver never resolve.
    fn closed(&self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }
}

/// Collects every batch into a single aggregate result
#[derive(Debug, Default)]
pub struct CollectSink {
    records: Vec<MatchedRecord>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[MatchedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MatchedRecord> {
        self.records
    }
}

impl BatchSink for CollectSink {
    async fn send_batch(&mut self, batch: Batch) -> Result<(), SinkError> {
        self.records.extend(batch.records);
        Ok(())
    }
}

/// Forwards batches to a bounded channel, e.g. one feeding a streaming response
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Batch>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Batch>) -> Self {
        Self { tx }
    }
}

impl BatchSink for ChannelSink {
    async fn send_batch(&mut self, batch: Batch) -> Result<(), SinkError> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| SinkError::Disconnected)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Writes each record as one line of JSON
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_batch(&mut self, batch: &Batch) -> io::Result<()> {
        for record in &batch.records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

impl<W: Write + Send> BatchSink for WriterSink<W> {
    async fn send_batch(&mut self, batch: Batch) -> Result<(), SinkError> {
        self.write_batch(&batch).map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe => SinkError::Disconnected,
            _ => SinkError::Delivery(e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn batch(sequence: u64, lines: &[&str]) -> Batch {
        let ts = Utc.with_ymd_and_hms(2019, 1, 2, 15, 1, 16).unwrap();
        let records = lines
            .iter()
            .enumerate()
            .map(|(i, raw)| MatchedRecord::new(i as u64 + 1, raw.to_string(), ts))
            .collect();
        Batch::new(sequence, records)
    }

    #[tokio::test]
    async fn test_collect_sink_keeps_order() {
        let mut sink = CollectSink::new();
        sink.send_batch(batch(0, &["a", "b"])).await.unwrap();
        sink.send_batch(batch(1, &["c"])).await.unwrap();

        let raws: Vec<_> = sink.into_records().into_iter().map(|r| r.raw).collect();
        assert_eq!(raws, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_disconnect() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);

        sink.send_batch(batch(0, &["a"])).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        drop(rx);
        let err = sink.send_batch(batch(1, &["b"])).await.unwrap_err();
        assert!(matches!(err, SinkError::Disconnected));
    }

    #[tokio::test]
    async fn test_channel_sink_closed_resolves_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel::<Batch>(1);
        let sink = ChannelSink::new(tx);

        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), sink.closed()).await;
        assert!(pending.is_err());

        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), sink.closed())
            .await
            .expect("closed() did not resolve after the receiver was dropped");
    }

    #[tokio::test]
    async fn test_writer_sink_writes_json_lines() {
        let mut sink = WriterSink::new(Vec::new());
        sink.send_batch(batch(0, &["first", "second"])).await.unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"entry":"first","timestamp":"2019-01-02T15:01:16Z"}"#
        );
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writer_sink_broken_pipe_is_disconnect() {
        let mut sink = WriterSink::new(BrokenPipe);
        let err = sink.send_batch(batch(0, &["a"])).await.unwrap_err();
        assert!(matches!(err, SinkError::Disconnected));
    }
}
