//! CSV results table.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::{Writer, WriterBuilder};
use tcp_sweep_abstract::FlowRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Appends [`FlowRecord`]s under a fixed header row.
///
/// Rows go out in the order they are appended. The underlying stream is only
/// flushed and released by [`ResultExporter::finish`].
pub struct ResultExporter<W: Write> {
    writer: Writer<W>,
    rows: usize,
}

impl ResultExporter<File> {
    /// Create (or truncate) the file at `path` and write the header.
    pub fn create(path: &Path) -> ExportResult<Self> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> ResultExporter<W> {
    pub fn new(inner: W) -> ExportResult<Self> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(inner);
        writer.write_record(FlowRecord::HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn append(&mut self, record: &FlowRecord) -> ExportResult<()> {
        self.writer.serialize(record)?;
        self.rows += 1;
        Ok(())
    }

    pub fn append_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a FlowRecord>,
    ) -> ExportResult<usize> {
        let mut written = 0;
        for record in records {
            self.append(record)?;
            written += 1;
        }
        Ok(written)
    }

    /// Data rows written so far (header excluded).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush everything and hand back the underlying stream.
    pub fn finish(mut self) -> ExportResult<W> {
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|err| ExportError::Io(err.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tcp_sweep_abstract::DataRate;

    fn record(flow_id: u32) -> FlowRecord {
        FlowRecord {
            variant: "TcpNewReno".to_string(),
            scenario: 1,
            description: "Low-bandwidth, Low-latency".to_string(),
            bandwidth: DataRate::from_mbps(2),
            delay: Duration::from_millis(10),
            buffer_packets: 10,
            num_flows: 2,
            flow_id,
            source: Ipv4Addr::new(10, 2, flow_id as u8, 1),
            destination: Ipv4Addr::new(10, 3, flow_id as u8, 2),
            throughput_mbps: 0.5,
            delay_s: 0.25,
            lost_packets: 3,
            tx_packets: 100,
            rx_packets: 97,
        }
    }

    fn export(records: &[FlowRecord]) -> String {
        let mut exporter = ResultExporter::new(Vec::new()).unwrap();
        exporter.append_all(records).unwrap();
        assert_eq!(exporter.rows(), records.len());
        String::from_utf8(exporter.finish().unwrap()).unwrap()
    }

    #[test]
    fn header_only_when_empty() {
        let text = export(&[]);
        assert_eq!(
            text,
            "Variant,Scenario,Description,Bandwidth,Delay,BufferPackets,NumFlows,FlowId,\
             Source,Destination,Throughput_Mbps,Delay_s,LostPackets,TxPackets,RxPackets\n"
        );
    }

    #[test]
    fn row_layout() {
        let text = export(&[record(1)]);
        let row = text.lines().nth(1).unwrap();
        assert_eq!(
            row,
            "TcpNewReno,1,\"Low-bandwidth, Low-latency\",2Mbps,10ms,10,2,1,\
             10.2.1.1,10.3.1.2,0.5,0.25,3,100,97"
        );
    }

    #[test]
    fn rows_keep_append_order_and_parse_back() {
        let text = export(&[record(2), record(1), record(3)]);
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), FlowRecord::HEADER);
        let ids: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[7].to_string())
            .collect();
        assert_eq!(ids, ["2", "1", "3"]);
    }

    #[test]
    fn serde_field_names_match_header() {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.serialize(record(1)).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().next().unwrap(), FlowRecord::HEADER.join(","));
    }

    #[test]
    fn create_writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut exporter = ResultExporter::create(&path).unwrap();
        exporter.append(&record(1)).unwrap();
        exporter.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
