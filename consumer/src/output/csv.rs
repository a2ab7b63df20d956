use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{OutputError, RecordSink};
use crate::aggregator::{FrameIdentity, ResultRecord};

const HEADER: &str = "frame_index_or_name,timestamp_seconds,clarity_score,clarity_label";

/// Comma-separated records, one row per scored frame, header first.
pub struct CsvSink<W: Write + Send> {
    writer: W,
    target: String,
}

impl CsvSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        let target = path.display().to_string();
        let file = File::create(path).map_err(|e| OutputError::Create(target.clone(), e))?;
        Self::from_writer(BufWriter::new(file), target)
    }
}

impl<W: Write + Send> CsvSink<W> {
    pub fn from_writer(mut writer: W, target: impl Into<String>) -> Result<Self, OutputError> {
        let target = target.into();
        writeln!(writer, "{HEADER}").map_err(|e| OutputError::Write(target.clone(), e))?;
        Ok(Self { writer, target })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn write_record(&mut self, record: &ResultRecord) -> Result<(), OutputError> {
        let label = record.label.as_u8();
        let result = match &record.identity {
            FrameIdentity::Index { index, .. } => {
                let ts = record.timestamp_rounded().unwrap_or_default();
                writeln!(self.writer, "{index},{ts:.2},{},{label}", record.score)
            }
            FrameIdentity::Name(name) => {
                writeln!(self.writer, "{},,{},{label}", quote(name), record.score)
            }
        };
        result.map_err(|e| OutputError::Write(self.target.clone(), e))
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.writer
            .flush()
            .map_err(|e| OutputError::Write(self.target.clone(), e))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

fn quote(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ClarityLabel;

    fn written(records: &[ResultRecord]) -> String {
        let mut sink = CsvSink::from_writer(Vec::new(), "buffer").unwrap();
        for record in records {
            sink.write_record(record).unwrap();
        }
        sink.flush().unwrap();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn stream_rows_have_two_decimal_timestamps() {
        let out = written(&[
            ResultRecord {
                identity: FrameIdentity::Index {
                    index: 0,
                    timestamp_secs: 0.0,
                },
                score: 250.5,
                label: ClarityLabel::Clear,
            },
            ResultRecord {
                identity: FrameIdentity::Index {
                    index: 10,
                    timestamp_secs: 10.0 / 29.97,
                },
                score: 12.25,
                label: ClarityLabel::Blurry,
            },
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "0,0.00,250.5,1");
        assert_eq!(lines[2], "10,0.33,12.25,0");
    }

    #[test]
    fn batch_rows_leave_timestamp_empty_and_quote_names() {
        let out = written(&[
            ResultRecord {
                identity: FrameIdentity::Name("frame_001.jpg".into()),
                score: 0.0,
                label: ClarityLabel::Blurry,
            },
            ResultRecord {
                identity: FrameIdentity::Name("odd,\"name\".png".into()),
                score: 101.0,
                label: ClarityLabel::Clear,
            },
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "frame_001.jpg,,0,0");
        assert_eq!(lines[2], "\"odd,\"\"name\"\".png\",,101,1");
    }
}
