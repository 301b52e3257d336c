//! Streaming result sink. Records append to a single output file in
//! JSONL, JSON-array, or CSV framing; once a buffer flush lands on disk
//! it is never rewritten, so readers observe whole records or nothing.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::models::ScrapedContent;

/// On-disk framing for the result stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    Jsonl,
    Json,
    Csv,
}

impl StreamFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StreamFormat::Jsonl => "jsonl",
            StreamFormat::Json => "json",
            StreamFormat::Csv => "csv",
        }
    }
}

/// Sidecar written next to the results on close
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterMeta {
    pub job_id: String,
    pub output_path: String,
    pub format: StreamFormat,
    pub total_results: u64,
    pub completed_at: chrono::DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("writer io: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("writer already closed")]
    Closed,
}

const CSV_HEADER: &str = "url,title,depth,wordCount,language,scrapedAt";

struct WriterInner {
    file: BufWriter<File>,
    /// Framed records awaiting a flush
    buffer: Vec<String>,
    buffered_bytes: usize,
    total_results: u64,
    any_record_written: bool,
    closed: bool,
}

pub struct StreamingWriter {
    inner: Mutex<WriterInner>,
    format: StreamFormat,
    job_id: String,
    output_path: PathBuf,
    meta_path: PathBuf,
    /// Auto-flush after this many buffered records
    flush_interval: usize,
    /// Forced flush once the buffer holds this many bytes
    max_buffer_bytes: usize,
}

impl StreamingWriter {
    pub fn open<P: AsRef<Path>>(
        output_dir: P,
        job_id: &str,
        format: StreamFormat,
        flush_interval: usize,
        max_buffer_bytes: usize,
    ) -> Result<Self, WriterError> {
        let dir = output_dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let output_path = dir.join(format!("{}-results.{}", job_id, format.extension()));
        let meta_path = dir.join(format!("{}-meta.json", job_id));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&output_path)?;
        let mut file = BufWriter::new(file);

        // Headers are part of the stream framing and land immediately
        match format {
            StreamFormat::Json => {
                file.write_all(b"[")?;
                file.flush()?;
            }
            StreamFormat::Csv => {
                writeln!(file, "{}", CSV_HEADER)?;
                file.flush()?;
            }
            StreamFormat::Jsonl => {}
        }

        Ok(Self {
            inner: Mutex::new(WriterInner {
                file,
                buffer: Vec::new(),
                buffered_bytes: 0,
                total_results: 0,
                any_record_written: false,
                closed: false,
            }),
            format,
            job_id: job_id.to_string(),
            output_path,
            meta_path,
            flush_interval: flush_interval.max(1),
            max_buffer_bytes: max_buffer_bytes.max(1),
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Append one record. Emission is serialised by the internal lock so
    /// concurrent writers never interleave fragments.
    pub fn write(&self, record: &ScrapedContent) -> Result<(), WriterError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WriterError::Closed);
        }

        let framed = match self.format {
            StreamFormat::Jsonl => format!("{}\n", serde_json::to_string(record)?),
            StreamFormat::Json => {
                let json = serde_json::to_string(record)?;
                if inner.any_record_written {
                    format!(",\n{}", json)
                } else {
                    format!("\n{}", json)
                }
            }
            StreamFormat::Csv => format!("{}\n", Self::csv_row(record)),
        };

        inner.any_record_written = true;
        inner.total_results += 1;
        inner.buffered_bytes += framed.len();
        inner.buffer.push(framed);

        if inner.buffer.len() >= self.flush_interval
            || inner.buffered_bytes >= self.max_buffer_bytes
        {
            Self::flush_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Force buffered records to disk
    pub fn flush(&self) -> Result<(), WriterError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WriterError::Closed);
        }
        Self::flush_locked(&mut inner)
    }

    fn flush_locked(inner: &mut WriterInner) -> Result<(), WriterError> {
        for framed in inner.buffer.drain(..) {
            inner.file.write_all(framed.as_bytes())?;
        }
        inner.buffered_bytes = 0;
        inner.file.flush()?;
        Ok(())
    }

    /// Flush, write any footer, and emit the `{job_id}-meta.json` sidecar.
    /// The output file is complete and self-describing afterwards.
    pub fn close(&self) -> Result<WriterMeta, WriterError> {
        let total_results = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(WriterError::Closed);
            }
            Self::flush_locked(&mut inner)?;

            if self.format == StreamFormat::Json {
                inner.file.write_all(b"\n]\n")?;
            }
            inner.file.flush()?;
            inner.closed = true;
            inner.total_results
        };

        let meta = WriterMeta {
            job_id: self.job_id.clone(),
            output_path: self.output_path.display().to_string(),
            format: self.format,
            total_results,
            completed_at: Utc::now(),
        };
        std::fs::write(&self.meta_path, serde_json::to_string_pretty(&meta)?)?;

        tracing::info!(
            job_id = %self.job_id,
            total = total_results,
            path = %self.output_path.display(),
            "result stream closed"
        );
        Ok(meta)
    }

    pub fn total_results(&self) -> u64 {
        self.inner.lock().total_results
    }

    /// Standard CSV quoting: every field wrapped in quotes, internal
    /// quotes doubled.
    fn csv_row(record: &ScrapedContent) -> String {
        let fields = [
            record.url.as_str(),
            record.title.as_str(),
            &record.metadata.depth.to_string(),
            &record.metadata.word_count.to_string(),
            record.metadata.language.as_str(),
            &record.metadata.scraped_at.to_rfc3339(),
        ];
        fields
            .iter()
            .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(",")
    }
}
