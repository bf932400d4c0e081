// File: agent/src/csv_store.rs
//
// The only way a monitor may persist a time series. Field list is fixed at
// creation; the framework rejects extra fields and fills missing ones with
// empty strings. Header/field mismatch on open is a fatal startup error.
use crate::errors::CsvError;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One flat, timestamped row a monitor produces. Always carries `ts` as its
/// logical first column.
pub trait MonitorRecord: Clone + Send + Sync + 'static {
    fn field_names() -> &'static [&'static str];
    fn timestamp(&self) -> DateTime<Utc>;
    fn to_row(&self) -> Vec<String>;
    fn from_row(row: &[String]) -> Option<Self>
    where
        Self: Sized;
}

struct Inner {
    path: PathBuf,
    fields: Vec<String>,
    max_tail: usize,
    retention_days: i64,
    tail: VecDeque<(DateTime<Utc>, Vec<String>)>,
    file: File,
}

pub struct CSVStream<R: MonitorRecord> {
    inner: Mutex<Inner>,
    _marker: std::marker::PhantomData<R>,
}

impl<R: MonitorRecord> CSVStream<R> {
    pub fn open(path: impl AsRef<Path>, max_tail: usize, retention_days: i64) -> Result<Self, CsvError> {
        let path = path.as_ref().to_path_buf();
        let declared: Vec<String> = R::field_names().iter().map(|s| s.to_string()).collect();

        let existed = path.exists();
        if existed {
            let f = File::open(&path)?;
            let mut reader = csv::Reader::from_reader(BufReader::new(f));
            let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
            if header != declared {
                return Err(CsvError::HeaderMismatch {
                    expected: declared.clone(),
                    found: header,
                });
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if !existed {
            let mut wtr = csv::Writer::from_writer(&mut file);
            wtr.write_record(&declared)?;
            wtr.flush()?;
        }

        let mut tail = VecDeque::new();
        if existed {
            let f = File::open(&path)?;
            let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(BufReader::new(f));
            for result in reader.records() {
                let record = result?;
                let row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
                if let Some(parsed) = R::from_row(&row) {
                    tail.push_back((parsed.timestamp(), row));
                    if tail.len() > max_tail {
                        tail.pop_front();
                    }
                }
            }
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                path,
                fields: declared,
                max_tail,
                retention_days,
                tail,
                file,
            }),
            _marker: std::marker::PhantomData,
        })
    }

    pub async fn append(&self, record: &R) -> Result<(), CsvError> {
        let row = normalize_row(&record.to_row(), record, self)?;
        let mut guard = self.inner.lock().await;
        {
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut guard.file);
            wtr.write_record(&row)?;
            wtr.flush()?;
        }
        guard.tail.push_back((record.timestamp(), row));
        if guard.tail.len() > guard.max_tail {
            guard.tail.pop_front();
        }
        Ok(())
    }

    pub async fn tail(&self) -> Vec<R> {
        let guard = self.inner.lock().await;
        guard
            .tail
            .iter()
            .filter_map(|(_, row)| R::from_row(row))
            .collect()
    }

    /// Scans the file (not just the tail) for rows within `since..=until`.
    pub async fn query(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<R>, CsvError> {
        let guard = self.inner.lock().await;
        let f = File::open(&guard.path)?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(BufReader::new(f));
        let mut out = Vec::new();
        for result in reader.records() {
            let record = result?;
            let row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
            if let Some(parsed) = R::from_row(&row) {
                let ts = parsed.timestamp();
                if ts >= since && ts <= until {
                    out.push(parsed);
                }
            }
        }
        Ok(out)
    }

    /// Removes rows older than `now - retention_days`, rewriting the file
    /// atomically via write-new-then-rename.
    pub async fn prune_now(&self) -> Result<(), CsvError> {
        let mut guard = self.inner.lock().await;
        let cutoff = Utc::now() - Duration::days(guard.retention_days);

        let f = File::open(&guard.path)?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(BufReader::new(f));
        let mut kept_rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
            if let Some(parsed) = R::from_row(&row) {
                if parsed.timestamp() >= cutoff {
                    kept_rows.push(row);
                }
            }
        }

        let tmp_path = guard.path.with_extension("csv.tmp");
        {
            let mut wtr = csv::Writer::from_path(&tmp_path)?;
            wtr.write_record(&guard.fields)?;
            for row in &kept_rows {
                wtr.write_record(row)?;
            }
            wtr.flush()?;
        }
        std::fs::rename(&tmp_path, &guard.path)?;

        guard.file = OpenOptions::new().create(true).append(true).open(&guard.path)?;
        guard.tail = kept_rows
            .into_iter()
            .rev()
            .take(guard.max_tail)
            .rev()
            .filter_map(|row| R::from_row(&row).map(|r| (r.timestamp(), row)))
            .collect();
        Ok(())
    }
}

fn normalize_row<R: MonitorRecord>(row: &[String], _record: &R, stream: &CSVStream<R>) -> Result<Vec<String>, CsvError> {
    let expected_len = R::field_names().len();
    if row.len() > expected_len {
        return Err(CsvError::UnknownField(format!(
            "row has {} fields, declared schema has {}",
            row.len(),
            expected_len
        )));
    }
    let _ = stream;
    let mut out = row.to_vec();
    out.resize(expected_len, String::new());
    Ok(out)
}

impl From<csv::Error> for CsvError {
    fn from(e: csv::Error) -> Self {
        match e.into_kind() {
            csv::ErrorKind::Io(io) => CsvError::Io(io),
            other => CsvError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Clone)]
    struct PingRow {
        ts: DateTime<Utc>,
        target: String,
        latency_ms: f64,
    }

    impl MonitorRecord for PingRow {
        fn field_names() -> &'static [&'static str] {
            &["ts", "target", "latency_ms"]
        }
        fn timestamp(&self) -> DateTime<Utc> {
            self.ts
        }
        fn to_row(&self) -> Vec<String> {
            vec![self.ts.to_rfc3339(), self.target.clone(), self.latency_ms.to_string()]
        }
        fn from_row(row: &[String]) -> Option<Self> {
            Some(PingRow {
                ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
                target: row.get(1)?.clone(),
                latency_ms: row.get(2)?.parse().ok()?,
            })
        }
    }

    #[tokio::test]
    async fn append_then_tail_reflects_newest_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        let stream = CSVStream::<PingRow>::open(&path, 10, 30).unwrap();
        for i in 0..3 {
            stream
                .append(&PingRow {
                    ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, i).unwrap(),
                    target: "1.1.1.1".into(),
                    latency_ms: 10.0 + i as f64,
                })
                .await
                .unwrap();
        }
        let tail = stream.tail().await;
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.last().unwrap().latency_ms, 12.0);
    }

    #[tokio::test]
    async fn tail_is_bounded_by_max_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        let stream = CSVStream::<PingRow>::open(&path, 2, 30).unwrap();
        for i in 0..5 {
            stream
                .append(&PingRow {
                    ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, i).unwrap(),
                    target: "1.1.1.1".into(),
                    latency_ms: i as f64,
                })
                .await
                .unwrap();
        }
        assert_eq!(stream.tail().await.len(), 2);
    }

    #[tokio::test]
    async fn header_mismatch_on_reopen_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        std::fs::write(&path, "ts,wrong_field\n").unwrap();
        let err = CSVStream::<PingRow>::open(&path, 10, 30).unwrap_err();
        assert!(matches!(err, CsvError::HeaderMismatch { .. }));
    }

    #[tokio::test]
    async fn prune_now_removes_rows_older_than_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        let stream = CSVStream::<PingRow>::open(&path, 10, 30).unwrap();
        stream
            .append(&PingRow {
                ts: Utc::now() - Duration::days(60),
                target: "old".into(),
                latency_ms: 1.0,
            })
            .await
            .unwrap();
        stream
            .append(&PingRow {
                ts: Utc::now(),
                target: "new".into(),
                latency_ms: 2.0,
            })
            .await
            .unwrap();
        stream.prune_now().await.unwrap();
        let tail = stream.tail().await;
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].target, "new");
    }
}
