//! In-memory log file with restartable, filtered iteration
//!
//! The file is read once; every analysis pass then walks the stored records
//! with its own cursor, so passes never interfere with each other.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AnalyzerError, Result};
use crate::filter::RecordFilter;
use crate::log_line::{parse_line, LogRecord};

/// All records of one log file, in file order
#[derive(Debug, Clone, Default)]
pub struct LogStream {
    path: Option<PathBuf>,
    records: Vec<LogRecord>,
    pids: Vec<u32>,
}

impl LogStream {
    /// Read and parse a whole log file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| AnalyzerError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);

        let mut stream = Self::parse(&text)?;
        stream.path = Some(path.to_path_buf());
        debug!(
            path = %path.display(),
            records = stream.records.len(),
            pids = ?stream.pids,
            "loaded log file"
        );
        Ok(stream)
    }

    /// Parse log text that is already in memory
    pub fn parse(text: &str) -> Result<Self> {
        let mut records = Vec::new();
        let mut pids = Vec::new();

        for (i, line) in text.lines().enumerate() {
            let record = parse_line(i + 1, line)?;
            if let Some(parsed) = record.as_line() {
                pids.push(parsed.pid());
            }
            records.push(record);
        }

        pids.sort_unstable();
        pids.dedup();

        Ok(Self {
            path: None,
            records,
            pids,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Name used in report headers
    pub fn display_name(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string())
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted, distinct pids of all structured records
    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    /// Start a filtered pass over the records
    pub fn iter(&self, filter: RecordFilter) -> Result<LogIter<'_>> {
        if let Some(pid) = filter.pid() {
            if self.pids.binary_search(&pid).is_err() {
                return Err(AnalyzerError::UnknownPid(pid));
            }
        }
        let start = filter.start_line() - 1;
        Ok(LogIter {
            records: &self.records,
            filter,
            start,
            pos: start,
        })
    }

    /// Pick the process a single-process operation should look at
    ///
    /// An explicit index selects from [`pids`](Self::pids); without one the
    /// file must contain exactly one process.
    pub fn select_pid(&self, index: Option<usize>) -> Result<u32> {
        match index {
            Some(index) => {
                self.pids
                    .get(index)
                    .copied()
                    .ok_or(AnalyzerError::PidIndexOutOfRange {
                        index,
                        count: self.pids.len(),
                    })
            }
            None => match self.pids.as_slice() {
                [] => Err(AnalyzerError::EmptyLogFile),
                [pid] => Ok(*pid),
                pids => Err(AnalyzerError::MultiprocessLogFile {
                    pids: pids.to_vec(),
                }),
            },
        }
    }
}

/// Cursor over a [`LogStream`]
#[derive(Debug, Clone)]
pub struct LogIter<'a> {
    records: &'a [LogRecord],
    filter: RecordFilter,
    start: usize,
    pos: usize,
}

impl LogIter<'_> {
    /// Rewind to the filter's starting line
    pub fn reset(&mut self) {
        self.pos = self.start;
    }
}

impl<'a> Iterator for LogIter<'a> {
    type Item = &'a LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(record) = self.records.get(self.pos) {
            self.pos += 1;
            if self.filter.matches(record) {
                return Some(record);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_line::LogLevel;
    use std::io::Write;

    const LOG: &str = "\
01/23-12:34:56.78 host CaRT[20] il DBUG src/a.c:1 ioc_open(0xA) Registered new 'FOO' as root
some stray output
01/23-12:34:56.79 host CaRT[10] il WARN src/a.c:2 crt_init() slow start
01/23-12:34:56.80 host CaRT[20] il DBUG src/a.c:3 ioc_close(0xA) Deregistered
";

    #[test]
    fn test_parse_indexes_every_line() {
        let stream = LogStream::parse(LOG).unwrap();
        assert_eq!(stream.len(), 4);
        let indexes: Vec<_> = stream.records().iter().map(LogRecord::index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4]);
        assert!(stream.records()[1].is_raw());
    }

    #[test]
    fn test_pids_sorted_and_distinct() {
        let stream = LogStream::parse(LOG).unwrap();
        assert_eq!(stream.pids(), &[10, 20]);
    }

    #[test]
    fn test_iter_filters() {
        let stream = LogStream::parse(LOG).unwrap();
        let traces: Vec<_> = stream
            .iter(RecordFilter::all().trace_only())
            .unwrap()
            .map(LogRecord::index)
            .collect();
        assert_eq!(traces, vec![1, 4]);

        let warn: Vec<_> = stream
            .iter(RecordFilter::all().max_level(LogLevel::Warn))
            .unwrap()
            .map(LogRecord::index)
            .collect();
        assert_eq!(warn, vec![3]);

        let raw = stream
            .iter(RecordFilter::all().include_raw())
            .unwrap()
            .count();
        assert_eq!(raw, 4);
    }

    #[test]
    fn test_iter_start_line() {
        let stream = LogStream::parse(LOG).unwrap();
        let from_three: Vec<_> = stream
            .iter(RecordFilter::all().starting_at(3))
            .unwrap()
            .map(LogRecord::index)
            .collect();
        assert_eq!(from_three, vec![3, 4]);
    }

    #[test]
    fn test_iter_reset_replays() {
        let stream = LogStream::parse(LOG).unwrap();
        let mut iter = stream.iter(RecordFilter::all().with_pid(20)).unwrap();
        let first: Vec<_> = iter.by_ref().cloned().collect();
        assert_eq!(iter.next(), None);
        iter.reset();
        let second: Vec<_> = iter.cloned().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_unknown_pid_rejected() {
        let stream = LogStream::parse(LOG).unwrap();
        let err = stream.iter(RecordFilter::all().with_pid(99)).unwrap_err();
        assert!(matches!(err, AnalyzerError::UnknownPid(99)));
    }

    #[test]
    fn test_select_pid() {
        let stream = LogStream::parse(LOG).unwrap();
        assert!(matches!(
            stream.select_pid(None),
            Err(AnalyzerError::MultiprocessLogFile { .. })
        ));
        assert_eq!(stream.select_pid(Some(1)).unwrap(), 20);
        assert!(matches!(
            stream.select_pid(Some(5)),
            Err(AnalyzerError::PidIndexOutOfRange { index: 5, count: 2 })
        ));
        assert!(matches!(
            LogStream::parse("").unwrap().select_pid(None),
            Err(AnalyzerError::EmptyLogFile)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();
        let stream = LogStream::load(file.path()).unwrap();
        assert_eq!(stream.len(), 4);
        assert_eq!(stream.path(), Some(file.path()));
    }

    #[test]
    fn test_load_missing_file() {
        let err = LogStream::load("/definitely/not/here.log").unwrap_err();
        assert!(matches!(err, AnalyzerError::Unreadable { .. }));
    }

    #[test]
    fn test_invalid_severity_fails_load() {
        let err = LogStream::parse("01/23-12:34:56.78 host CaRT[1] il LOUD src/a.c:1 f() x")
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidLogFile { line: 1, .. }));
    }
}
