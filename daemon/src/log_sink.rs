use ::sesame::error::Result;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct OpenLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// The experiment log a client opens with `init_log`. Connection threads write to it
/// directly; the mutex keeps concurrent lines whole.
pub struct LogSink {
    current: Mutex<Option<OpenLog>>,
}

impl LogSink {
    pub fn new() -> Arc<LogSink> {
        return Arc::new(LogSink {
            current: Mutex::new(None),
        });
    }

    /// Creates (or truncates) `path` and makes it the sink, flushing and closing any previous one.
    pub fn open(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut current = self.current.lock()?;
        if let Some(mut previous) = current.take() {
            if let Err(e) = previous.writer.flush() {
                tracing::warn!(path = %previous.path.display(), error = %e, "could not flush previous log");
            }
        }
        *current = Some(OpenLog {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        });
        return Ok(());
    }

    /// Appends one line and flushes. Returns false when no sink is open.
    pub fn write_line(&self, line: &str) -> Result<bool> {
        let mut current = self.current.lock()?;
        match current.as_mut() {
            Some(log) => {
                writeln!(log.writer, "{line}")?;
                log.writer.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.current.lock().ok()?.as_ref().map(|log| log.path.clone())
    }

    /// Idempotent; a poisoned lock still gets its writer flushed.
    pub fn close(&self) {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut log) = current.take() {
            if let Err(e) = log.writer.flush() {
                tracing::warn!(path = %log.path.display(), error = %e, "could not flush log on close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    #[test]
    fn writes_nothing_until_opened() {
        let sink = LogSink::new();
        assert!(!sink.write_line("lost").unwrap());
        assert_eq!(sink.path(), None);
    }

    #[test]
    fn lines_are_flushed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let sink = LogSink::new();
        sink.open(&path).unwrap();
        assert!(sink.write_line("start_phase 1").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "start_phase 1\n");
        assert_eq!(sink.path(), Some(path));
    }

    #[test]
    fn reopening_switches_files() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a.log"), dir.path().join("b.log"));
        let sink = LogSink::new();
        sink.open(&a).unwrap();
        sink.write_line("to a").unwrap();
        sink.open(&b).unwrap();
        sink.write_line("to b").unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "to a\n");
        assert_eq!(fs::read_to_string(&b).unwrap(), "to b\n");
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new();
        sink.close();
        sink.open(&dir.path().join("x.log")).unwrap();
        sink.close();
        sink.close();
        assert!(!sink.write_line("after close").unwrap());
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.log");
        let sink = LogSink::new();
        sink.open(&path).unwrap();

        let writers: Vec<_> = (0..8)
            .map(|w| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        sink.write_line(&format!("writer {w} line {i}")).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 200);
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 200);
    }

    #[test]
    fn unopenable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new();
        assert!(sink.open(&dir.path().join("no/such/dir/x.log")).is_err());
        assert_eq!(sink.path(), None);
    }
}
