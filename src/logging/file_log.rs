use std::{
    fs::{self, File},
    io::Write,
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Error};
use log::{Log, Metadata, Record};

use super::LogEntry;

/// Appends every record as a JSON line to a file.
#[derive(Debug)]
pub struct FileLog {
    file: Mutex<File>,
}

impl FileLog {
    /// Creates or truncates the log file, along with its parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create log directory '{}'", parent.display())
            })?;
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create log file '{}'", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        let mut serialized = serde_json::to_string(&LogEntry::from(record))?;
        serialized.push('\n');

        let mut file = self.file.lock()?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }
}

impl Log for FileLog {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        // Logging must never fail the caller
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use log::Level;
    use tempfile::tempdir;

    use super::super::Level as EntryLevel;

    #[test]
    fn test_create_failure() {
        let test_dir = tempdir().unwrap();
        // A directory cannot be opened as the log file
        FileLog::create(test_dir.path()).unwrap_err();
    }

    #[test]
    fn test_creates_parent_and_truncates() {
        let test_dir = tempdir().unwrap();
        let target = test_dir.path().join("logs/targetmgr.jsonl");

        FileLog::create(&target).unwrap();
        fs::write(&target, "stale content").unwrap();

        let logger = FileLog::create(&target).unwrap().into_logger();
        logger.log(
            &Record::builder()
                .args(format_args!("fresh"))
                .level(Level::Info)
                .build(),
        );
        logger.flush();

        let content = fs::read_to_string(&target).unwrap();
        assert!(!content.contains("stale content"), "{content}");
        assert!(content.contains("fresh"), "{content}");
    }

    #[test]
    fn test_json_lines() {
        let test_dir = tempdir().unwrap();
        let target = test_dir.path().join("targetmgr.jsonl");
        let logger = FileLog::create(&target).unwrap().into_logger();

        for (level, message) in [(Level::Info, "first"), (Level::Trace, "second")] {
            logger.log(
                &Record::builder()
                    .args(format_args!("{message}"))
                    .level(level)
                    .target("targetmgr")
                    .module_path(Some("targetmgr::engine"))
                    .file(Some(file!()))
                    .line(Some(42))
                    .build(),
            );
        }
        logger.flush();

        let content = fs::read_to_string(target).unwrap();
        let entries = content
            .lines()
            .map(|line| serde_json::from_str::<LogEntry>(line).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, EntryLevel::Info);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[0].module, "targetmgr::engine");
        assert_eq!(entries[0].file, file!());
        assert_eq!(entries[0].line, 42);
        assert_eq!(entries[1].level, EntryLevel::Trace);
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }
}
