//! Plain-text crontab file: one `"<line> # <job_id>\r\n"` per persisted job.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{
    callbacks::CallbackRegistry,
    error::{Result, SchedulerError},
    registry::JobRegistry,
};

/// What a load added and which lines it skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub added: Vec<String>,
    /// `(1-based line number, error message)`.
    pub skipped: Vec<(usize, String)>,
}

pub struct CrontabFile {
    path: PathBuf,
    /// Raw lines the last load could not register, written back on save.
    unloaded: Vec<String>,
}

impl CrontabFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            unloaded: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines kept from the last load that did not become jobs.
    pub fn unloaded(&self) -> &[String] {
        &self.unloaded
    }

    /// Add every job line of the file to `registry`.
    ///
    /// Blank lines and lines starting with `#` are ignored. Lines that fail
    /// to parse or name an unknown callback are logged and skipped, but kept
    /// so [`save`](Self::save) does not drop them. A missing file is an
    /// empty schedule.
    pub fn load_into(
        &mut self,
        registry: &mut JobRegistry,
        callbacks: &CallbackRegistry,
    ) -> Result<LoadReport> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no crontab file yet");
                return Ok(LoadReport::default());
            }
            Err(source) => {
                return Err(SchedulerError::Persistence {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        self.unloaded.clear();
        let mut report = LoadReport::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match registry.add_line(callbacks, line) {
                Ok(id) => report.added.push(id),
                Err(e) => {
                    warn!(line_no = idx + 1, %line, error = %e, "skipping crontab line");
                    report.skipped.push((idx + 1, e.to_string()));
                    self.unloaded.push(line.to_string());
                }
            }
        }
        info!(
            path = %self.path.display(),
            added = report.added.len(),
            skipped = report.skipped.len(),
            "crontab loaded"
        );
        Ok(report)
    }

    /// Write all persisted jobs and the kept unloaded lines, replacing the
    /// file. Returns the number of lines written.
    pub fn save(&self, registry: &JobRegistry) -> Result<usize> {
        let (text, count) = render(registry, &self.unloaded);
        let io_err = |source| SchedulerError::Persistence {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        std::fs::write(&self.path, text).map_err(io_err)?;
        info!(path = %self.path.display(), jobs = count, "crontab saved");
        Ok(count)
    }
}

/// File contents for `registry` plus `unloaded` raw lines, and the line count.
///
/// An unloaded line whose `# id` now names a registered job is superseded
/// and dropped.
pub fn render(registry: &JobRegistry, unloaded: &[String]) -> (String, usize) {
    let mut text = String::new();
    let mut count = 0;
    for job in registry.jobs().values().filter(|job| job.persist) {
        text.push_str(&format!("{} # {}\r\n", job.line, job.id));
        count += 1;
    }
    for line in unloaded {
        let superseded = line
            .split_once('#')
            .is_some_and(|(_, id)| registry.get(id.trim()).is_some());
        if !superseded {
            text.push_str(line);
            text.push_str("\r\n");
            count += 1;
        }
    }
    (text, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobSpec;

    fn callbacks() -> CallbackRegistry {
        CallbackRegistry::new()
    }

    #[test]
    fn save_then_load_reproduces_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = CrontabFile::new(dir.path().join("crontab.txt"));
        let mut registry = JobRegistry::new();
        let id = registry.add_line(&callbacks(), "0 * * * * nop").unwrap();
        registry
            .add_line(&callbacks(), "*/10 6-18 MO,FR SUMMER * nop a b # daytime")
            .unwrap();
        assert_eq!(file.save(&registry).unwrap(), 2);

        let mut reloaded = JobRegistry::new();
        let report = file.load_into(&mut reloaded, &callbacks()).unwrap();
        assert_eq!(report.added.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(reloaded.summaries(), registry.summaries());
        assert_eq!(reloaded.schedule_index(), registry.schedule_index());
        assert!(reloaded.get(&id).is_some());
    }

    #[test]
    fn rendered_lines_use_crlf_and_id_suffix() {
        let mut registry = JobRegistry::new();
        registry
            .add_line(&callbacks(), "5  4 * * *   nop x # job")
            .unwrap();
        let (text, count) = render(&registry, &[]);
        assert_eq!(count, 1);
        assert_eq!(text, "5 4 * * * nop x # job\r\n");
    }

    #[test]
    fn transient_jobs_are_not_saved() {
        let mut registry = JobRegistry::new();
        registry
            .add_job(
                &callbacks(),
                JobSpec::new("0 * * * *", "almanac.nop")
                    .with_id("tmp")
                    .transient(),
            )
            .unwrap();
        let (text, count) = render(&registry, &[]);
        assert_eq!(count, 0);
        assert!(text.is_empty());
    }

    #[test]
    fn load_skips_comments_blanks_and_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crontab.txt");
        std::fs::write(
            &path,
            "# header\n\n0 1 * * * nop # ok\nnot a crontab line\n0 1 * * * unknown.cb # nocb\r\n",
        )
        .unwrap();

        let mut registry = JobRegistry::new();
        let report = CrontabFile::new(&path)
            .load_into(&mut registry, &callbacks())
            .unwrap();
        assert_eq!(report.added, vec!["ok".to_string()]);
        assert_eq!(
            report.skipped.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![4, 5]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unloaded_lines_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crontab.txt");
        std::fs::write(
            &path,
            "0 1 * * * host.callback x # keep\r\n0 1 * * * nop # ok\r\n0 3 * * * host.other # replaced\r\n",
        )
        .unwrap();

        let mut file = CrontabFile::new(&path);
        let mut registry = JobRegistry::new();
        file.load_into(&mut registry, &callbacks()).unwrap();
        assert_eq!(file.unloaded().len(), 2);

        registry
            .add_line(&callbacks(), "0 2 * * * nop # new")
            .unwrap();
        registry
            .add_line(&callbacks(), "0 4 * * * nop # replaced")
            .unwrap();
        assert_eq!(file.save(&registry).unwrap(), 4);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "0 2 * * * nop # new\r\n0 1 * * * nop # ok\r\n0 4 * * * nop # replaced\r\n0 1 * * * host.callback x # keep\r\n"
        );
    }

    #[test]
    fn missing_file_is_empty_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = CrontabFile::new(dir.path().join("absent.txt"));
        let mut registry = JobRegistry::new();
        let report = file.load_into(&mut registry, &callbacks()).unwrap();
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn unwritable_path_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be written as a file
        let file = CrontabFile::new(dir.path());
        let err = file.save(&JobRegistry::new()).unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_FAILURE");
    }
}
