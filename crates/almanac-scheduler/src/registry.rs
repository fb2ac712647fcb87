use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    calendar::Category,
    callbacks::{CallbackRegistry, JobCallback},
    crontab::{caret_upper, parse_line},
    error::{ParseError, Result, SchedulerError},
    field::parse_field,
};

/// Minute-of-day (0..1439) → ids of the jobs due at that minute.
pub type ScheduleIndex = BTreeMap<u16, BTreeSet<String>>;

/// Everything needed to register one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// `"<minute> <hour> <weekday> <season> <moon_phase>"`.
    pub time_spec: String,
    pub callback: String,
    pub args: Vec<String>,
    /// Generated when `None`.
    pub job_id: Option<String>,
    /// Source line to echo when saving; synthesized when `None`.
    pub line: Option<String>,
    /// Transient jobs are never written to the crontab file.
    pub persist: bool,
}

impl JobSpec {
    pub fn new(time_spec: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            time_spec: time_spec.into(),
            callback: callback.into(),
            args: Vec::new(),
            job_id: None,
            line: None,
            persist: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// A registered job. Replaced wholesale on re-registration, never mutated.
#[derive(Clone)]
pub struct CronJob {
    pub id: String,
    /// Source line written to the crontab file.
    pub line: String,
    pub callback_name: String,
    callback: Arc<dyn JobCallback>,
    pub args: Vec<String>,
    pub minutes: Vec<u32>,
    pub hours: Vec<u32>,
    pub weekdays: Vec<u32>,
    pub seasons: Vec<u32>,
    pub moon_phases: Vec<u32>,
    pub persist: bool,
}

impl CronJob {
    pub fn callback(&self) -> &Arc<dyn JobCallback> {
        &self.callback
    }

    /// Calendar filter applied at dispatch time. An unknown season or
    /// moon phase (`None`) matches every job.
    pub fn matches(&self, weekday: u32, season: Option<u32>, moon_phase: Option<u32>) -> bool {
        let in_set = |set: &[u32], value: u32| set.binary_search(&value).is_ok();
        in_set(&self.weekdays, weekday)
            && season.map_or(true, |s| in_set(&self.seasons, s))
            && moon_phase.map_or(true, |m| in_set(&self.moon_phases, m))
    }

    /// Every minute-of-day this job occupies, ascending.
    pub fn minutes_of_day(&self) -> Vec<u16> {
        let mut slots: Vec<u16> = self
            .hours
            .iter()
            .flat_map(|h| self.minutes.iter().map(move |m| (h * 60 + m) as u16))
            .collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            line: self.line.clone(),
            callback: self.callback_name.clone(),
            args: self.args.clone(),
            minutes: self.minutes.clone(),
            hours: self.hours.clone(),
            weekdays: self.weekdays.clone(),
            seasons: self.seasons.clone(),
            moon_phases: self.moon_phases.clone(),
            persist: self.persist,
        }
    }
}

impl std::fmt::Debug for CronJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronJob")
            .field("id", &self.id)
            .field("callback", &self.callback_name)
            .field("args", &self.args)
            .field("weekdays", &self.weekdays)
            .field("seasons", &self.seasons)
            .field("moon_phases", &self.moon_phases)
            .finish_non_exhaustive()
    }
}

/// Serializable snapshot of a job for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub line: String,
    pub callback: String,
    pub args: Vec<String>,
    pub minutes: Vec<u32>,
    pub hours: Vec<u32>,
    pub weekdays: Vec<u32>,
    pub seasons: Vec<u32>,
    pub moon_phases: Vec<u32>,
    pub persist: bool,
}

/// Owns all registered jobs and the minute-of-day index derived from them.
///
/// Invariant: every id in the index exists in `jobs`, and no bucket is empty.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, CronJob>,
    schedule: ScheduleIndex,
    /// Last auto-generated id stamp, keeps generated ids strictly increasing.
    last_generated: i64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a full crontab line and register it.
    pub fn add_line(&mut self, callbacks: &CallbackRegistry, line: &str) -> Result<String> {
        let parsed = parse_line(line)?;
        let mut spec = JobSpec::new(parsed.time_spec(), parsed.callback).with_args(parsed.args);
        spec.job_id = parsed.job_id;
        spec.line = Some(parsed.source);
        self.add_job(callbacks, spec)
    }

    /// Register a job, replacing any job with the same id.
    ///
    /// Nothing is mutated unless the callback resolves, all five fields parse
    /// and the job can be written back as a crontab line unchanged.
    pub fn add_job(&mut self, callbacks: &CallbackRegistry, spec: JobSpec) -> Result<String> {
        check_storable(&spec)?;
        let callback = callbacks
            .resolve(&spec.callback)
            .ok_or_else(|| SchedulerError::CallbackNotFound {
                name: spec.callback.clone(),
            })?;

        let fields: Vec<&str> = spec.time_spec.split_whitespace().collect();
        let &[mm, hh, wd, ss, mp] = fields.as_slice() else {
            return Err(ParseError::MalformedLine {
                line: spec.time_spec.clone(),
            }
            .into());
        };
        let minutes = parse_field(mm, Category::Minute, None)?;
        let hours = parse_field(hh, Category::Hour, None)?;
        let weekdays = parse_field(wd, Category::Weekday, None)?;
        let seasons = parse_field(ss, Category::Season, None)?;
        let moon_phases = parse_field(mp, Category::MoonPhase, None)?;

        let id = match spec.job_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => self.generate_id(),
        };
        let line = spec.line.unwrap_or_else(|| {
            spec.time_spec
                .split_whitespace()
                .chain(std::iter::once(spec.callback.as_str()))
                .chain(spec.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        });

        let job = CronJob {
            id: id.clone(),
            line,
            callback_name: spec.callback,
            callback,
            args: spec.args,
            minutes,
            hours,
            weekdays,
            seasons,
            moon_phases,
            persist: spec.persist,
        };

        // a re-registration must not leave stale buckets behind
        if self.jobs.contains_key(&id) {
            self.purge_index(&id);
            debug!(job_id = %id, "replacing existing job");
        }
        for slot in job.minutes_of_day() {
            self.schedule.entry(slot).or_default().insert(id.clone());
        }
        info!(job_id = %id, callback = %job.callback_name, "job added");
        self.jobs.insert(id.clone(), job);
        Ok(id)
    }

    /// Remove a job and purge it from every schedule bucket.
    ///
    /// Returns `JobNotFound` (state untouched) if the id is unknown.
    pub fn remove_job(&mut self, id: &str) -> Result<CronJob> {
        let job = self
            .jobs
            .remove(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        self.purge_index(id);
        info!(job_id = %id, "job removed");
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<&CronJob> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> &BTreeMap<String, CronJob> {
        &self.jobs
    }

    pub fn schedule_index(&self) -> &ScheduleIndex {
        &self.schedule
    }

    /// Ids due at `minute_of_day`, if any.
    pub fn due_at(&self, minute_of_day: u16) -> Option<&BTreeSet<String>> {
        self.schedule.get(&minute_of_day)
    }

    /// `(job_id, source line)` pairs in registry order.
    pub fn lines(&self) -> Vec<(String, String)> {
        self.jobs
            .values()
            .map(|job| (job.id.clone(), job.line.clone()))
            .collect()
    }

    pub fn summaries(&self) -> Vec<JobSummary> {
        self.jobs.values().map(CronJob::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn purge_index(&mut self, id: &str) {
        self.schedule.retain(|_, ids| {
            ids.remove(id);
            !ids.is_empty()
        });
    }

    fn generate_id(&mut self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let stamp = now.max(self.last_generated + 1);
        self.last_generated = stamp;
        format!("t{stamp}")
    }
}

/// Reject parts that `parse_line` would read back as a different job.
fn check_storable(spec: &JobSpec) -> std::result::Result<(), ParseError> {
    let plain = |token: &str| {
        !token.is_empty()
            && !token
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || c == '#')
    };
    let unstorable = |part, value: &str| ParseError::Unstorable {
        part,
        value: value.to_string(),
    };

    // `nop` and `^x` are rewritten when a line is parsed
    let rewritten = spec.callback == "nop" || caret_upper(&spec.callback) != spec.callback;
    if !plain(&spec.callback) || rewritten {
        return Err(unstorable("callback", &spec.callback));
    }
    if let Some(arg) = spec.args.iter().find(|arg| !plain(arg)) {
        return Err(unstorable("argument", arg));
    }
    if let Some(id) = &spec.job_id {
        if id.chars().any(char::is_control) {
            return Err(unstorable("job id", id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crontab::NOP_CALLBACK;

    fn callbacks() -> CallbackRegistry {
        CallbackRegistry::new()
    }

    #[test]
    fn add_line_indexes_every_hour_minute_pair() {
        let mut registry = JobRegistry::new();
        let id = registry
            .add_line(&callbacks(), "0,30 8-9 * * * nop # twice")
            .unwrap();
        assert_eq!(id, "twice");

        let slots: Vec<u16> = registry.schedule_index().keys().copied().collect();
        assert_eq!(slots, vec![480, 510, 540, 570]);
        assert!(registry.due_at(510).unwrap().contains("twice"));
        assert_eq!(registry.get("twice").unwrap().callback_name, NOP_CALLBACK);
    }

    #[test]
    fn generated_ids_are_unique() {
        let mut registry = JobRegistry::new();
        let a = registry.add_line(&callbacks(), "0 * * * * nop").unwrap();
        let b = registry.add_line(&callbacks(), "1 * * * * nop").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with('t'));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_callback_leaves_registry_untouched() {
        let mut registry = JobRegistry::new();
        let err = registry
            .add_line(&callbacks(), "0 * * * * missing.callback")
            .unwrap_err();
        assert!(matches!(err, SchedulerError::CallbackNotFound { .. }));
        assert!(registry.is_empty());
        assert!(registry.schedule_index().is_empty());
    }

    #[test]
    fn bad_field_leaves_registry_untouched() {
        let mut registry = JobRegistry::new();
        let err = registry
            .add_line(&callbacks(), "0 * XX * * nop # bad")
            .unwrap_err();
        assert_eq!(err.code(), "PARSE_FAILURE");
        assert!(registry.is_empty());
        assert!(registry.schedule_index().is_empty());
    }

    #[test]
    fn reregistration_replaces_buckets() {
        let mut registry = JobRegistry::new();
        registry
            .add_line(&callbacks(), "5 1 * * * nop # job")
            .unwrap();
        registry
            .add_line(&callbacks(), "10 2 * * * nop x # job")
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.due_at(65).is_none());
        assert!(registry.due_at(130).unwrap().contains("job"));
        assert_eq!(registry.get("job").unwrap().args, vec!["x"]);
    }

    #[test]
    fn remove_purges_and_drops_empty_buckets() {
        let mut registry = JobRegistry::new();
        registry.add_line(&callbacks(), "0 0 * * * nop # a").unwrap();
        registry.add_line(&callbacks(), "0 0,1 * * * nop # b").unwrap();

        registry.remove_job("b").unwrap();
        assert_eq!(
            registry.schedule_index().keys().copied().collect::<Vec<_>>(),
            vec![0]
        );
        assert_eq!(registry.due_at(0).unwrap().len(), 1);
    }

    #[test]
    fn removing_unknown_id_changes_nothing() {
        let mut registry = JobRegistry::new();
        registry.add_line(&callbacks(), "*/20 * * * * nop # a").unwrap();
        let index_before = registry.schedule_index().clone();
        let lines_before = registry.lines();

        let err = registry.remove_job("nope").unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound { .. }));
        assert_eq!(registry.schedule_index(), &index_before);
        assert_eq!(registry.lines(), lines_before);
    }

    #[test]
    fn explicit_job_gets_synthesized_line() {
        let mut registry = JobRegistry::new();
        let spec = JobSpec::new("0 12 SU * FULL_MOON", NOP_CALLBACK)
            .with_args(["a", "b"])
            .with_id("moon");
        registry.add_job(&callbacks(), spec).unwrap();
        let job = registry.get("moon").unwrap();
        assert_eq!(job.line, "0 12 SU * FULL_MOON almanac.nop a b");
        assert_eq!(job.weekdays, vec![0]);
        assert_eq!(job.moon_phases, vec![4]);
        assert_eq!(job.seasons, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unstorable_parts_are_rejected_before_mutation() {
        let mut registry = JobRegistry::new();
        let rejected = [
            JobSpec::new("0 * * * *", NOP_CALLBACK).with_args(["hello world"]),
            JobSpec::new("0 * * * *", NOP_CALLBACK).with_args(["#tag"]),
            JobSpec::new("0 * * * *", NOP_CALLBACK).with_args([""]),
            JobSpec::new("0 * * * *", "sims.^cheat"),
            JobSpec::new("0 * * * *", "nop"),
            JobSpec::new("0 * * * *", NOP_CALLBACK).with_id("two\nlines"),
        ];
        for spec in rejected {
            let err = registry.add_job(&callbacks(), spec.clone()).unwrap_err();
            assert!(
                matches!(err, SchedulerError::Parse(ParseError::Unstorable { .. })),
                "{spec:?}: {err}"
            );
        }
        assert!(registry.is_empty());
        assert!(registry.schedule_index().is_empty());
    }

    #[test]
    fn stored_line_reads_back_as_same_job() {
        let mut registry = JobRegistry::new();
        let spec = JobSpec::new("*/10  6 * * *", NOP_CALLBACK)
            .with_args(["a^b", "x-y"])
            .with_id("spaced id");
        registry.add_job(&callbacks(), spec).unwrap();
        let job = registry.get("spaced id").unwrap();

        let parsed = parse_line(&format!("{} # {}", job.line, job.id)).unwrap();
        assert_eq!(parsed.callback, job.callback_name);
        assert_eq!(parsed.args, job.args);
        assert_eq!(parsed.job_id.as_deref(), Some("spaced id"));
    }

    #[test]
    fn time_spec_needs_five_fields() {
        let mut registry = JobRegistry::new();
        let err = registry
            .add_job(&callbacks(), JobSpec::new("0 12 * *", NOP_CALLBACK))
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Parse(ParseError::MalformedLine { .. })
        ));
    }

    #[test]
    fn calendar_filter_honours_unknown_values() {
        let mut registry = JobRegistry::new();
        registry
            .add_line(&callbacks(), "0 0 MO WINTER FULL_MOON nop # f")
            .unwrap();
        let job = registry.get("f").unwrap();
        assert!(job.matches(1, Some(2), Some(4)));
        assert!(job.matches(1, None, None));
        assert!(!job.matches(2, None, None));
        assert!(!job.matches(1, Some(0), None));
        assert!(!job.matches(1, None, Some(3)));
    }
}
