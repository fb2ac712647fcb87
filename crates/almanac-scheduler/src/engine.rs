use std::ops::RangeInclusive;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use almanac_core::SchedulerConfig;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    callbacks::CallbackRegistry,
    calendar::MINUTES_PER_DAY,
    clock::{ClockReading, TimeSource},
    error::Result,
    profile::{ProfileSnapshot, Profiler},
    registry::{CronJob, JobRegistry, JobSpec, JobSummary, ScheduleIndex},
    store::{CrontabFile, LoadReport},
};

/// Callback name of the built-in profiling logger.
pub const PROFILER_CALLBACK: &str = "almanac.profiler.log";
/// Job id of the built-in hourly profiling job.
pub const PROFILER_JOB_ID: &str = "profiler";

/// Where the driver left off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// `None` until the first poll that reached the dispatch stage.
    pub last_minute: Option<u16>,
    /// Last clock timestamp accepted, used for stall detection.
    pub last_timestamp: Option<i64>,
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The clock reported itself paused.
    Paused,
    /// The clock timestamp did not move forward.
    Stalled,
    /// First poll: cursor set to the current minute, nothing dispatched.
    Anchored { minute: u16 },
    /// Same minute as the last poll.
    Idle,
    Dispatched(PollReport),
}

/// What a dispatching poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Minute the catch-up started at (inclusive).
    pub from: u16,
    /// Minute the catch-up ended at (inclusive).
    pub to: u16,
    pub minutes_scanned: u32,
    /// `(minute_of_day, job_id)` in dispatch order.
    pub fired: Vec<(u16, String)>,
    /// Jobs whose callback failed or panicked.
    pub failed: Vec<String>,
}

/// Minutes to visit after `last` when the clock now reads `now`.
///
/// An unstarted cursor (`None`) catches up from midnight. When `now` is
/// below `last` the day wrapped and the range is split at midnight.
pub fn catch_up_ranges(last: Option<u16>, now: u16) -> Vec<RangeInclusive<u16>> {
    let end_of_day = MINUTES_PER_DAY - 1;
    match last {
        None => vec![0..=now],
        Some(last) if now > last => vec![last + 1..=now],
        Some(last) if now < last => vec![last + 1..=end_of_day, 0..=now],
        Some(_) => Vec::new(),
    }
}

/// Core scheduler: job registry, cursor and profiling driven by [`TimeSource`] polls.
pub struct SchedulerEngine {
    registry: JobRegistry,
    callbacks: CallbackRegistry,
    cursor: Cursor,
    profiler: Arc<Profiler>,
    store: Option<CrontabFile>,
    catch_up_on_start: bool,
    autosave: bool,
    poll_interval: Duration,
}

impl SchedulerEngine {
    pub fn new(config: &SchedulerConfig, callbacks: CallbackRegistry) -> Self {
        Self {
            registry: JobRegistry::new(),
            callbacks,
            cursor: Cursor::default(),
            profiler: Arc::new(Profiler::new(config.profiling)),
            store: None,
            catch_up_on_start: config.catch_up_on_start,
            autosave: config.autosave,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    /// Attach the crontab file used by [`load`](Self::load), [`save`](Self::save) and autosave.
    pub fn with_store(mut self, store: CrontabFile) -> Self {
        self.store = Some(store);
        self
    }

    /// Register the `profiler` job: logs profiling data at minute 0 of every hour.
    ///
    /// The job is transient, so it never ends up in the crontab file. A loaded
    /// job already using the `profiler` id is kept and the built-in job is
    /// skipped (`Ok(None)`).
    pub fn register_profiler_job(&mut self) -> Result<Option<String>> {
        let profiler = Arc::clone(&self.profiler);
        self.callbacks.register(PROFILER_CALLBACK, move |_: &[String]| {
            profiler.log_stats();
            Ok(())
        });
        if let Some(existing) = self.registry.get(PROFILER_JOB_ID) {
            warn!(
                job_id = PROFILER_JOB_ID,
                line = %existing.line,
                "job id reserved for the built-in profiler is taken, not registering it"
            );
            return Ok(None);
        }
        self.registry
            .add_job(
                &self.callbacks,
                JobSpec::new("0 * * * *", PROFILER_CALLBACK)
                    .with_id(PROFILER_JOB_ID)
                    .transient(),
            )
            .map(Some)
    }

    // --- registry management -------------------------------------------------

    /// Add a job from a raw crontab line.
    pub fn add_line(&mut self, line: &str) -> Result<String> {
        let id = self.registry.add_line(&self.callbacks, line)?;
        self.autosave();
        Ok(id)
    }

    /// Add a job from explicit parts.
    pub fn add_job(&mut self, spec: JobSpec) -> Result<String> {
        let id = self.registry.add_job(&self.callbacks, spec)?;
        self.autosave();
        Ok(id)
    }

    /// Remove a job by id. `JobNotFound` leaves everything untouched.
    pub fn remove_job(&mut self, id: &str) -> Result<CronJob> {
        let job = self.registry.remove_job(id)?;
        self.autosave();
        Ok(job)
    }

    /// Load the attached crontab file into the registry.
    pub fn load(&mut self) -> Result<LoadReport> {
        match &mut self.store {
            Some(store) => store.load_into(&mut self.registry, &self.callbacks),
            None => Ok(LoadReport::default()),
        }
    }

    /// Save the registry to the attached crontab file. Returns the job count.
    pub fn save(&self) -> Result<usize> {
        match &self.store {
            Some(store) => store.save(&self.registry),
            None => Ok(0),
        }
    }

    fn autosave(&self) {
        if !self.autosave {
            return;
        }
        if let Err(e) = self.save() {
            // in-memory state stays authoritative
            warn!(error = %e, "autosave failed");
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    // --- profiling -----------------------------------------------------------

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    /// `Some` sets the flag; `None` only queries it.
    pub fn profiling(&self, enabled: Option<bool>) -> bool {
        self.profiler.enable(enabled)
    }

    pub fn stats(&self) -> ProfileSnapshot {
        self.profiler.stats()
    }

    pub fn reset_stats(&self) {
        self.profiler.reset();
    }

    pub fn log_stats(&self) {
        self.profiler.log_stats();
    }

    // --- driver --------------------------------------------------------------

    /// Sample `clock` once and dispatch every job due since the last poll.
    pub fn poll(&mut self, clock: &dyn TimeSource) -> PollOutcome {
        match self.prepare(clock) {
            Prepared::Done(outcome) => outcome,
            Prepared::Due(batch) => batch.run(),
        }
    }

    /// Advance the cursor and collect the due jobs without running them.
    fn prepare(&mut self, clock: &dyn TimeSource) -> Prepared {
        let reading = clock.read();
        if reading.paused {
            return Prepared::Done(PollOutcome::Paused);
        }
        if self
            .cursor
            .last_timestamp
            .is_some_and(|last| reading.timestamp <= last)
        {
            debug!(
                timestamp = reading.timestamp,
                last = ?self.cursor.last_timestamp,
                "clock stalled or went backwards, skipping poll"
            );
            return Prepared::Done(PollOutcome::Stalled);
        }
        self.cursor.last_timestamp = Some(reading.timestamp);

        let started = Instant::now();
        let now = reading.minute_of_day % MINUTES_PER_DAY;
        if self.cursor.last_minute.is_none() && !self.catch_up_on_start {
            self.cursor.last_minute = Some(now);
            debug!(minute = now, "cursor anchored");
            return Prepared::Done(PollOutcome::Anchored { minute: now });
        }

        let ranges = catch_up_ranges(self.cursor.last_minute, now);
        let Some(from) = ranges.iter().find_map(|r| (!r.is_empty()).then(|| *r.start())) else {
            return Prepared::Done(PollOutcome::Idle);
        };

        let mut batch = DueBatch {
            started,
            report: PollReport {
                from,
                to: now,
                ..PollReport::default()
            },
            jobs: Vec::new(),
            profiler: Arc::clone(&self.profiler),
        };
        for minute in ranges.into_iter().flatten() {
            batch.report.minutes_scanned += 1;
            self.collect_minute(minute, &reading, &mut batch.jobs);
        }

        self.cursor.last_minute = Some(now);
        if batch.report.minutes_scanned > 1 {
            debug!(
                from = batch.report.from,
                to = batch.report.to,
                minutes = batch.report.minutes_scanned,
                "caught up"
            );
        }
        Prepared::Due(batch)
    }

    /// Queue every matching job of one minute bucket, each at most once.
    fn collect_minute(
        &self,
        minute: u16,
        reading: &ClockReading,
        due: &mut Vec<(u16, CronJob)>,
    ) {
        let Some(ids) = self.registry.due_at(minute) else {
            return;
        };
        // filter the whole bucket before invoking anything
        let before = due.len();
        due.extend(
            ids.iter()
                .filter_map(|id| self.registry.get(id))
                .filter(|job| job.matches(reading.weekday, reading.season, reading.moon_phase))
                .map(|job| (minute, job.clone())),
        );
        if due.len() > before {
            debug!(
                minute,
                weekday = reading.weekday,
                season = ?reading.season,
                moon_phase = ?reading.moon_phase,
                jobs = due.len() - before,
                "dispatching"
            );
        }
    }
}

enum Prepared {
    Done(PollOutcome),
    Due(DueBatch),
}

/// Jobs a poll found due. Runs without access to the engine, so callbacks
/// may call back into a [`SchedulerHandle`].
struct DueBatch {
    started: Instant,
    report: PollReport,
    jobs: Vec<(u16, CronJob)>,
    profiler: Arc<Profiler>,
}

impl DueBatch {
    fn run(self) -> PollOutcome {
        let DueBatch {
            started,
            mut report,
            jobs,
            profiler,
        } = self;
        for (minute, job) in jobs {
            let t = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| job.callback().call(&job.args)));
            match outcome {
                Ok(Ok(())) => debug!(job_id = %job.id, callback = %job.callback_name, "job ran"),
                Ok(Err(e)) => {
                    error!(job_id = %job.id, callback = %job.callback_name, args = ?job.args, error = %e, "job failed");
                    report.failed.push(job.id.clone());
                }
                Err(panic) => {
                    error!(job_id = %job.id, callback = %job.callback_name, panic = panic_message(&*panic), "job panicked");
                    report.failed.push(job.id.clone());
                }
            }
            profiler.record_job(&job.id, t.elapsed());
            report.fired.push((minute, job.id));
        }
        profiler.record_tick(started.elapsed());
        PollOutcome::Dispatched(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Shared handle for job management while the poll loop runs.
///
/// All access goes through one mutex. A poll holds it while advancing the
/// cursor and collecting due jobs, then releases it before the callbacks run.
#[derive(Clone)]
pub struct SchedulerHandle {
    engine: Arc<Mutex<SchedulerEngine>>,
}

impl SchedulerHandle {
    pub fn new(engine: SchedulerEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut SchedulerEngine) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn add_line(&self, line: &str) -> Result<String> {
        self.lock().add_line(line)
    }

    pub fn add_job(&self, spec: JobSpec) -> Result<String> {
        self.lock().add_job(spec)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        self.lock().remove_job(id).map(|_| ())
    }

    pub fn save(&self) -> Result<usize> {
        self.lock().save()
    }

    /// `(job_id, source line)` pairs.
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lock().registry().lines()
    }

    pub fn jobs(&self) -> Vec<JobSummary> {
        self.lock().registry().summaries()
    }

    pub fn schedule_index(&self) -> ScheduleIndex {
        self.lock().registry().schedule_index().clone()
    }

    pub fn profiling(&self, enabled: Option<bool>) -> bool {
        self.lock().profiling(enabled)
    }

    pub fn stats(&self) -> ProfileSnapshot {
        self.lock().stats()
    }

    pub fn reset_stats(&self) {
        self.lock().reset_stats();
    }

    pub fn log_stats(&self) {
        self.lock().log_stats();
    }

    /// Poll once. Due callbacks run after the engine lock is released.
    pub fn poll(&self, clock: &dyn TimeSource) -> PollOutcome {
        let prepared = self.lock().prepare(clock);
        match prepared {
            Prepared::Done(outcome) => outcome,
            Prepared::Due(batch) => batch.run(),
        }
    }

    /// Poll `clock` at the engine's interval until `shutdown` broadcasts `true`.
    pub async fn run(&self, clock: Arc<dyn TimeSource>, mut shutdown: watch::Receiver<bool>) {
        let period = self.lock().poll_interval();
        info!(interval_ms = period.as_millis() as u64, "scheduler engine started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let PollOutcome::Dispatched(report) = self.poll(&*clock) {
                        if !report.fired.is_empty() {
                            info!(
                                to = report.to,
                                fired = report.fired.len(),
                                failed = report.failed.len(),
                                "poll dispatched jobs"
                            );
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
