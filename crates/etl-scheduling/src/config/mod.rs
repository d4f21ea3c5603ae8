use anyhow::{Context, Result};
use chrono::NaiveTime;
use etl_common::{Frequency, TaskName};
use etl_process::{LaunchSpec, TaskPattern, TerminatorOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod validation;

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub scheduler: SchedulerOptions,
    /// Declared tasks, in the order they appear in the file.
    #[serde(with = "ordered_jobs")]
    pub jobs: Vec<TaskDeclaration>,
}

/// Scheduler-wide options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerOptions {
    /// Pause between consecutive task launches during startup.
    #[serde(default = "default_start_delay_seconds")]
    pub start_delay_seconds: u64,

    /// Root directory of the run log (`<log_dir>/scheduler/<YYYYMMDD>/<HHMMSS>.json`).
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Interpreter used for tasks that don't name their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Time of day at which `daily` tasks fire.
    #[serde(default = "default_daily_at", with = "time_of_day_serde")]
    pub daily_at: NaiveTime,

    /// How often the running scheduler checks for due jobs.
    #[serde(default = "default_tick_interval", with = "duration_serde")]
    pub tick_interval: Duration,

    #[serde(default)]
    pub stop: StopOptions,
}

/// Shutdown pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopOptions {
    /// Overall budget for waiting until no task process is left.
    #[serde(default = "default_stop_timeout", with = "duration_serde")]
    pub timeout: Duration,

    #[serde(default = "default_stop_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Pause after each termination.
    #[serde(default = "default_pause_between", with = "duration_serde")]
    pub pause_between: Duration,

    /// Liveness probes after SIGTERM before escalating to SIGKILL.
    #[serde(default = "default_term_attempts")]
    pub term_attempts: u32,

    #[serde(default = "default_term_poll_interval", with = "duration_serde")]
    pub term_poll_interval: Duration,
}

impl StopOptions {
    pub fn terminator_options(&self) -> TerminatorOptions {
        TerminatorOptions {
            attempts: self.term_attempts,
            poll_interval: self.term_poll_interval,
        }
    }
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            timeout: default_stop_timeout(),
            poll_interval: default_stop_poll_interval(),
            pause_between: default_pause_between(),
            term_attempts: default_term_attempts(),
            term_poll_interval: default_term_poll_interval(),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            start_delay_seconds: default_start_delay_seconds(),
            log_dir: default_log_dir(),
            interpreter: None,
            daily_at: default_daily_at(),
            tick_interval: default_tick_interval(),
            stop: StopOptions::default(),
        }
    }
}

impl SchedulerOptions {
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_seconds)
    }
}

/// One declared pipeline task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDeclaration {
    pub name: TaskName,
    /// Script or executable to launch.
    pub path: String,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

impl TaskDeclaration {
    pub fn new(name: impl Into<TaskName>, path: impl Into<String>, frequency: Frequency) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            frequency,
            interpreter: None,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// File name of the task path; what the process table is searched for.
    pub fn base_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.path)
    }

    pub fn pattern(&self) -> TaskPattern {
        TaskPattern::for_path(&self.path, self.interpreter.as_deref())
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec::for_path(&self.path, self.interpreter.as_deref())
    }
}

impl SchedulerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let mut config: SchedulerConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.resolve_interpreters();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Fill in the default interpreter; an explicit empty string opts a task out.
    fn resolve_interpreters(&mut self) {
        let default = self
            .scheduler
            .interpreter
            .clone()
            .filter(|interpreter| !interpreter.is_empty());

        for job in &mut self.jobs {
            job.interpreter = match job.interpreter.take() {
                Some(interpreter) if interpreter.is_empty() => None,
                Some(interpreter) => Some(interpreter),
                None => default.clone(),
            };
        }
    }

    pub fn task(&self, name: &TaskName) -> Option<&TaskDeclaration> {
        self.jobs.iter().find(|job| &job.name == name)
    }
}

fn default_start_delay_seconds() -> u64 {
    5
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_daily_at() -> NaiveTime {
    NaiveTime::MIN
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_stop_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_pause_between() -> Duration {
    Duration::from_millis(500)
}

fn default_term_attempts() -> u32 {
    10
}

fn default_term_poll_interval() -> Duration {
    Duration::from_millis(100)
}

/// Serialize declarations as the `name -> {frequency, path}` mapping the file uses.
pub(crate) fn serialize_jobs<S>(jobs: &[TaskDeclaration], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    ordered_jobs::serialize(jobs, serializer)
}

// Jobs are a YAML mapping keyed by task name; keep file order.
mod ordered_jobs {
    use super::TaskDeclaration;
    use etl_common::{Frequency, TaskName};
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;

    #[derive(Serialize, Deserialize)]
    struct JobEntry {
        #[serde(default)]
        frequency: Frequency,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interpreter: Option<String>,
    }

    pub fn serialize<S>(jobs: &[TaskDeclaration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(jobs.len()))?;
        for job in jobs {
            let entry = JobEntry {
                frequency: job.frequency.clone(),
                path: job.path.clone(),
                interpreter: job.interpreter.clone(),
            };
            map.serialize_entry(job.name.as_str(), &entry)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<TaskDeclaration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct JobsVisitor;

        impl<'de> Visitor<'de> for JobsVisitor {
            type Value = Vec<TaskDeclaration>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of task name to {frequency, path}")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut jobs = Vec::new();
                while let Some((name, entry)) = access.next_entry::<String, JobEntry>()? {
                    jobs.push(TaskDeclaration {
                        name: TaskName::new(name),
                        path: entry.path,
                        frequency: entry.frequency,
                        interpreter: entry.interpreter,
                    });
                }
                Ok(jobs)
            }
        }

        deserializer.deserialize_map(JobsVisitor)
    }
}

// "HH:MM" time of day
mod time_of_day_serde {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, FORMAT)
            .map_err(|e| serde::de::Error::custom(format!("Invalid time of day '{}': {}", s, e)))
    }
}

// Durations as "500ms", "60s" or "15m"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let invalid = || format!("Invalid duration: {}", s);

        // "ms" before "s", since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            num.trim().parse().map(Duration::from_millis).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('s') {
            num.trim().parse().map(Duration::from_secs).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('m') {
            num.trim()
                .parse::<u64>()
                .ok()
                .and_then(|mins| mins.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or_else(invalid)
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}
