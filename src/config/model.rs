// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::limits::ResourceLimits;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [supervisor]
/// pid_dir = "/var/run/cmdwarden"
/// max_open_files = 4096
/// grace_period = "5s"
///
/// [packages.python]
/// env = { PYTHONHOME = "/opt/python" }
/// path = ["/opt/python/bin"]
///
/// [packages.maya-2024]
/// requires = ["python"]
/// ```
///
/// All sections are optional and have reasonable defaults. This is the
/// unvalidated form; convert it with `ConfigFile::try_from`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Package catalog for managed launches, keyed by package identifier.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageSpec>,
}

/// `[supervisor]` section, durations still as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    /// Directory that relative `--pid-file` paths are resolved against.
    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,

    /// Open-file ceiling for commands. Unset means the built-in default,
    /// capped at the worker's hard limit.
    #[serde(default)]
    pub max_open_files: Option<u64>,

    /// How long a command gets between SIGTERM and SIGKILL.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Signal delivery attempts per phase before giving up on a process.
    #[serde(default = "default_max_termination_attempts")]
    pub max_termination_attempts: u32,

    /// Also signal the command's process group once leadership is verified.
    #[serde(default = "default_true")]
    pub signal_process_group: bool,

    /// Shell started by managed launches.
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from("/var/run/cmdwarden")
}

fn default_grace_period() -> String {
    "5s".to_string()
}

fn default_poll_interval() -> String {
    "100ms".to_string()
}

fn default_max_termination_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_shell() -> String {
    "bash".to_string()
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            pid_dir: default_pid_dir(),
            max_open_files: None,
            grace_period: default_grace_period(),
            poll_interval: default_poll_interval(),
            max_termination_attempts: default_max_termination_attempts(),
            signal_process_group: default_true(),
            shell: default_shell(),
        }
    }
}

/// `[packages.<name>]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PackageSpec {
    /// Variables the package sets. Values may reference `${NAME}` from the
    /// parent environment or from packages it requires.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Directories prepended to `PATH`.
    #[serde(default)]
    pub path: Vec<String>,

    /// Packages that must be applied before this one.
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Validated supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub pid_dir: PathBuf,
    pub limits: ResourceLimits,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub max_termination_attempts: u32,
    pub signal_process_group: bool,
    pub shell: String,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            pid_dir: default_pid_dir(),
            limits: ResourceLimits::default(),
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            max_termination_attempts: default_max_termination_attempts(),
            signal_process_group: true,
            shell: default_shell(),
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub supervisor: SupervisorSettings,
    pub packages: BTreeMap<String, PackageSpec>,
}

impl ConfigFile {
    /// Assemble a config without running validation.
    pub fn new_unchecked(
        supervisor: SupervisorSettings,
        packages: BTreeMap<String, PackageSpec>,
    ) -> Self {
        Self {
            supervisor,
            packages,
        }
    }
}
