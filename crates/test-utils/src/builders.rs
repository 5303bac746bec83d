#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cmdwarden::config::{ConfigFile, PackageSpec, RawConfigFile, SupervisorSettings};
use cmdwarden::limits::ResourceLimits;
use cmdwarden::resolve::CatalogResolver;
use cmdwarden::supervisor::Supervisor;

use crate::fake_process_table::FakeProcessTable;
use crate::recording_reporter::RecordingReporter;

/// Open-file ceiling used by tests; low enough to sit under any hard limit.
pub const TEST_MAX_OPEN_FILES: u64 = 256;

/// Settings with short timings so escalation tests finish quickly.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        limits: ResourceLimits::new(TEST_MAX_OPEN_FILES),
        grace_period: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        max_termination_attempts: 2,
        shell: "sh".to_string(),
        ..SupervisorSettings::default()
    }
}

/// Supervisor over a fake process table, reporting into `reporter`.
pub fn fake_supervisor(
    settings: SupervisorSettings,
    table: &FakeProcessTable,
    reporter: &RecordingReporter,
) -> Supervisor {
    Supervisor::new(settings, Arc::new(CatalogResolver::default()))
        .with_process_table(Arc::new(table.clone()))
        .with_reporter(Arc::new(reporter.clone()))
}

/// Supervisor over the real process table with the given config.
pub fn real_supervisor(cfg: &ConfigFile, reporter: &RecordingReporter) -> Supervisor {
    Supervisor::from_config(cfg).with_reporter(Arc::new(reporter.clone()))
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    settings: SupervisorSettings,
    packages: BTreeMap<String, PackageSpec>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            settings: fast_settings(),
            packages: BTreeMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_package(mut self, name: &str, package: PackageSpec) -> Self {
        self.packages.insert(name.to_string(), package);
        self
    }

    /// Package graph is validated the same way a loaded file would be.
    pub fn build(self) -> ConfigFile {
        let raw = RawConfigFile {
            packages: self.packages,
            ..RawConfigFile::default()
        };
        let checked = ConfigFile::try_from(raw).expect("Failed to build valid config from builder");
        ConfigFile::new_unchecked(self.settings, checked.packages)
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `PackageSpec`.
pub struct PackageSpecBuilder {
    package: PackageSpec,
}

impl PackageSpecBuilder {
    pub fn new() -> Self {
        Self {
            package: PackageSpec::default(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.package.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn path(mut self, entry: &str) -> Self {
        self.package.path.push(entry.to_string());
        self
    }

    pub fn requires(mut self, dep: &str) -> Self {
        self.package.requires.push(dep.to_string());
        self
    }

    pub fn build(self) -> PackageSpec {
        self.package
    }
}

impl Default for PackageSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}
