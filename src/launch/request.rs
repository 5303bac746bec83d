// src/launch/request.rs

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::types::PackageList;

/// Everything needed to launch one command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    args: Vec<String>,
    env: BTreeMap<String, String>,
    log_sink: PathBuf,
    pid_file: PathBuf,
    packages: Option<PackageList>,
}

impl SpawnRequest {
    pub fn builder(pid_file: impl Into<PathBuf>, log_sink: impl Into<PathBuf>) -> SpawnRequestBuilder {
        SpawnRequestBuilder {
            request: SpawnRequest {
                args: Vec::new(),
                env: BTreeMap::new(),
                log_sink: log_sink.into(),
                pid_file: pid_file.into(),
                packages: None,
            },
        }
    }

    /// Program followed by its arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn program(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Per-command overrides merged over the ambient environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn log_sink(&self) -> &Path {
        &self.log_sink
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Set when the command must run inside a resolved package context.
    pub fn packages(&self) -> Option<&PackageList> {
        self.packages.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRequestBuilder {
    request: SpawnRequest,
}

impl SpawnRequestBuilder {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.request.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Values of any displayable type are converted to text.
    pub fn env(mut self, key: impl Display, value: impl Display) -> Self {
        self.request.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        self.request
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// Run under a resolved package context. An empty list still selects the
    /// managed launch path.
    pub fn packages(mut self, packages: impl Into<PackageList>) -> Self {
        self.request.packages = Some(packages.into());
        self
    }

    pub fn build(self) -> SpawnRequest {
        self.request
    }
}
