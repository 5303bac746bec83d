// src/resolve/mod.rs

//! Environment resolution for managed launches.
//!
//! The resolver turns a [`PackageList`] into a [`ResolvedContext`]: the
//! ordered environment contributions of every package plus the shell to
//! start. The resolution engine itself is a black box behind
//! [`EnvironmentResolver`]; [`CatalogResolver`] is the config-driven one the
//! crate ships.

pub mod catalog;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tokio::process::Command;

use crate::env::Environment;
use crate::errors::ResolutionError;
use crate::types::PackageList;

pub use catalog::CatalogResolver;

/// Exported into every managed command so it can tell which packages it
/// runs under.
pub const RESOLVED_PACKAGES_VAR: &str = "CMDWARDEN_RESOLVED_PACKAGES";

static VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable reference regex is valid")
});

pub trait EnvironmentResolver: Send + Sync + Debug {
    /// Drop cached resolutions so the next `resolve` sees current package
    /// definitions. Best effort.
    fn invalidate_caches(&self);

    /// Solve `packages` completely or fail; never a partial context.
    fn resolve(&self, packages: &PackageList) -> Result<ResolvedContext, ResolutionError>;
}

/// One package's contribution to the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayer {
    pub name: String,
    /// Variables to set. Values may reference `${NAME}`.
    pub env: BTreeMap<String, String>,
    /// Entries prepended to `PATH`, in order.
    pub path: Vec<String>,
}

/// A fully solved runtime context, layers ordered dependencies first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    shell: String,
    layers: Vec<PackageLayer>,
}

impl ResolvedContext {
    pub fn new(shell: impl Into<String>, layers: Vec<PackageLayer>) -> Self {
        Self {
            shell: shell.into(),
            layers,
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn layers(&self) -> &[PackageLayer] {
        &self.layers
    }

    /// Resolved package names in application order.
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.name.as_str())
    }

    /// Apply every layer on top of `parent`.
    ///
    /// References resolve against the environment built so far, so a package
    /// sees its dependencies' variables. Unset references expand to nothing.
    pub fn environment(&self, parent: &Environment) -> Environment {
        let mut env = parent.clone();

        for layer in &self.layers {
            for (key, value) in &layer.env {
                let expanded = interpolate(value, &env);
                env.insert(key.clone(), expanded);
            }

            if !layer.path.is_empty() {
                let mut entries: Vec<String> =
                    layer.path.iter().map(|p| interpolate(p, &env)).collect();
                if let Some(existing) = env.get("PATH").filter(|p| !p.is_empty()) {
                    entries.push(existing.clone());
                }
                env.insert("PATH".to_string(), entries.join(":"));
            }
        }

        let names: Vec<&str> = self.packages().collect();
        env.insert(RESOLVED_PACKAGES_VAR.to_string(), names.join(" "));
        env
    }

    /// Command that runs `args` inside this context.
    ///
    /// The shell `exec`s the quoted arguments so the spawned pid ends up
    /// being the command itself.
    pub fn shell_command(&self, args: &[String], parent: &Environment) -> Command {
        let quoted: Vec<String> = args
            .iter()
            .map(|a| shell_escape::unix::escape(Cow::Borrowed(a.as_str())).into_owned())
            .collect();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(format!("exec {}", quoted.join(" ")))
            .env_clear()
            .envs(self.environment(parent));
        cmd
    }
}

fn interpolate(value: &str, env: &Environment) -> String {
    VAR_REFERENCE
        .replace_all(value, |caps: &Captures<'_>| {
            env.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
