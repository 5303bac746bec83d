// src/launch/managed.rs

use std::sync::Arc;

use tracing::{debug, warn};

use crate::env::merge_environment;
use crate::errors::LaunchError;
use crate::process::CommandProcessHandle;
use crate::resolve::EnvironmentResolver;
use crate::types::PackageList;

use super::{LaunchContext, LaunchStrategy, SpawnRequest, spawn_supervised, validate_arguments};

/// Executes the command inside a shell started by a resolved package
/// context.
///
/// Resolution happens before anything is spawned; a list that does not
/// fully resolve never reaches exec.
#[derive(Debug, Clone)]
pub struct ManagedEnvironmentLaunch {
    resolver: Arc<dyn EnvironmentResolver>,
}

impl ManagedEnvironmentLaunch {
    pub fn new(resolver: Arc<dyn EnvironmentResolver>) -> Self {
        Self { resolver }
    }
}

impl LaunchStrategy for ManagedEnvironmentLaunch {
    fn name(&self) -> &'static str {
        "managed"
    }

    fn launch(
        &self,
        request: &SpawnRequest,
        ctx: &LaunchContext<'_>,
    ) -> Result<CommandProcessHandle, LaunchError> {
        validate_arguments(request)?;

        let empty = PackageList::default();
        let packages = request.packages().unwrap_or(&empty);
        if packages.is_empty() {
            warn!(
                pid_file = %request.pid_file().display(),
                "managed launch with an empty package list"
            );
        }

        self.resolver.invalidate_caches();
        let context = self
            .resolver
            .resolve(packages)
            .map_err(|diagnostics| LaunchError::Resolution {
                packages: packages.to_string(),
                diagnostics,
            })?;

        debug!(
            %packages,
            resolved = ?context.packages().collect::<Vec<_>>(),
            shell = context.shell(),
            "managed launch"
        );

        let parent = merge_environment(ctx.ambient, request.env());
        let cmd = context.shell_command(request.args(), &parent);

        spawn_supervised(cmd, request, ctx)
    }
}
