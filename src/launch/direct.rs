// src/launch/direct.rs

use tokio::process::Command;
use tracing::debug;

use crate::env::merge_environment;
use crate::errors::LaunchError;
use crate::process::CommandProcessHandle;

use super::{LaunchContext, LaunchStrategy, SpawnRequest, spawn_supervised, validate_arguments};

/// Executes the program directly with the merged environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLaunch;

impl LaunchStrategy for DirectLaunch {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn launch(
        &self,
        request: &SpawnRequest,
        ctx: &LaunchContext<'_>,
    ) -> Result<CommandProcessHandle, LaunchError> {
        validate_arguments(request)?;

        let env = merge_environment(ctx.ambient, request.env());
        let args = request.args();
        debug!(program = %args[0], overrides = request.env().len(), "direct launch");

        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]).env_clear().envs(&env);

        spawn_supervised(cmd, request, ctx)
    }
}
