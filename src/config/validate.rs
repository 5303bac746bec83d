// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, SupervisorSection, SupervisorSettings};
use crate::errors::{Result, SupervisorError};
use crate::limits::ResourceLimits;
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SupervisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let settings = validate_supervisor(&raw.supervisor)?;
        validate_package_requirements(&raw)?;
        validate_package_graph(&raw)?;
        Ok(ConfigFile::new_unchecked(settings, raw.packages))
    }
}

fn config_error(msg: impl Into<String>) -> SupervisorError {
    SupervisorError::ConfigError(msg.into())
}

fn validate_supervisor(section: &SupervisorSection) -> Result<SupervisorSettings> {
    if section.max_open_files == Some(0) {
        return Err(config_error(
            "[supervisor].max_open_files must be >= 1 (got 0)",
        ));
    }

    if section.max_termination_attempts == 0 {
        return Err(config_error(
            "[supervisor].max_termination_attempts must be >= 1 (got 0)",
        ));
    }

    if section.shell.trim().is_empty() {
        return Err(config_error("[supervisor].shell must not be empty"));
    }

    let grace_period = parse_duration(&section.grace_period)
        .map_err(|e| config_error(format!("[supervisor].grace_period: {e}")))?;

    let poll_interval = parse_duration(&section.poll_interval)
        .map_err(|e| config_error(format!("[supervisor].poll_interval: {e}")))?;
    if poll_interval.is_zero() {
        return Err(config_error("[supervisor].poll_interval must be non-zero"));
    }

    Ok(SupervisorSettings {
        pid_dir: section.pid_dir.clone(),
        limits: section
            .max_open_files
            .map_or_else(ResourceLimits::default, ResourceLimits::new),
        grace_period,
        poll_interval,
        max_termination_attempts: section.max_termination_attempts,
        signal_process_group: section.signal_process_group,
        shell: section.shell.clone(),
    })
}

fn validate_package_requirements(cfg: &RawConfigFile) -> Result<()> {
    for (name, package) in cfg.packages.iter() {
        for dep in package.requires.iter() {
            if dep == name {
                return Err(config_error(format!(
                    "package '{name}' cannot require itself"
                )));
            }
            if !cfg.packages.contains_key(dep) {
                return Err(config_error(format!(
                    "package '{name}' requires unknown package '{dep}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_package_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.packages.keys() {
        graph.add_node(name.as_str());
    }

    for (name, package) in cfg.packages.iter() {
        for dep in package.requires.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(config_error(format!(
            "dependency cycle in [packages] involving '{}'",
            cycle.node_id()
        ))),
    }
}
