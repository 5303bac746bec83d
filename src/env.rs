// src/env.rs

//! Environment merging for spawned commands.
//!
//! Every command sees the worker's ambient environment with the dispatcher's
//! per-command overrides layered on top. Merging never fails and never
//! touches the worker's own environment.

use std::collections::BTreeMap;
use std::fmt::Display;

/// Environment as handed to a child process.
pub type Environment = BTreeMap<String, String>;

/// Snapshot the current process environment.
///
/// Entries that are not valid UTF-8 are converted lossily rather than
/// dropped.
pub fn ambient_environment() -> Environment {
    std::env::vars_os()
        .map(|(key, value)| {
            (
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            )
        })
        .collect()
}

/// Merge `overrides` over `base`, returning a new map.
///
/// Override keys replace or insert entries. Keys and values of any
/// displayable type are converted to text.
pub fn merge_environment<I, K, V>(base: &Environment, overrides: I) -> Environment
where
    I: IntoIterator<Item = (K, V)>,
    K: Display,
    V: Display,
{
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.to_string(), value.to_string());
    }
    merged
}
