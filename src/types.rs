// src/types.rs

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;

/// Ordered list of runtime packages a managed launch must resolve.
///
/// Built either from a sequence of identifiers or from a single
/// whitespace-delimited string (`"maya-2024 arnold python"`). Empty entries
/// are not identifiers and are skipped; an empty list is legal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PackageList(Vec<String>);

impl PackageList {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            packages
                .into_iter()
                .map(|p| p.as_ref().trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        )
    }

    /// Split a whitespace-delimited package string.
    pub fn parse(s: &str) -> Self {
        Self::new(s.split_whitespace())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl FromStr for PackageList {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for PackageList {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<Vec<String>> for PackageList {
    fn from(packages: Vec<String>) -> Self {
        Self::new(packages)
    }
}

impl From<Vec<&str>> for PackageList {
    fn from(packages: Vec<&str>) -> Self {
        Self::new(packages)
    }
}

impl fmt::Display for PackageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// The two signal phases the terminator knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    /// SIGTERM: ask the command to shut down.
    Graceful,
    /// SIGKILL: no negotiation.
    Forceful,
}

impl TerminationSignal {
    pub fn as_signal(self) -> Signal {
        match self {
            TerminationSignal::Graceful => Signal::SIGTERM,
            TerminationSignal::Forceful => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_signal().as_str())
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_string_is_split_on_whitespace() {
        let list = PackageList::parse("  maya-2024\tarnold   python ");
        assert_eq!(list.as_slice(), ["maya-2024", "arnold", "python"]);
        assert_eq!(list.to_string(), "maya-2024 arnold python");
    }

    #[test]
    fn package_sequence_keeps_order_and_skips_blanks() {
        let list = PackageList::from(vec!["b", "", "a", "  "]);
        assert_eq!(list.as_slice(), ["b", "a"]);
        assert!(PackageList::parse("   ").is_empty());
    }

    #[test]
    fn durations_parse_with_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn durations_reject_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert!(parse_duration("9999999999999999h").is_err());
        assert!(parse_duration("999999999999999999m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn signals_display_their_os_names() {
        assert_eq!(TerminationSignal::Graceful.to_string(), "SIGTERM");
        assert_eq!(TerminationSignal::Forceful.to_string(), "SIGKILL");
    }
}
