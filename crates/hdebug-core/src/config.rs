//! Debug-layer settings.
//!
//! Read once from the `HDEBUG_*` environment. Values that are set but do not
//! parse are logged and replaced by their defaults.

use std::fmt;
use std::str::FromStr;

use crate::table::DEFAULT_CLOSED_QUEUE_MAX;

pub const ENV_SINGLETON: &str = "HDEBUG_SINGLETON";
pub const ENV_CLOSED_QUEUE_MAX: &str = "HDEBUG_CLOSED_QUEUE_MAX";
pub const ENV_ON_INVALID: &str = "HDEBUG_ON_INVALID";
pub const ENV_DIAG_MAX: &str = "HDEBUG_DIAG_MAX";

pub const DEFAULT_DIAG_MAX: usize = 4096;

/// How many debug contexts a registry may hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BindPolicy {
    /// One universal context per process; binding a second one is a
    /// configuration error.
    #[default]
    Singleton,
    /// One debug context per universal context.
    PerContext,
}

/// What the C surface does when a lifecycle check fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InvalidHandlePolicy {
    /// Print the diagnostic and abort the process.
    #[default]
    Abort,
    /// Record the error and return a failure value to the caller.
    Report,
}

impl InvalidHandlePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidHandlePolicy::Abort => "abort",
            InvalidHandlePolicy::Report => "report",
        }
    }
}

impl fmt::Display for InvalidHandlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidHandlePolicyParseError {
    value: String,
}

impl fmt::Display for InvalidHandlePolicyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid handle policy {:?} (expected one of: abort, report)",
            self.value
        )
    }
}

impl std::error::Error for InvalidHandlePolicyParseError {}

impl FromStr for InvalidHandlePolicy {
    type Err = InvalidHandlePolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "abort" => Ok(InvalidHandlePolicy::Abort),
            "report" | "error" => Ok(InvalidHandlePolicy::Report),
            _ => Err(InvalidHandlePolicyParseError { value: s }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugConfig {
    pub bind_policy: BindPolicy,
    pub closed_queue_max: usize,
    pub on_invalid: InvalidHandlePolicy,
    pub diag_max: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            bind_policy: BindPolicy::Singleton,
            closed_queue_max: DEFAULT_CLOSED_QUEUE_MAX,
            on_invalid: InvalidHandlePolicy::Abort,
            diag_max: DEFAULT_DIAG_MAX,
        }
    }
}

impl DebugConfig {
    /// Reads the `HDEBUG_*` environment. Unset or unparsable values keep
    /// their defaults.
    pub fn from_env() -> Self {
        DebugConfig::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let (config, rejected) = DebugConfig::parse_lookup(get);
        for (name, raw) in rejected {
            tracing::warn!(value = %raw, "ignoring {name}; using the default");
        }
        config
    }

    /// Returns the config plus every variable that was set but unusable.
    fn parse_lookup(
        get: impl Fn(&str) -> Option<String>,
    ) -> (Self, Vec<(&'static str, String)>) {
        let defaults = DebugConfig::default();
        let mut rejected = Vec::new();
        let read = |name: &'static str| get(name).map(|raw| (name, raw));

        let singleton = env_value(read(ENV_SINGLETON), &mut rejected, |r| parse_bool(Some(r)))
            .unwrap_or(true);
        let closed_queue_max = env_value(read(ENV_CLOSED_QUEUE_MAX), &mut rejected, |r| {
            parse_usize_nonzero(Some(r))
        })
        .unwrap_or(defaults.closed_queue_max);
        let on_invalid = env_value(read(ENV_ON_INVALID), &mut rejected, |r| {
            r.parse::<InvalidHandlePolicy>().ok()
        })
        .unwrap_or(defaults.on_invalid);
        let diag_max = env_value(read(ENV_DIAG_MAX), &mut rejected, |r| {
            parse_usize_nonzero(Some(r))
        })
        .unwrap_or(defaults.diag_max);

        let config = DebugConfig {
            bind_policy: if singleton {
                BindPolicy::Singleton
            } else {
                BindPolicy::PerContext
            },
            closed_queue_max,
            on_invalid,
            diag_max,
        };
        (config, rejected)
    }
}

/// Parses a set variable, remembering it in `rejected` when it does not parse.
fn env_value<T>(
    var: Option<(&'static str, String)>,
    rejected: &mut Vec<(&'static str, String)>,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let (name, raw) = var?;
    let v = parse(&raw);
    if v.is_none() {
        rejected.push((name, raw));
    }
    v
}

fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw?.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn parse_usize_nonzero(raw: Option<&str>) -> Option<usize> {
    raw?.trim().parse::<usize>().ok().filter(|&v| v != 0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> DebugConfig {
        let env: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DebugConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn empty_env_gives_defaults() {
        assert_eq!(config_from(&[]), DebugConfig::default());
    }

    #[test]
    fn env_overrides_are_applied() {
        let cfg = config_from(&[
            (ENV_SINGLETON, "0"),
            (ENV_CLOSED_QUEUE_MAX, "16"),
            (ENV_ON_INVALID, "Report"),
            (ENV_DIAG_MAX, "8"),
        ]);
        assert_eq!(cfg.bind_policy, BindPolicy::PerContext);
        assert_eq!(cfg.closed_queue_max, 16);
        assert_eq!(cfg.on_invalid, InvalidHandlePolicy::Report);
        assert_eq!(cfg.diag_max, 8);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config_from(&[
            (ENV_SINGLETON, "maybe"),
            (ENV_CLOSED_QUEUE_MAX, "0"),
            (ENV_ON_INVALID, "explode"),
        ]);
        assert_eq!(cfg, DebugConfig::default());
    }

    #[test]
    fn every_bad_value_is_reported() {
        let env: BTreeMap<&str, &str> = [
            (ENV_SINGLETON, "maybe"),
            (ENV_CLOSED_QUEUE_MAX, "0"),
            (ENV_ON_INVALID, "explode"),
            (ENV_DIAG_MAX, "lots"),
        ]
        .into_iter()
        .collect();
        let (cfg, rejected) =
            DebugConfig::parse_lookup(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(cfg, DebugConfig::default());
        let names: Vec<_> = rejected.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![ENV_SINGLETON, ENV_CLOSED_QUEUE_MAX, ENV_ON_INVALID, ENV_DIAG_MAX]
        );
        assert_eq!(rejected[3].1, "lots");

        let (_, rejected) = DebugConfig::parse_lookup(|name| {
            (name == ENV_DIAG_MAX).then(|| "32".to_string())
        });
        assert!(rejected.is_empty());
    }

    #[test]
    fn parse_policy_from_str() {
        assert_eq!(
            InvalidHandlePolicy::from_str("abort").unwrap(),
            InvalidHandlePolicy::Abort
        );
        assert_eq!(
            InvalidHandlePolicy::from_str(" error ").unwrap(),
            InvalidHandlePolicy::Report
        );
        assert!(InvalidHandlePolicy::from_str("wat").is_err());
    }
}
