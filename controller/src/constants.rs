use crate::error::{self, Result};
use snafu::OptionExt;
use std::time::Duration;

const UNITS: [(char, u64); 3] = [('d', 86400), ('h', 3600), ('m', 60)];

/// How many times object creation is attempted before the deploy is considered failed.
pub(crate) const CREATE_ATTEMPTS: u32 = 3;

/// The delay before the first creation retry. It doubles with each further attempt.
pub(crate) const CREATE_BACKOFF: Duration = Duration::from_millis(500);

/// How often the readiness gate checks a layer's workloads.
pub(crate) const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Init containers use this image to block until a pod is ready or a job has completed.
pub(crate) const WAIT_FOR_IMAGE: &str = "ghcr.io/groundnuty/k8s-wait-for:v2.0";

/// The role, created in every test namespace, that lets init containers watch pods and jobs.
pub(crate) const WAIT_FOR_ROLE: &str = "k8s-wait-for";

/// The results uploader sidecar's image, relative to the registry.
pub(crate) const UPLOADER_IMAGE: &str = "starbug:latest";

/// Parse a duration string like `1d2h3m4s` into a `Duration`. Units must appear in that order, any
/// of them may be left out, and a bare number is a count of seconds.
pub(crate) fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| error::DurationSnafu {
        input,
        reason: reason.to_string(),
    };
    let mut secs: u64 = 0;
    let mut duration_string = input;
    for unit in UNITS {
        let mut split = duration_string.splitn(2, unit.0);
        let head = split.next().context(invalid("empty input"))?;
        if let Some(rest) = split.next() {
            let value = head
                .parse::<u64>()
                .ok()
                .context(invalid(&format!("'{}' is not a number of '{}'", head, unit.0)))?;
            secs = value
                .checked_mul(unit.1)
                .and_then(|unit_secs| secs.checked_add(unit_secs))
                .context(invalid("too large"))?;
            duration_string = rest;
        }
    }
    let seconds = duration_string
        .strip_suffix('s')
        .unwrap_or(duration_string);
    if !seconds.is_empty() {
        let value = seconds
            .parse::<u64>()
            .ok()
            .context(invalid(&format!("'{}' is not a number of seconds", seconds)))?;
        secs = secs.checked_add(value).context(invalid("too large"))?;
    }
    Ok(Duration::from_secs(secs))
}

#[test]
fn all_units() {
    let input = "1d2h3m4s";
    assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(93784))
}

#[test]
fn some_units() {
    let input = "1d3m4s";
    assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(86584))
}

#[test]
fn only_seconds() {
    let input = "500s";
    assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(500))
}

#[test]
fn no_seconds() {
    let input = "1h5m";
    assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(3900))
}

#[test]
fn one_unit() {
    let input = "10m";
    assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(600))
}

#[test]
fn no_units() {
    let input = "5123";
    assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(5123))
}

#[test]
fn wrong_order() {
    let input = "10d5m3h2s";
    assert!(parse_duration(input).is_err())
}

#[test]
fn invalid_unit() {
    let input = "5y40s";
    assert!(parse_duration(input).is_err())
}

#[test]
fn missing_value() {
    let input = "5hm4s";
    assert!(parse_duration(input).is_err())
}

#[test]
fn overflow_is_an_error() {
    assert!(parse_duration("213503982334602d").is_err());
    assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
    assert!(parse_duration(&format!("1m{}", u64::MAX)).is_err());
    assert_eq!(
        parse_duration(&u64::MAX.to_string()).unwrap(),
        Duration::from_secs(u64::MAX)
    );
}
