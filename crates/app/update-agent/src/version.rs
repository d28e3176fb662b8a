use std::cmp::Ordering;

use semver::Version;
use tracing::warn;

/// Parse a release version leniently: a leading `v` is ignored and missing
/// minor or patch components default to zero, so `2.1` reads as `2.1.0`.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    Some(Version::new(numbers[0], numbers[1], numbers[2]))
}

/// Whether `candidate` is strictly newer than `current`. Either side failing
/// to parse means no update.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (parse_version(candidate), parse_version(current)) {
        (Some(candidate), Some(current)) => candidate.cmp(&current) == Ordering::Greater,
        _ => {
            warn!(
                "Failed to parse versions. Remote: {}, Current: {}",
                candidate, current
            );
            false
        }
    }
}
