use crate::error::{LakeError, Result};
use crate::model::{BrokenDisposition, Repo, RepoId};

const SECOND: i64 = 1_000_000_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

/// Parses a human-readable retention/expiry duration into nanoseconds.
/// Accepts `0` or `-` for "never expires", an optional leading sign, then
/// any run of `<count><unit>` pairs in `y M w d` units followed optionally
/// by a plain `h`/`m`/`s` tail (e.g. `1y2M3w4d`, `-36h`, `1y8h16m`).
pub fn parse_duration(input: &str) -> Result<i64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(LakeError::InvalidDuration(input.to_string()));
    }

    let (sign, mut rest) = match s.as_bytes()[0] {
        b'-' => (-1i64, &s[1..]),
        b'+' => (1i64, &s[1..]),
        _ => (1i64, s),
    };

    if rest == "0" || rest == "-" {
        return Ok(0);
    }

    let mut total = 0i64;
    while !rest.is_empty() {
        let digit_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| LakeError::InvalidDuration(input.to_string()))?;
        if digit_end == 0 {
            return Err(LakeError::InvalidDuration(input.to_string()));
        }
        let count: i64 = rest[..digit_end]
            .parse()
            .map_err(|_| LakeError::InvalidDuration(input.to_string()))?;
        let unit = rest.as_bytes()[digit_end] as char;

        let unit_ns = match unit {
            'y' => YEAR,
            'M' => MONTH,
            'w' => WEEK,
            'd' => DAY,
            _ => {
                total += parse_hms_tail(rest, input)?;
                break;
            }
        };
        total += count * unit_ns;
        rest = &rest[digit_end + 1..];
    }

    Ok(sign * total)
}

/// Parses a plain `h`/`m`/`s` tail (e.g. `8h16m`, `30s`): any number of
/// `<count><unit>` runs with no separators, unit one of `h`, `m`, `s`.
fn parse_hms_tail(s: &str, original: &str) -> Result<i64> {
    let mut total = 0i64;
    let mut rest = s;
    while !rest.is_empty() {
        let digit_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| LakeError::InvalidDuration(original.to_string()))?;
        if digit_end == 0 {
            return Err(LakeError::InvalidDuration(original.to_string()));
        }
        let count: i64 = rest[..digit_end]
            .parse()
            .map_err(|_| LakeError::InvalidDuration(original.to_string()))?;
        let unit_ns = match rest.as_bytes()[digit_end] as char {
            'h' => HOUR,
            'm' => MINUTE,
            's' => SECOND,
            _ => return Err(LakeError::InvalidDuration(original.to_string())),
        };
        total += count * unit_ns;
        rest = &rest[digit_end + 1..];
    }
    Ok(total)
}

/// Formats nanoseconds back into the `y M w d h m s` notation. `0` formats
/// as `-` ("never"), matching [`parse_duration`]'s treatment of the same.
pub fn format_duration(ns: i64) -> String {
    if ns == 0 {
        return "-".to_string();
    }

    let sign = if ns < 0 { "-" } else { "" };
    let mut total_seconds = ns.unsigned_abs() as i64 / SECOND;

    let mut hours = total_seconds / 3600;
    total_seconds %= 3600;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    let years = hours / (365 * 24);
    hours %= 365 * 24;
    if years != 0 {
        out.push_str(&format!("{years}y"));
    }
    let months = hours / (30 * 24);
    hours %= 30 * 24;
    if months != 0 {
        out.push_str(&format!("{months}M"));
    }
    let weeks = hours / (7 * 24);
    hours %= 7 * 24;
    if weeks != 0 {
        out.push_str(&format!("{weeks}w"));
    }
    if hours != 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes != 0 || seconds != 0 {
        out.push_str(&format!("{minutes}m{seconds}s"));
    }

    format!("{sign}{out}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_dash_mean_never() {
        assert_eq!(parse_duration("0").unwrap(), 0);
        assert_eq!(parse_duration("-").unwrap(), 0);
        assert_eq!(format_duration(0), "-");
    }

    #[test]
    fn round_trip_simple_units() {
        for input in ["1h", "24h", "1d", "1w", "1M", "1y"] {
            let ns = parse_duration(input).unwrap();
            let formatted = format_duration(ns);
            assert_eq!(parse_duration(&formatted).unwrap(), ns, "input={input}");
        }
    }

    #[test]
    fn round_trip_composite_units() {
        for input in ["1y2M3w4d", "1y8h16m"] {
            let ns = parse_duration(input).unwrap();
            let formatted = format_duration(ns);
            assert_eq!(parse_duration(&formatted).unwrap(), ns, "input={input}");
        }
    }

    #[test]
    fn negative_sign_is_preserved() {
        let ns = parse_duration("-36h").unwrap();
        assert_eq!(ns, -36 * HOUR);
        assert_eq!(parse_duration(&format_duration(ns)).unwrap(), ns);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5x").is_err());
    }
}

/// The consumed interface for a repo mapping: a single config-key's
/// worth of already macro-expanded, de-duplicated fields. Loading the YAML
/// file itself (template expansion, `${REPO_ID}` macro substitution,
/// skipping `_`-prefixed keys and storage-less repos) is out of scope for
/// this crate; callers construct one `RepoSpec` per retained config-key and
/// hand it to [`RepoSpec::into_repo`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct RepoSpec {
    pub repo_id: String,
    pub name: String,
    pub description: String,
    /// Empty means a read-only repo: no watcher is attached for it.
    pub input: String,
    pub storage: String,
    /// Compact human duration (`parse_duration` grammar). Empty or `"0"`/
    /// `"-"` means "never expires".
    pub retention: String,
    /// `""` (keep), `"/dev/null"` (delete), or an absolute directory to
    /// move broken artifacts into.
    pub broken: String,
}

impl RepoSpec {
    /// Validates and converts into a freshly-created [`Repo`] (`size` and
    /// `artifacts_count` start at zero). Does
    /// not check for collisions against other repos — that is
    /// [`Repo::conflicts_with`], applied by the index's registration path
    /// across the whole repo set.
    pub fn into_repo(self) -> Result<Repo> {
        let retention_input = if self.retention.is_empty() {
            "0"
        } else {
            &self.retention
        };
        let retention_ns = parse_duration(retention_input)?;
        let retention_secs = retention_ns / SECOND;

        let repo = Repo {
            repo_id: RepoId::try_from(self.repo_id)?,
            name: self.name,
            description: self.description,
            input: self.input,
            storage: self.storage,
            retention_secs,
            broken: BrokenDisposition::parse(&self.broken)?,
            size: 0,
            artifacts_count: 0,
            artifacts: Vec::new(),
        };
        repo.validate()?;
        Ok(repo)
    }
}

#[cfg(test)]
mod repo_spec_tests {
    use super::*;

    fn spec(repo_id: &str, input: &str, storage: &str, retention: &str) -> RepoSpec {
        RepoSpec {
            repo_id: repo_id.to_string(),
            name: repo_id.to_string(),
            description: String::new(),
            input: input.to_string(),
            storage: storage.to_string(),
            retention: retention.to_string(),
            broken: String::new(),
        }
    }

    #[test]
    fn converts_retention_from_duration_to_seconds() {
        let repo = spec("r2", "/in/r2", "/st/r2", "24h").into_repo().unwrap();
        assert_eq!(repo.retention_secs, 24 * 3600);
    }

    #[test]
    fn empty_retention_never_expires() {
        let repo = spec("r2", "/in/r2", "/st/r2", "").into_repo().unwrap();
        assert_eq!(repo.retention_secs, 0);
    }

    #[test]
    fn read_only_repo_allows_empty_input() {
        let repo = spec("ro", "", "/st/ro", "").into_repo().unwrap();
        assert!(repo.input.is_empty());
    }

    #[test]
    fn rejects_relative_storage() {
        let repo = spec("bad", "/in/bad", "relative/path", "");
        assert!(repo.into_repo().is_err());
    }
}
