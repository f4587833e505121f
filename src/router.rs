//! City to database file routing.

use std::fmt;
use std::path::{Path, PathBuf};

/// File name used when every city shares one database.
pub const SHARED_DB_FILE: &str = "air_quality.db";

/// Name used when a city normalizes to nothing (e.g. `"(n/a)"`).
const EMPTY_CITY_NAME: &str = "unknown";

/// Resolved location of a database file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageTarget(PathBuf);

impl StorageTarget {
    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn into_path(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for StorageTarget {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Storage layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// One `air_quality.db` for all cities.
    #[default]
    Shared,
    /// One `air_quality_{city}.db` per city.
    PerCity,
}

impl RoutingMode {
    pub const fn from_flag(per_city: bool) -> Self {
        if per_city {
            Self::PerCity
        } else {
            Self::Shared
        }
    }
}

/// Resolve the database file for `city`. Performs no I/O.
pub fn resolve(base_dir: &Path, city: &str, mode: RoutingMode) -> StorageTarget {
    match mode {
        RoutingMode::Shared => StorageTarget(base_dir.join(SHARED_DB_FILE)),
        RoutingMode::PerCity => {
            let name = normalize_city(city);
            StorageTarget(base_dir.join(format!("air_quality_{}.db", name)))
        }
    }
}

/// Normalize a city name into a file-name-safe token.
///
/// Parenthesized text (ASCII or full-width brackets, nested included) is
/// dropped, the rest is lowercased, and every non-alphanumeric character
/// becomes `_`. The result is idempotent: `normalize_city(normalize_city(x))
/// == normalize_city(x)`.
pub fn normalize_city(city: &str) -> String {
    let stripped = strip_parenthesized(city);
    let lowered = stripped.trim().to_lowercase();

    let normalized: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();

    if normalized.is_empty() {
        EMPTY_CITY_NAME.to_string()
    } else {
        normalized
    }
}

fn strip_parenthesized(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if is_open(chars[i]) {
            if let Some(end) = matching_close(&chars, i) {
                i = end + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

fn matching_close(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, &c) in chars[open..].iter().enumerate() {
        if is_open(c) {
            depth += 1;
        } else if is_close(c) {
            depth -= 1;
            if depth == 0 {
                return Some(open + offset);
            }
        }
    }
    None
}

fn is_open(c: char) -> bool {
    matches!(c, '(' | '（')
}

fn is_close(c: char) -> bool {
    matches!(c, ')' | '）')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullwidth_parenthetical_removed() {
        let base = Path::new("/data");
        let target = resolve(base, "成都（四川）", RoutingMode::PerCity);
        assert_eq!(target.path(), Path::new("/data/air_quality_成都.db"));
        assert_eq!(resolve(base, "成都（四川）", RoutingMode::PerCity), target);
    }

    #[test]
    fn test_ascii_name_lowercased_and_joined() {
        let target = resolve(Path::new("db"), "New York", RoutingMode::PerCity);
        assert_eq!(target.path(), Path::new("db/air_quality_new_york.db"));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for city in [
            "成都（四川）",
            "New York",
            "Beijing (北京)",
            "São Paulo",
            "a(b(c)d)e",
            "half(open",
            "İstanbul",
            "(only)",
            "  Los-Angeles  ",
        ] {
            let once = normalize_city(city);
            assert_eq!(normalize_city(&once), once, "not idempotent for {:?}", city);
        }
    }

    #[test]
    fn test_nested_and_unbalanced_brackets() {
        assert_eq!(normalize_city("a(b(c)d)e"), "ae");
        assert_eq!(normalize_city("half(open"), "half_open");
        assert_eq!(normalize_city("Beijing (北京)"), "beijing");
    }

    #[test]
    fn test_empty_after_normalization() {
        assert_eq!(normalize_city("(only)"), "unknown");
        assert_eq!(normalize_city(""), "unknown");
    }

    #[test]
    fn test_shared_mode_ignores_city() {
        let base = Path::new("/var/lib/aq");
        let a = resolve(base, "北京", RoutingMode::Shared);
        let b = resolve(base, "上海", RoutingMode::Shared);
        assert_eq!(a, b);
        assert_eq!(a.path(), Path::new("/var/lib/aq/air_quality.db"));
    }

    #[test]
    fn test_per_city_mode_separates_cities() {
        let base = Path::new("/var/lib/aq");
        let a = resolve(base, "北京", RoutingMode::PerCity);
        let b = resolve(base, "上海", RoutingMode::PerCity);
        assert_ne!(a, b);
    }
}
