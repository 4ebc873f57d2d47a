use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// Loosely-typed Maven version, ordered numerically part by part.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Version(String);

impl Version {
    pub fn new(v: &str) -> Self {
        Version(v.to_string())
    }

    fn split_parts(s: &str) -> Vec<Part> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut current_numeric = false;

        for c in s.chars() {
            if c == '.' || c == '-' || c == '_' {
                push_part(&mut parts, &mut current, current_numeric);
                continue;
            }
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != current_numeric {
                push_part(&mut parts, &mut current, current_numeric);
            }
            current_numeric = is_digit;
            current.push(c);
        }
        push_part(&mut parts, &mut current, current_numeric);

        parts
    }
}

fn push_part(parts: &mut Vec<Part>, current: &mut String, numeric: bool) {
    if current.is_empty() {
        return;
    }
    if numeric {
        parts.push(Part::Numeric(current.parse().unwrap_or(0)));
    } else {
        parts.push(Part::String(current.to_lowercase()));
    }
    current.clear();
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Part {
    Numeric(u64),
    String(String),
}

/// `1.0-rc1` -> (`1.0`, Some(`rc1`))
fn split_qualifier(version: &str) -> (&str, Option<&str>) {
    match version.split_once('-') {
        Some((base, qualifier)) => (base, Some(qualifier)),
        None => (version, None),
    }
}

/// Part by part, then the longer list wins.
fn cmp_parts(a: &[Part], b: &[Part]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.cmp(y))
        .find(|ord| ord.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_base, a_qualifier) = split_qualifier(&self.0);
        let (b_base, b_qualifier) = split_qualifier(&other.0);

        cmp_parts(&Self::split_parts(a_base), &Self::split_parts(b_base)).then_with(|| {
            // A qualified build sorts before its release: 1.0-rc1 < 1.0
            match (a_qualifier, b_qualifier) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => cmp_parts(&Self::split_parts(a), &Self::split_parts(b)),
            }
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    Version::new(a).cmp(&Version::new(b))
}

fn pre_release_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)([.-](snapshot|alpha|beta|rc|cr|m|pre|preview|ea)[.-]?\d*)$|-snapshot")
                .ok()
        })
        .as_ref()
}

/// Release versions only: no SNAPSHOT, alpha, beta, RC or milestone builds.
pub fn is_stable(version: &str) -> bool {
    !pre_release_pattern().is_some_and(|re| re.is_match(version))
}

/// Highest stable version in the list.
pub fn latest_stable<'a, I>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    versions
        .into_iter()
        .filter(|v| is_stable(v))
        .max_by(|a, b| compare_versions(a, b))
        .cloned()
}

/// `0.24.3` -> `0.24`, used to index the plugins directory.
pub fn major_minor(version: &str) -> Option<String> {
    let mut parts = version.split('.');
    let major = parts.next().filter(|p| !p.is_empty())?;
    let minor = parts.next()?;
    let minor: String = minor.chars().take_while(|c| c.is_ascii_digit()).collect();
    if minor.is_empty() {
        return None;
    }
    Some(format!("{}.{}", major, minor))
}
