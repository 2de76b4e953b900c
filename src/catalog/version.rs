// xtrabackup-assistant/src/catalog/version.rs
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A vendor version such as `8.0.35-27`: dotted release numbers plus an
/// optional build suffix after the first `-`.
#[derive(Debug, Clone)]
pub struct ToolVersion {
    release: Vec<u64>,
    build: Option<u64>,
}

impl ToolVersion {
    pub fn new(release: Vec<u64>, build: Option<u64>) -> Self {
        ToolVersion { release, build }
    }

    pub fn major(&self) -> u64 {
        self.release.first().copied().unwrap_or(0)
    }

    pub fn minor(&self) -> u64 {
        self.release.get(1).copied().unwrap_or(0)
    }

    fn part(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for ToolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (release_part, build_part) = match s.split_once('-') {
            Some((release, build)) => (release, Some(build)),
            None => (s, None),
        };

        if release_part.is_empty() {
            return Err(format!("empty version string '{}'", s));
        }

        let release = release_part
            .split('.')
            .map(|n| n.parse::<u64>().map_err(|_| format!("invalid release number '{}' in '{}'", n, s)))
            .collect::<Result<Vec<_>, _>>()?;

        let build = match build_part {
            Some(b) => Some(
                b.parse::<u64>()
                    .map_err(|_| format!("invalid build number '{}' in '{}'", b, s))?,
            ),
            None => None,
        };

        Ok(ToolVersion { release, build })
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            match self.part(i).cmp(&other.part(i)) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        // None < Some(_): a build suffix is a later revision of the same release
        self.build.cmp(&other.build)
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ToolVersion {}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", release.join("."))?;
        if let Some(build) = self.build {
            write!(f, "-{}", build)?;
        }
        Ok(())
    }
}
