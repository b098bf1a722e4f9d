use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;

/// Where a repository's block cache lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheType {
    /// Process memory only; nothing survives a close.
    Mem,
    /// Mirrored into the bridge's key-value store across open/close cycles.
    #[default]
    Persistent,
}

impl CacheType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mem => "mem",
            Self::Persistent => "persistent",
        }
    }
}

impl FromStr for CacheType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mem" => Ok(Self::Mem),
            // "browser" and "file" are historical spellings.
            "persistent" | "browser" | "file" => Ok(Self::Persistent),
            other => Err(TypeError::InvalidOption {
                key: "cache_type".into(),
                reason: format!("unknown cache type '{other}'"),
            }),
        }
    }
}

/// A parsed repository URI: `scheme://accessKey@repoId[?opt=val&...]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoUri {
    raw: String,
    scheme: String,
    access_key: String,
    repo_id: String,
    cache_type: CacheType,
    cache_size_mib: Option<u64>,
}

impl RepoUri {
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| TypeError::InvalidUri(format!("missing scheme in '{raw}'")))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TypeError::InvalidUri(format!("bad scheme '{scheme}'")));
        }

        let (location, query) = match rest.split_once('?') {
            Some((loc, q)) => (loc, Some(q)),
            None => (rest, None),
        };

        let (access_key, repo_id) = location
            .split_once('@')
            .ok_or_else(|| TypeError::InvalidUri(format!("missing '@' in '{raw}'")))?;
        check_ident("access key", access_key)?;
        check_ident("repo id", repo_id)?;

        let mut cache_type = CacheType::default();
        let mut cache_size_mib = None;
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "cache_type" => cache_type = value.parse()?,
                "cache_size" => {
                    let size = value.parse::<u64>().map_err(|_| TypeError::InvalidOption {
                        key: "cache_size".into(),
                        reason: format!("'{value}' is not an unsigned integer"),
                    })?;
                    cache_size_mib = Some(size);
                }
                _ => {}
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_string(),
            access_key: access_key.to_string(),
            repo_id: repo_id.to_string(),
            cache_type,
            cache_size_mib,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    /// Store sizing hint in MiB, if the URI gave one.
    pub fn cache_size_mib(&self) -> Option<u64> {
        self.cache_size_mib
    }

    /// Identity of the repository's persistent cache store.
    pub fn store_id(&self) -> &str {
        &self.repo_id
    }
}

fn check_ident(what: &str, s: &str) -> Result<(), TypeError> {
    if s.is_empty() {
        return Err(TypeError::InvalidUri(format!("empty {what}")));
    }
    if let Some(bad) = s.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
        return Err(TypeError::InvalidUri(format!("invalid character {bad:?} in {what}")));
    }
    Ok(())
}

impl FromStr for RepoUri {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepoUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_plain() {
        let uri = RepoUri::parse("mem://key_1@repo-a").unwrap();
        assert_eq!(uri.scheme(), "mem");
        assert_eq!(uri.access_key(), "key_1");
        assert_eq!(uri.repo_id(), "repo-a");
        assert_eq!(uri.store_id(), "repo-a");
        assert_eq!(uri.cache_type(), CacheType::Persistent);
        assert_eq!(uri.cache_size_mib(), None);
        assert_eq!(uri.to_string(), "mem://key_1@repo-a");
    }

    #[test]
    fn parse_query_options() {
        let uri: RepoUri = "mem://k@r?cache_type=mem&cache_size=16&colour=blue".parse().unwrap();
        assert_eq!(uri.cache_type(), CacheType::Mem);
        assert_eq!(uri.cache_size_mib(), Some(16));
    }

    #[test]
    fn cache_type_aliases() {
        for alias in ["browser", "file", "persistent"] {
            let uri = RepoUri::parse(&format!("mem://k@r?cache_type={alias}")).unwrap();
            assert_eq!(uri.cache_type(), CacheType::Persistent);
        }
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "k@r",
            "://k@r",
            "mem://kr",
            "mem://@r",
            "mem://k@",
            "mem://k.x@r",
            "mem://k@r/x",
            "mem://k@r?cache_type=disk",
            "mem://k@r?cache_size=big",
            "mem://k@r?cache_size=-1",
        ] {
            assert!(RepoUri::parse(bad).is_err(), "accepted {bad}");
        }
    }

    proptest! {
        #[test]
        fn valid_idents_parse(key in "[A-Za-z0-9_-]{1,16}", repo in "[A-Za-z0-9_-]{1,16}") {
            let uri = RepoUri::parse(&format!("mem://{key}@{repo}")).unwrap();
            prop_assert_eq!(uri.access_key(), key.as_str());
            prop_assert_eq!(uri.repo_id(), repo.as_str());
        }

        #[test]
        fn foreign_chars_rejected(repo in "[A-Za-z0-9]{0,4}[./ #:]{1}[A-Za-z0-9]{0,4}") {
            let uri_str = format!("mem://k@{repo}");
            prop_assert!(RepoUri::parse(&uri_str).is_err());
        }
    }
}
