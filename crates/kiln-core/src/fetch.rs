use std::path::{Path, PathBuf};

use fs_err as fs;
use sha1::{Digest, Sha1};
use thiserror::Error;
use url::Url;

use crate::artifact::Fetch;

/// Number of leading hex digits of the SHA1 digest kept as the cache key.
const CACHE_KEY_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fetch url {url:?}")]
    InvalidUrl { url: String, #[source] source: url::ParseError },
    #[error("fetch url {url:?} uses scheme {scheme:?}, only http and https are allowed")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("download of {url} failed")]
    Download { url: Url, #[source] source: reqwest::Error },
    #[error("io error caching {url}")]
    Io { url: Url, #[source] source: std::io::Error },
}

/// Normalize a URL the way the fetch cache and dependency dedup rely on:
/// lowercase scheme/host, drop default ports, strip a trailing slash from
/// the path, sort and re-encode the query, drop the fragment. Rejects
/// anything other than `http`/`https`, matching the fetch variant's schema
/// constraint that its `url` be an HTTP(S) URL.
pub fn normalize_url(input: &str) -> Result<Url, Error> {
    let mut url = Url::parse(input).map_err(|source| Error::InvalidUrl {
        url: input.to_owned(),
        source,
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::UnsupportedScheme {
            url: input.to_owned(),
            scheme: url.scheme().to_owned(),
        });
    }

    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        if lower != host {
            let _ = url.set_host(Some(&lower));
        }
    }

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    let path = url.path().to_owned();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &pairs {
            serializer.append_pair(key, value);
        }
        url.set_query(Some(&serializer.finish()));
    }

    url.set_fragment(None);

    Ok(url)
}

/// Content-addressed path a given (already normalized) URL resolves to
/// under the fetch cache.
pub fn cache_path(build_root: &Path, url: &Url) -> PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(url.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    build_root.join("fetch_cache").join(&digest[..CACHE_KEY_LEN])
}

/// The file name a fetch dependency mounts as, absent an explicit override:
/// the final path segment of the URL.
pub fn default_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("download")
        .to_owned()
}

impl Fetch {
    pub fn build(&self, build_root: &Path, override_: bool) -> Result<(), Error> {
        let path = cache_path(build_root, &self.url);

        if path.exists() && !override_ {
            tracing::debug!(url = %self.url, "fetch cache hit");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::Io {
                url: self.url.clone(),
                source,
            })?;
        }

        tracing::info!(url = %self.url, "downloading");

        let response = reqwest::blocking::get(self.url.clone())
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|source| Error::Download {
                url: self.url.clone(),
                source,
            })?;
        let bytes = response.bytes().map_err(|source| Error::Download {
            url: self.url.clone(),
            source,
        })?;

        fs::write(&path, &bytes).map_err(|source| Error::Io {
            url: self.url.clone(),
            source,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_host_and_port() {
        let a = normalize_url("https://Example.com:443/a/?b=2&a=1").unwrap();
        let b = normalize_url("https://example.com/a?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn strips_trailing_slash_but_keeps_root() {
        let url = normalize_url("https://example.com/a/b/").unwrap();
        assert_eq!(url.path(), "/a/b");

        let root = normalize_url("https://example.com/").unwrap();
        assert_eq!(root.path(), "/");
    }

    #[test]
    fn drops_fragment() {
        let url = normalize_url("https://example.com/a#section").unwrap();
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_url("https://Example.com:443/a/?b=2&a=1").unwrap();
        let twice = normalize_url(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn cache_path_is_stable_and_truncated() {
        let url = normalize_url("https://example.com/a?a=1").unwrap();
        let root = Path::new("/build");
        let first = cache_path(root, &url);
        let second = cache_path(root, &url);
        assert_eq!(first, second);
        assert_eq!(first.file_name().unwrap().len(), CACHE_KEY_LEN);
    }

    #[test]
    fn default_file_name_uses_last_segment() {
        let url = normalize_url("https://example.com/data/file.csv").unwrap();
        assert_eq!(default_file_name(&url), "file.csv");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            normalize_url("ftp://example.com/a"),
            Err(Error::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            normalize_url("file:///etc/passwd"),
            Err(Error::UnsupportedScheme { .. })
        ));
    }
}
