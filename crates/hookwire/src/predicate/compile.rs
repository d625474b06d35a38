//! Compile configured match blocks into predicates.

use super::{Predicate, PredicateError};
use crate::config::MatchConfig;

impl Predicate {
    /// Compile a `match` block from configuration.
    ///
    /// Exactly one predicate kind must be described. `scheme` may be combined
    /// with `host`; `host` may be combined with `path` or `path_prefix`.
    pub fn compile(config: &MatchConfig) -> Result<Self, PredicateError> {
        let MatchConfig {
            scheme,
            host,
            path,
            path_prefix,
            absolute_string,
            relative_path,
            url_regex,
        } = config;

        for (field, value) in [
            ("scheme", scheme),
            ("host", host),
            ("path", path),
            ("path_prefix", path_prefix),
            ("absolute_string", absolute_string),
            ("relative_path", relative_path),
            ("url_regex", url_regex),
        ] {
            if value.as_deref() == Some("") {
                return Err(PredicateError::InvalidMatch(format!("'{field}' is empty")));
            }
        }

        let standalone = [absolute_string, relative_path, url_regex]
            .iter()
            .filter(|v| v.is_some())
            .count();
        let host_based =
            scheme.is_some() || host.is_some() || path.is_some() || path_prefix.is_some();
        if standalone > 1 || (standalone == 1 && host_based) {
            return Err(PredicateError::InvalidMatch(
                "'absolute_string', 'relative_path' and 'url_regex' cannot be combined with other fields"
                    .to_string(),
            ));
        }

        if let Some(url) = absolute_string {
            return Ok(Predicate::absolute_string(url.as_str()));
        }
        if let Some(path) = relative_path {
            return Ok(Predicate::relative_path(path.as_str()));
        }
        if let Some(pattern) = url_regex {
            return Predicate::url_regex(pattern);
        }

        match (scheme, host, path, path_prefix) {
            (Some(scheme), None, None, None) => Ok(Predicate::scheme(scheme.as_str())),
            (Some(scheme), Some(host), None, None) => {
                Ok(Predicate::scheme_host(scheme.as_str(), host.as_str()))
            }
            (None, Some(host), None, None) => Ok(Predicate::host(host.as_str())),
            (None, Some(host), Some(path), None) => {
                Ok(Predicate::host_path(host.as_str(), path.as_str()))
            }
            (None, Some(host), None, Some(prefix)) => {
                Ok(Predicate::host_path_prefix(host.as_str(), prefix.as_str()))
            }
            (_, None, Some(_), _) | (_, None, _, Some(_)) => Err(PredicateError::InvalidMatch(
                "'path' and 'path_prefix' require 'host' (use 'relative_path' to ignore the host)"
                    .to_string(),
            )),
            (None, None, None, None) => Err(PredicateError::InvalidMatch(
                "match block is empty".to_string(),
            )),
            _ => Err(PredicateError::InvalidMatch(
                "unsupported combination of match fields".to_string(),
            )),
        }
    }
}
