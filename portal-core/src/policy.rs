//! External-URL policy.
//!
//! Manifests must only point at hosts outside the platform. A host is
//! treated as internal when it:
//! - is one of the blocked hosts (`localhost`, `127.0.0.1`, ...)
//! - ends with a blocked suffix (`.local`, `.internal`, ...)
//! - is a platform domain or one of its subdomains
//! - is an IP literal in a loopback, private, link-local or unspecified range
//! - matches an operator-supplied pattern

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

use crate::error::{ConfigError, PolicyError};
use crate::manifest::AccessManifest;

const DEFAULT_BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "::1"];
const DEFAULT_BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("hostname regex is valid")
});

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Inputs for a [`UrlPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Domains owned by the platform itself. Subdomains are blocked too.
    pub platform_domains: Vec<String>,
    pub blocked_hosts: Vec<String>,
    pub blocked_suffixes: Vec<String>,
    /// Regular expressions matched against the host.
    pub blocked_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            platform_domains: Vec::new(),
            blocked_hosts: DEFAULT_BLOCKED_HOSTS.iter().map(|s| s.to_string()).collect(),
            blocked_suffixes: DEFAULT_BLOCKED_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            blocked_patterns: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Create PolicyConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PORTAL_PLATFORM_DOMAINS`: comma-separated platform domains (default: none)
    /// - `PORTAL_BLOCKED_HOSTS`: comma-separated hosts added to the defaults
    /// - `PORTAL_BLOCKED_HOST_PATTERNS`: comma-separated host regexes (default: none)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.platform_domains = env_list("PORTAL_PLATFORM_DOMAINS");
        config.blocked_hosts.extend(env_list("PORTAL_BLOCKED_HOSTS"));
        config.blocked_patterns = env_list("PORTAL_BLOCKED_HOST_PATTERNS");
        config
    }

    pub fn with_platform_domain(mut self, domain: impl Into<String>) -> Self {
        self.platform_domains.push(domain.into());
        self
    }

    pub fn with_blocked_host(mut self, host: impl Into<String>) -> Self {
        self.blocked_hosts.push(host.into());
        self
    }

    pub fn with_blocked_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.blocked_patterns.push(pattern.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for domain in &self.platform_domains {
            if !HOSTNAME_RE.is_match(domain) {
                return Err(ConfigError::InvalidValue {
                    field: "platform_domains".to_string(),
                    value: domain.clone(),
                    reason: "not a valid hostname".to_string(),
                });
            }
        }
        for pattern in &self.blocked_patterns {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                field: "blocked_patterns".to_string(),
                value: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn env_list(var: &str) -> Vec<String> {
    std::env::var(var)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// POLICY
// ============================================================================

/// Compiled external-URL policy.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    platform_domains: Vec<String>,
    blocked_hosts: Vec<String>,
    blocked_suffixes: Vec<String>,
    blocked_patterns: Vec<Regex>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::from_parts(PolicyConfig::default(), Vec::new())
    }
}

impl UrlPolicy {
    /// Compile a policy; fails on invalid domains or patterns.
    pub fn new(config: PolicyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let patterns = config
            .blocked_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidValue {
                    field: "blocked_patterns".to_string(),
                    value: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_parts(config, patterns))
    }

    fn from_parts(config: PolicyConfig, blocked_patterns: Vec<Regex>) -> Self {
        let lower = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|s| s.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            platform_domains: lower(config.platform_domains),
            blocked_hosts: lower(config.blocked_hosts)
                .into_iter()
                .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
                .collect(),
            blocked_suffixes: lower(config.blocked_suffixes),
            blocked_patterns,
        }
    }

    /// Check every URL field of a manifest.
    pub fn check(&self, manifest: &AccessManifest) -> Result<(), PolicyError> {
        for (field, url) in manifest.urls() {
            self.check_url(field, url)?;
        }
        Ok(())
    }

    /// Check one URL. `field` names it in the error.
    pub fn check_url(&self, field: &str, raw: &str) -> Result<(), PolicyError> {
        let url = Url::parse(raw.trim()).map_err(|_| PolicyError::UnparseableUrl {
            field: field.to_string(),
        })?;
        let internal = match url.host() {
            Some(Host::Domain(domain)) => self.is_internal_domain(domain),
            Some(Host::Ipv4(ip)) => self.is_internal_ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => self.is_internal_ip(IpAddr::V6(ip)),
            None => {
                return Err(PolicyError::UnparseableUrl {
                    field: field.to_string(),
                })
            }
        };
        if internal {
            return Err(PolicyError::InternalHost {
                field: field.to_string(),
                host: url.host_str().unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }

    /// Whether a bare host name or IP literal is internal.
    pub fn is_internal_host(&self, host: &str) -> bool {
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        match host.parse::<IpAddr>() {
            Ok(ip) => self.is_internal_ip(ip),
            Err(_) => self.is_internal_domain(host),
        }
    }

    fn is_internal_domain(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if self.blocked_hosts.iter().any(|h| *h == domain) {
            return true;
        }
        if self.blocked_suffixes.iter().any(|s| domain.ends_with(s.as_str())) {
            return true;
        }
        let is_platform = self.platform_domains.iter().any(|p| {
            domain == *p
                || domain
                    .strip_suffix(p.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        });
        is_platform || self.matches_pattern(&domain)
    }

    fn is_internal_ip(&self, ip: IpAddr) -> bool {
        let text = ip.to_string();
        if self.blocked_hosts.iter().any(|h| *h == text) {
            return true;
        }
        let reserved = match ip {
            IpAddr::V4(v4) => is_internal_v4(v4),
            IpAddr::V6(v6) => is_internal_v6(v6),
        };
        reserved || self.matches_pattern(&text)
    }

    fn matches_pattern(&self, host: &str) -> bool {
        self.blocked_patterns.iter().any(|re| re.is_match(host))
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn platform_policy() -> UrlPolicy {
        UrlPolicy::new(PolicyConfig::default().with_platform_domain("portal.run")).unwrap()
    }

    #[test]
    fn test_blocks_default_internal_hosts() {
        let policy = UrlPolicy::default();
        for url in [
            "http://localhost/a",
            "http://LOCALHOST:8080/a",
            "http://127.0.0.1/a",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://api.localhost/",
            "https://printer.local/",
            "https://db.svc.internal/x",
        ] {
            assert!(
                matches!(policy.check_url("uri", url), Err(PolicyError::InternalHost { .. })),
                "{} should be blocked",
                url
            );
        }
    }

    #[test]
    fn test_blocks_private_ip_ranges() {
        let policy = UrlPolicy::default();
        for url in [
            "http://10.0.0.4/",
            "http://172.16.3.1/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://127.8.8.8/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:10.0.0.1]/",
        ] {
            assert!(policy.check_url("uri", url).is_err(), "{} should be blocked", url);
        }
    }

    #[test]
    fn test_allows_public_hosts() {
        let policy = platform_policy();
        for url in [
            "https://www.youtube.com/embed/abc123",
            "https://8.8.8.8/",
            "https://[2606:4700::1111]/",
            "https://notportal.run/",
            "https://local.example.com/",
        ] {
            assert!(policy.check_url("embed", url).is_ok(), "{} should pass", url);
        }
    }

    #[test]
    fn test_blocks_platform_domain_and_subdomains() {
        let policy = platform_policy();
        let err = policy.check_url("openWeb", "https://cdn.portal.run/a").unwrap_err();
        assert_eq!(
            err,
            PolicyError::InternalHost {
                field: "openWeb".to_string(),
                host: "cdn.portal.run".to_string(),
            }
        );
        assert!(policy.check_url("openWeb", "https://portal.run/").is_err());
    }

    #[test]
    fn test_custom_patterns() {
        let policy = UrlPolicy::new(
            PolicyConfig::default().with_blocked_pattern(r"^staging-\d+\.example\.com$"),
        )
        .unwrap();
        assert!(policy.check_url("uri", "https://staging-12.example.com/").is_err());
        assert!(policy.check_url("uri", "https://staging.example.com/").is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad_pattern = PolicyConfig::default().with_blocked_pattern("([");
        assert!(UrlPolicy::new(bad_pattern).is_err());

        let bad_domain = PolicyConfig::default().with_platform_domain("not a domain");
        assert!(matches!(
            bad_domain.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_check_reports_offending_field() {
        let manifest = AccessManifest::embed("html", "https://www.youtube.com/embed/x")
            .with_open_web("http://localhost:3000/item/1");
        let err = UrlPolicy::default().check(&manifest).unwrap_err();
        assert!(matches!(err, PolicyError::InternalHost { ref field, .. } if field == "openWeb"));
    }

    #[test]
    fn test_is_internal_host_accepts_bare_hosts() {
        let policy = platform_policy();
        assert!(policy.is_internal_host("localhost"));
        assert!(policy.is_internal_host("[::1]"));
        assert!(policy.is_internal_host("app.portal.run"));
        assert!(!policy.is_internal_host("example.org"));
    }

    proptest! {
        #[test]
        fn prop_subdomains_of_platform_blocked(label in "[a-z][a-z0-9-]{0,20}[a-z0-9]") {
            let policy = platform_policy();
            let url = format!("https://{}.portal.run/item", label);
            prop_assert!(policy.check_url("uri", &url).is_err());
        }

        #[test]
        fn prop_private_10_block_always_internal(b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
            let url = format!("http://10.{}.{}.{}/", b, c, d);
            prop_assert!(UrlPolicy::default().check_url("uri", &url).is_err());
        }
    }
}
