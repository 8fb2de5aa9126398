//! Route-based rate limit rules.
//!
//! A [`RouterLimit`] resolves a call, identified by its path and request
//! metadata, to a [`LimitOutcome`]. Rules are checked in this order:
//!
//! 1. `disabled` - everything is unlimited
//! 2. `block` - a header equal to a listed value blocks the call
//! 3. `allow` - prefix rules that exempt or specially limit callers
//! 4. `limit` - the first prefix rule that matches sets the quota
//! 5. `default` - the fallback quota
//!
//! ```toml
//! [[limits.block]]
//! key = "x-client-id"
//! value = "scraper"
//!
//! [[limits.limit]]
//! prefix = "/billing."
//! headers = ["x-client-id"]
//! quota = 100
//! duration = "1m"
//! ```

use std::time::Duration;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use janus_core::duration::serde_str;

/// A header key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatch {
    /// Header name, lowercase.
    pub key: String,
    /// Exact value.
    pub value: String,
}

/// Limit for every path under a prefix, keyed by selected header values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefixLimit {
    /// Path prefix.
    pub prefix: String,
    /// Headers whose values are appended to the limit key.
    #[serde(default)]
    pub headers: Vec<String>,
    /// Calls allowed per window; `<= 0` means unlimited.
    pub quota: i64,
    /// Window length.
    #[serde(with = "serde_str")]
    pub duration: Duration,
}

/// Exemption or special quota for callers matching a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowRule {
    /// Path prefix.
    pub prefix: String,
    /// Header values that select the caller.
    #[serde(default, rename = "match")]
    pub matches: Vec<HeaderMatch>,
    /// Calls allowed per window; negative means unlimited, `0` blocks.
    pub quota: i64,
    /// Window length.
    #[serde(with = "serde_str", default)]
    pub duration: Duration,
}

/// Fallback limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultLimit {
    /// Headers whose values are appended to the limit key.
    #[serde(default)]
    pub headers: Vec<String>,
    /// Calls allowed per window; `<= 0` means unlimited.
    #[serde(default)]
    pub quota: i64,
    /// Window length.
    #[serde(with = "serde_str", default)]
    pub duration: Duration,
}

/// Rate limit rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterLimit {
    /// Prefix limits, first match wins.
    #[serde(default)]
    pub limit: Vec<PrefixLimit>,
    /// Allow rules, checked before prefix limits.
    #[serde(default)]
    pub allow: Vec<AllowRule>,
    /// Blocked header values.
    #[serde(default)]
    pub block: Vec<HeaderMatch>,
    /// Fallback limit.
    #[serde(default)]
    pub default: DefaultLimit,
    /// Turns limiting off.
    #[serde(default)]
    pub disabled: bool,
}

/// What to do with a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitOutcome {
    /// Let the call through without consuming a token.
    Unlimited,
    /// Reject the call.
    Blocked {
        /// Why, e.g. `client-id [ scraper ] is in the blacklist`.
        message: String,
    },
    /// Take a token for `key`.
    Quota {
        /// Limit key.
        key: String,
        /// Calls allowed per window.
        quota: u64,
        /// Window length.
        window: Duration,
        /// Trace message used in rejections.
        message: String,
    },
}

/// Strips the `x-` prefix off a header name.
fn key_name(key: &str) -> &str {
    key.strip_prefix("x-").unwrap_or(key)
}

fn header<'a>(headers: &'a HeaderMap, key: &str) -> &'a str {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn quota_outcome(
    quota: i64,
    window: Duration,
    header_keys: &[String],
    path: &str,
    headers: &HeaderMap,
) -> LimitOutcome {
    if quota <= 0 {
        return LimitOutcome::Unlimited;
    }
    let mut key = path.to_string();
    let mut limit_keys = String::new();
    for header_key in header_keys {
        let value = header(headers, header_key);
        if !value.is_empty() {
            key.push(':');
            key.push_str(value);
            limit_keys.push_str(header_key);
        }
    }
    if key.is_empty() {
        return LimitOutcome::Unlimited;
    }
    LimitOutcome::Quota {
        message: format!("trace key {key}, limit key {limit_keys}"),
        key,
        quota: quota.unsigned_abs(),
        window,
    }
}

impl AllowRule {
    fn outcome(&self, key: &str, message: String) -> LimitOutcome {
        if self.quota == 0 {
            return LimitOutcome::Blocked { message };
        }
        LimitOutcome::Quota {
            key: key.to_string(),
            quota: self.quota.unsigned_abs(),
            window: self.duration,
            message,
        }
    }
}

impl RouterLimit {
    /// Resolves the outcome for a call.
    pub fn resolve(&self, path: &str, headers: &HeaderMap) -> LimitOutcome {
        if self.disabled {
            return LimitOutcome::Unlimited;
        }

        for blocked in &self.block {
            let value = header(headers, &blocked.key);
            if value == blocked.value {
                return LimitOutcome::Blocked {
                    message: format!("{} [ {value} ] is in the blacklist", key_name(&blocked.key)),
                };
            }
        }

        for rule in &self.allow {
            if !path.starts_with(&rule.prefix) {
                continue;
            }
            if rule.quota < 0 {
                return LimitOutcome::Unlimited;
            }
            if rule.matches.is_empty() && !rule.duration.is_zero() {
                return rule.outcome(path, format!("trace key {path}, limit key {path}"));
            }
            for candidate in &rule.matches {
                let value = header(headers, &candidate.key);
                if value == candidate.value {
                    return rule.outcome(value, format!("trace key {value}, limit key {}", candidate.key));
                }
            }
        }

        if let Some(rule) = self.limit.iter().find(|rule| path.starts_with(&rule.prefix)) {
            return quota_outcome(rule.quota, rule.duration, &rule.headers, path, headers);
        }
        quota_outcome(
            self.default.quota,
            self.default.duration,
            &self.default.headers,
            path,
            headers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn rules() -> RouterLimit {
        serde_json::from_str(
            r#"{
                "block": [{ "key": "x-client-id", "value": "scraper" }],
                "allow": [
                    { "prefix": "/internal.", "quota": -1 },
                    { "prefix": "/billing.", "match": [{ "key": "x-client-id", "value": "partner" }], "quota": 1000, "duration": "1m" }
                ],
                "limit": [{ "prefix": "/billing.", "headers": ["x-client-id", "x-user-id"], "quota": 10, "duration": "1s" }],
                "default": { "quota": 100, "duration": "1m" }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_block_message() {
        let outcome = rules().resolve("/billing.Invoices/Get", &headers(&[("x-client-id", "scraper")]));
        assert_eq!(
            outcome,
            LimitOutcome::Blocked {
                message: "client-id [ scraper ] is in the blacklist".into()
            }
        );
    }

    #[test]
    fn test_allow_unlimited_and_matched() {
        let rules = rules();
        assert_eq!(rules.resolve("/internal.Ops/Flush", &HeaderMap::new()), LimitOutcome::Unlimited);

        let outcome = rules.resolve("/billing.Invoices/Get", &headers(&[("x-client-id", "partner")]));
        assert!(matches!(
            outcome,
            LimitOutcome::Quota { ref key, quota: 1000, .. } if key == "partner"
        ));
    }

    #[test]
    fn test_allow_quota_zero_blocks() {
        let rules: RouterLimit = serde_json::from_str(
            r#"{
                "allow": [
                    { "prefix": "/beta.", "match": [{ "key": "x-client-id", "value": "banned" }], "quota": 0, "duration": "1m" },
                    { "prefix": "/frozen.", "quota": 0, "duration": "1m" }
                ],
                "default": { "quota": 100, "duration": "1m" }
            }"#,
        )
        .unwrap();

        assert_eq!(
            rules.resolve("/beta.Feature/Try", &headers(&[("x-client-id", "banned")])),
            LimitOutcome::Blocked {
                message: "trace key banned, limit key x-client-id".into()
            }
        );
        assert_eq!(
            rules.resolve("/frozen.Store/Put", &HeaderMap::new()),
            LimitOutcome::Blocked {
                message: "trace key /frozen.Store/Put, limit key /frozen.Store/Put".into()
            }
        );
        assert!(matches!(
            rules.resolve("/beta.Feature/Try", &headers(&[("x-client-id", "other")])),
            LimitOutcome::Quota { quota: 100, .. }
        ));
    }

    #[test]
    fn test_prefix_limit_key() {
        let outcome = rules().resolve(
            "/billing.Invoices/Get",
            &headers(&[("x-client-id", "web"), ("x-user-id", "u1")]),
        );
        assert_eq!(
            outcome,
            LimitOutcome::Quota {
                key: "/billing.Invoices/Get:web:u1".into(),
                quota: 10,
                window: Duration::from_secs(1),
                message: "trace key /billing.Invoices/Get:web:u1, limit key x-client-idx-user-id".into(),
            }
        );
    }

    #[test]
    fn test_default_and_disabled() {
        let mut rules = rules();
        let outcome = rules.resolve("/echo.Echo/Say", &HeaderMap::new());
        assert!(matches!(outcome, LimitOutcome::Quota { quota: 100, .. }));

        rules.disabled = true;
        assert_eq!(
            rules.resolve("/billing.Invoices/Get", &headers(&[("x-client-id", "scraper")])),
            LimitOutcome::Unlimited
        );
        assert_eq!(RouterLimit::default().resolve("/a/b", &HeaderMap::new()), LimitOutcome::Unlimited);
    }
}
