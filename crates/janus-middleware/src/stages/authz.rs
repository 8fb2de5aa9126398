//! Authorization and audit stage.
//!
//! Evaluates an [`AuthorizationPolicy`] for every call after
//! authentication. A denied call fails with `PermissionDenied` before rate
//! limiting or the handler run. Every decision, allowed or not, emits one
//! audit record on the `audit` target.
//!
//! # Static policies
//!
//! [`StaticPolicy`] is a rule list in the style of gRPC authorization
//! policies:
//!
//! ```json
//! {
//!   "name": "billing",
//!   "deny_rules": [{ "name": "no-interns", "principals": ["intern-*"] }],
//!   "allow_rules": [
//!     { "name": "read", "paths": ["/billing.Invoices/Get*"] },
//!     { "name": "admin", "paths": ["*"], "headers": [{ "key": "x-role", "values": ["admin"] }] }
//!   ]
//! }
//! ```
//!
//! Deny rules are checked first. A policy without allow rules allows
//! everything not denied; otherwise a call must match an allow rule.
//! Patterns are exact, or a prefix when they end in `*`.

use regex::Regex;
use serde::Deserialize;

use janus_core::{CallContext, Status};

use crate::call::{CallRequest, CallResult};
use crate::interceptor::{BoxFuture, Interceptor, Next};

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzDecision {
    /// Whether the call may proceed.
    pub authorized: bool,
    /// Name of the rule that decided, if any.
    pub matched_rule: Option<String>,
}

impl AuthzDecision {
    /// An allow decision.
    pub fn allow(rule: Option<String>) -> Self {
        Self {
            authorized: true,
            matched_rule: rule,
        }
    }

    /// A deny decision.
    pub fn deny(rule: Option<String>) -> Self {
        Self {
            authorized: false,
            matched_rule: rule,
        }
    }
}

/// Decides whether a call is authorized.
pub trait AuthorizationPolicy: Send + Sync + 'static {
    /// Policy name, reported in audit records.
    fn name(&self) -> &str;

    /// Evaluates the call.
    fn evaluate(&self, ctx: &CallContext) -> AuthzDecision;
}

/// Errors building a static policy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy document is not valid JSON of the expected shape.
    #[error("invalid policy document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A pattern could not be compiled.
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Compilation error.
        source: regex::Error,
    },
}

#[derive(Debug, Deserialize)]
struct PolicyDocument {
    name: String,
    #[serde(default)]
    deny_rules: Vec<RuleDocument>,
    #[serde(default)]
    allow_rules: Vec<RuleDocument>,
}

#[derive(Debug, Deserialize)]
struct RuleDocument {
    name: String,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    principals: Vec<String>,
    #[serde(default)]
    headers: Vec<HeaderRule>,
}

/// A header condition: the header must carry one of `values`.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderRule {
    /// Header name (lowercase).
    pub key: String,
    /// Accepted values; patterns as for paths.
    pub values: Vec<String>,
}

#[derive(Debug)]
struct Rule {
    name: String,
    paths: Vec<Regex>,
    principals: Vec<Regex>,
    headers: Vec<(String, Vec<Regex>)>,
}

fn compile(pattern: &str) -> Result<Regex, PolicyError> {
    let source = match pattern.strip_suffix('*') {
        Some(prefix) => format!("^{}", regex::escape(prefix)),
        None => format!("^{}$", regex::escape(pattern)),
    };
    Regex::new(&source).map_err(|source| PolicyError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, PolicyError> {
    patterns.iter().map(|p| compile(p)).collect()
}

impl Rule {
    fn from_document(doc: RuleDocument) -> Result<Self, PolicyError> {
        let headers = doc
            .headers
            .iter()
            .map(|h| Ok((h.key.to_ascii_lowercase(), compile_all(&h.values)?)))
            .collect::<Result<_, PolicyError>>()?;
        Ok(Self {
            paths: compile_all(&doc.paths)?,
            principals: compile_all(&doc.principals)?,
            headers,
            name: doc.name,
        })
    }

    // empty condition lists match anything
    fn matches(&self, path: &str, principal: &str, ctx: &CallContext) -> bool {
        let any = |patterns: &[Regex], value: &str| {
            patterns.is_empty() || patterns.iter().any(|p| p.is_match(value))
        };
        any(&self.paths, path)
            && any(&self.principals, principal)
            && self.headers.iter().all(|(key, values)| {
                ctx.metadata()
                    .get_all(key.as_str())
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .any(|v| values.iter().any(|p| p.is_match(v)))
            })
    }
}

/// A rule-list policy.
#[derive(Debug)]
pub struct StaticPolicy {
    name: String,
    deny: Vec<Rule>,
    allow: Vec<Rule>,
}

impl StaticPolicy {
    /// Parses a JSON policy document.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let doc: PolicyDocument = serde_json::from_str(json)?;
        Ok(Self {
            name: doc.name,
            deny: doc
                .deny_rules
                .into_iter()
                .map(Rule::from_document)
                .collect::<Result<_, _>>()?,
            allow: doc
                .allow_rules
                .into_iter()
                .map(Rule::from_document)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl AuthorizationPolicy for StaticPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &CallContext) -> AuthzDecision {
        let path = ctx.meta().full_method();
        let principal = ctx.auth().map_or("", |a| a.principal());

        if let Some(rule) = self.deny.iter().find(|r| r.matches(&path, principal, ctx)) {
            return AuthzDecision::deny(Some(rule.name.clone()));
        }
        if self.allow.is_empty() {
            return AuthzDecision::allow(None);
        }
        match self.allow.iter().find(|r| r.matches(&path, principal, ctx)) {
            Some(rule) => AuthzDecision::allow(Some(rule.name.clone())),
            None => AuthzDecision::deny(None),
        }
    }
}

/// Authorization interceptor.
pub struct AuthorizationInterceptor {
    policy: Box<dyn AuthorizationPolicy>,
}

impl std::fmt::Debug for AuthorizationInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationInterceptor")
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl AuthorizationInterceptor {
    /// Creates the stage around a policy.
    pub fn new<P: AuthorizationPolicy>(policy: P) -> Self {
        Self {
            policy: Box::new(policy),
        }
    }
}

impl Interceptor for AuthorizationInterceptor {
    fn name(&self) -> &'static str {
        "authz"
    }

    fn intercept<'a>(&'a self, request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let decision = self.policy.evaluate(&request.ctx);
            let method = request.ctx.meta().full_method();
            tracing::info!(
                target: "audit",
                action = "audit",
                rpc_method = %method,
                principal = %request.ctx.auth().map_or("", |a| a.principal()),
                policy_name = %self.policy.name(),
                matched_rule = %decision.matched_rule.as_deref().unwrap_or(""),
                authorized = decision.authorized,
                "audit"
            );
            if !decision.authorized {
                return Err(Status::permission_denied(format!(
                    "unauthorized RPC request rejected: {method}"
                )));
            }
            next.run(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};
    use janus_core::{AuthInfo, CallKind, CallMeta, Protocol};
    use std::sync::Arc;

    const POLICY: &str = r#"{
        "name": "billing",
        "deny_rules": [{ "name": "no-interns", "principals": ["intern-*"] }],
        "allow_rules": [
            { "name": "read", "paths": ["/billing.Invoices/Get*"] },
            { "name": "admin", "paths": ["*"], "headers": [{ "key": "x-role", "values": ["admin"] }] }
        ]
    }"#;

    fn ctx(method: &str, user: &str, role: Option<&'static str>) -> CallContext {
        let mut headers = HeaderMap::new();
        if let Some(role) = role {
            headers.insert("x-role", HeaderValue::from_static(role));
        }
        let meta = Arc::new(CallMeta::server("billing.Invoices", method, CallKind::Unary));
        let mut ctx = CallContext::new(meta, Protocol::Grpc, headers);
        ctx.set_auth(AuthInfo::new("bearer").with_user_id(user));
        ctx
    }

    #[test]
    fn test_allow_rule_prefix() {
        let policy = StaticPolicy::from_json(POLICY).unwrap();
        let decision = policy.evaluate(&ctx("GetInvoice", "alice", None));
        assert_eq!(decision, AuthzDecision::allow(Some("read".into())));
    }

    #[test]
    fn test_no_allow_match_denies() {
        let policy = StaticPolicy::from_json(POLICY).unwrap();
        let decision = policy.evaluate(&ctx("DeleteInvoice", "alice", None));
        assert_eq!(decision, AuthzDecision::deny(None));

        let decision = policy.evaluate(&ctx("DeleteInvoice", "alice", Some("admin")));
        assert_eq!(decision, AuthzDecision::allow(Some("admin".into())));
    }

    #[test]
    fn test_deny_wins() {
        let policy = StaticPolicy::from_json(POLICY).unwrap();
        let decision = policy.evaluate(&ctx("GetInvoice", "intern-bob", Some("admin")));
        assert_eq!(decision, AuthzDecision::deny(Some("no-interns".into())));
    }

    #[test]
    fn test_deny_only_policy_allows_rest() {
        let policy = StaticPolicy::from_json(
            r#"{"name":"p","deny_rules":[{"name":"d","paths":["/billing.Invoices/Delete*"]}]}"#,
        )
        .unwrap();
        assert!(policy.evaluate(&ctx("GetInvoice", "a", None)).authorized);
        assert!(!policy.evaluate(&ctx("DeleteInvoice", "a", None)).authorized);
    }

    #[test]
    fn test_pattern_escaping() {
        let re = compile("/pkg.Svc/Get*").unwrap();
        assert!(re.is_match("/pkg.Svc/GetThing"));
        assert!(!re.is_match("/pkgXSvc/GetThing"));
        let exact = compile("/pkg.Svc/Get").unwrap();
        assert!(!exact.is_match("/pkg.Svc/GetThing"));
    }

    #[test]
    fn test_bad_document() {
        assert!(matches!(
            StaticPolicy::from_json("{"),
            Err(PolicyError::Parse(_))
        ));
    }
}
