//! HTTP route table.
//!
//! Maps `(HTTP method, path)` to either a registered RPC method (served
//! through the bridge) or a custom handler. Paths may contain `{name}`
//! segments; a literal route wins over a template that matches the same
//! path.
//!
//! # Example
//!
//! ```rust
//! use http::Method;
//! use janus_server::router::{custom_handler, RouteTable, RouteTarget};
//!
//! let hello = custom_handler(|_req, _params| async {
//!     Ok(http::Response::new(bytes::Bytes::from_static(b"hi")))
//! });
//!
//! let mut table = RouteTable::new();
//! table.add(Method::GET, "/v1/users/{user_id}", RouteTarget::Custom(hello)).unwrap();
//!
//! let matched = table.match_route(&Method::GET, "/v1/users/42").unwrap();
//! assert_eq!(matched.param("user_id"), Some("42"));
//! assert!(table.match_route(&Method::POST, "/v1/users/42").is_none());
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use janus_core::Status;
use janus_middleware::BoxFuture;
use serde::Serialize;

use crate::error::RegistrationError;
use crate::service::MethodEntry;

/// Path parameters extracted from a template match.
pub type PathParams = BTreeMap<String, String>;

/// A handler bound to an HTTP route outside the bridge.
pub type CustomHandler = Arc<
    dyn Fn(http::Request<Bytes>, PathParams) -> BoxFuture<'static, Result<http::Response<Bytes>, Status>>
        + Send
        + Sync,
>;

/// Erases an async function into a [`CustomHandler`].
pub fn custom_handler<F, Fut>(handler: F) -> CustomHandler
where
    F: Fn(http::Request<Bytes>, PathParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<http::Response<Bytes>, Status>> + Send + 'static,
{
    Arc::new(
        move |request: http::Request<Bytes>,
              params: PathParams|
              -> BoxFuture<'static, Result<http::Response<Bytes>, Status>> {
            Box::pin(handler(request, params))
        },
    )
}

/// What a route dispatches to.
#[derive(Clone)]
pub enum RouteTarget {
    /// A registered RPC method, called through the bridge.
    Method(Arc<MethodEntry>),
    /// A custom handler.
    Custom(CustomHandler),
}

impl RouteTarget {
    fn label(&self) -> String {
        match self {
            Self::Method(entry) => entry.desc.full_method.clone(),
            Self::Custom(_) => "custom".to_string(),
        }
    }
}

impl std::fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// A matched route with extracted path parameters.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    target: &'a RouteTarget,
    params: PathParams,
}

impl<'a> RouteMatch<'a> {
    /// The route's target.
    pub const fn target(&self) -> &'a RouteTarget {
        self.target
    }

    /// Extracted path parameters.
    pub const fn params(&self) -> &PathParams {
        &self.params
    }

    /// A specific path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Consumes the match.
    pub fn into_parts(self) -> (&'a RouteTarget, PathParams) {
        (self.target, self.params)
    }
}

/// Route listing entry, as served by `/debug/routes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    /// HTTP method.
    pub http_method: String,
    /// Path template.
    pub path: String,
    /// Full RPC method name, or `custom`.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    segments: Vec<PathSegment>,
    pattern: String,
    target: RouteTarget,
}

impl Route {
    fn parse_segments(pattern: &str) -> Vec<PathSegment> {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => PathSegment::Param(name.to_string()),
                None => PathSegment::Literal(s.to_string()),
            })
            .collect()
    }

    fn param_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Param(_)))
            .count()
    }

    /// Same method and a template that matches exactly the same paths.
    fn overlaps(&self, method: &Method, segments: &[PathSegment]) -> bool {
        self.method == *method
            && self.segments.len() == segments.len()
            && self.segments.iter().zip(segments).all(|pair| match pair {
                (PathSegment::Literal(a), PathSegment::Literal(b)) => a == b,
                (PathSegment::Param(_), PathSegment::Param(_)) => true,
                _ => false,
            })
    }

    fn match_path(&self, path: &[&str]) -> Option<PathParams> {
        if path.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::new();
        for (pattern, actual) in self.segments.iter().zip(path) {
            match pattern {
                PathSegment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }
}

/// HTTP routes of the gateway, built once before serving.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a route.
    ///
    /// # Errors
    ///
    /// `InvalidPath` if `pattern` does not start with `/`, `DuplicateRoute`
    /// if the method and template are already bound.
    pub fn add(
        &mut self,
        method: Method,
        pattern: &str,
        target: RouteTarget,
    ) -> Result<(), RegistrationError> {
        if !pattern.starts_with('/') {
            return Err(RegistrationError::InvalidPath(pattern.to_string()));
        }
        let segments = Route::parse_segments(pattern);
        if self.routes.iter().any(|route| route.overlaps(&method, &segments)) {
            return Err(RegistrationError::DuplicateRoute {
                method: method.to_string(),
                path: pattern.to_string(),
            });
        }
        self.routes.push(Route {
            method,
            segments,
            pattern: pattern.to_string(),
            target,
        });
        Ok(())
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the route for a request; the match with the fewest parameters wins.
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .filter_map(|route| route.match_path(&parts).map(|params| (route, params)))
            .min_by_key(|(route, _)| route.param_count())
            .map(|(route, params)| RouteMatch {
                target: &route.target,
                params,
            })
    }

    /// Whether any method is bound to `path`.
    pub fn has_path(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.routes.iter().any(|route| route.match_path(&parts).is_some())
    }

    /// Route listing in registration order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes
            .iter()
            .map(|route| RouteInfo {
                http_method: route.method.to_string(),
                path: route.pattern.clone(),
                target: route.target.label(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(body: &'static str) -> RouteTarget {
        RouteTarget::Custom(custom_handler(move |_req, _params| async move {
            Ok(http::Response::new(Bytes::from_static(body.as_bytes())))
        }))
    }

    #[test]
    fn test_match_literal() {
        let mut table = RouteTable::new();
        table.add(Method::GET, "/healthz/extra", custom("a")).unwrap();
        let m = table.match_route(&Method::GET, "/healthz/extra").unwrap();
        assert!(m.params().is_empty());
        assert!(table.match_route(&Method::GET, "/healthz").is_none());
    }

    #[test]
    fn test_match_with_params() {
        let mut table = RouteTable::new();
        table.add(Method::GET, "/users/{user_id}/posts/{post_id}", custom("a")).unwrap();
        let m = table.match_route(&Method::GET, "/users/42/posts/99").unwrap();
        assert_eq!(m.param("user_id"), Some("42"));
        assert_eq!(m.param("post_id"), Some("99"));
    }

    #[test]
    fn test_literal_beats_template() {
        let mut table = RouteTable::new();
        table.add(Method::GET, "/users/{user_id}", custom("template")).unwrap();
        table.add(Method::GET, "/users/me", custom("literal")).unwrap();
        let m = table.match_route(&Method::GET, "/users/me").unwrap();
        assert!(m.params().is_empty());
        let m = table.match_route(&Method::GET, "/users/7").unwrap();
        assert_eq!(m.param("user_id"), Some("7"));
    }

    #[test]
    fn test_method_mismatch() {
        let mut table = RouteTable::new();
        table.add(Method::POST, "/demo.Echo/Say", custom("a")).unwrap();
        assert!(table.match_route(&Method::GET, "/demo.Echo/Say").is_none());
        assert!(table.has_path("/demo.Echo/Say"));
    }

    #[test]
    fn test_duplicate_route() {
        let mut table = RouteTable::new();
        table.add(Method::GET, "/users/{id}", custom("a")).unwrap();
        let err = table.add(Method::GET, "/users/{user_id}", custom("b")).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateRoute { .. }));
        table.add(Method::DELETE, "/users/{id}", custom("c")).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_invalid_path() {
        let mut table = RouteTable::new();
        let err = table.add(Method::GET, "users", custom("a")).unwrap_err();
        assert_eq!(err, RegistrationError::InvalidPath("users".to_string()));
    }

    #[test]
    fn test_route_listing() {
        let mut table = RouteTable::new();
        table.add(Method::GET, "/a", custom("a")).unwrap();
        assert_eq!(
            table.routes(),
            [RouteInfo {
                http_method: "GET".to_string(),
                path: "/a".to_string(),
                target: "custom".to_string(),
            }]
        );
    }
}
