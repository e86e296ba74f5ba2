//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in registration order
//! - Look up the bus target for a request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - First match wins; no priorities, no longest-prefix search
//! - O(n) scan (route lists are a handful of entries)
//! - Explicit `None` rather than a silent default route

use crate::bus::frame::Opcode;
use crate::config::RouteConfig;
use crate::routing::matcher::{AndMatcher, Matcher, MethodMatcher, PathPrefixMatcher, RequestTarget};

/// Where a matched request goes on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    /// Stripped from the path before it is sent.
    pub prefix: String,
    pub opcode: Opcode,
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub matcher: Box<dyn Matcher>,
    pub target: ProxyTarget,
}

/// Ordered route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route; it loses to every route added before it.
    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Compile routes from configuration, keeping their order.
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let mut router = Self::new();
        for config in configs {
            let mut matchers: Vec<Box<dyn Matcher>> =
                vec![Box::new(PathPrefixMatcher::new(config.path_prefix.clone()))];
            if let Some(method) = &config.method {
                matchers.push(Box::new(MethodMatcher::new(method.clone())));
            }
            router.add(Route {
                name: config.name.clone(),
                matcher: Box::new(AndMatcher::new(matchers)),
                target: ProxyTarget {
                    prefix: config.path_prefix.clone(),
                    opcode: Opcode(config.opcode),
                },
            });
        }
        router
    }

    pub fn match_request(&self, method: &str, path: &str) -> Option<&Route> {
        let target = RequestTarget::new(method, path);
        self.routes.iter().find(|route| route.matcher.matches(&target))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
