//! Route filters applied at dequeue.

use super::message::Route;

/// Which routes a consumer accepts.
///
/// - `Any`: routing disabled, every message is eligible (routed or not).
/// - `Routes`: only messages whose route is in the list. Unrouted messages are
///   not delivered to a routed consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RouteFilter {
    #[default]
    Any,
    Routes(Vec<Route>),
}

impl RouteFilter {
    pub fn only(route: impl Into<Route>) -> Self {
        RouteFilter::Routes(vec![route.into()])
    }

    pub fn matches(&self, route: Option<&str>) -> bool {
        match self {
            RouteFilter::Any => true,
            RouteFilter::Routes(routes) => {
                route.is_some_and(|route| routes.iter().any(|accepted| accepted == route))
            }
        }
    }
}

impl From<Option<Vec<Route>>> for RouteFilter {
    fn from(routes: Option<Vec<Route>>) -> Self {
        match routes {
            Some(routes) => RouteFilter::Routes(routes),
            None => RouteFilter::Any,
        }
    }
}
