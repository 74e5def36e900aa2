//! Interception of completed exchanges.
//!
//! Every exchange the host page completes is offered to [`Interceptor::observe`].
//! The interceptor classifies it against an ordered routing table, decodes
//! matches, and publishes the resulting records on the event bridge. Nothing
//! that happens here may affect the exchange itself.
//!
//! A panicking decoder is contained and counted as a failure. The process
//! panic hook still runs first; the binary installs one that logs through
//! `tracing` instead of dumping to stderr.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::domain::RawExchange;

use super::bridge::EventBridge;
use super::decoder::{decode_exchange, EndpointCategory};

/// Message shown when a successful response can no longer be decoded.
pub const STALE_INTEGRATION_NOTICE: &str =
    "The host app's interface changed and the integration may be stale.";

/// How a route matches a URL.
#[derive(Debug, Clone, Copy)]
pub enum UrlPattern {
    Contains(&'static str),
    EndsWith(&'static str),
}

impl UrlPattern {
    fn matches(self, url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match self {
            // Substring routes also look at the query (RPC ids live there).
            Self::Contains(needle) => url.contains(needle),
            Self::EndsWith(suffix) => path.ends_with(suffix),
        }
    }
}

/// One row of the routing table.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub category: EndpointCategory,
    /// Required method, or any method when `None`.
    pub method: Option<&'static str>,
    pub pattern: UrlPattern,
}

impl Route {
    fn matches(&self, exchange: &RawExchange) -> bool {
        self.method
            .is_none_or(|m| m.eq_ignore_ascii_case(&exchange.method))
            && self.pattern.matches(&exchange.url)
    }
}

/// Default routing table. Order matters: first match wins.
pub const DEFAULT_ROUTES: &[Route] = &[
    Route {
        category: EndpointCategory::ChatResolve,
        method: None,
        pattern: UrlPattern::Contains("/_/chat/resolve"),
    },
    Route {
        category: EndpointCategory::List,
        method: None,
        pattern: UrlPattern::Contains("/_/library/list"),
    },
    Route {
        category: EndpointCategory::Delete,
        method: Some("POST"),
        pattern: UrlPattern::EndsWith("/_/prompts/delete"),
    },
    Route {
        category: EndpointCategory::Update,
        method: Some("POST"),
        pattern: UrlPattern::EndsWith("/_/prompts/update"),
    },
    Route {
        category: EndpointCategory::Create,
        method: Some("POST"),
        pattern: UrlPattern::EndsWith("/_/prompts"),
    },
];

/// Receives user-visible notices.
pub trait Notifier {
    fn notify(&self, message: &str);
}

/// Discards notices.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct SilentNotifier;

#[cfg(test)]
impl Notifier for SilentNotifier {
    fn notify(&self, _message: &str) {}
}

/// Lets at most one notice through per cooldown window.
#[derive(Debug)]
pub struct NoticeThrottle {
    cooldown: Duration,
    last: Option<Instant>,
}

impl NoticeThrottle {
    #[must_use]
    pub const fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// Returns true and arms the window if a notice may be shown at `now`.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        if self
            .last
            .is_some_and(|last| now.saturating_duration_since(last) < self.cooldown)
        {
            return false;
        }
        self.last = Some(now);
        true
    }
}

/// What happened to one observed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No route matched; the exchange was left alone.
    Unmatched,
    /// Matched and decoded into this many published records.
    Published(EndpointCategory, usize),
    /// Matched but the shape was not recognized.
    Unrecognized(EndpointCategory),
    /// Matched but decoding failed outright.
    Failed(EndpointCategory),
}

/// Counters over a sequence of observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterceptStats {
    pub observed: usize,
    pub unmatched: usize,
    pub published: usize,
    pub unrecognized: usize,
    pub failed: usize,
}

impl InterceptStats {
    pub fn record(&mut self, observation: Observation) {
        self.observed += 1;
        match observation {
            Observation::Unmatched => self.unmatched += 1,
            Observation::Published(_, n) => self.published += n,
            Observation::Unrecognized(_) => self.unrecognized += 1,
            Observation::Failed(_) => self.failed += 1,
        }
    }
}

/// The hook sitting in front of every completed exchange.
pub struct Interceptor<N: Notifier> {
    routes: Vec<Route>,
    bridge: EventBridge,
    notifier: N,
    throttle: NoticeThrottle,
}

impl<N: Notifier> Interceptor<N> {
    /// Creates an interceptor using [`DEFAULT_ROUTES`].
    pub fn new(bridge: EventBridge, notifier: N, cooldown: Duration) -> Self {
        Self::with_routes(DEFAULT_ROUTES.to_vec(), bridge, notifier, cooldown)
    }

    pub const fn with_routes(
        routes: Vec<Route>,
        bridge: EventBridge,
        notifier: N,
        cooldown: Duration,
    ) -> Self {
        Self {
            routes,
            bridge,
            notifier,
            throttle: NoticeThrottle::new(cooldown),
        }
    }

    /// Finds the first route matching the exchange.
    #[must_use]
    pub fn classify(&self, exchange: &RawExchange) -> Option<EndpointCategory> {
        self.routes
            .iter()
            .find(|route| route.matches(exchange))
            .map(|route| route.category)
    }

    /// Observes one completed exchange. Never panics and never fails.
    pub fn observe(&mut self, exchange: &RawExchange) -> Observation {
        self.observe_at(exchange, Instant::now())
    }

    fn observe_at(&mut self, exchange: &RawExchange, now: Instant) -> Observation {
        let Some(category) = self.classify(exchange) else {
            return Observation::Unmatched;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| decode_exchange(category, exchange)));
        let failure = match outcome {
            Ok(Ok(records)) if records.is_empty() => {
                tracing::debug!(%category, url = %exchange.url, "Unrecognized response shape");
                return Observation::Unrecognized(category);
            }
            Ok(Ok(records)) => {
                let count = records.len();
                for record in &records {
                    self.bridge.publish(record);
                }
                tracing::debug!(%category, count, "Published decoded records");
                return Observation::Published(category, count);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "decoder panicked".to_string(),
        };

        tracing::warn!(%category, status = exchange.status, error = %failure, "Decoding failed");
        if exchange.status == 200 && self.throttle.allow_at(now) {
            self.notifier.notify(STALE_INTEGRATION_NOTICE);
        }
        Observation::Failed(category)
    }
}
