use crate::action::Action;
use crate::expectation::{Consumption, Expectation, ExpectationBuilder, ExpectationId};
use crate::matchers::RequestPattern;
use crate::Request;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// How a filter pattern passed to [`ExpectationRegistry::clear`] or
/// [`ExpectationRegistry::list`] selects stored expectations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClearMode {
    /// The filter acts as a wildcard: it selects every expectation whose pattern it contains,
    /// so a partial pattern selects all the more specific ones.
    #[default]
    Loose,
    /// The filter only selects expectations registered with an identical pattern.
    Strict,
}

/// The ordered set of expectations registered on a mock server.
///
/// Expectations are kept in registration order, which doubles as matching priority:
/// when several expectations match a request, the one registered first wins.
///
/// The registry is safe to share across connections. Scans run over a snapshot of the
/// sequence, so registrations happening during a scan are not observed by it, while
/// removals are always applied to the live sequence.
#[derive(Debug)]
pub struct ExpectationRegistry {
    expectations: RwLock<Vec<Arc<Expectation>>>,
    next_id: AtomicU64,
    overlap_cap: u64,
    clear_mode: ClearMode,
}

impl Default for ExpectationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self {
            expectations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            overlap_cap: 1,
            clear_mode: ClearMode::default(),
        }
    }

    /// How many further matches an unlimited expectation is left with when a newer unlimited
    /// expectation overlapping it is registered. Defaults to `1`.
    pub fn with_overlap_cap(mut self, overlap_cap: u64) -> Self {
        self.overlap_cap = overlap_cap;
        self
    }

    pub fn with_clear_mode(mut self, clear_mode: ClearMode) -> Self {
        self.clear_mode = clear_mode;
        self
    }

    pub fn clear_mode(&self) -> ClearMode {
        self.clear_mode
    }

    /// Append a new expectation at the lowest priority.
    ///
    /// If the new expectation is unlimited, every unlimited expectation whose pattern it
    /// contains is downgraded to [`Times::Limited`](crate::Times::Limited) with the configured overlap cap: the
    /// newest registration eventually becomes authoritative for the pattern.
    pub fn register(&self, builder: ExpectationBuilder) -> Arc<Expectation> {
        let ExpectationBuilder {
            pattern,
            times,
            time_to_live,
            actions,
        } = builder;

        let mut expectations = self.write();
        if times.is_unlimited() {
            for existing in expectations.iter() {
                if pattern.contains(existing.pattern()) && existing.downgrade(self.overlap_cap) {
                    debug!(
                        "Expectation {} overlaps a newer unlimited expectation, capped to {} further match(es).",
                        existing.id(),
                        self.overlap_cap
                    );
                }
            }
        }

        let id = ExpectationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let expectation = Arc::new(Expectation::new(
            id,
            pattern,
            times,
            time_to_live,
            actions,
        ));
        expectations.push(expectation.clone());
        expectation
    }

    /// Find the highest-priority eligible expectation matching `request`, consume one of its
    /// allowed matches and return the action to perform.
    ///
    /// Expired expectations met along the way are dropped, whether they match or not.
    pub fn match_and_consume(&self, request: &Request) -> Option<Action> {
        self.find_and_consume(request)
            .map(|expectation| expectation.action())
    }

    pub(crate) fn find_and_consume(&self, request: &Request) -> Option<Arc<Expectation>> {
        let snapshot = self.read().clone();
        let now = Instant::now();

        for expectation in snapshot {
            if expectation.time_to_live().is_expired_at(now) {
                debug!("Expectation {} expired, removing it.", expectation.id());
                self.remove(expectation.id());
                continue;
            }
            if !expectation.pattern().matches(request) {
                continue;
            }
            match expectation.consume() {
                Consumption::Consumed { exhausted } => {
                    if exhausted {
                        self.remove(expectation.id());
                    }
                    return Some(expectation);
                }
                Consumption::AlreadyExhausted => {
                    self.remove(expectation.id());
                }
            }
        }
        None
    }

    /// Remove every expectation selected by `filter`, or all of them if `filter` is `None`.
    /// Returns how many expectations were removed.
    pub fn clear(&self, filter: Option<&RequestPattern>) -> usize {
        let filter = match filter {
            Some(filter) => filter,
            None => return self.reset(),
        };
        let mut expectations = self.write();
        let before = expectations.len();
        expectations.retain(|e| !self.selects(filter, e.pattern()));
        before - expectations.len()
    }

    /// Remove every expectation. Returns how many expectations were removed.
    pub fn reset(&self) -> usize {
        let mut expectations = self.write();
        let removed = expectations.len();
        expectations.clear();
        removed
    }

    /// The eligible expectations that would match every request described by `filter` (all of
    /// them if `None`), in priority order. Listing never consumes matches nor removes anything.
    ///
    /// Unlike [`clear`](Self::clear), a broad expectation is listed for a narrow filter, and a
    /// narrow expectation is left out for a broad one.
    pub fn list(&self, filter: Option<&RequestPattern>) -> Vec<Arc<Expectation>> {
        self.read()
            .iter()
            .filter(|e| e.is_eligible())
            .filter(|e| filter.map_or(true, |filter| e.pattern().contains(filter)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn selects(&self, filter: &RequestPattern, stored: &RequestPattern) -> bool {
        match self.clear_mode {
            ClearMode::Loose => filter.contains(stored),
            ClearMode::Strict => filter == stored,
        }
    }

    fn remove(&self, id: ExpectationId) {
        self.write().retain(|e| e.id() != id);
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Expectation>>> {
        self.expectations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Expectation>>> {
        self.expectations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectation::{ExpectationState, TimeToLive, Times};
    use crate::matchers::request;
    use crate::ResponseTemplate;
    use http::Method;
    use std::thread;
    use std::time::Duration;
    use url::Url;

    fn get(path: &str) -> Request {
        Request::new(
            Method::GET,
            Url::parse(&format!("http://localhost{}", path)).unwrap(),
        )
    }

    fn respond_with(status: u16) -> ResponseTemplate {
        ResponseTemplate::new(status)
    }

    fn status_of(action: Option<Action>) -> Option<u16> {
        match action {
            Some(Action::Respond(response)) => Some(response.status_code().as_u16()),
            Some(other) => panic!("Unexpected action: {:?}", other),
            None => None,
        }
    }

    #[test]
    fn the_earliest_matching_expectation_wins() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(
            Expectation::when(request().path("/a"))
                .times(Times::exactly(5))
                .then_respond(respond_with(200)),
        );
        registry.register(
            Expectation::when(request().method("GET").path("/a")).then_respond(respond_with(201)),
        );

        // Act
        let first = status_of(registry.match_and_consume(&get("/a")));

        // Assert
        assert_eq!(first, Some(200));
    }

    #[test]
    fn a_limited_expectation_matches_exactly_n_times() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(
            Expectation::when(request().method("GET").path("/a"))
                .times(Times::exactly(2))
                .then_respond(respond_with(200)),
        );

        // Act
        let first = status_of(registry.match_and_consume(&get("/a")));
        let second = status_of(registry.match_and_consume(&get("/a")));
        let third = status_of(registry.match_and_consume(&get("/a")));

        // Assert
        assert_eq!(first, Some(200));
        assert_eq!(second, Some(200));
        assert_eq!(third, None);
        assert!(registry.list(None).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn registering_an_overlapping_unlimited_expectation_downgrades_the_older_one() {
        // Arrange
        let registry = ExpectationRegistry::new();
        let first = registry.register(
            Expectation::when(request().method("GET").path("/b")).then_respond(respond_with(200)),
        );

        // Act
        let second = registry.register(
            Expectation::when(request().method("GET").path("/b")).then_respond(respond_with(201)),
        );

        // Assert
        let listed = registry.list(None);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id(), first.id());
        assert_eq!(first.state(), ExpectationState::ActiveLimited(1));
        assert_eq!(second.state(), ExpectationState::ActiveUnlimited);

        assert_eq!(status_of(registry.match_and_consume(&get("/b"))), Some(200));
        assert_eq!(status_of(registry.match_and_consume(&get("/b"))), Some(201));
        assert_eq!(status_of(registry.match_and_consume(&get("/b"))), Some(201));
    }

    #[test]
    fn a_more_specific_unlimited_expectation_does_not_downgrade_a_broader_one() {
        // Arrange
        let registry = ExpectationRegistry::new();
        let broad = registry.register(Expectation::when(request().path("/b")));

        // Act
        registry.register(Expectation::when(request().method("GET").path("/b")));

        // Assert
        assert_eq!(broad.times(), Times::Unlimited);
    }

    #[test]
    fn limited_expectations_are_never_downgraded() {
        // Arrange
        let registry = ExpectationRegistry::new().with_overlap_cap(1);
        let limited =
            registry.register(Expectation::when(request().path("/b")).times(Times::exactly(3)));

        // Act
        registry.register(Expectation::when(request().path("/b")));

        // Assert
        assert_eq!(limited.times(), Times::Limited(3));
    }

    #[test]
    fn the_overlap_cap_is_configurable() {
        // Arrange
        let registry = ExpectationRegistry::new().with_overlap_cap(3);
        let first = registry.register(Expectation::when(request().path("/b")));

        // Act
        registry.register(Expectation::when(request().path("/b")));

        // Assert
        assert_eq!(first.times(), Times::Limited(3));
    }

    #[test]
    fn expired_expectations_are_swept_even_if_they_do_not_match() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(
            Expectation::when(request().path("/expired"))
                .time_to_live(TimeToLive::exactly(Duration::from_millis(10))),
        );
        registry.register(
            Expectation::when(request().path("/alive")).then_respond(respond_with(200)),
        );
        thread::sleep(Duration::from_millis(30));

        // Act
        let outcome = status_of(registry.match_and_consume(&get("/alive")));

        // Assert
        assert_eq!(outcome, Some(200));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn expired_expectations_never_match() {
        // Arrange
        let registry = ExpectationRegistry::new();
        let expectation = registry.register(
            Expectation::when(request().path("/a"))
                .time_to_live(TimeToLive::exactly(Duration::from_millis(10))),
        );
        thread::sleep(Duration::from_millis(30));

        // Act
        let outcome = registry.match_and_consume(&get("/a"));

        // Assert
        assert!(outcome.is_none());
        assert_eq!(expectation.state(), ExpectationState::Expired);
        assert!(registry.is_empty());
    }

    #[test]
    fn non_matching_requests_never_mutate_the_registry() {
        // Arrange
        let registry = ExpectationRegistry::new();
        let expectation =
            registry.register(Expectation::when(request().path("/a")).times(Times::exactly(2)));

        // Act
        for _ in 0..10 {
            assert!(registry.match_and_consume(&get("/other")).is_none());
        }

        // Assert
        assert_eq!(expectation.times(), Times::Limited(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_without_a_filter_is_a_reset() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(Expectation::when(request().path("/a")));
        registry.register(Expectation::when(request().path("/b")));

        // Act
        let removed = registry.clear(None);

        // Assert
        assert_eq!(removed, 2);
        assert!(registry.list(None).is_empty());
    }

    #[test]
    fn loose_clear_removes_every_more_specific_expectation() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(Expectation::when(request().method("GET").path("/a")));
        registry.register(Expectation::when(request().method("POST").path("/a")));
        registry.register(Expectation::when(request().path("/b")));

        // Act
        let removed = registry.clear(Some(&request().path("/a")));

        // Assert
        assert_eq!(removed, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn strict_clear_only_removes_identical_patterns() {
        // Arrange
        let registry = ExpectationRegistry::new().with_clear_mode(ClearMode::Strict);
        registry.register(Expectation::when(request().method("GET").path("/a")));
        registry.register(Expectation::when(request().path("/a")).times(Times::once()));

        // Act
        let removed = registry.clear(Some(&request().path("/a")));

        // Assert
        assert_eq!(removed, 1);
        let remaining = registry.list(None);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].pattern(), &request().method("GET").path("/a"));
    }

    #[test]
    fn listing_does_not_consume_matches() {
        // Arrange
        let registry = ExpectationRegistry::new();
        let expectation =
            registry.register(Expectation::when(request().path("/a")).times(Times::once()));

        // Act
        let listed = registry.list(Some(&request().path("/a")));

        // Assert
        assert_eq!(listed.len(), 1);
        assert_eq!(expectation.times(), Times::Limited(1));
    }

    #[test]
    fn broad_expectations_are_listed_for_narrow_filters() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(Expectation::when(request().path("/a")));

        // Act
        let listed = registry.list(Some(&request().method("GET").path("/a")));

        // Assert
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn narrow_expectations_are_not_listed_for_broad_filters() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(Expectation::when(request().method("GET").path("/a")));

        // Act
        let listed = registry.list(Some(&request().path("/a")));

        // Assert
        assert!(listed.is_empty());
    }

    #[test]
    fn an_expectation_without_actions_answers_404() {
        // Arrange
        let registry = ExpectationRegistry::new();
        registry.register(Expectation::when(request().path("/a")));

        // Act
        let outcome = status_of(registry.match_and_consume(&get("/a")));

        // Assert
        assert_eq!(outcome, Some(404));
    }

    #[test]
    fn concurrent_requests_cannot_both_consume_the_last_match() {
        // Arrange
        let registry = Arc::new(ExpectationRegistry::new());
        registry.register(
            Expectation::when(request().path("/once"))
                .times(Times::once())
                .then_respond(respond_with(200)),
        );

        // Act
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.match_and_consume(&get("/once")).is_some())
            })
            .collect();
        let consumed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|consumed| *consumed)
            .count();

        // Assert
        assert_eq!(consumed, 1);
        assert!(registry.is_empty());
    }
}
