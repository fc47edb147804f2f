use crate::action::{
    Action, ActionSet, HttpClassCallback, HttpError, HttpForward, HttpObjectCallback,
};
use crate::matchers::RequestPattern;
use crate::{MockServer, ResponseTemplate};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How many more times an [`Expectation`] may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Unlimited,
    Limited(u64),
}

impl Times {
    pub fn unlimited() -> Self {
        Times::Unlimited
    }

    pub fn once() -> Self {
        Times::Limited(1)
    }

    pub fn exactly(n: u64) -> Self {
        Times::Limited(n)
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Times::Unlimited)
    }

    pub fn has_remaining(&self) -> bool {
        !matches!(self, Times::Limited(0))
    }

    /// Matches left, `None` if unlimited.
    pub fn remaining(&self) -> Option<u64> {
        match self {
            Times::Unlimited => None,
            Times::Limited(n) => Some(*n),
        }
    }
}

/// The window of time during which an [`Expectation`] may match.
///
/// The deadline is fixed when the policy is created and never moves afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLive {
    Unlimited,
    ExpiresAt(Instant),
}

impl TimeToLive {
    pub fn unlimited() -> Self {
        TimeToLive::Unlimited
    }

    /// Expire `duration` from now.
    pub fn exactly(duration: Duration) -> Self {
        TimeToLive::ExpiresAt(Instant::now() + duration)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self {
            TimeToLive::Unlimited => false,
            TimeToLive::ExpiresAt(deadline) => now >= *deadline,
        }
    }

    /// Time left before expiry, `None` if the policy is unlimited.
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        match self {
            TimeToLive::Unlimited => None,
            TimeToLive::ExpiresAt(deadline) => Some(deadline.saturating_duration_since(now)),
        }
    }
}

/// Identity of a registered [`Expectation`]: its insertion sequence number.
///
/// Lower ids were registered earlier and take priority when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpectationId(pub(crate) u64);

impl fmt::Display for ExpectationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an [`Expectation`] is in its lifecycle.
///
/// `Exhausted` and `Expired` are terminal: the registry drops the expectation the next
/// time it comes across it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectationState {
    ActiveUnlimited,
    ActiveLimited(u64),
    Exhausted,
    Expired,
}

pub(crate) enum Consumption {
    /// The expectation matched; `exhausted` is set if that was its last allowed match.
    Consumed { exhausted: bool },
    /// Another request consumed the last allowed match first.
    AlreadyExhausted,
}

/// A rule registered on a [`MockServer`]: when an incoming request satisfies its
/// [`RequestPattern`], one of its actions is performed.
///
/// Use [`Expectation::when`] to get started.
#[derive(Debug)]
pub struct Expectation {
    id: ExpectationId,
    pattern: RequestPattern,
    times: Mutex<Times>,
    time_to_live: TimeToLive,
    actions: ActionSet,
}

impl Expectation {
    /// Start building an expectation for requests matching `pattern`.
    ///
    /// ```rust
    /// use standin::{Expectation, MockServer, ResponseTemplate, Times};
    /// use standin::matchers::request;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     let mock_server = MockServer::start().await;
    ///
    ///     Expectation::when(request().method("GET").path("/hello"))
    ///         .times(Times::exactly(2))
    ///         .then_respond(ResponseTemplate::new(200))
    ///         .mount(&mock_server)
    ///         .await;
    ///
    ///     let status = reqwest::get(format!("{}/hello", mock_server.uri()))
    ///         .await
    ///         .unwrap()
    ///         .status();
    ///     assert_eq!(status, 200);
    /// }
    /// ```
    pub fn when(pattern: RequestPattern) -> ExpectationBuilder {
        ExpectationBuilder {
            pattern,
            times: Times::Unlimited,
            time_to_live: TimeToLive::Unlimited,
            actions: ActionSet::default(),
        }
    }

    pub(crate) fn new(
        id: ExpectationId,
        pattern: RequestPattern,
        times: Times,
        time_to_live: TimeToLive,
        actions: ActionSet,
    ) -> Self {
        Self {
            id,
            pattern,
            times: Mutex::new(times),
            time_to_live,
            actions,
        }
    }

    pub fn id(&self) -> ExpectationId {
        self.id
    }

    pub fn pattern(&self) -> &RequestPattern {
        &self.pattern
    }

    pub fn times(&self) -> Times {
        *self.times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn time_to_live(&self) -> TimeToLive {
        self.time_to_live
    }

    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    /// The action performed when this expectation matches.
    pub fn action(&self) -> Action {
        self.actions.select()
    }

    pub fn state(&self) -> ExpectationState {
        self.state_at(Instant::now())
    }

    pub(crate) fn state_at(&self, now: Instant) -> ExpectationState {
        if self.time_to_live.is_expired_at(now) {
            return ExpectationState::Expired;
        }
        match self.times() {
            Times::Unlimited => ExpectationState::ActiveUnlimited,
            Times::Limited(0) => ExpectationState::Exhausted,
            Times::Limited(n) => ExpectationState::ActiveLimited(n),
        }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(
            self.state(),
            ExpectationState::ActiveUnlimited | ExpectationState::ActiveLimited(_)
        )
    }

    /// Check-and-decrement under the expectation's lock: two concurrent requests can never
    /// both consume the last allowed match.
    pub(crate) fn consume(&self) -> Consumption {
        let mut times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        match *times {
            Times::Unlimited => Consumption::Consumed { exhausted: false },
            Times::Limited(0) => Consumption::AlreadyExhausted,
            Times::Limited(n) => {
                *times = Times::Limited(n - 1);
                Consumption::Consumed {
                    exhausted: n - 1 == 0,
                }
            }
        }
    }

    /// Cap an unlimited expectation to `remaining` further matches.
    /// Returns `false` if the expectation was already limited.
    pub(crate) fn downgrade(&self, remaining: u64) -> bool {
        let mut times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        if times.is_unlimited() {
            *times = Times::Limited(remaining);
            true
        } else {
            false
        }
    }
}

/// A fluent builder for an [`Expectation`], obtained with [`Expectation::when`].
///
/// Nothing happens until the builder is [`mount`]ed on a [`MockServer`] (or registered on an
/// [`ExpectationRegistry`]).
///
/// [`mount`]: ExpectationBuilder::mount
/// [`ExpectationRegistry`]: crate::ExpectationRegistry
#[derive(Debug, Clone)]
pub struct ExpectationBuilder {
    pub(crate) pattern: RequestPattern,
    pub(crate) times: Times,
    pub(crate) time_to_live: TimeToLive,
    pub(crate) actions: ActionSet,
}

impl ExpectationBuilder {
    pub fn times(mut self, times: Times) -> Self {
        self.times = times;
        self
    }

    /// Respond to at most `n` matching requests. Panics if `n` is `0`.
    pub fn up_to_n_times(self, n: u64) -> Self {
        assert!(n > 0, "n must be strictly greater than 0!");
        self.times(Times::Limited(n))
    }

    pub fn time_to_live(mut self, time_to_live: TimeToLive) -> Self {
        self.time_to_live = time_to_live;
        self
    }

    pub fn then_respond(mut self, response: ResponseTemplate) -> Self {
        self.actions.response = Some(response);
        self
    }

    pub fn then_forward(mut self, forward: HttpForward) -> Self {
        self.actions.forward = Some(forward);
        self
    }

    pub fn then_error(mut self, error: HttpError) -> Self {
        self.actions.error = Some(error);
        self
    }

    pub fn then_callback(mut self, callback: HttpClassCallback) -> Self {
        self.actions.callback = Some(callback);
        self
    }

    pub fn then_object_callback(mut self, callback: HttpObjectCallback) -> Self {
        self.actions.object_callback = Some(callback);
        self
    }

    /// Register the expectation on `server`. It is effective as soon as this returns.
    ///
    /// `mount` is an asynchronous method, make sure to `.await` it!
    pub async fn mount(self, server: &MockServer) -> Arc<Expectation> {
        server.register(self).await
    }
}
