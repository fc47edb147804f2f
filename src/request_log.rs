use crate::matchers::RequestPattern;
use crate::serialization::RequestDto;
use crate::verification::{Verification, VerificationFailure, VerificationSequence};
use crate::{Request, ResponseTemplate};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A request received by the server and, once known, the response it got.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub request: Request,
    pub response: Option<ResponseTemplate>,
}

/// The history of the requests served outside of the control plane.
#[derive(Debug, Default)]
pub(crate) struct RequestLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl RequestLog {
    pub(crate) fn record(&self, request: Request) {
        self.entries().push(LogEntry {
            request,
            response: None,
        });
    }

    pub(crate) fn record_response(&self, request: Request, response: ResponseTemplate) {
        self.entries().push(LogEntry {
            request,
            response: Some(response),
        });
    }

    /// Drop the entries whose request matches `filter`, or all of them if `None`.
    pub(crate) fn clear(&self, filter: Option<&RequestPattern>) {
        match filter {
            Some(filter) => self.entries().retain(|e| !filter.matches(&e.request)),
            None => self.reset(),
        }
    }

    pub(crate) fn reset(&self) {
        self.entries().clear();
    }

    /// The recorded requests matching `filter` (all of them if `None`), oldest first.
    pub(crate) fn retrieve(&self, filter: Option<&RequestPattern>) -> Vec<Request> {
        self.entries()
            .iter()
            .filter(|e| filter.map_or(true, |filter| filter.matches(&e.request)))
            .map(|e| e.request.clone())
            .collect()
    }

    pub(crate) fn entries_snapshot(&self) -> Vec<LogEntry> {
        self.entries().clone()
    }

    pub(crate) fn verify(&self, verification: &Verification) -> Result<(), VerificationFailure> {
        let requests = self.retrieve(None);
        let matched = requests
            .iter()
            .filter(|r| verification.http_request.matches(r))
            .count() as u64;
        if verification.times.contains(matched) {
            return Ok(());
        }
        Err(VerificationFailure(format!(
            "Request not found {}, expected:<{}> but was:<{}>",
            verification.times,
            to_json(&verification.http_request),
            requests_json(&requests),
        )))
    }

    /// Requests matching each pattern must have been received in order, with any number of
    /// other requests in between.
    pub(crate) fn verify_sequence(
        &self,
        sequence: &VerificationSequence,
    ) -> Result<(), VerificationFailure> {
        let requests = self.retrieve(None);
        let mut remaining = requests.iter();
        for pattern in &sequence.http_requests {
            if !remaining.any(|r| pattern.matches(r)) {
                return Err(VerificationFailure(format!(
                    "Request sequence not found, expected:<{}> but was:<{}>",
                    to_json(&sequence.http_requests),
                    requests_json(&requests),
                )));
            }
        }
        Ok(())
    }

    fn entries(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn requests_json(requests: &[Request]) -> String {
    let requests: Vec<RequestDto> = requests.iter().map(RequestDto::from).collect();
    to_json(&requests)
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::request;
    use crate::verification::VerificationTimes;
    use http::Method;
    use url::Url;

    fn get(path: &str) -> Request {
        Request::new(
            Method::GET,
            Url::parse(&format!("http://localhost{}", path)).unwrap(),
        )
    }

    fn log_of(paths: &[&str]) -> RequestLog {
        let log = RequestLog::default();
        for path in paths {
            log.record_response(get(path), ResponseTemplate::new(200));
        }
        log
    }

    #[test]
    fn verification_counts_matching_requests() {
        let log = log_of(&["/a", "/b", "/a"]);

        let twice = Verification::new(request().path("/a")).times(VerificationTimes::exactly(2));
        let once = Verification::new(request().path("/a")).times(VerificationTimes::once());

        assert!(log.verify(&twice).is_ok());
        let failure = log.verify(&once).unwrap_err();
        assert!(failure
            .message()
            .starts_with("Request not found exactly once, expected:<"));
        assert!(failure.message().contains("\"/b\""));
    }

    #[test]
    fn verifying_zero_requests_succeeds_on_an_empty_log() {
        let log = RequestLog::default();

        let never = Verification::new(request().path("/a")).times(VerificationTimes::exactly(0));

        assert!(log.verify(&never).is_ok());
    }

    #[test]
    fn sequences_allow_gaps_but_not_reordering() {
        let log = log_of(&["/a", "/noise", "/b", "/c"]);

        let in_order = VerificationSequence::new()
            .then(request().path("/a"))
            .then(request().path("/c"));
        let reversed = VerificationSequence::new()
            .then(request().path("/c"))
            .then(request().path("/a"));

        assert!(log.verify_sequence(&in_order).is_ok());
        let failure = log.verify_sequence(&reversed).unwrap_err();
        assert!(failure.message().starts_with("Request sequence not found"));
    }

    #[test]
    fn clearing_with_a_pattern_only_drops_matching_entries() {
        let log = log_of(&["/a", "/b"]);
        log.record(get("/a"));

        log.clear(Some(&request().path("/a")));

        let remaining = log.retrieve(None);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url.path(), "/b");
    }
}
