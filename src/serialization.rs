//! The JSON wire model of the control plane, and the rendering of expectations as Rust source.
use crate::action::{HttpClassCallback, HttpError, HttpForward, HttpObjectCallback};
use crate::error::Error;
use crate::expectation::{Expectation, ExpectationBuilder, TimeToLive, Times};
use crate::matchers::{BodyMatcher, JsonMatchType, RequestPattern, StringMatcher};
use crate::response_template::ConnectionOptions;
use crate::{Request, ResponseTemplate};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// (De)serialize bytes as a base64 string.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }

    pub(crate) mod option {
        use super::STANDARD;
        use base64::Engine as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub(crate) fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    // Tried first: a derived struct would also accept a JSON array.
    Many(Vec<T>),
    One(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn duration(self, value: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(value),
            TimeUnit::Microseconds => Duration::from_micros(value),
            TimeUnit::Milliseconds => Duration::from_millis(value),
            TimeUnit::Seconds => Duration::from_secs(value),
            TimeUnit::Minutes => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(value.saturating_mul(60 * 60)),
            TimeUnit::Days => Duration::from_secs(value.saturating_mul(24 * 60 * 60)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DelayDto {
    time_unit: TimeUnit,
    value: u64,
}

impl DelayDto {
    fn duration(&self) -> Duration {
        self.time_unit.duration(self.value)
    }
}

impl From<Duration> for DelayDto {
    fn from(delay: Duration) -> Self {
        Self {
            time_unit: TimeUnit::Milliseconds,
            value: delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimesDto {
    #[serde(default)]
    remaining_times: u64,
    #[serde(default)]
    unlimited: bool,
}

impl From<TimesDto> for Times {
    fn from(dto: TimesDto) -> Self {
        if dto.unlimited {
            Times::Unlimited
        } else {
            Times::Limited(dto.remaining_times)
        }
    }
}

impl From<Times> for TimesDto {
    fn from(times: Times) -> Self {
        Self {
            remaining_times: times.remaining().unwrap_or(0),
            unlimited: times.is_unlimited(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimeToLiveDto {
    #[serde(default = "default_time_unit")]
    time_unit: TimeUnit,
    #[serde(default)]
    time_to_live: u64,
    #[serde(default)]
    unlimited: bool,
}

fn default_time_unit() -> TimeUnit {
    TimeUnit::Seconds
}

impl TimeToLiveDto {
    /// The deadline starts running when the expectation is decoded.
    fn into_time_to_live(self) -> TimeToLive {
        if self.unlimited {
            TimeToLive::Unlimited
        } else {
            TimeToLive::exactly(self.time_unit.duration(self.time_to_live))
        }
    }

    fn from_time_to_live(time_to_live: TimeToLive, now: Instant) -> Self {
        match time_to_live.remaining_at(now) {
            None => Self {
                time_unit: TimeUnit::Seconds,
                time_to_live: 0,
                unlimited: true,
            },
            Some(remaining) => Self {
                time_unit: TimeUnit::Milliseconds,
                time_to_live: remaining.as_millis() as u64,
                unlimited: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum TypedBody {
    String {
        string: String,
    },
    Json {
        json: Value,
    },
    Binary {
        #[serde(rename = "base64Bytes", with = "base64_bytes")]
        bytes: Vec<u8>,
    },
}

/// A body on the wire: either a plain string or a typed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum BodyDto {
    Text(String),
    Typed(TypedBody),
}

impl BodyDto {
    fn from_bytes(bytes: &[u8], mime: &str) -> Self {
        if mime.starts_with("application/json") {
            if let Ok(json) = serde_json::from_slice(bytes) {
                return BodyDto::Typed(TypedBody::Json { json });
            }
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => BodyDto::Text(text.to_string()),
            Err(_) => BodyDto::Typed(TypedBody::Binary {
                bytes: bytes.to_vec(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResponseDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<BodyDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delay: Option<DelayDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection_options: Option<ConnectionOptions>,
}

impl TryFrom<ResponseDto> for ResponseTemplate {
    type Error = Error;

    fn try_from(dto: ResponseDto) -> Result<Self, Self::Error> {
        let status = StatusCode::from_u16(dto.status_code.unwrap_or(200)).map_err(Error::malformed)?;
        let headers = header_map(dto.headers)?;
        let has_content_type = headers.contains_key(CONTENT_TYPE);

        let mut template = ResponseTemplate::new(status).append_header_map(headers);
        template = match dto.body {
            None => template,
            Some(BodyDto::Text(text)) => template.set_body_bytes(text.into_bytes()),
            Some(BodyDto::Typed(TypedBody::String { string })) => {
                template.set_body_bytes(string.into_bytes())
            }
            Some(BodyDto::Typed(TypedBody::Json { json })) if has_content_type => {
                template.set_body_bytes(json.to_string().into_bytes())
            }
            Some(BodyDto::Typed(TypedBody::Json { json })) => {
                template.set_body_raw(json.to_string().into_bytes(), "application/json")
            }
            Some(BodyDto::Typed(TypedBody::Binary { bytes })) => template.set_body_bytes(bytes),
        };
        if let Some(delay) = dto.delay {
            template = template.set_delay(delay.duration());
        }
        if let Some(options) = dto.connection_options {
            template = template.set_connection_options(options);
        }
        Ok(template)
    }
}

impl From<&ResponseTemplate> for ResponseDto {
    fn from(template: &ResponseTemplate) -> Self {
        let mut headers = header_values(template.headers());
        if !template.mime().is_empty() {
            headers.insert(
                CONTENT_TYPE.as_str().to_string(),
                vec![template.mime().to_string()],
            );
        }
        Self {
            status_code: Some(template.status_code().as_u16()),
            headers,
            body: template
                .body()
                .map(|body| BodyDto::from_bytes(body, template.mime())),
            delay: template.delay().map(DelayDto::from),
            connection_options: template.connection_options().cloned(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HttpErrorDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delay: Option<DelayDto>,
    #[serde(default)]
    drop_connection: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes::option"
    )]
    response_bytes: Option<Vec<u8>>,
}

impl From<HttpErrorDto> for HttpError {
    fn from(dto: HttpErrorDto) -> Self {
        Self {
            delay: dto.delay.map(|d| d.duration()),
            drop_connection: dto.drop_connection,
            response_bytes: dto.response_bytes,
        }
    }
}

impl From<&HttpError> for HttpErrorDto {
    fn from(error: &HttpError) -> Self {
        Self {
            delay: error.delay.map(DelayDto::from),
            drop_connection: error.drop_connection,
            response_bytes: error.response_bytes.clone(),
        }
    }
}

/// An expectation as exchanged with the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExpectationDto {
    #[serde(default)]
    http_request: RequestPattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    times: Option<TimesDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_to_live: Option<TimeToLiveDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_response: Option<ResponseDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_forward: Option<HttpForward>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_error: Option<HttpErrorDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_class_callback: Option<HttpClassCallback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_object_callback: Option<HttpObjectCallback>,
}

impl TryFrom<ExpectationDto> for ExpectationBuilder {
    type Error = Error;

    fn try_from(dto: ExpectationDto) -> Result<Self, Self::Error> {
        let mut builder = Expectation::when(normalized(dto.http_request));
        if let Some(times) = dto.times {
            builder = builder.times(times.into());
        }
        if let Some(time_to_live) = dto.time_to_live {
            builder = builder.time_to_live(time_to_live.into_time_to_live());
        }
        if let Some(response) = dto.http_response {
            builder = builder.then_respond(response.try_into()?);
        }
        if let Some(forward) = dto.http_forward {
            builder = builder.then_forward(forward);
        }
        if let Some(error) = dto.http_error {
            builder = builder.then_error(error.into());
        }
        if let Some(callback) = dto.http_class_callback {
            builder = builder.then_callback(callback);
        }
        if let Some(callback) = dto.http_object_callback {
            builder = builder.then_object_callback(callback);
        }
        Ok(builder)
    }
}

impl From<&Expectation> for ExpectationDto {
    fn from(expectation: &Expectation) -> Self {
        let actions = expectation.actions();
        Self {
            http_request: expectation.pattern().clone(),
            times: Some(expectation.times().into()),
            time_to_live: Some(TimeToLiveDto::from_time_to_live(
                expectation.time_to_live(),
                Instant::now(),
            )),
            http_response: actions.response().map(ResponseDto::from),
            http_forward: actions.forward().cloned(),
            http_error: actions.error().map(HttpErrorDto::from),
            http_class_callback: actions.callback().cloned(),
            http_object_callback: actions.object_callback().cloned(),
        }
    }
}

/// A recorded request, as returned by `/retrieve?type=requests` and in verification failures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestDto {
    method: String,
    path: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    query_string_parameters: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<BodyDto>,
    keep_alive: bool,
}

impl From<&Request> for RequestDto {
    fn from(request: &Request) -> Self {
        let mut query_string_parameters: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in request.url.query_pairs() {
            query_string_parameters
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        let mime = request.first_header(CONTENT_TYPE.as_str()).unwrap_or("");
        Self {
            method: request.method.to_string(),
            path: request.url.path().to_string(),
            query_string_parameters,
            headers: header_values(&request.headers),
            cookies: request.cookies().into_iter().collect(),
            body: (!request.body.is_empty()).then(|| BodyDto::from_bytes(&request.body, mime)),
            keep_alive: request.is_keep_alive(),
        }
    }
}

/// The body of `/status` and `/bind`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PortBinding {
    #[serde(default)]
    pub(crate) ports: Vec<u16>,
}

/// Decode the body of `/expectation`: a single expectation or an array of them.
pub(crate) fn parse_expectations(body: &[u8]) -> Result<Vec<ExpectationBuilder>, Error> {
    let dtos: Vec<ExpectationDto> = match serde_json::from_slice(body).map_err(Error::malformed)? {
        OneOrMany::One(dto) => vec![dto],
        OneOrMany::Many(dtos) => dtos,
    };
    dtos.into_iter().map(ExpectationBuilder::try_from).collect()
}

/// Decode an optional JSON body: an empty body or `null` yields `None`.
pub(crate) fn parse_optional<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<Option<T>>(body).map_err(Error::malformed)
}

/// Decode an optional request pattern, e.g. the filter of `/clear` or `/retrieve`.
pub(crate) fn parse_pattern(body: &[u8]) -> Result<Option<RequestPattern>, Error> {
    Ok(parse_optional::<RequestPattern>(body)?.map(normalized))
}

pub(crate) fn parse_verification(body: &[u8]) -> Result<crate::Verification, Error> {
    let mut verification: crate::Verification =
        serde_json::from_slice(body).map_err(Error::malformed)?;
    verification.http_request = normalized(verification.http_request);
    Ok(verification)
}

pub(crate) fn parse_verification_sequence(
    body: &[u8],
) -> Result<crate::VerificationSequence, Error> {
    let mut sequence: crate::VerificationSequence =
        serde_json::from_slice(body).map_err(Error::malformed)?;
    sequence.http_requests = sequence.http_requests.into_iter().map(normalized).collect();
    Ok(sequence)
}

pub(crate) fn expectations_to_json(expectations: &[Arc<Expectation>]) -> String {
    let dtos: Vec<ExpectationDto> = expectations
        .iter()
        .map(|e| ExpectationDto::from(e.as_ref()))
        .collect();
    serde_json::to_string_pretty(&dtos).unwrap_or_default()
}

pub(crate) fn expectation_to_json(expectation: &Expectation) -> String {
    serde_json::to_string_pretty(&ExpectationDto::from(expectation)).unwrap_or_default()
}

pub(crate) fn requests_to_json(requests: &[Request]) -> String {
    let dtos: Vec<RequestDto> = requests.iter().map(RequestDto::from).collect();
    serde_json::to_string_pretty(&dtos).unwrap_or_default()
}

/// Render `expectations` as the Rust code registering them on a `mock_server`.
pub(crate) fn expectations_to_rust(expectations: &[Arc<Expectation>]) -> String {
    let mut source = String::new();
    for expectation in expectations {
        render_expectation(&mut source, expectation);
    }
    source
}

/// Method names are matched in upper case and header names are case-insensitive.
fn normalized(mut pattern: RequestPattern) -> RequestPattern {
    pattern.method = pattern
        .method
        .map(|method| StringMatcher::new(method.as_str().to_ascii_uppercase()));
    pattern.headers = pattern
        .headers
        .into_iter()
        .map(|(name, values)| (name.to_ascii_lowercase(), values))
        .collect();
    pattern
}

fn header_map(headers: BTreeMap<String, Vec<String>>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(Error::malformed)?;
        for value in values {
            let value = HeaderValue::from_str(&value).map_err(Error::malformed)?;
            map.append(name.clone(), value);
        }
    }
    Ok(map)
}

fn header_values(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        values
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    values
}

// `write!` into a `String` cannot fail.
fn render_expectation(source: &mut String, expectation: &Expectation) {
    let _ = writeln!(source, "Expectation::when(");
    render_pattern(source, expectation.pattern());
    let _ = writeln!(source, ")");
    if let Times::Limited(n) = expectation.times() {
        let _ = writeln!(source, ".times(Times::exactly({}))", n);
    }
    if let Some(remaining) = expectation.time_to_live().remaining_at(Instant::now()) {
        let _ = writeln!(
            source,
            ".time_to_live(TimeToLive::exactly(Duration::from_millis({})))",
            remaining.as_millis()
        );
    }
    let actions = expectation.actions();
    if let Some(response) = actions.response() {
        let _ = writeln!(source, ".then_respond(");
        render_response(source, response);
        let _ = writeln!(source, ")");
    }
    if let Some(forward) = actions.forward() {
        let _ = writeln!(
            source,
            ".then_forward(HttpForward::new({:?}, {}).with_scheme(Scheme::{:?}))",
            forward.host, forward.port, forward.scheme
        );
    }
    if let Some(error) = actions.error() {
        let _ = write!(
            source,
            ".then_error(HttpError::new().with_drop_connection({})",
            error.drop_connection
        );
        if let Some(delay) = error.delay {
            let _ = write!(source, ".with_delay(Duration::from_millis({}))", delay.as_millis());
        }
        if let Some(bytes) = &error.response_bytes {
            let _ = write!(source, ".with_response_bytes({})", bytes_literal(bytes));
        }
        let _ = writeln!(source, ")");
    }
    if let Some(callback) = actions.callback() {
        let _ = writeln!(
            source,
            ".then_callback(HttpClassCallback::new({:?}))",
            callback.callback_name
        );
    }
    if let Some(callback) = actions.object_callback() {
        let _ = writeln!(
            source,
            ".then_object_callback(HttpObjectCallback::new({:?}))",
            callback.client_id
        );
    }
    let _ = writeln!(source, ".mount(&mock_server)\n.await;\n");
}

fn render_pattern(source: &mut String, pattern: &RequestPattern) {
    let _ = writeln!(source, "    request()");
    if let Some(method) = &pattern.method {
        let _ = writeln!(source, "        .method({:?})", method.as_str());
    }
    if let Some(path) = &pattern.path {
        let _ = writeln!(source, "        .path({:?})", path.as_str());
    }
    for (key, values) in &pattern.query_string_parameters {
        for value in values {
            let _ = writeln!(source, "        .query_param({:?}, {:?})", key, value.as_str());
        }
    }
    for (name, values) in &pattern.headers {
        for value in values {
            let _ = writeln!(source, "        .header({:?}, {:?})", name, value.as_str());
        }
    }
    for (name, value) in &pattern.cookies {
        let _ = writeln!(source, "        .cookie({:?}, {:?})", name, value.as_str());
    }
    if let Some(body) = &pattern.body {
        let body = match body {
            BodyMatcher::String {
                string,
                sub_string: false,
            } => format!("body_string({:?})", string),
            BodyMatcher::String {
                string,
                sub_string: true,
            } => format!("body_string_contains({:?})", string),
            BodyMatcher::Regex { regex } => format!("body_regex({:?})", regex.as_str()),
            BodyMatcher::Json {
                json,
                match_type: JsonMatchType::Strict,
            } => format!("body_json(serde_json::json!({}))", json),
            BodyMatcher::Json {
                json,
                match_type: JsonMatchType::OnlyMatchingFields,
            } => format!("body_partial_json(serde_json::json!({}))", json),
            BodyMatcher::Binary { bytes } => format!("body_bytes({})", bytes_literal(bytes)),
        };
        let _ = writeln!(source, "        .body({})", body);
    }
    if let Some(keep_alive) = pattern.keep_alive {
        let _ = writeln!(source, "        .keep_alive({})", keep_alive);
    }
}

fn render_response(source: &mut String, response: &ResponseTemplate) {
    let _ = writeln!(
        source,
        "    ResponseTemplate::new({})",
        response.status_code().as_u16()
    );
    for (name, value) in response.headers() {
        let _ = writeln!(
            source,
            "        .append_header({:?}, {:?})",
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes())
        );
    }
    if let Some(body) = response.body() {
        match (std::str::from_utf8(body), response.mime()) {
            (Ok(text), "") => {
                let _ = writeln!(source, "        .set_body_bytes({:?})", text);
            }
            (Ok(text), mime) => {
                let _ = writeln!(source, "        .set_body_raw({:?}, {:?})", text, mime);
            }
            (Err(_), "") => {
                let _ = writeln!(source, "        .set_body_bytes({})", bytes_literal(body));
            }
            (Err(_), mime) => {
                let _ = writeln!(
                    source,
                    "        .set_body_raw({}, {:?})",
                    bytes_literal(body),
                    mime
                );
            }
        }
    }
    if let Some(delay) = response.delay() {
        let _ = writeln!(
            source,
            "        .set_delay(Duration::from_millis({}))",
            delay.as_millis()
        );
    }
    if let Some(options) = response.connection_options() {
        let _ = write!(source, "        .set_connection_options(ConnectionOptions::new()");
        if let Some(suppress) = options.suppress_connection_header {
            let _ = write!(source, ".with_suppress_connection_header({})", suppress);
        }
        if let Some(keep_alive) = options.keep_alive_override {
            let _ = write!(source, ".with_keep_alive_override({})", keep_alive);
        }
        if let Some(close_socket) = options.close_socket {
            let _ = write!(source, ".with_close_socket({})", close_socket);
        }
        let _ = writeln!(source, ")");
    }
}

fn bytes_literal(bytes: &[u8]) -> String {
    format!("vec!{:?}", bytes)
}
