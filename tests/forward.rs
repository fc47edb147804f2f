use async_trait::async_trait;
use standin::matchers::request;
use standin::{
    DispatchError, Expectation, Forward, HttpForward, MockServer, Request, ResponseTemplate,
    Scheme,
};

async fn upstream() -> MockServer {
    let upstream = MockServer::start().await;
    Expectation::when(request().method("POST").path("/api/items").query_param("page", "2"))
        .then_respond(
            ResponseTemplate::new(201)
                .insert_header("x-upstream", "yes")
                .set_body_string("created upstream"),
        )
        .mount(&upstream)
        .await;
    upstream
}

#[async_std::test]
async fn forward_actions_proxy_to_another_server() {
    // Arrange
    let upstream = upstream().await;
    let mock_server = MockServer::start().await;
    Expectation::when(request().path("/api/.*"))
        .then_forward(HttpForward::new("127.0.0.1", upstream.address().port()))
        .mount(&mock_server)
        .await;

    // Act
    let response = reqwest::Client::new()
        .post(format!("{}/api/items?page=2", mock_server.uri()))
        .body("new item")
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["x-upstream"], "yes");
    assert_eq!(response.text().await.unwrap(), "created upstream");
    let forwarded = upstream.received_requests().await;
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].body, b"new item");
    assert_eq!(
        forwarded[0].first_header("host"),
        Some(format!("127.0.0.1:{}", upstream.address().port()).as_str())
    );
}

#[async_std::test]
async fn unreachable_targets_answer_400() {
    // Arrange
    let mock_server = MockServer::start().await;
    // Bind and release a port so that nothing listens on it.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    Expectation::when(request())
        .then_forward(HttpForward::new("127.0.0.1", port))
        .mount(&mock_server)
        .await;

    // Act
    let status = reqwest::get(mock_server.uri()).await.unwrap().status();

    // Assert
    assert_eq!(status, 400);
}

#[async_std::test]
async fn https_targets_are_not_supported() {
    // Arrange
    let mock_server = MockServer::start().await;
    Expectation::when(request())
        .then_forward(HttpForward::new("example.com", 443).with_scheme(Scheme::Https))
        .mount(&mock_server)
        .await;

    // Act
    let response = reqwest::get(mock_server.uri()).await.unwrap();

    // Assert
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("not supported"));
}

struct CannedForwarder;

#[async_trait]
impl Forward for CannedForwarder {
    async fn forward(
        &self,
        target: &HttpForward,
        request: &Request,
    ) -> Result<ResponseTemplate, DispatchError> {
        Ok(ResponseTemplate::new(200).set_body_string(format!(
            "{} {} via {}",
            request.method,
            request.url.path(),
            target
        )))
    }
}

#[async_std::test]
async fn the_forwarder_can_be_replaced() {
    // Arrange
    let mock_server = MockServer::builder()
        .forwarder(CannedForwarder)
        .start()
        .await;
    Expectation::when(request())
        .then_forward(HttpForward::new("upstream.local", 8080))
        .mount(&mock_server)
        .await;

    // Act
    let body = reqwest::get(format!("{}/items", mock_server.uri()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    // Assert
    assert!(body.starts_with("GET /items via "));
    assert!(body.contains("upstream.local:8080"));
}
