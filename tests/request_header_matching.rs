use standin::matchers::request;
use standin::{Expectation, MockServer, ResponseTemplate};

#[async_std::test]
async fn should_match_simple_request_header() {
    // Arrange
    let mock_server = MockServer::start().await;
    let expectation = Expectation::when(
        request()
            .method("GET")
            .header("content-type", "application/json"),
    )
    .then_respond(ResponseTemplate::new(200));
    mock_server.register(expectation).await;

    // Act
    let should_match = reqwest::Client::new()
        .get(mock_server.uri())
        .header("content-type", "application/json")
        .send()
        .await
        .unwrap();
    // Assert
    assert_eq!(should_match.status(), 200);
}

#[async_std::test]
async fn should_not_match_simple_request_header_upon_wrong_key() {
    // Arrange
    let mock_server = MockServer::start().await;
    let expectation = Expectation::when(
        request()
            .method("GET")
            .header("content-type", "application/json"),
    )
    .then_respond(ResponseTemplate::new(200));
    mock_server.register(expectation).await;

    // Act
    let should_fail_wrong_key = reqwest::Client::new()
        .get(mock_server.uri())
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    // Assert
    assert_eq!(should_fail_wrong_key.status(), 404);
}

#[async_std::test]
async fn should_not_match_simple_request_header_upon_wrong_value() {
    // Arrange
    let mock_server = MockServer::start().await;
    let expectation = Expectation::when(
        request()
            .method("GET")
            .header("content-type", "application/json"),
    )
    .then_respond(ResponseTemplate::new(200));
    mock_server.register(expectation).await;

    // Act
    let should_fail_wrong_value = reqwest::Client::new()
        .get(mock_server.uri())
        .header("content-type", "application/xml")
        .send()
        .await
        .unwrap();
    // Assert
    assert_eq!(should_fail_wrong_value.status(), 404);
}

#[async_std::test]
async fn header_names_are_case_insensitive() {
    // Arrange
    let mock_server = MockServer::start().await;
    let expectation = Expectation::when(request().header("X-Request-Id", "[0-9]+"))
        .then_respond(ResponseTemplate::new(200));
    mock_server.register(expectation).await;

    // Act
    let response = reqwest::Client::new()
        .get(mock_server.uri())
        .header("x-request-id", "42")
        .send()
        .await
        .unwrap();
    // Assert
    assert_eq!(response.status(), 200);
}

#[async_std::test]
async fn should_match_multi_request_header() {
    // Arrange
    let mock_server = MockServer::start().await;
    let expectation = Expectation::when(
        request()
            .header("cache-control", "no-cache")
            .header("cache-control", "no-store"),
    )
    .then_respond(ResponseTemplate::new(200));
    mock_server.register(expectation).await;

    // Act
    let should_match = reqwest::Client::new()
        .get(mock_server.uri())
        .header("cache-control", "no-cache, no-store")
        .send()
        .await
        .unwrap();
    let should_fail = reqwest::Client::new()
        .get(mock_server.uri())
        .header("cache-control", "no-cache")
        .send()
        .await
        .unwrap();
    // Assert
    assert_eq!(should_match.status(), 200);
    assert_eq!(should_fail.status(), 404);
}
