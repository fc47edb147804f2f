use reqwest::Client;
use standin::matchers::request;
use standin::{Expectation, HttpError, MockServer, ResponseTemplate};
use std::time::{Duration, Instant};

async fn test_body() {
    // Arrange
    let mock_server = MockServer::start().await;

    let response = ResponseTemplate::new(200).set_delay(Duration::from_secs(60));
    Expectation::when(request())
        .then_respond(response)
        .mount(&mock_server)
        .await;

    // Act
    let outcome = Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap()
        .get(&mock_server.uri())
        .send()
        .await;

    // Assert
    assert!(outcome.is_err());
}

#[actix_rt::test]
async fn request_times_out_if_the_server_takes_too_long_with_actix() {
    test_body().await
}

#[tokio::test]
async fn request_times_out_if_the_server_takes_too_long_with_tokio() {
    test_body().await
}

#[tokio::test]
async fn a_delayed_response_does_not_hold_up_other_connections() {
    // Arrange
    let mock_server = MockServer::start().await;
    Expectation::when(request().path("/slow"))
        .then_respond(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;
    Expectation::when(request().path("/fast"))
        .then_respond(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    let slow_uri = format!("{}/slow", mock_server.uri());
    let slow = tokio::spawn(async move { reqwest::get(slow_uri).await.unwrap().status() });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Act
    let start = Instant::now();
    let fast = reqwest::get(format!("{}/fast", mock_server.uri()))
        .await
        .unwrap()
        .status();

    // Assert
    assert_eq!(fast, 200);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(slow.await.unwrap(), 200);
}

#[tokio::test]
async fn error_actions_wait_for_their_delay() {
    // Arrange
    let mock_server = MockServer::start().await;
    Expectation::when(request())
        .then_error(
            HttpError::new()
                .with_delay(Duration::from_millis(300))
                .with_drop_connection(true),
        )
        .mount(&mock_server)
        .await;

    // Act
    let start = Instant::now();
    let outcome = reqwest::get(mock_server.uri()).await;

    // Assert
    assert!(outcome.is_err());
    assert!(start.elapsed() >= Duration::from_millis(300));
}
