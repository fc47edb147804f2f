use serde_json::json;
use standin::matchers::request;
use standin::{
    CallbackError, Expectation, HttpClassCallback, HttpObjectCallback, MockServer, Request,
    ResponseTemplate,
};
use std::time::Duration;

#[tokio::test]
async fn named_callbacks_build_the_response() {
    // Arrange
    let mock_server = MockServer::start().await;
    mock_server.register_callback("echo", |request: &Request| {
        ResponseTemplate::new(200).set_body_string(format!("echo: {}", request.body_string()))
    });
    Expectation::when(request().path("/echo"))
        .then_callback(HttpClassCallback::new("echo"))
        .mount(&mock_server)
        .await;

    // Act
    let response = reqwest::Client::new()
        .post(format!("{}/echo", mock_server.uri()))
        .body("hi")
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "echo: hi");
}

#[tokio::test]
async fn named_callbacks_can_be_used_by_expectations_created_over_http() {
    // Arrange
    let mock_server = MockServer::start().await;
    mock_server.register_callback("teapot", ResponseTemplate::new(418));
    reqwest::Client::new()
        .put(format!("{}/expectation", mock_server.uri()))
        .body(
            json!({
                "httpRequest": {"path": "/tea"},
                "httpClassCallback": {"callbackClass": "teapot"}
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();

    // Act
    let status = reqwest::get(format!("{}/tea", mock_server.uri()))
        .await
        .unwrap()
        .status();

    // Assert
    assert_eq!(status, 418);
}

#[tokio::test]
async fn unknown_callbacks_answer_400() {
    // Arrange
    let mock_server = MockServer::start().await;
    Expectation::when(request())
        .then_callback(HttpClassCallback::new("missing"))
        .mount(&mock_server)
        .await;

    // Act
    let response = reqwest::get(mock_server.uri()).await.unwrap();

    // Assert
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("missing"));
}

#[tokio::test]
async fn callback_clients_answer_requests_routed_to_them() {
    // Arrange
    let mock_server = MockServer::start().await;
    let mut client = mock_server.callback_client("client-1");
    Expectation::when(request().path("/delegated"))
        .then_object_callback(HttpObjectCallback::new("client-1"))
        .mount(&mock_server)
        .await;
    let responder = tokio::spawn(async move {
        let callback = client.next_request().await.unwrap();
        let path = callback.request.url.path().to_string();
        client
            .respond(
                callback.correlation_id,
                ResponseTemplate::new(201).set_body_string(path),
            )
            .unwrap();
        // A second answer for the same request has nowhere to go.
        client.respond(callback.correlation_id, ResponseTemplate::new(500))
    });

    // Act
    let response = reqwest::get(format!("{}/delegated", mock_server.uri()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["connection"], "close");
    assert_eq!(response.text().await.unwrap(), "/delegated");
    assert!(matches!(
        responder.await.unwrap(),
        Err(CallbackError::NoPendingRequest { .. })
    ));
    assert_eq!(mock_server.received_requests().await.len(), 1);
}

#[tokio::test]
async fn requests_for_a_disconnected_client_answer_400() {
    // Arrange
    let mock_server = MockServer::start().await;
    Expectation::when(request())
        .then_object_callback(HttpObjectCallback::new("nobody"))
        .mount(&mock_server)
        .await;

    // Act
    let status = reqwest::get(mock_server.uri()).await.unwrap().status();

    // Assert
    assert_eq!(status, 400);
}

#[tokio::test]
async fn dropping_a_client_fails_its_pending_requests() {
    // Arrange
    let mock_server = MockServer::start().await;
    let mut client = mock_server.callback_client("flaky");
    Expectation::when(request())
        .then_object_callback(HttpObjectCallback::new("flaky"))
        .mount(&mock_server)
        .await;
    tokio::spawn(async move {
        // Receive the request, then go away without answering.
        let _ = client.next_request().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(client);
    });

    // Act
    let status = reqwest::get(mock_server.uri()).await.unwrap().status();

    // Assert
    assert_eq!(status, 400);
}

#[tokio::test]
async fn a_new_client_with_the_same_id_replaces_the_old_one() {
    // Arrange
    let mock_server = MockServer::start().await;
    let mut old = mock_server.callback_client("worker");
    let mut new = mock_server.callback_client("worker");
    Expectation::when(request())
        .then_object_callback(HttpObjectCallback::new("worker"))
        .mount(&mock_server)
        .await;
    tokio::spawn(async move {
        while let Some(callback) = new.next_request().await {
            let _ = new.respond(callback.correlation_id, ResponseTemplate::new(200));
        }
    });

    // Act
    let status = reqwest::get(mock_server.uri()).await.unwrap().status();

    // Assert
    assert_eq!(status, 200);
    assert!(mock_server.is_callback_client_connected("worker"));
    assert!(old.next_request().await.is_none());
}
