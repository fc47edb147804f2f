use reqwest::Client;
use standin::matchers::request;
use standin::{Expectation, MockServer, ResponseTemplate};

// Running both tests will _sometimes_ trigger a hang if the runtimes aren't separated correctly.

#[tokio::test]
async fn hello_reqwest() {
    let mock_server = MockServer::start().await;

    Expectation::when(request().method("GET").path("/"))
        .then_respond(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let resp = Client::new().get(&mock_server.uri()).send().await.unwrap();

    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn hello_reqwest_actix() {
    let mock_server = MockServer::start().await;

    Expectation::when(request().method("GET").path("/"))
        .then_respond(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let resp = Client::new().get(&mock_server.uri()).send().await.unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_share_limited_expectations() {
    let mock_server = MockServer::start().await;

    Expectation::when(request().path("/ticket"))
        .up_to_n_times(10)
        .then_respond(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = Client::new();
    let mut handles = Vec::new();
    for _ in 0..25 {
        let client = client.clone();
        let uri = format!("{}/ticket", mock_server.uri());
        handles.push(tokio::spawn(async move {
            client.get(uri).send().await.unwrap().status().as_u16()
        }));
    }
    let mut served = 0;
    for handle in handles {
        if handle.await.unwrap() == 200 {
            served += 1;
        }
    }

    assert_eq!(served, 10);
    assert_eq!(mock_server.received_requests().await.len(), 25);
}
