use cloudrender_engine::{
    PooledTransport, RestErrorKind, RestRequest, RestTransport, TransportSettings,
    TOKEN_EXPIRED_MESSAGE,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> PooledTransport {
    PooledTransport::new(TransportSettings::default())
}

#[tokio::test]
async fn get_carries_the_auth_header_and_returns_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/project"))
        .and(header("auth", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "j1" }])))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport()
        .request(RestRequest::get(format!("{}/project", server.uri())).auth(Some("tok-1")))
        .await
        .expect("request ok");

    assert_eq!(response.status, 200);
    assert_eq!(response.json().unwrap(), json!([{ "id": "j1" }]));
}

#[tokio::test]
async fn post_json_sends_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/project/j1/startPay"))
        .and(body_json(json!({ "fromBeginning": true, "chips": 2.5 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/project/j1/startPay", server.uri());
    let response = transport()
        .request(RestRequest::post_json(url, json!({ "fromBeginning": true, "chips": 2.5 })))
        .await
        .expect("request ok");
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn unauthorized_is_reported_as_token_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;

    let err = transport()
        .request(RestRequest::get(format!("{}/project", server.uri())))
        .await
        .unwrap_err();

    assert!(err.is_token_expired());
    assert_eq!(err.to_string(), TOKEN_EXPIRED_MESSAGE);
    assert_eq!(err.status, Some(401));
}

#[tokio::test]
async fn server_errors_include_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = transport()
        .request(RestRequest::get(format!("{}/project", server.uri())))
        .await
        .unwrap_err();

    assert_eq!(err.kind, RestErrorKind::Server);
    assert_eq!(err.to_string(), "503: Server Error: maintenance");
}

#[tokio::test]
async fn put_returns_response_headers() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/part/1"))
        .and(body_string("chunk"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"etag-1\""))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport()
        .request(RestRequest::put_bytes(
            format!("{}/part/1", server.uri()),
            b"chunk".to_vec(),
        ))
        .await
        .expect("put ok");

    assert_eq!(response.header("etag"), Some("\"etag-1\""));
}

#[tokio::test]
async fn post_data_sends_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/complete"))
        .and(body_string("<CompleteMultipartUpload/>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    transport()
        .request(RestRequest::post_text(
            format!("{}/complete", server.uri()),
            "<CompleteMultipartUpload/>",
        ))
        .await
        .expect("post ok");
}

#[tokio::test]
async fn unreachable_host_is_a_transport_failure_without_secrets() {
    let err = transport()
        .request(RestRequest::get("http://127.0.0.1:9/project").auth(Some("very-secret")))
        .await
        .unwrap_err();

    assert!(matches!(err.kind, RestErrorKind::Transport | RestErrorKind::Timeout));
    assert!(err.to_string().contains("http://127.0.0.1:9/project"));
    assert!(err.to_string().contains("method=GET"));
    assert!(!err.to_string().contains("very-secret"));
}
