use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, User, APP_ID, APP_SECRET};
use serde_json::Value;
use tower::ServiceExt;

fn credentials() -> String {
    format!("app_id={APP_ID}&app_secret={APP_SECRET}")
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn form_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body.to_string())
        .unwrap()
}

fn multipart_request(uri: &str, fields: &[(&str, &str)], files: &[(&str, &str, &str)]) -> Request<String> {
    let boundary = "mockboundary";
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    for (name, file_name, contents) in files {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n{contents}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            http::header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(body)
        .unwrap()
}

fn encode(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

// --- authentication ---

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let resp = app().oneshot(get("/me")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"]["code"], 190);
    assert_eq!(body["error"]["type"], "OAuthException");
}

#[tokio::test]
async fn me_with_query_credentials() {
    let resp = app()
        .oneshot(get(&format!("/me?{}", credentials())))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert_eq!(body["id"], APP_ID);
}

// --- reply shapes ---

#[tokio::test]
async fn throttled_repeats_the_error_key() {
    let resp = app()
        .oneshot(get(&format!("/throttled?{}", credentials())))
        .await
        .unwrap();

    let body = body_bytes(resp).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.starts_with(r#"{"error":1,"error":{"code":3"#));
}

#[tokio::test]
async fn legacy_replies_are_urlencoded() {
    let resp = app()
        .oneshot(get(&format!("/legacy?{}", credentials())))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], b"access_token=legacy-token&expires=3600");
}

#[tokio::test]
async fn unknown_path_is_an_error_payload() {
    let resp = app()
        .oneshot(get(&format!("/nowhere?{}", credentials())))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"]["code"], 803);
}

// --- uploads ---

#[tokio::test]
async fn photo_upload_reads_multipart() {
    use tower::Service;

    let mut app = app().into_service();
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(form_request("POST", "/users", &format!("name=Ada&{}", credentials())))
        .await
        .unwrap();
    assert_eq!(&body_bytes(resp).await[..], b"1");

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(multipart_request(
            "/users/1/photos",
            &[("app_id", APP_ID), ("app_secret", APP_SECRET), ("caption", "beach")],
            &[("source", "beach.jpg", "jpegbytes")],
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let photo: Value = body_json(resp).await;
    assert_eq!(photo["id"], "photo-1");
    assert_eq!(photo["file_name"], "beach.jpg");
    assert_eq!(photo["bytes"], 9);
    assert_eq!(photo["caption"], "beach");
}

// --- batch ---

#[tokio::test]
async fn batch_without_parameter_is_rejected() {
    let resp = app()
        .oneshot(form_request("POST", "/", &credentials()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"]["type"], "GraphBatchException");
}

#[tokio::test]
async fn batch_over_limit_is_rejected() {
    let child = format!(r#"{{"method":"GET","relative_url":"/me?{}"}}"#, credentials());
    let batch = format!("[{}]", vec![child; 51].join(","));
    let body = encode(&[("batch", &batch), ("app_id", APP_ID), ("app_secret", APP_SECRET)]);

    let resp = app().oneshot(form_request("POST", "/", &body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_replies_in_order_with_headers() {
    let creds = credentials();
    let batch = format!(
        r#"[{{"method":"POST","relative_url":"/users","body":"name=Ada&{creds}","name":"create"}},
            {{"method":"GET","relative_url":"/users/1?{creds}","name":"fetch"}},
            {{"method":"DELETE","relative_url":"/users/7?{creds}"}}]"#
    );
    let body = encode(&[
        ("batch", &batch),
        ("include_headers", "1"),
        ("app_id", APP_ID),
        ("app_secret", APP_SECRET),
    ]);

    let resp = app().oneshot(form_request("POST", "/", &body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let replies: Vec<Value> = body_json(resp).await;
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["code"], 200);
    assert_eq!(replies[0]["body"], "1");

    let fetched: User = serde_json::from_str(replies[1]["body"].as_str().unwrap()).unwrap();
    assert_eq!(fetched.name, "Ada");
    let headers = replies[1]["headers"].as_array().unwrap();
    assert!(headers
        .iter()
        .any(|h| h["name"] == "ETag" && h["value"] == "\"user-1-1\""));

    assert_eq!(replies[2]["code"], 404);
}

#[tokio::test]
async fn batch_children_receive_attached_files() {
    let creds = credentials();
    let batch = format!(
        r#"[{{"method":"POST","relative_url":"/users","body":"name=Ada&{creds}"}},
            {{"method":"POST","relative_url":"/users/1/photos","body":"{creds}","attached_files":"file_a"}}]"#
    );

    let resp = app()
        .oneshot(multipart_request(
            "/",
            &[("batch", &batch), ("app_id", APP_ID), ("app_secret", APP_SECRET)],
            &[("file_a", "a.jpg", "abc")],
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let replies: Vec<Value> = body_json(resp).await;
    let photo: Value = serde_json::from_str(replies[1]["body"].as_str().unwrap()).unwrap();
    assert_eq!(photo["file_name"], "a.jpg");
    assert_eq!(photo["bytes"], 3);
}
