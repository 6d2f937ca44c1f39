use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use base64::Engine as _;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use virtufit_relay::{
    app::{App, AppServices},
    models::{Config, FieldMapping, RelayConfig, ResponseMode},
    upstream::{MockTryOnClient, UpstreamReply},
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(relay: RelayConfig) -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        relay,
        storage_public_url: None,
    }
}

fn relay_config(upstream: &MockServer, temp: &TempDir) -> RelayConfig {
    RelayConfig::new(Url::parse(&format!("{}/try-on", upstream.uri())).unwrap())
        .with_temp_dir(temp.path().to_path_buf())
        .with_timeout(Duration::from_secs(5))
}

fn server_for(config: Config) -> TestServer {
    TestServer::new(App::from_config(config).router()).unwrap()
}

/// JPEG-looking payload of the given size.
fn jpeg(size: usize, fill: u8) -> Vec<u8> {
    let mut bytes = vec![fill; size];
    bytes[..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    bytes
}

fn image_part(bytes: Vec<u8>, file_name: &str) -> Part {
    Part::bytes(bytes).file_name(file_name).mime_type("image/jpeg")
}

fn try_on_form(garment: Vec<u8>, subject: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_part("clothing_image", image_part(garment, "shirt.jpg"))
        .add_part("avatar_image", image_part(subject, "me.jpg"))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn leftover_files(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_large_upload_relays_binary_result() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let result = jpeg(512 * 1024, 0x42);

    Mock::given(method("POST"))
        .and(path("/try-on"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(result.clone(), "image/jpeg"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(2 * 1024 * 1024, 0x11), jpeg(3 * 1024 * 1024, 0x22)))
        .await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("content-type"), "image/jpeg");
    assert_eq!(
        response.header("content-length").to_str().unwrap(),
        result.len().to_string()
    );
    assert_eq!(response.as_bytes().as_ref(), result.as_slice());

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert!(body.len() > 5 * 1024 * 1024);
    assert!(contains(body, b"name=\"clothing_image\""));
    assert!(contains(body, b"name=\"avatar_image\""));
    assert!(contains(body, b"filename=\"shirt.jpg\""));

    assert_eq!(leftover_files(temp.path()), 0);
}

#[tokio::test]
async fn test_missing_field_never_reaches_upstream() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server
        .post("/api/try-on")
        .multipart(MultipartForm::new().add_part("avatar_image", image_part(jpeg(64, 1), "me.jpg")))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().contains("clothing_image"));
    assert_eq!(leftover_files(temp.path()), 0);
}

#[tokio::test]
async fn test_empty_file_is_rejected() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server
        .post("/api/try-on")
        .multipart(try_on_form(Vec::new(), jpeg(64, 1)))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_text_value_in_file_field_is_rejected() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let form = MultipartForm::new()
        .add_text("clothing_image", "not a file")
        .add_part("avatar_image", image_part(jpeg(64, 1), "me.jpg"));
    let response = server.post("/api/try-on").multipart(form).await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["error"], "clothing_image is required");
    assert_eq!(leftover_files(temp.path()), 0);
}

#[tokio::test]
async fn test_upstream_error_status_is_mirrored() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/try-on"))
        .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(64, 1), jpeg(64, 2)))
        .await;

    assert_eq!(response.status_code(), 500);
    let body: Value = response.json();
    assert_eq!(body["error"], "CUDA out of memory");
    assert_eq!(body["status"], 500);
}

#[tokio::test]
async fn test_json_url_result_is_wrapped() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/try-on"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "url": "https://x/y.jpg" })),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(64, 1), jpeg(64, 2)))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body, json!({ "success": true, "image": "https://x/y.jpg" }));
}

#[tokio::test]
async fn test_json_without_image_is_contract_error() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "queued" })))
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(64, 1), jpeg(64, 2)))
        .await;

    assert_eq!(response.status_code(), 500);
    let body: Value = response.json();
    assert_eq!(body["details"]["upstream_status"], 200);
}

#[tokio::test]
async fn test_non_multipart_request_is_bad_request() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server
        .post("/api/try-on")
        .json(&json!({ "clothing_image": "nope" }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("multipart/form-data"));
}

#[tokio::test]
async fn test_upstream_timeout_is_bad_gateway() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(jpeg(64, 3), "image/jpeg")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&upstream)
        .await;

    let relay = relay_config(&upstream, &temp).with_timeout(Duration::from_millis(300));
    let server = server_for(config(relay));
    let response = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(64, 1), jpeg(64, 2)))
        .await;

    assert_eq!(response.status_code(), 502);
    assert_eq!(leftover_files(temp.path()), 0);
}

#[tokio::test]
async fn test_legacy_field_names_and_pass_through_fields() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/tryon"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(jpeg(128, 9), "image/jpeg"))
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = RelayConfig::new(Url::parse(&format!("{}/tryon", upstream.uri())).unwrap())
        .with_route("/api/tryon-proxy")
        .with_fields(FieldMapping::symmetric("cloth", "person"))
        .with_forward_fields(&["cloth_type", "token"])
        .with_temp_dir(temp.path().to_path_buf());
    let server = server_for(config(relay));

    let form = MultipartForm::new()
        .add_part("cloth", image_part(jpeg(64, 1), "cloth.jpg"))
        .add_part("person", image_part(jpeg(64, 2), "person.jpg"))
        .add_text("cloth_type", "upper")
        .add_text("token", "abc123")
        .add_text("unrelated", "dropped");
    let response = server.post("/api/tryon-proxy").multipart(form).await;

    assert_eq!(response.status_code(), 200);

    let requests = upstream.received_requests().await.unwrap();
    let body = &requests[0].body;
    assert!(contains(body, b"name=\"cloth\""));
    assert!(contains(body, b"name=\"person\""));
    assert!(contains(body, b"abc123"));
    assert!(contains(body, b"upper"));
    assert!(!contains(body, b"dropped"));
}

#[tokio::test]
async fn test_get_on_relay_route_is_method_not_allowed() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    let server = server_for(config(relay_config(&upstream, &temp)));
    let response = server.get("/api/try-on").await;

    assert_eq!(response.status_code(), 405);
}

#[tokio::test]
async fn test_no_temp_files_left_after_mixed_calls() {
    let upstream = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(jpeg(256, 7), "image/jpeg"))
        .mount(&upstream)
        .await;

    let server = server_for(config(relay_config(&upstream, &temp)));

    let busy = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(1024, 1), jpeg(1024, 2)))
        .await;
    assert_eq!(busy.status_code(), 503);

    let ok = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(1024, 1), jpeg(1024, 2)))
        .await;
    assert_eq!(ok.status_code(), 200);

    let missing = server
        .post("/api/try-on")
        .multipart(MultipartForm::new().add_part("clothing_image", image_part(jpeg(1024, 1), "a.jpg")))
        .await;
    assert_eq!(missing.status_code(), 400);

    assert_eq!(leftover_files(temp.path()), 0);
}

#[tokio::test]
async fn test_binary_mode_fetches_result_url() {
    let temp = TempDir::new().unwrap();
    let result_url = "https://cdn.tryon.test/results/1.png";
    let mock = MockTryOnClient::new()
        .with_reply(UpstreamReply::json(
            reqwest::StatusCode::OK,
            &json!({ "image_url": result_url }),
        ))
        .with_fetch_reply(result_url, UpstreamReply::image("image/png", vec![0x89, 0x50, 0x4E, 0x47]));

    let relay = RelayConfig::new(Url::parse("https://tryon.test/try-on").unwrap())
        .with_response_mode(ResponseMode::Binary)
        .with_temp_dir(temp.path().to_path_buf());
    let app = App::with_services(
        AppServices {
            upstream: Arc::new(mock.clone()),
        },
        config(relay),
    );
    let server = TestServer::new(app.router()).unwrap();

    let response = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(64, 1), jpeg(64, 2)))
        .await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("content-type"), "image/png");
    assert_eq!(response.as_bytes().as_ref(), &[0x89, 0x50, 0x4E, 0x47]);
    assert_eq!(mock.get_call_count(), 1);
    assert_eq!(mock.get_fetches(), vec![result_url.to_string()]);
}

#[tokio::test]
async fn test_binary_mode_serves_inline_images_only() {
    let temp = TempDir::new().unwrap();
    let jpeg_bytes = jpeg(32, 5);
    let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg_bytes);
    let mock = MockTryOnClient::new()
        .with_reply(UpstreamReply::json(
            reqwest::StatusCode::OK,
            &json!({ "image": format!("data:image/jpeg;base64,{}", encoded) }),
        ))
        .with_reply(UpstreamReply::json(
            reqwest::StatusCode::OK,
            &json!({ "image": encoded }),
        ))
        .with_reply(UpstreamReply::json(
            reqwest::StatusCode::OK,
            &json!({ "image": "data:text/html;base64,PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==" }),
        ));

    let relay = RelayConfig::new(Url::parse("https://tryon.test/try-on").unwrap())
        .with_response_mode(ResponseMode::Binary)
        .with_temp_dir(temp.path().to_path_buf());
    let app = App::with_services(
        AppServices {
            upstream: Arc::new(mock.clone()),
        },
        config(relay),
    );
    let server = TestServer::new(app.router()).unwrap();

    for _ in 0..2 {
        let response = server
            .post("/api/try-on")
            .multipart(try_on_form(jpeg(64, 1), jpeg(64, 2)))
            .await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("content-type"), "image/jpeg");
        assert_eq!(response.as_bytes().as_ref(), jpeg_bytes.as_slice());
    }

    let html = server
        .post("/api/try-on")
        .multipart(try_on_form(jpeg(64, 1), jpeg(64, 2)))
        .await;
    assert_eq!(html.status_code(), 500);
    let body: Value = html.json();
    assert!(body["error"].as_str().unwrap().contains("not an image"));

    assert_eq!(mock.get_call_count(), 3);
    assert!(mock.get_fetches().is_empty());
    assert_eq!(leftover_files(temp.path()), 0);
}

fn download_server(mock: MockTryOnClient) -> TestServer {
    let mut config = config(RelayConfig::new(
        Url::parse("https://tryon.test/try-on").unwrap(),
    ));
    config.storage_public_url =
        Some(Url::parse("https://proj.storage.test/storage/v1/object/public/").unwrap());

    let app = App::with_services(
        AppServices {
            upstream: Arc::new(mock),
        },
        config,
    );
    TestServer::new(app.router()).unwrap()
}

#[tokio::test]
async fn test_download_image_proxies_storage_object() {
    let image_url = "https://proj.storage.test/storage/v1/object/public/product-images/shirt.png";
    let mock = MockTryOnClient::new()
        .with_fetch_reply(image_url, UpstreamReply::image("image/png", vec![0x89, 0x50, 0x4E, 0x47]));
    let server = download_server(mock);

    let response = server
        .get("/api/download-image")
        .add_query_param("url", image_url)
        .await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("content-type"), "image/png");
    assert_eq!(
        response.header("content-disposition"),
        "inline; filename=\"shirt.png\""
    );
    assert_eq!(
        response.header("cache-control"),
        "public, max-age=31536000, immutable"
    );
    assert_eq!(response.as_bytes().as_ref(), &[0x89, 0x50, 0x4E, 0x47]);
}

#[tokio::test]
async fn test_download_image_requires_url() {
    let server = download_server(MockTryOnClient::new());

    let response = server.get("/api/download-image").await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["error"], "Image URL is required");
}

#[tokio::test]
async fn test_download_image_refuses_foreign_hosts() {
    let mock = MockTryOnClient::new();
    let server = download_server(mock.clone());

    let response = server
        .get("/api/download-image")
        .add_query_param("url", "https://elsewhere.test/storage/v1/object/public/a.png")
        .await;

    assert_eq!(response.status_code(), 400);
    assert!(mock.get_fetches().is_empty());
}

#[tokio::test]
async fn test_download_image_mirrors_missing_object() {
    let server = download_server(MockTryOnClient::new());

    let response = server
        .get("/api/download-image")
        .add_query_param(
            "url",
            "https://proj.storage.test/storage/v1/object/public/gone.png",
        )
        .await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_health() {
    let server = download_server(MockTryOnClient::new());

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body, json!({ "status": "ok" }));
}
