use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use ppk_converter::config::ConverterConfig;
use ppk_converter::models::KeyFormat;
use ppk_converter::services::converter::{ConverterError, KeyConverter};
use ppk_converter::{AppState, create_app};
use serde_json::Value;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "---------------------------123456789012345678901234567";

/// Stands in for puttygen: writes `<format>:<input bytes>` to the output path
#[derive(Default)]
struct FakeConverter {
    fail_on: Option<KeyFormat>,
    /// Report success without writing anything
    silent: bool,
    inputs: Mutex<Vec<PathBuf>>,
}

#[async_trait::async_trait]
impl KeyConverter for FakeConverter {
    async fn convert(
        &self,
        input: &Path,
        format: KeyFormat,
        output: &Path,
    ) -> Result<(), ConverterError> {
        self.inputs.lock().unwrap().push(input.to_path_buf());

        if self.fail_on == Some(format) {
            // Leave a partial file behind, as a crashing tool might
            tokio::fs::write(output, b"partial").await.unwrap();
            return Err(ConverterError::Failed {
                format,
                status: "exit status: 1".to_string(),
                stderr: format!("puttygen: unable to load key file {}", input.display()),
            });
        }

        if self.silent {
            return Ok(());
        }

        let mut data = format!("{}:", format).into_bytes();
        data.extend(tokio::fs::read(input).await.unwrap());
        tokio::fs::write(output, data).await.unwrap();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct TestApp {
    app: Router,
    config: ConverterConfig,
    converter: Arc<FakeConverter>,
    _root: TempDir,
}

fn setup(converter: FakeConverter) -> TestApp {
    let _ = tracing_subscriber::fmt::try_init();
    let root = tempfile::tempdir().unwrap();
    let config = ConverterConfig::development(root.path());
    let converter = Arc::new(converter);
    let state = AppState::new(config.clone(), converter.clone());
    TestApp {
        app: create_app(state),
        config,
        converter,
        _root: root,
    }
}

fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
        Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn convert_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/convert")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// File names under a directory; a missing directory is an empty snapshot
fn snapshot(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

fn assert_no_residue(config: &ConverterConfig) {
    assert_eq!(snapshot(&config.uploads_dir), Vec::<String>::new());
    assert_eq!(snapshot(&config.converted_dir), Vec::<String>::new());
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn zip_entries(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries.sort();
    entries
}

#[tokio::test]
async fn test_convert_returns_archive_and_cleans_up() {
    let t = setup(FakeConverter::default());
    let before_uploads = snapshot(&t.config.uploads_dir);
    let before_converted = snapshot(&t.config.converted_dir);

    let response = t
        .app
        .clone()
        .oneshot(convert_request(multipart_body(
            "key",
            "hostkey.ppk",
            b"PuTTY-User-Key-File-3: ssh-ed25519",
        )))
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        status,
        StatusCode::OK,
        "Convert failed: {}",
        String::from_utf8_lossy(&body)
    );
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"hostkey.zip\""));
    assert!(headers.contains_key("x-request-id"));

    assert_eq!(
        zip_entries(&body),
        vec![
            (
                "hostkey".to_string(),
                "private-openssh:PuTTY-User-Key-File-3: ssh-ed25519".to_string()
            ),
            (
                "hostkey.pub".to_string(),
                "public-openssh:PuTTY-User-Key-File-3: ssh-ed25519".to_string()
            ),
        ]
    );

    // Both invocations read the same token-prefixed staged file
    let inputs = t.converter.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0], inputs[1]);
    let staged_name = inputs[0].file_name().unwrap().to_str().unwrap().to_string();
    assert!(staged_name.ends_with("_hostkey.ppk"));
    assert_ne!(staged_name, "hostkey.ppk");

    assert_eq!(snapshot(&t.config.uploads_dir), before_uploads);
    assert_eq!(snapshot(&t.config.converted_dir), before_converted);
}

#[tokio::test]
async fn test_archive_names_keep_underscores() {
    let t = setup(FakeConverter::default());

    let response = t
        .app
        .clone()
        .oneshot(convert_request(multipart_body(
            "key",
            "my_deploy_key.PPK",
            b"key",
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let names: Vec<String> = zip_entries(&body).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["my_deploy_key", "my_deploy_key.pub"]);
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_oversized_upload_never_staged() {
    let t = setup(FakeConverter::default());
    let oversized = vec![b'A'; t.config.max_file_size_bytes() + 1];

    let response = t
        .app
        .clone()
        .oneshot(convert_request(multipart_body("key", "big.ppk", &oversized)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "FILE_TOO_LARGE");
    assert_eq!(json["error"]["message"], "File must be below 1 MB");

    assert!(t.converter.inputs.lock().unwrap().is_empty());
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_wrong_extension_rejected_regardless_of_content() {
    let t = setup(FakeConverter::default());

    for filename in ["hostkey.pem", "hostkey", "hostkey.ppk.txt"] {
        let response = t
            .app
            .clone()
            .oneshot(convert_request(multipart_body(
                "key",
                filename,
                b"PuTTY-User-Key-File-3: ssh-rsa",
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", filename);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "INVALID_EXTENSION");
        assert_eq!(json["error"]["message"], "File must be putty format (.ppk)");
    }

    assert!(t.converter.inputs.lock().unwrap().is_empty());
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_missing_file_rejected() {
    let t = setup(FakeConverter::default());

    // Only an unrelated field
    let body = format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"comment\"\r\n\r\n\
        hello\r\n\
        --{BOUNDARY}--\r\n"
    );
    let response = t
        .app
        .clone()
        .oneshot(convert_request(body.into_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "MISSING_FILE");
    assert_eq!(json["error"]["message"], "Please select a file");

    // Not multipart at all
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/convert")
                .header("Content-Type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_second_key_field_rejected() {
    let t = setup(FakeConverter::default());

    let mut body = format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"key\"; filename=\"a.ppk\"\r\n\r\n\
        first\r\n"
    )
    .into_bytes();
    body.extend(multipart_body("key", "b.ppk", b"second"));

    let response = t.app.clone().oneshot(convert_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(t.converter.inputs.lock().unwrap().is_empty());
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_public_key_failure_cleans_partial_outputs() {
    let t = setup(FakeConverter {
        fail_on: Some(KeyFormat::PublicOpenSsh),
        ..Default::default()
    });

    let response = t
        .app
        .clone()
        .oneshot(convert_request(multipart_body("key", "hostkey.ppk", b"broken")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "CONVERSION_ERROR");

    // Tool diagnostics and paths stay server-side
    let rendered = json.to_string();
    assert!(!rendered.contains("puttygen"));
    assert!(!rendered.contains("hostkey"));
    assert!(!rendered.contains(t.config.uploads_dir.to_str().unwrap()));

    assert_eq!(t.converter.inputs.lock().unwrap().len(), 2);
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_private_key_failure_skips_public_invocation() {
    let t = setup(FakeConverter {
        fail_on: Some(KeyFormat::PrivateOpenSsh),
        ..Default::default()
    });

    let response = t
        .app
        .clone()
        .oneshot(convert_request(multipart_body("key", "hostkey.ppk", b"broken")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(t.converter.inputs.lock().unwrap().len(), 1);
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_archive_failure_cleans_partial_archive() {
    let t = setup(FakeConverter {
        silent: true,
        ..Default::default()
    });

    let response = t
        .app
        .clone()
        .oneshot(convert_request(multipart_body("key", "hostkey.ppk", b"ppk")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "ARCHIVE_ERROR");
    assert_eq!(
        json["error"]["message"],
        "Key conversion failed. Please try again later."
    );

    assert_eq!(t.converter.inputs.lock().unwrap().len(), 2);
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_storage_failure_reported_as_internal_error() {
    let t = setup(FakeConverter::default());
    // A plain file where the uploads directory should be
    std::fs::create_dir_all(t.config.uploads_dir.parent().unwrap()).unwrap();
    std::fs::write(&t.config.uploads_dir, b"not a directory").unwrap();

    let response = t
        .app
        .clone()
        .oneshot(convert_request(multipart_body("key", "hostkey.ppk", b"ppk")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "STORAGE_ERROR");

    assert!(t.converter.inputs.lock().unwrap().is_empty());
    assert_eq!(
        std::fs::read(&t.config.uploads_dir).unwrap(),
        b"not a directory".to_vec()
    );
    assert_eq!(snapshot(&t.config.converted_dir), Vec::<String>::new());
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let t = setup(FakeConverter::default());
    const N: usize = 8;

    let mut handles = Vec::new();
    for i in 0..N {
        let app = t.app.clone();
        handles.push(tokio::spawn(async move {
            let content = format!("key-material-{}", i);
            let response = app
                .oneshot(convert_request(multipart_body(
                    "key",
                    "shared.ppk",
                    content.as_bytes(),
                )))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (content, zip_entries(&body))
        }));
    }

    for handle in handles {
        let (content, entries) = handle.await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("shared".to_string(), format!("private-openssh:{}", content)),
                ("shared.pub".to_string(), format!("public-openssh:{}", content)),
            ]
        );
    }

    let inputs = t.converter.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), N * 2);
    let distinct: HashSet<_> = inputs.into_iter().collect();
    assert_eq!(distinct.len(), N);
    assert_no_residue(&t.config);
}

#[tokio::test]
async fn test_health_reports_converter() {
    let t = setup(FakeConverter::default());

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["converter"], "available");
}

#[tokio::test]
async fn test_cors_allows_configured_origin_only() {
    let t = setup(FakeConverter::default());

    let preflight = |origin: &str| {
        Request::builder()
            .method("OPTIONS")
            .uri("/convert")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    };

    let response = t
        .app
        .clone()
        .oneshot(preflight("http://localhost:5173"))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );

    let response = t
        .app
        .clone()
        .oneshot(preflight("https://evil.example"))
        .await
        .unwrap();
    assert!(
        !response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );
}
