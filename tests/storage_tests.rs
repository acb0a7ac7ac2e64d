//! ImageKit client against a mock HTTP server.

use base64::{Engine as _, engine::general_purpose};
use mediashare_be::config::StorageSettings;
use mediashare_be::dtos::upload_dtos::UploadRequest;
use mediashare_be::models::NewPost;
use mediashare_be::services::{ImageKitClient, StorageError};
use mockito::Matcher;
use uuid::Uuid;

const KEY: &str = "private_test_key_123";

fn client_for(server: &mockito::Server) -> ImageKitClient {
    ImageKitClient::new(StorageSettings {
        private_key: Some(KEY.to_string()),
        url_endpoint: Some("https://ik.imagekit.io/demo".to_string()),
        upload_url: format!("{}/api/v1/files/upload", server.url()),
        api_url: format!("{}/v1", server.url()),
    })
    .unwrap()
}

fn basic_auth() -> String {
    format!("Basic {}", general_purpose::STANDARD.encode(format!("{KEY}:")))
}

#[tokio::test]
async fn test_upload_sends_multipart_with_basic_auth() {
    let mut server = mockito::Server::new_async().await;

    let m = server
        .mock("POST", "/api/v1/files/upload")
        .match_header("authorization", basic_auth().as_str())
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data; boundary=".to_string()),
        )
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="fileName"\r\n\r\ncat\.png"#.to_string()),
            Matcher::Regex(r#"name="useUniqueFileName"\r\n\r\ntrue"#.to_string()),
            Matcher::Regex(r#"name="folder"\r\n\r\n/posts"#.to_string()),
            Matcher::Regex(r#"name="tags"\r\n\r\nfeed,cats"#.to_string()),
            Matcher::Regex(r#"name="file"; filename="cat\.png""#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "fileId": "6673f0b1a",
                "name": "cat_a1B2c3.png",
                "url": "https://ik.imagekit.io/demo/posts/cat_a1B2c3.png",
                "thumbnailUrl": "https://ik.imagekit.io/demo/tr:n-ik_ml_thumbnail/posts/cat_a1B2c3.png",
                "filePath": "/posts/cat_a1B2c3.png",
                "fileType": "image",
                "size": 5,
                "height": 1,
                "width": 1
            }"#,
        )
        .expect(1)
        .create_async()
        .await;

    let c = client_for(&server);
    let req = UploadRequest::new(b"PNG!!".to_vec(), "cat.png", "image/png")
        .folder("/posts")
        .tag("feed")
        .tag("cats");
    let uploaded = c.upload(req).await.unwrap();

    m.assert_async().await;
    assert_eq!(uploaded.file_id, "6673f0b1a");
    assert_eq!(uploaded.url, "https://ik.imagekit.io/demo/posts/cat_a1B2c3.png");
    assert_eq!(uploaded.file_path, "/posts/cat_a1B2c3.png");
    assert_eq!(uploaded.size, Some(5));

    // the URL is what ends up on the post
    let user_id = Uuid::new_v4();
    let post = NewPost::from_upload(user_id, Some("my cat".into()), "image/png", &uploaded);
    assert_eq!(post.url, uploaded.url);
    assert_eq!(post.file_type, "image");
    assert_eq!(post.file_name, "cat_a1B2c3.png");
}

#[tokio::test]
async fn test_upload_surfaces_rejected_credentials() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/api/v1/files/upload")
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"Your account cannot be authenticated.","help":"For support kindly contact us at support@imagekit.io ."}"#)
        .expect(1)
        .create_async()
        .await;

    let c = client_for(&server);
    let err = c
        .upload(UploadRequest::new(vec![0; 4], "a.bin", "application/octet-stream"))
        .await
        .unwrap_err();

    m.assert_async().await;
    match err {
        StorageError::Api { status, message } => {
            assert_eq!(status, 403);
            assert!(message.contains("cannot be authenticated"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_upload_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/api/v1/files/upload")
        .with_status(500)
        .with_body("boom")
        .expect(1)
        .create_async()
        .await;

    let c = client_for(&server);
    let err = c
        .upload(UploadRequest::new(vec![1], "a.png", "image/png"))
        .await
        .unwrap_err();
    m.assert_async().await;
    assert!(matches!(err, StorageError::Api { status: 500, .. }));
}

#[tokio::test]
async fn test_unreachable_host_is_an_http_error() {
    let c = ImageKitClient::new(StorageSettings {
        private_key: Some(KEY.to_string()),
        upload_url: "http://127.0.0.1:1/api/v1/files/upload".to_string(),
        ..StorageSettings::default()
    })
    .unwrap();

    let err = c
        .upload(UploadRequest::new(vec![1], "a.png", "image/png"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Http(_)));
}

#[tokio::test]
async fn test_delete_file_encodes_id() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("DELETE", "/v1/files/abc%2Fdef")
        .match_header("authorization", basic_auth().as_str())
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let c = client_for(&server);
    c.delete_file("abc/def").await.unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn test_delete_missing_file() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("DELETE", "/v1/files/nope")
        .with_status(404)
        .with_body(r#"{"message":"The requested file does not exist."}"#)
        .create_async()
        .await;

    let c = client_for(&server);
    let err = c.delete_file("nope").await.unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}
