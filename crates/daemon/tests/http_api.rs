//! End-to-end tests of the HTTP surface.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot` against
//! a temporary tree and grant store.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use bytes::Bytes;
use daemon::config::Config;
use daemon::files::range::RangePolicy;
use daemon::files::{FileError, Grant, GrantStore, ImageTransform, SizePolicy, TransformedImage};
use daemon::server::{router, AppState, PARTIAL_HEADER};
use http_body_util::BodyExt;
use protocol::{DirEntry, ErrorResponse, MimeCategory, PrincipalInfo};
use tempfile::TempDir;
use tower::ServiceExt;
use zip::ZipArchive;

const ANA: &str = "ana@example.com";
const BEN: &str = "ben@example.com";

struct TestServer {
    root: TempDir,
    _state_dir: TempDir,
    state: AppState,
}

fn create_tree(root: &Path) {
    fs::create_dir_all(root.join("photos/2024")).unwrap();
    fs::create_dir_all(root.join("private")).unwrap();
    fs::create_dir_all(root.join("music")).unwrap();

    let clip: Vec<u8> = (0..100u8).collect();
    fs::write(root.join("music/clip.mp3"), &clip).unwrap();
    fs::write(root.join("photos/cover.jpg"), b"jpeg-bytes").unwrap();
    fs::write(root.join("photos/2024/beach.png"), b"png-bytes").unwrap();
    fs::write(root.join("photos/2024/notes.txt"), b"sunny").unwrap();
    fs::write(root.join("private/plan.pdf"), b"secret").unwrap();
}

fn setup_with(configure: impl FnOnce(&mut Config)) -> TestServer {
    let root = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    create_tree(root.path());

    let mut config = Config::default();
    config.files.root = root.path().to_path_buf();
    config.daemon.data_dir = state_dir.path().to_path_buf();
    configure(&mut config);
    config.validate().unwrap();

    let grants = Arc::new(GrantStore::new(config.grants_path()));
    grants
        .set_grants(
            ANA,
            vec![
                Grant::read_only("/photos").unwrap(),
                Grant::read_only("/music").unwrap(),
            ],
        )
        .unwrap();
    grants
        .set_grants(BEN, vec![Grant::read_write("/").unwrap()])
        .unwrap();

    let state = AppState::from_config(&config, grants).unwrap();
    TestServer {
        root,
        _state_dir: state_dir,
        state,
    }
}

fn setup() -> TestServer {
    setup_with(|_| {})
}

impl TestServer {
    async fn get(&self, uri: &str, principal: Option<&str>) -> Response<Body> {
        self.get_with(uri, principal, &[]).await
    }

    async fn get_with(
        &self,
        uri: &str,
        principal: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut request = Request::builder().uri(uri);
        if let Some(principal) = principal {
            request = request.header("x-forwarded-email", principal);
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        router(self.state.clone())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn error_body(response: Response<Body>) -> ErrorResponse {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_missing_principal_is_unauthorized() {
    let server = setup();
    let response = server.get("/list?path=/photos", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_reports_grants() {
    let server = setup();
    let response = server.get("/me", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let info: PrincipalInfo = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(info.principal, ANA);
    let prefixes: Vec<&str> = info.grants.iter().map(|g| g.path_prefix.as_str()).collect();
    assert_eq!(prefixes, vec!["/photos/", "/music/"]);
}

#[tokio::test]
async fn test_list_permitted_folder() {
    let server = setup();
    let response = server.get("/list?path=/photos", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(PARTIAL_HEADER).is_none());

    let entries: Vec<DirEntry> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.virtual_path.as_str()).collect();
    assert_eq!(paths, vec!["/photos/2024", "/photos/cover.jpg"]);

    let cover = &entries[1];
    assert!(cover.is_file);
    assert_eq!(cover.size_bytes, Some(10));
    assert_eq!(cover.mime_category, Some(MimeCategory::Image));
}

#[tokio::test]
async fn test_list_recursive() {
    let server = setup();
    let response = server
        .get("/list?path=/photos&recursive=true", Some(ANA))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let entries: Vec<DirEntry> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries
        .iter()
        .any(|e| e.virtual_path == "/photos/2024/beach.png"));
}

#[tokio::test]
async fn test_root_listing_filters_by_grant() {
    let server = setup();

    // Ana has no grant on the root itself.
    let response = server.get("/list", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server.get("/list", Some(BEN)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let entries: Vec<DirEntry> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(entries.len(), 3);
}

#[tokio::test]
async fn test_forbidden_does_not_reveal_existence() {
    let server = setup();

    let existing = server.get("/list?path=/private", Some(ANA)).await;
    let missing = server.get("/list?path=/nothing-here", Some(ANA)).await;
    let traversal = server
        .get("/file?path=/photos/../../etc/passwd", Some(ANA))
        .await;
    let unknown = server.get("/file?path=/photos/cover.jpg", Some("eve@example.com")).await;

    assert_eq!(existing.status(), StatusCode::FORBIDDEN);
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);
    assert_eq!(traversal.status(), StatusCode::FORBIDDEN);
    assert_eq!(unknown.status(), StatusCode::FORBIDDEN);

    let expected = error_body(existing).await;
    assert_eq!(error_body(missing).await, expected);
    assert_eq!(error_body(traversal).await, expected);
    assert_eq!(error_body(unknown).await, expected);
}

#[tokio::test]
async fn test_dot_segments_cannot_escape_grant() {
    let server = setup();
    let response = server
        .get("/file?path=/photos/../private/plan.pdf", Some(ANA))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_file_inside_grant_is_not_found() {
    let server = setup();
    let response = server.get("/file?path=/photos/gone.jpg", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_requires_path() {
    let server = setup();
    let response = server.get("/file", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_file_on_directory_is_bad_request() {
    let server = setup();
    let response = server.get("/file?path=/photos/2024", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_file() {
    let server = setup();
    let response = server.get("/file?path=/music/clip.mp3", Some(ANA)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(headers[header::CONTENT_LENGTH], "100");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CACHE_CONTROL], "private, max-age=3600");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("inline;"));

    let body = body_bytes(response).await;
    assert_eq!(body.len(), 100);
}

#[tokio::test]
async fn test_range_request() {
    let server = setup();
    let response = server
        .get_with(
            "/file?path=/music/clip.mp3",
            Some(ANA),
            &[("range", "bytes=10-19")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 10-19/100");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");

    let body = body_bytes(response).await;
    assert_eq!(body.as_ref(), &(10u8..20).collect::<Vec<_>>()[..]);
}

#[tokio::test]
async fn test_range_past_end_is_clamped_by_default() {
    let server = setup();
    let response = server
        .get_with(
            "/file?path=/music/clip.mp3",
            Some(ANA),
            &[("range", "bytes=90-200")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 90-99/100");
    assert_eq!(body_bytes(response).await.len(), 10);
}

#[tokio::test]
async fn test_range_past_end_rejected_when_strict() {
    let server = setup_with(|c| c.files.range_policy = RangePolicy::Strict);
    let response = server
        .get_with(
            "/file?path=/music/clip.mp3",
            Some(ANA),
            &[("range", "bytes=90-200")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */100");
}

#[tokio::test]
async fn test_range_starting_at_end_is_unsatisfiable() {
    for policy in [RangePolicy::Clamp, RangePolicy::Strict] {
        let server = setup_with(|c| c.files.range_policy = policy);
        let response = server
            .get_with(
                "/file?path=/music/clip.mp3",
                Some(ANA),
                &[("range", "bytes=100-")],
            )
            .await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }
}

#[tokio::test]
async fn test_download_disposition_and_no_cache() {
    let server = setup_with(|c| c.files.cache = false);
    let response = server
        .get("/file?path=/photos/cover.jpg&download=true", Some(ANA))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"cover.jpg\"; filename*=UTF-8''cover.jpg"
    );
}

struct LabelTransform;

impl ImageTransform for LabelTransform {
    fn transform(&self, real_path: &Path, size: SizePolicy) -> Result<TransformedImage, FileError> {
        let name = real_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(TransformedImage {
            content_type: "image/webp".to_string(),
            bytes: Bytes::from(format!("{size}:{name}")),
        })
    }
}

#[tokio::test]
async fn test_thumbnail_uses_installed_transform() {
    let mut server = setup();
    server.state = server.state.clone().with_transform(Arc::new(LabelTransform));

    let response = server
        .get("/file?path=/photos/cover.jpg&size=thumb", Some(ANA))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(body_bytes(response).await.as_ref(), b"thumb:cover.jpg");

    // Non-images and original size bypass the transform.
    let response = server
        .get("/file?path=/photos/2024/notes.txt&size=thumb", Some(ANA))
        .await;
    assert_eq!(body_bytes(response).await.as_ref(), b"sunny");

    let response = server
        .get("/file?path=/photos/cover.jpg&size=original", Some(ANA))
        .await;
    assert_eq!(body_bytes(response).await.as_ref(), b"jpeg-bytes");
}

#[tokio::test]
async fn test_thumbnail_without_transform_serves_original() {
    let server = setup();
    let response = server
        .get("/file?path=/photos/cover.jpg&size=preview", Some(ANA))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), b"jpeg-bytes");
}

#[tokio::test]
async fn test_unknown_size_is_bad_request() {
    let server = setup();
    let response = server
        .get("/file?path=/photos/cover.jpg&size=giant", Some(ANA))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_archive_of_folder() {
    let server = setup();
    let response = server.get("/archive?path=/photos", Some(ANA)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"photos.zip\"; filename*=UTF-8''photos.zip"
    );
    assert!(headers.get(header::CONTENT_LENGTH).is_none());

    let listing = server
        .get("/list?path=/photos&recursive=true", Some(ANA))
        .await;
    let entries: Vec<DirEntry> = serde_json::from_slice(&body_bytes(listing).await).unwrap();
    let file_count = entries.iter().filter(|e| e.is_file).count();

    let bytes = body_bytes(response).await;
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), file_count);

    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["2024/beach.png", "2024/notes.txt", "cover.jpg"]);

    let mut contents = String::new();
    archive
        .by_name("2024/notes.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "sunny");
}

#[tokio::test]
async fn test_archive_of_root_uses_default_name() {
    let server = setup();
    let response = server.get("/archive", Some(BEN)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("filename=\"archive.zip\""));

    let bytes = body_bytes(response).await;
    let archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 5);
}

#[tokio::test]
async fn test_archive_forbidden_and_disabled() {
    let server = setup();
    let response = server.get("/archive?path=/private", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let server = setup_with(|c| c.archive.enabled = false);
    let response = server.get("/archive?path=/photos", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_archive_job_released_after_completion() {
    let server = setup();
    let response = server.get("/archive?path=/photos", Some(ANA)).await;
    body_bytes(response).await;

    for _ in 0..200 {
        if server.state.archives.active_count() == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("archive job still registered");
}

fn link_into_private(server: &TestServer) {
    use std::os::unix::fs::symlink;

    let root = server.root.path();
    symlink(root.join("private/plan.pdf"), root.join("photos/alias.pdf")).unwrap();
    symlink(root.join("private"), root.join("music/privdir")).unwrap();
    symlink(root.join("photos/cover.jpg"), root.join("photos/cover-link.jpg")).unwrap();
}

#[tokio::test]
async fn test_followed_symlinks_need_a_grant_on_their_target() {
    let server = setup_with(|c| c.files.follow_symlinks = true);
    link_into_private(&server);

    let direct = server.get("/file?path=/private/plan.pdf", Some(ANA)).await;
    assert_eq!(direct.status(), StatusCode::FORBIDDEN);
    let denied = error_body(direct).await;

    for uri in [
        "/file?path=/photos/alias.pdf",
        "/file?path=/music/privdir/plan.pdf",
        "/list?path=/music/privdir",
        "/archive?path=/music/privdir",
    ] {
        let response = server.get(uri, Some(ANA)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(error_body(response).await, denied, "{uri}");
    }

    // A link whose target is readable keeps working.
    let response = server.get("/file?path=/photos/cover-link.jpg", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), b"jpeg-bytes");

    // A principal allowed to read the target may use the link.
    let response = server.get("/file?path=/photos/alias.pdf", Some(BEN)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), b"secret");
}

#[tokio::test]
async fn test_listing_and_archive_hide_unreadable_symlinks() {
    let server = setup_with(|c| c.files.follow_symlinks = true);
    link_into_private(&server);

    let response = server.get("/list?path=/photos", Some(ANA)).await;
    let entries: Vec<DirEntry> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.virtual_path.as_str()).collect();
    assert!(paths.contains(&"/photos/cover-link.jpg"));
    assert!(!paths.contains(&"/photos/alias.pdf"));

    let response = server.get("/list?path=/music", Some(ANA)).await;
    let entries: Vec<DirEntry> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(entries.iter().all(|e| e.virtual_path != "/music/privdir"));

    let response = server.get("/archive?path=/photos", Some(ANA)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    let archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"cover-link.jpg"));
    assert!(!names.contains(&"alias.pdf"));
}
