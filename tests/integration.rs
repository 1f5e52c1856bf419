use actix_web::dev::ServiceResponse;
use actix_web::http::{Method, StatusCode};
use actix_web::{test, web, App};
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use chunk_vault::api::object_handler;
use chunk_vault::app_state::AppState;
use chunk_vault::config::AppConfig;
use chunk_vault::metadata::memory_store::MemoryBackend;
use chunk_vault::metadata::MetadataStore;
use chunk_vault::storage::ChecksumAlgorithm;

fn test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.root = dir.path().join("objects").to_string_lossy().into_owned();
    config.passthrough_headers = vec!["X-Trace-Id".to_string()];
    config
}

fn state_with(dir: &TempDir, metadata: MetadataStore) -> AppState {
    AppState::with_metadata(test_config(dir), metadata).unwrap()
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .default_service(web::to(object_handler)),
        )
        .await
    };
}

fn header(resp: &ServiceResponse, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
}

macro_rules! patch {
    ($app:expr, $path:expr, $data:expr, $offset:expr) => {{
        let data: &[u8] = $data;
        let req = test::TestRequest::patch()
            .uri(&format!("{}?offset={}", $path, $offset))
            .set_payload(data.to_vec())
            .to_request();
        test::call_service(&$app, req).await
    }};
}

macro_rules! get {
    ($app:expr, $path:expr) => {
        test::call_service(&$app, test::TestRequest::get().uri($path).to_request()).await
    };
}

#[actix_web::test]
async fn test_out_of_order_patches_expose_contiguous_prefix() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));

    assert_eq!(patch!(app, "/movie.bin", b"aaa", 0).status(), StatusCode::OK);
    let resp = patch!(app, "/movie.bin", b"ccc", 6);
    assert_eq!(header(&resp, "x-parts").as_deref(), Some("0-2,6-8"));

    let resp = get!(app, "/movie.bin");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-parts").as_deref(), Some("0-2,6-8"));
    assert_eq!(test::read_body(resp).await.as_ref(), b"aaa");

    patch!(app, "/movie.bin", b"bbb", 3);
    let resp = get!(app, "/movie.bin");
    assert_eq!(header(&resp, "x-parts").as_deref(), Some("0-8"));
    assert_eq!(test::read_body(resp).await.as_ref(), b"aaabbbccc");
}

#[actix_web::test]
async fn test_patch_without_byte_zero_is_not_found() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));

    assert_eq!(patch!(app, "/late", b"xyz", 1).status(), StatusCode::OK);
    let resp = get!(app, "/late");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(header(&resp, "X-ERROR-CODE").as_deref(), Some("NOT_FOUND"));
}

#[actix_web::test]
async fn test_shuffled_patches_reassemble_object() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));

    let chunk = 100usize;
    let data: Vec<u8> = (0..chunk * 12).map(|i| (i % 251) as u8).collect();

    for round in 0..3 {
        let path = format!("/shuffled/{}", round);
        let mut offsets: Vec<usize> = (0..12).map(|i| i * chunk).collect();
        offsets.shuffle(&mut thread_rng());

        for offset in offsets {
            let resp = patch!(app, &path, &data[offset..offset + chunk], offset as u64);
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = get!(app, &path);
        assert_eq!(resp.status(), StatusCode::OK);
        let expected_parts = format!("0-{}", data.len() - 1);
        assert_eq!(header(&resp, "x-parts").as_deref(), Some(expected_parts.as_str()));
        assert_eq!(test::read_body(resp).await.as_ref(), data.as_slice());
    }
}

#[actix_web::test]
async fn test_delete_is_idempotent() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));

    let req = test::TestRequest::post().uri("/doc.txt").set_payload("hello").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    for _ in 0..2 {
        let req = test::TestRequest::delete().uri("/doc.txt").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await.as_ref(), b"OK");
    }
    assert_eq!(get!(app, "/doc.txt").status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_post_and_copy_with_headers() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));

    let req = test::TestRequest::post()
        .uri("/src/photo.png")
        .insert_header(("x-head-camera", "pinhole"))
        .insert_header(("x-trace-id", "trace-1"))
        .set_payload(vec![1u8; 64])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(header(&resp, "x-start").is_some());
    assert!(header(&resp, "x-end").is_some());
    assert_eq!(header(&resp, "x-parts").as_deref(), Some("0-63"));

    let req = test::TestRequest::put()
        .uri("/dst/photo.png")
        .insert_header(("x-source", "/src/photo.png"))
        .insert_header(("x-head-owner", "me"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = get!(app, "/dst/photo.png");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type").as_deref(), Some("image/png"));
    assert_eq!(header(&resp, "x-head-camera").as_deref(), Some("pinhole"));
    assert_eq!(header(&resp, "x-head-owner").as_deref(), Some("me"));
    assert_eq!(header(&resp, "x-trace-id").as_deref(), Some("trace-1"));
    assert_eq!(test::read_body(resp).await.len(), 64);

    let req = test::TestRequest::post()
        .uri("/dst/other")
        .insert_header(("x-source", "relative/path"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_copy_onto_itself_is_rejected() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));

    let req = test::TestRequest::post()
        .uri("/obj")
        .set_payload("important data")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/obj")
        .insert_header(("x-source", "/obj"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header(&resp, "X-ERROR-CODE").as_deref(), Some("BAD_REQUEST"));

    let resp = get!(app, "/obj");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-parts").as_deref(), Some("0-13"));
    assert_eq!(test::read_body(resp).await.as_ref(), b"important data");
}

#[actix_web::test]
async fn test_checksum_on_get_and_head() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));
    let data = b"checksum me please".to_vec();
    patch!(app, "/sum", &data, 0);

    let req = test::TestRequest::get()
        .uri("/sum")
        .insert_header(("x-checksum", "sha256"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type").as_deref(), Some("text/plain"));
    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), ChecksumAlgorithm::Sha256.digest(&data).as_bytes());

    let req = test::TestRequest::default()
        .method(Method::HEAD)
        .uri("/sum")
        .insert_header(("x-checksum", "md5"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        header(&resp, "x-checksum"),
        Some(ChecksumAlgorithm::Md5.digest(&data))
    );
    assert!(test::read_body(resp).await.is_empty());
}

#[actix_web::test]
async fn test_patch_checksum_failure() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));

    let req = test::TestRequest::patch()
        .uri("/verified?offset=0")
        .insert_header(("x-checksum", "0000"))
        .insert_header(("x-checksum-type", "md5"))
        .set_payload("data")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(header(&resp, "X-ERROR-CODE").as_deref(), Some("CHECKSUM_FAIL"));
    assert!(header(&resp, "X-ERROR-MESSAGE").is_some());

    assert_eq!(get!(app, "/verified").status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_no_gaps_header() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));
    patch!(app, "/gappy", b"aaaa", 0);
    patch!(app, "/gappy", b"bbbb", 10);

    let req = test::TestRequest::get()
        .uri("/gappy")
        .insert_header(("x-no-gaps", "true"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header(&resp, "X-ERROR-CODE").as_deref(), Some("BAD_REQUEST"));
}

#[actix_web::test]
async fn test_unsupported_method() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::disabled()));

    let req = test::TestRequest::default()
        .method(Method::OPTIONS)
        .uri("/anything")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        header(&resp, "allow").as_deref(),
        Some("GET, HEAD, POST, PUT, PATCH, DELETE")
    );
}

#[actix_web::test]
async fn test_range_request() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::new(Arc::new(MemoryBackend::new()))));
    let req = test::TestRequest::post()
        .uri("/digits.txt")
        .set_payload("0123456789")
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/digits.txt")
        .insert_header(("range", "bytes=3-6"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, "accept-ranges").as_deref(), Some("bytes"));
    assert_eq!(header(&resp, "content-range").as_deref(), Some("bytes 3-6/10"));
    assert_eq!(header(&resp, "content-length").as_deref(), Some("4"));
    assert_eq!(test::read_body(resp).await.as_ref(), b"3456");

    let req = test::TestRequest::get()
        .uri("/digits.txt")
        .insert_header(("range", "bytes=20-"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[actix_web::test]
async fn test_degraded_mode_serves_whole_files() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::disabled()));

    let resp = patch!(app, "/plain.bin", b"tail", 4);
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(header(&resp, "x-parts").is_none());

    let resp = get!(app, "/plain.bin");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert_eq!(body.len(), 8);
    assert_eq!(&body[4..], b"tail");
}

#[actix_web::test]
async fn test_expired_metadata_hides_object() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let app = app!(state_with(&dir, MetadataStore::new(backend.clone())));

    let req = test::TestRequest::post().uri("/ephemeral").set_payload("data").to_request();
    test::call_service(&app, req).await;
    assert_eq!(get!(app, "/ephemeral").status(), StatusCode::OK);

    backend.flush();
    assert_eq!(get!(app, "/ephemeral").status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post().uri("/ephemeral").set_payload("data").to_request();
    test::call_service(&app, req).await;
    assert_eq!(get!(app, "/ephemeral").status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_root_path_is_not_found() {
    let dir = tempdir().unwrap();
    let app = app!(state_with(&dir, MetadataStore::disabled()));
    assert_eq!(get!(app, "/").status(), StatusCode::NOT_FOUND);
}
