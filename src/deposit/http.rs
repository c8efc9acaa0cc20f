//! A2: HTTP binding shim.
//!
//! A thin `axum` layer translating incoming requests into the C8 wire
//! interface and serializing receipts as JSON. The full SWORDv2 Atom/XML
//! binding — request parsing, auth, receipt serialization — is the
//! external collaborator `spec.md` §1 places out of scope; this is the
//! minimal stand-in needed to exercise C8 over HTTP (`SPEC_FULL.md` §6).

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use super::ingress::{self, PartRequest};
use super::orchestrator::FinalizationQueue;
use super::properties;
use super::types::{DepositError, DepositId, DepositPaths};

pub(crate) struct DepositService {
    temp_root: PathBuf,
    deposits_root: PathBuf,
    base_url: String,
    queue: FinalizationQueue,
}

impl DepositService {
    pub(crate) fn new(
        temp_root: PathBuf,
        deposits_root: PathBuf,
        base_url: String,
        queue: FinalizationQueue,
    ) -> Arc<Self> {
        Arc::new(Self {
            temp_root,
            deposits_root,
            base_url,
            queue,
        })
    }

    fn paths(&self, id: &DepositId) -> DepositPaths {
        DepositPaths::new(&self.temp_root, &self.deposits_root, id)
    }

    pub(crate) fn into_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/deposit/:id", post(receive_part))
            .route("/deposit/:id/state", get(get_state))
            .with_state(self)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, DepositError> {
    headers
        .get(name)
        .ok_or_else(|| DepositError::BadRequest(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| DepositError::BadRequest(format!("{name} header is not valid UTF-8")))
}

fn parse_filename_from_disposition(value: &str) -> String {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename=") {
            return rest.trim_matches('"').to_owned();
        }
    }
    value.to_owned()
}

fn part_request_from_headers(headers: &HeaderMap) -> Result<PartRequest, DepositError> {
    let filename = match header_str(headers, "content-disposition") {
        Ok(value) => parse_filename_from_disposition(value),
        Err(_) => header_str(headers, "x-deposit-filename")?.to_owned(),
    };
    let md5 = header_str(headers, "content-md5")?.to_owned();
    let mime_type = header_str(headers, "packaging")?
        .parse()
        .map_err(|err: super::types::InvalidMimeType| DepositError::BadRequest(err.to_string()))?;
    let in_progress = header_str(headers, "in-progress")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Ok(PartRequest {
        filename,
        md5,
        mime_type,
        in_progress,
    })
}

async fn receive_part(
    State(service): State<Arc<DepositService>>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, DepositError> {
    let id = DepositId::new(raw_id).map_err(|err| DepositError::BadRequest(err.to_string()))?;
    let req = part_request_from_headers(&headers)?;
    let paths = service.paths(&id);

    let stream = body
        .into_data_stream()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
    let reader = StreamReader::new(stream);

    let receipt =
        ingress::handle_part(&paths, &service.queue, &service.base_url, &id, req, reader).await?;

    Ok((StatusCode::CREATED, Json(receipt)).into_response())
}

async fn get_state(
    State(service): State<Arc<DepositService>>,
    Path(raw_id): Path<String>,
) -> Result<Response, DepositError> {
    let id = DepositId::new(raw_id).map_err(|err| DepositError::BadRequest(err.to_string()))?;
    let paths = service.paths(&id);
    let state = properties::get_state(&paths).await?;
    Ok(Json(serde_json::json!({ "state": state.as_str() })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::bagit::ManifestBagValidator;
    use crate::deposit::extractor::ZipExtractor;
    use crate::deposit::orchestrator::Pipeline;
    use crate::deposit::versioning::{GitVersioning, Identity, NoopVersioning, VersioningAdapter};
    use http_body_util::BodyExt;
    use md5::Digest;
    use tower::ServiceExt;

    fn make_service_with_versioning(
        tmp: &tempdir::TempDir,
        versioning: Arc<dyn VersioningAdapter>,
    ) -> (Arc<DepositService>, PathBuf) {
        let temp_root = tmp.path().join("temp");
        let deposits_root = tmp.path().join("deposits");
        std::fs::create_dir_all(&temp_root).unwrap();
        std::fs::create_dir_all(&deposits_root).unwrap();

        let pipeline = Arc::new(Pipeline {
            extractor: Arc::new(ZipExtractor),
            validator: Arc::new(ManifestBagValidator),
            versioning,
            temp_root: temp_root.clone(),
            deposits_root: deposits_root.clone(),
        });
        let queue = FinalizationQueue::spawn(4, pipeline);

        (
            DepositService::new(temp_root, deposits_root.clone(), "http://host".to_owned(), queue),
            deposits_root,
        )
    }

    fn make_service(tmp: &tempdir::TempDir) -> (Arc<DepositService>, PathBuf) {
        make_service_with_versioning(tmp, Arc::new(NoopVersioning))
    }

    fn sample_bag_zip(payload: &[u8]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options =
                zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
            let digest = hex::encode(md5::Md5::digest(payload));

            writer.start_file("bag/bagit.txt", options).unwrap();
            std::io::Write::write_all(&mut writer, b"BagIt-Version: 0.97\n").unwrap();
            writer.start_file("bag/bag-info.txt", options).unwrap();
            std::io::Write::write_all(&mut writer, b"Bagging-Date: 2024-01-01\n").unwrap();
            writer.start_file("bag/manifest-md5.txt", options).unwrap();
            std::io::Write::write_all(
                &mut writer,
                format!("{digest}  data/dataset.bin\n").as_bytes(),
            )
            .unwrap();
            writer.start_file("bag/data/dataset.bin", options).unwrap();
            std::io::Write::write_all(&mut writer, payload).unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    fn post_part(
        id: &str,
        filename: &str,
        body: Vec<u8>,
        mime_type: &str,
        in_progress: bool,
    ) -> axum::http::Request<Body> {
        let md5 = hex::encode(md5::Md5::digest(&body));
        axum::http::Request::builder()
            .method("POST")
            .uri(format!("/deposit/{id}"))
            .header("content-disposition", format!("attachment; filename=\"{filename}\""))
            .header("content-md5", md5)
            .header("packaging", mime_type)
            .header("in-progress", in_progress.to_string())
            .body(Body::from(body))
            .unwrap()
    }

    async fn state_of(router: &Router, id: &str) -> String {
        let request = axum::http::Request::builder()
            .method("GET")
            .uri(format!("/deposit/{id}/state"))
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["state"].as_str().unwrap().to_owned()
    }

    async fn wait_for_terminal_state(router: &Router, id: &str) -> String {
        for _ in 0..200 {
            let state = state_of(router, id).await;
            if state != "FINALIZING" && state != "DRAFT" {
                return state;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("deposit {id} did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn continuation_request_returns_created_with_receipt_body() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, _) = make_service(&tmp);
        let router = service.into_router();

        let request = post_part("dep1", "pkg.1", b"hello".to_vec(), "archive/chunked", true);
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["editIRI"], "http://host/container/dep1");
    }

    #[tokio::test]
    async fn missing_checksum_header_is_a_bad_request() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, _) = make_service(&tmp);
        let router = service.into_router();

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/deposit/dep1")
            .header("content-disposition", "attachment; filename=\"pkg.1\"")
            .header("packaging", "archive/single")
            .body(Body::from(b"hello".to_vec()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn state_endpoint_reports_not_found_for_unknown_deposit() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, _) = make_service(&tmp);
        let router = service.into_router();

        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/deposit/dep1/state")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// End-to-end scenario 1: happy single-part deposit reaches `SUBMITTED`.
    #[tokio::test]
    async fn happy_single_part_reaches_submitted_via_http() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, deposits_root) = make_service(&tmp);
        let router = service.into_router();

        let archive = sample_bag_zip(b"the dataset");
        let request = post_part("id1", "payload.zip", archive, "archive/single", false);
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let state = wait_for_terminal_state(&router, "id1").await;
        assert_eq!(state, "SUBMITTED");
        assert!(deposits_root.join("id1/deposit.properties").exists());
    }

    /// End-to-end scenario 2: an advertised MD5 that does not match the body
    /// is rejected synchronously and leaves nothing behind.
    #[tokio::test]
    async fn md5_mismatch_is_rejected_and_nothing_is_retained() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, _) = make_service(&tmp);
        let router = service.into_router();

        let archive = sample_bag_zip(b"the dataset");
        let mut request = post_part("id2", "payload.zip", archive, "archive/single", false);
        request
            .headers_mut()
            .insert("content-md5", "0".repeat(32).parse().unwrap());

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!tmp.path().join("temp/id2/payload.zip").exists());
    }

    /// End-to-end scenario 3: three chunked parts concatenate in ascending
    /// sequence order and the deposit still reaches `SUBMITTED`.
    #[tokio::test]
    async fn chunked_assembly_reaches_submitted_via_http() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, _) = make_service(&tmp);
        let router = service.into_router();

        let archive = sample_bag_zip(b"a chunked dataset");
        let third = archive.len() / 3;
        let (a, rest) = archive.split_at(third);
        let (b, c) = rest.split_at(third);

        for (seq, (chunk, in_progress)) in
            [(a, true), (b, true), (c, false)].into_iter().enumerate()
        {
            let request = post_part(
                "id3",
                &format!("pkg.{}", seq + 1),
                chunk.to_vec(),
                "archive/chunked",
                in_progress,
            );
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let state = wait_for_terminal_state(&router, "id3").await;
        assert_eq!(state, "SUBMITTED");
    }

    /// End-to-end scenario 4: a bag whose manifest references a missing
    /// file is left `INVALID` with the staging directory retained.
    #[tokio::test]
    async fn invalid_bag_reaches_invalid_via_http() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, _) = make_service(&tmp);
        let router = service.into_router();

        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options =
                zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
            writer.start_file("bag/bagit.txt", options).unwrap();
            std::io::Write::write_all(&mut writer, b"BagIt-Version: 0.97\n").unwrap();
            writer.start_file("bag/bag-info.txt", options).unwrap();
            std::io::Write::write_all(&mut writer, b"Bagging-Date: 2024-01-01\n").unwrap();
            writer.start_file("bag/manifest-md5.txt", options).unwrap();
            std::io::Write::write_all(
                &mut writer,
                b"d41d8cd98f00b204e9800998ecf8427e  data/missing.bin\n",
            )
            .unwrap();
            writer.finish().unwrap();
        }

        let request = post_part("id4", "payload.zip", buf.into_inner(), "archive/single", false);
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let state = wait_for_terminal_state(&router, "id4").await;
        assert_eq!(state, "INVALID");
        assert!(tmp.path().join("temp/id4").exists());
    }

    /// End-to-end scenario 5: with versioning enabled, the promoted storage
    /// directory carries a `state=SUBMITTED` tag.
    #[tokio::test]
    async fn versioning_enabled_tags_the_promoted_repository() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let versioning = Arc::new(GitVersioning::new(Identity {
            user: "Deposit Finalizer".to_owned(),
            email: "deposit-finalizer@example.org".to_owned(),
        }));
        let (service, deposits_root) = make_service_with_versioning(&tmp, versioning);
        let router = service.into_router();

        let archive = sample_bag_zip(b"versioned dataset");
        let request = post_part("id5", "payload.zip", archive, "archive/single", false);
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let state = wait_for_terminal_state(&router, "id5").await;
        assert_eq!(state, "SUBMITTED");

        let repo = git2::Repository::open(deposits_root.join("id5")).unwrap();
        let tag_ref = repo.find_reference("refs/tags/state=SUBMITTED").unwrap();
        assert!(tag_ref.peel_to_commit().is_ok());
    }

    /// End-to-end scenario 6: a continuation request against a deposit
    /// already `FINALIZING` is rejected with 405.
    #[tokio::test]
    async fn continuation_against_finalizing_deposit_is_405() {
        let tmp = tempdir::TempDir::new("http").unwrap();
        let (service, _) = make_service(&tmp);
        let router = service.into_router();

        let archive = sample_bag_zip(b"the dataset");
        let final_request = post_part("id6", "payload.zip", archive, "archive/single", false);
        router.clone().oneshot(final_request).await.unwrap();

        let continuation = post_part("id6", "pkg.extra", b"more".to_vec(), "archive/single", true);
        let response = router.oneshot(continuation).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
