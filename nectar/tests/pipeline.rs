//! End-to-end pipeline scenarios through the two harness modes.

use bytes::Bytes;
use http::{Method, StatusCode};
use nectar::{
    files::{FileMiddleware, LocalFileProvider},
    testing::{LiveTestClient, RouterTestClient},
    BasicContext, ContextSource, CoreContext, FromContextSource, HttpError, Request,
    RequestContext, RequestExt, Response, ResponseBody, Router,
};

fn run<F: std::future::Future>(f: F) -> F::Output {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
        .enable_timer()
        .build()
        .unwrap()
        .block_on(f)
}

fn hello_router() -> Router<BasicContext> {
    let mut router = Router::new();
    router.get("/hello", |_req, _ctx: BasicContext| async {
        Ok::<_, HttpError>("GET: Hello")
    });
    router
}

#[test]
fn get_hello_router_mode() {
    run(async {
        let client = RouterTestClient::new(hello_router());
        let resp = client.get("/hello").await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body_str(), "GET: Hello");
    });
}

#[test]
fn get_hello_live_mode_sets_content_length() {
    run(async {
        let server = LiveTestClient::start(hello_router()).unwrap();
        let resp = server.get("/hello").await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body_str(), "GET: Hello");
        assert_eq!(resp.header("content-length"), Some("10"));
        server.shutdown().await;
    });
}

#[test]
fn query_parameter_is_percent_decoded() {
    run(async {
        let mut router = Router::new();
        router.post("/query", |req: Request, _ctx: BasicContext| async move {
            let params = req.query_parameters();
            Ok::<_, HttpError>(params.get("test").unwrap_or("").to_string())
        });
        let client = RouterTestClient::new(router);
        let resp = client
            .post("/query?test=test%20data%C3%A9", Bytes::new())
            .await;
        assert_eq!(resp.body_str(), "test dataé");
    });
}

#[test]
fn repeated_query_parameters_sum() {
    run(async {
        let mut router = Router::new();
        router.post("/add", |req: Request, _ctx: BasicContext| async move {
            let sum: i64 = req
                .query_parameters()
                .require_all::<i64>("value")?
                .into_iter()
                .sum();
            Ok::<_, HttpError>(sum.to_string())
        });
        let client = RouterTestClient::new(router);
        let resp = client
            .post("/add?value=3&value=45&value=7", Bytes::new())
            .await;
        assert_eq!(resp.body_str(), "55");
    });
}

#[test]
fn echo_route_streams_without_buffering() {
    run(async {
        let mut router = Router::new();
        router.post("/echo", |mut req: Request, _ctx: BasicContext| async move {
            let mut body = std::mem::take(req.body_mut());
            Ok::<_, HttpError>(ResponseBody::from_writer(move |mut writer| async move {
                while let Some(chunk) = body.next_chunk().await {
                    writer.write(chunk?).await?;
                }
                Ok(())
            }))
        });
        let server = LiveTestClient::start(router).unwrap();
        let payload = vec![42u8; 200_000];
        let resp = server
            .execute(Method::POST, "/echo", &[], payload.clone())
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        // Unknown length goes out chunked.
        assert_eq!(resp.header("transfer-encoding"), Some("chunked"));
        assert_eq!(resp.body.as_ref(), payload.as_slice());
        server.shutdown().await;
    });
}

#[derive(Clone)]
struct UploadContext {
    core: CoreContext,
}

impl RequestContext for UploadContext {
    fn core(&self) -> &CoreContext {
        &self.core
    }
    fn core_mut(&mut self) -> &mut CoreContext {
        &mut self.core
    }
    fn max_upload_size(&self) -> usize {
        64 * 1024
    }
}

impl FromContextSource for UploadContext {
    fn from_source(source: ContextSource) -> Self {
        Self {
            core: CoreContext::new(source),
        }
    }
}

#[test]
fn upload_cap_applies_to_collect_not_streaming() {
    run(async {
        let mut router = Router::new();
        router.post("/upload", |mut req: Request, ctx: UploadContext| async move {
            let body = req.body_mut().collect(ctx.max_upload_size()).await?;
            Ok::<_, HttpError>(body.len().to_string())
        });
        router.post("/stream", |mut req: Request, _ctx: UploadContext| async move {
            let mut total = 0usize;
            while let Some(chunk) = req.body_mut().next_chunk().await {
                total += chunk?.len();
            }
            Ok::<_, HttpError>(total.to_string())
        });
        let client = RouterTestClient::new(router);

        let oversized = vec![0u8; 128 * 1024];
        let resp = client.post("/upload", oversized.clone()).await;
        assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE);

        let resp = client.post("/stream", oversized).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body_str(), (128 * 1024).to_string());
    });
}

fn file_fixture() -> (tempfile::TempDir, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..326_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(dir.path().join("blob.bin"), &content).unwrap();
    (dir, content)
}

fn file_router(dir: &tempfile::TempDir) -> Router<BasicContext> {
    let mut router = Router::new();
    router.add_middleware(FileMiddleware::new(LocalFileProvider::new(dir.path())));
    router
}

#[test]
fn file_range_request() {
    run(async {
        let (dir, content) = file_fixture();
        let client = RouterTestClient::new(file_router(&dir));

        let resp = client
            .execute(
                Method::GET,
                "/blob.bin",
                &[("range", "bytes=100-3999")],
                Bytes::new(),
            )
            .await;
        assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.header("content-length"), Some("3900"));
        assert_eq!(
            resp.header("content-range"),
            Some("bytes 100-3999/326000")
        );
        assert_eq!(resp.body.as_ref(), &content[100..4000]);
    });
}

#[test]
fn file_conditional_and_suffix_ranges() {
    run(async {
        let (dir, content) = file_fixture();
        let client = RouterTestClient::new(file_router(&dir));

        let full = client.get("/blob.bin").await;
        assert_eq!(full.status, StatusCode::OK);
        assert_eq!(full.header("content-length"), Some("326000"));
        let etag = full.header("etag").unwrap().to_string();

        let not_modified = client
            .execute(
                Method::GET,
                "/blob.bin",
                &[("if-none-match", &etag)],
                Bytes::new(),
            )
            .await;
        assert_eq!(not_modified.status, StatusCode::NOT_MODIFIED);
        assert!(not_modified.body.is_empty());

        let tail = client
            .execute(
                Method::GET,
                "/blob.bin",
                &[("range", "bytes=-1000")],
                Bytes::new(),
            )
            .await;
        assert_eq!(tail.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(tail.body.as_ref(), &content[326_000 - 1000..]);

        // Stale If-Range validator downgrades to the full file.
        let stale = client
            .execute(
                Method::GET,
                "/blob.bin",
                &[("range", "bytes=0-9"), ("if-range", "\"different\"")],
                Bytes::new(),
            )
            .await;
        assert_eq!(stale.status, StatusCode::OK);
        assert_eq!(stale.header("content-length"), Some("326000"));

        let unsatisfiable = client
            .execute(
                Method::GET,
                "/blob.bin",
                &[("range", "bytes=999999-")],
                Bytes::new(),
            )
            .await;
        assert_eq!(unsatisfiable.status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            unsatisfiable.header("content-range"),
            Some("bytes */326000")
        );
    });
}

#[test]
fn missing_file_stays_not_found() {
    run(async {
        let (dir, _) = file_fixture();
        let client = RouterTestClient::new(file_router(&dir));
        let resp = client.get("/absent.bin").await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
    });
}

#[test]
fn error_envelope_is_json() {
    run(async {
        let mut router = Router::new();
        router.get("/fail", |_req, _ctx: BasicContext| async {
            Err::<Response, _>(HttpError::bad_request("bad \"input\""))
        });
        let client = RouterTestClient::new(router);
        let resp = client.get("/fail").await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(
            resp.body_str(),
            r#"{"error":{"message":"bad \"input\""}}"#
        );
    });
}

#[test]
fn live_unknown_route_is_404() {
    run(async {
        let server = LiveTestClient::start(hello_router()).unwrap();
        let resp = server.get("/nope").await.unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        server.shutdown().await;
    });
}
