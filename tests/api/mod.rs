use axum::body::Body;
use axum::http::{Request, StatusCode};
use knowbase::api::{self, AppState};
use knowbase::auth::AuthConfig;
use knowbase::cache::SemanticCache;
use knowbase::catalog::Catalog;
use knowbase::config::Config;
use knowbase::crawl::CrawlClient;
use knowbase::embeddings::{EmbeddingGateway, HashingEmbeddingProvider};
use knowbase::jobs::{JobContext, JobQueue};
use knowbase::kv::KvStore;
use knowbase::metrics::MetricsCollector;
use knowbase::retriever::HybridRetriever;
use knowbase::reranker::Reranker;
use knowbase::vector_store::VectorStore;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> AppState {
    let catalog = Catalog::new();
    let kv = KvStore::new();
    let vector_store = VectorStore::new(kv.clone());
    let cache = SemanticCache::new(kv.clone());
    let gateway = Arc::new(EmbeddingGateway::new(Arc::new(HashingEmbeddingProvider::new())));
    let config = Arc::new(Config::default());

    let retriever = Arc::new(HybridRetriever::new(
        catalog.clone(),
        vector_store.clone(),
        cache.clone(),
        gateway.clone(),
        Reranker::Simple,
        config.features,
    ));

    let job_ctx = JobContext {
        catalog: catalog.clone(),
        kv: kv.clone(),
        vector_store: vector_store.clone(),
        gateway: gateway.clone(),
        data_dir: std::env::temp_dir(),
    };
    let job_queue = Arc::new(JobQueue::new(job_ctx.clone(), true));

    AppState {
        catalog,
        kv,
        vector_store,
        cache,
        retriever,
        job_queue,
        job_ctx,
        crawl_client: Arc::new(CrawlClient::new(None).unwrap()),
        embedding_gateway: gateway,
        metrics: Arc::new(MetricsCollector::new()),
        config,
    }
}

fn no_auth() -> Arc<AuthConfig> {
    Arc::new(AuthConfig {
        api_keys: HashSet::new(),
        require_auth: false,
    })
}

#[tokio::test]
async fn health_is_reachable_without_authentication() {
    let app = api::routes(test_state(), no_auth());
    let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_requests_with_no_api_key_when_auth_is_required() {
    let auth = Arc::new(AuthConfig {
        api_keys: HashSet::from(["secret".to_string()]),
        require_auth: true,
    });
    let app = api::routes(test_state(), auth);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/search")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"kb_id":"kb1","query":"hello"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn search_with_an_empty_query_is_rejected() {
    let app = api::routes(test_state(), no_auth());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/search")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"kb_id":"kb1","query":"   "}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_against_an_empty_knowledge_base_returns_no_results() {
    let app = api::routes(test_state(), no_auth());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/search")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"kb_id":"kb1","query":"how do I reset my password"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["text_results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let app = api::routes(test_state(), no_auth());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("knowbase_searches_total"));
}
