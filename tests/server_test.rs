//! Integration tests for the context HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use image::DynamicImage;
    use memory_context_agent::analysis::{AnalysisError, Analyzer};
    use memory_context_agent::capture::{CaptureError, CapturedFrame, ScreenSource};
    use memory_context_agent::extraction::{OcrError, RecognizedRegion, TextRecognizer};
    use memory_context_agent::server::{run, ServerConfig, ServerState};
    use memory_context_agent::transparency::create_shared_log;
    use memory_context_agent::{Config, Pipeline};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct IdleScreen;

    impl ScreenSource for IdleScreen {
        fn name(&self) -> &str {
            "idle"
        }

        fn capture_frame(&self) -> Result<CapturedFrame, CaptureError> {
            Ok(CapturedFrame {
                timestamp: Utc::now(),
                image: DynamicImage::new_rgb8(8, 8),
            })
        }
    }

    struct NoText;

    impl TextRecognizer for NoText {
        fn name(&self) -> &str {
            "none"
        }

        fn recognize(&self, _image: &DynamicImage) -> Result<Vec<RecognizedRegion>, OcrError> {
            Ok(Vec::new())
        }
    }

    struct FixedAnalyzer(&'static str);

    #[async_trait]
    impl Analyzer for FixedAnalyzer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn analyze(&self, _prompt: &str) -> Result<String, AnalysisError> {
            Ok(self.0.to_string())
        }
    }

    const REPLY: &str = r#"{"activity":"Checking out","application":"Shop","key_info":[{"type":"order","value":"A-1042","context":"confirmation page"}]}"#;

    async fn start_server(
        analyzer: Option<Arc<dyn Analyzer>>,
    ) -> (SocketAddr, oneshot::Sender<()>) {
        let pipeline = Pipeline::new(
            &Config::default(),
            Arc::new(IdleScreen),
            Arc::new(NoText),
            analyzer,
            create_shared_log(),
        )
        .expect("valid config");

        let (addr, shutdown_tx) = run(ServerConfig::new(0), ServerState::from_pipeline(&pipeline))
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start_server(None).await;

        let response = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_context_starts_with_defaults() {
        let (addr, shutdown_tx) = start_server(None).await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/context", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(body["activity"], "Starting up...");
        assert_eq!(body["application"], "Unknown");
        assert_eq!(body["key_events"].as_array().map(Vec::len), Some(0));
        assert!(body["last_analysis"].is_null());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_analyze_updates_context_and_key_events() {
        let (addr, shutdown_tx) = start_server(Some(Arc::new(FixedAnalyzer(REPLY)))).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/analyze", addr))
            .json(&serde_json::json!({ "text": "Order A-1042 confirmed" }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["merge"]["added"], 1);
        assert_eq!(body["context"]["activity"], "Checking out");

        let events: serde_json::Value = client
            .get(format!("http://{}/key-events?minutes=1", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(events[0]["type"], "order");
        assert_eq!(events[0]["value"], "A-1042");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_analyze_rejects_empty_text() {
        let (addr, shutdown_tx) = start_server(Some(Arc::new(FixedAnalyzer(REPLY)))).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/analyze", addr))
            .json(&serde_json::json!({ "text": "   " }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), 400);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "EMPTY_TEXT");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_analyze_without_provider() {
        let (addr, shutdown_tx) = start_server(None).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/analyze", addr))
            .json(&serde_json::json!({ "text": "hello" }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), 503);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "NO_PROVIDER");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_malformed_reply_maps_to_bad_gateway() {
        let (addr, shutdown_tx) = start_server(Some(Arc::new(FixedAnalyzer("not json")))).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/analyze", addr))
            .json(&serde_json::json!({ "text": "hello" }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), 502);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "ANALYSIS_PARSE");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_allows_localhost() {
        let (addr, shutdown_tx) = start_server(None).await;

        let response = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("http://{}/context", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost")
        );

        let _ = shutdown_tx.send(());
    }
}
