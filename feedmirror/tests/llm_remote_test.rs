use feedmirror::llm::gemini::GeminiLlmProvider;
use feedmirror::llm::remote::RemoteLlmProvider;
use feedmirror::llm::{LlmProvider, LlmRequest};
use mockito::Matcher;

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    // Mock successful OpenAI response
    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "  This is a rewritten post  "
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest {
        prompt: "Rewrite this post".to_string(),
        max_tokens: Some(100),
        temperature: Some(0.7),
        timeout_seconds: Some(10),
    };

    let result = provider.generate(request).await;

    assert!(result.is_ok());
    let response = result.unwrap();
    assert_eq!(response.content, "This is a rewritten post");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_without_usage() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "ok"}}]}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "local-model");
    let response = provider.generate(LlmRequest::from_prompt("Test")).await.unwrap();

    assert_eq!(response.content, "ok");
    assert_eq!(response.usage.total_tokens, 0);
    assert_eq!(response.model, "local-model");
}

#[tokio::test]
async fn test_remote_provider_missing_choice_is_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": []}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let result = provider.generate(LlmRequest::from_prompt("Test")).await;

    assert!(result.unwrap_err().to_string().contains("no choices"));
}

#[tokio::test]
async fn test_remote_provider_error_handling() {
    let mut server = mockito::Server::new_async().await;

    // Mock API error
    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: None,
    };

    let result = provider.generate(request).await;

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_timeout() {
    let mut server = mockito::Server::new_async().await;

    // Mock slow response
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: Some(1), // 1 second timeout
    };

    let result = provider.generate(request).await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("timed out"));
}

#[tokio::test]
async fn test_gemini_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .match_query(Matcher::UrlEncoded("key".into(), "gemini-key".into()))
        .match_body(Matcher::PartialJson(serde_json::json!({
            "contents": [{"parts": [{"text": "Translate this"}]}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "candidates": [{
                    "content": {"parts": [{"text": "ترجمه شده\n"}], "role": "model"}
                }],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3, "totalTokenCount": 7}
            }"#,
        )
        .create_async()
        .await;

    let provider = GeminiLlmProvider::new(server.url(), "gemini-key", "gemini-test");
    let response = provider.generate(LlmRequest::from_prompt("Translate this")).await.unwrap();

    assert_eq!(response.content, "ترجمه شده");
    assert_eq!(response.usage.total_tokens, 7);
    assert_eq!(response.model, "gemini-test");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_provider_without_candidates_is_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates": []}"#)
        .create_async()
        .await;

    let provider = GeminiLlmProvider::new(server.url(), "gemini-key", "gemini-test");
    let result = provider.generate(LlmRequest::from_prompt("Test")).await;

    assert!(result.unwrap_err().to_string().contains("no generated text"));
}

#[tokio::test]
async fn test_gemini_provider_error_status() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body("API key not valid")
        .create_async()
        .await;

    let provider = GeminiLlmProvider::new(server.url(), "bad-key", "gemini-test");
    let err = provider.generate(LlmRequest::from_prompt("Test")).await.unwrap_err();

    assert!(err.to_string().contains("403"));
}
