//! Outbound request shape per provider family
//!
//! Each mock only answers when the exact wire body and auth header arrive,
//! so a successful dispatch proves the translation.

use conduit::types::{ProviderDescriptor, ProviderVariant, Role};
use conduit::GatewayError;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::constants::*;
use crate::common::{chat_request, openai_completion, session_request, with_param, TestContext};

#[tokio::test]
async fn test_openai_minimal_body() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer sk-test-key"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("Hi!", None)))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let completion = ctx.gateway().dispatch(chat_request("Hello")).await.unwrap();
    assert_eq!(completion.content, "Hi!");
}

#[tokio::test]
async fn test_openai_compatible_minimal_body() {
    let ctx = TestContext::new(ProviderVariant::OpenaiCompatible, "gpt-4").await;

    Mock::given(method("POST"))
        .and(header("authorization", "Bearer sk-test-key"))
        .and(body_json(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("Hi!", None)))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let completion = ctx.gateway().dispatch(session_request("Hello")).await.unwrap();
    assert_eq!(completion.content, "Hi!");
}

#[tokio::test]
async fn test_openai_compatible_merges_parameters() {
    let ctx = TestContext::with_model(
        ProviderVariant::OpenaiCompatible,
        "qwen-plus",
        r#"{"temperature":0.7,"top_p":0.9}"#,
        0,
    )
    .await;

    Mock::given(method("POST"))
        .and(body_json(json!({
            "model": "qwen-plus",
            "messages": [{"role": "user", "content": "Hello"}],
            "temperature": 0.2,
            "top_p": 0.9
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("ok", None)))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let request = with_param(chat_request("Hello"), "temperature", json!(0.2));
    let request = with_param(request, "enable_internet", json!(false));
    ctx.gateway().dispatch(request).await.unwrap();
}

#[tokio::test]
async fn test_deepseek_reasoner_fixed_body() {
    let ctx = TestContext::new(ProviderVariant::OpenaiCompatible, "deepseek-reasoner").await;

    Mock::given(method("POST"))
        .and(body_json(json!({
            "model": "deepseek-reasoner",
            "messages": [{"role": "user", "content": "Why is the sky blue?"}],
            "max_tokens": 4096
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {
                "content": "Rayleigh scattering.",
                "reasoning_content": "Shorter wavelengths scatter more."
            }}]
        })))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let request = with_param(chat_request("Why is the sky blue?"), "temperature", json!(1.0));
    let completion = ctx.gateway().dispatch(request).await.unwrap();
    assert_eq!(
        completion.content,
        "Reasoning:\nShorter wavelengths scatter more.\n\nAnswer:\nRayleigh scattering."
    );
}

#[tokio::test]
async fn test_anthropic_prompt_with_context() {
    let ctx = TestContext::with_model(ProviderVariant::Anthropic, "claude-2", "", 300).await;
    ctx.seed_turn(Role::User, "u1");
    ctx.seed_turn(Role::Assistant, "a1");

    Mock::given(method("POST"))
        .and(header("x-api-key", API_KEY))
        .and(body_json(json!({
            "model": "claude-2",
            "prompt": "\n\nHuman: u1\n\nAssistant: a1\n\nHuman: How are you?",
            "max_tokens_to_sample": 300
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"completion": " Fine."})))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let request = with_param(session_request("How are you?"), "use_context", json!(true));
    let completion = ctx.gateway().dispatch(request).await.unwrap();
    assert_eq!(completion.content, " Fine.");
}

#[tokio::test]
async fn test_gemini_generation_config() {
    let ctx = TestContext::with_model(
        ProviderVariant::GoogleGemini,
        "gemini-pro",
        r#"{"temperature":0.4}"#,
        0,
    )
    .await;

    Mock::given(method("POST"))
        .and(header("x-goog-api-key", API_KEY))
        .and(body_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}],
            "generationConfig": {"temperature": 0.4}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("Hey", None)))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let completion = ctx.gateway().dispatch(chat_request("Hello")).await.unwrap();
    assert_eq!(completion.content, "Hey");
}

#[tokio::test]
async fn test_baidu_single_message() {
    let ctx = TestContext::new(ProviderVariant::Baidu, "ernie-bot").await;

    Mock::given(method("POST"))
        .and(header("x-bce-authorization", API_KEY))
        .and(body_json(json!({"messages": [{"role": "user", "content": "你好"}]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(openai_completion("你好！", None)),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    let completion = ctx.gateway().dispatch(chat_request("你好")).await.unwrap();
    assert_eq!(completion.content, "你好！");
}

#[tokio::test]
async fn test_header_template_is_sent() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    ctx.store.insert_provider(ProviderDescriptor {
        id: PROVIDER_ID,
        name: "OpenAI".to_string(),
        variant: ProviderVariant::Openai,
        base_url: format!("{}{}", ctx.server.uri(), CHAT_PATH),
        auth_type: "api_key".to_string(),
        headers: r#"{"OpenAI-Organization":"org-test"}"#.to_string(),
        timeout_secs: 30,
        retry_count: 0,
        retry_interval_secs: 0,
    });

    Mock::given(method("POST"))
        .and(header("openai-organization", "org-test"))
        .and(header("authorization", "Bearer sk-test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("ok", None)))
        .expect(1)
        .mount(&ctx.server)
        .await;

    ctx.gateway().dispatch(chat_request("Hello")).await.unwrap();
}

#[tokio::test]
async fn test_custom_provider_sends_nothing() {
    let ctx = TestContext::new(ProviderVariant::Custom, "anything").await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&ctx.server)
        .await;

    let result = ctx.gateway().dispatch(session_request("Hello")).await;
    assert!(matches!(result, Err(GatewayError::UnsupportedProvider(_))));
    assert!(ctx.session_turns().is_empty());
}
