//! JSON shape of the vendor records, in both directions.

use serde_json::json;
use tiangong_providers::api::{ChatCompletionFunction, ToolChoice};
use tiangong_providers::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionMessage, ChatCompletionRequest, FinishReason, ImageRequest,
    Role, ToolCall,
};

#[test]
fn test_request_omits_absent_fields() {
    let request = ChatCompletionRequest {
        model: Some("SkyChat-MegaVerse".to_string()),
        user: Some("u-42".to_string()),
        ..ChatCompletionRequest::new(vec![ChatCompletionMessage::new("Hi", Role::User)], true)
    };

    let value = serde_json::to_value(&request).unwrap();

    assert_eq!(
        value,
        json!({
            "model": "SkyChat-MegaVerse",
            "messages": [{"content": "Hi", "role": "user"}],
            "stream": true,
            "user_id": "u-42"
        })
    );
}

#[test]
fn test_tool_message_carries_function_name() {
    let message = ChatCompletionMessage::tool_response("22 degrees", "weather");
    let value = serde_json::to_value(&message).unwrap();

    assert_eq!(value, json!({"content": "22 degrees", "role": "tool", "name": "weather"}));
}

#[test]
fn test_forced_tool_choice_is_a_json_string() {
    let choice = ToolChoice::function("weather");
    let parsed: serde_json::Value = serde_json::from_str(&choice).unwrap();
    assert_eq!(parsed, json!({"type": "function", "function": {"name": "weather"}}));
}

#[test]
fn test_completion_with_tool_call_deserializes() {
    let body = json!({
        "id": "8313807536837492492",
        "created": 1706092316,
        "model": "SkyChat-MegaVerse",
        "request_id": "req-1",
        "choices": [{
            "index": 0,
            "finish_reason": "tool_calls",
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_8313807536837492492",
                    "type": "function",
                    "function": {"name": "weather", "arguments": "{\"city\":\"Beijing\"}"}
                }]
            }
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 20, "total_tokens": 32}
    });

    let completion: ChatCompletion = serde_json::from_value(body).unwrap();

    assert!(completion.is_tool_call());
    let choice = &completion.choices[0];
    assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
    assert_eq!(choice.message.content, None);
    assert_eq!(
        choice.message.tool_calls[0],
        ToolCall::new("call_8313807536837492492", "weather", "{\"city\":\"Beijing\"}")
    );
    assert_eq!(completion.usage.unwrap().total_tokens, Some(32));
}

#[test]
fn test_chunk_tolerates_nulls_and_missing_fields() {
    let chunk: ChatCompletionChunk = serde_json::from_value(json!({
        "id": "c1",
        "choices": [{
            "index": 0,
            "delta": {"tool_calls": [{"function": {"arguments": "1}"}}]},
            "finish_reason": null
        }]
    }))
    .unwrap();

    let call = &chunk.choices[0].delta.tool_calls[0];
    assert_eq!(call.id, None);
    assert_eq!(call.call_type, None);
    assert_eq!(
        call.function,
        ChatCompletionFunction {
            name: None,
            arguments: Some("1}".to_string())
        }
    );
    assert_eq!(chunk.choices[0].finish_reason, None);

    let empty: ChatCompletionChunk = serde_json::from_value(json!({"id": "c2", "choices": null})).unwrap();
    assert!(empty.choices.is_empty());
}

#[test]
fn test_vendor_finish_reasons() {
    for (wire, reason) in [
        ("stop", FinishReason::Stop),
        ("length", FinishReason::Length),
        ("sensitive", FinishReason::Sensitive),
        ("tool_calls", FinishReason::ToolCalls),
        ("network_error", FinishReason::NetworkError),
    ] {
        let parsed: FinishReason = serde_json::from_value(json!(wire)).unwrap();
        assert_eq!(parsed, reason);
        assert_eq!(reason.as_str(), wire);
    }
}

#[test]
fn test_image_request_uses_user_id() {
    let request = ImageRequest {
        user: Some("u-1".to_string()),
        ..ImageRequest::new("a lighthouse", "cogview-3")
    };
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        json!({"prompt": "a lighthouse", "model": "cogview-3", "user_id": "u-1"})
    );
}
