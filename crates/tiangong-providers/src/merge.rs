//! Chunk merging for streamed tool calls.
//!
//! A streamed response arrives as partial chunks. [`merge`] folds a newly
//! arrived chunk into an accumulator with a current-wins, previous-as-fallback
//! policy for every scalar field. Tool-call arguments are the one place where
//! text is actually accumulated: the vendor sends them as raw fragments that
//! only form valid JSON once concatenated in order.
//!
//! The two predicates at the bottom decide where tool-call streaming starts and
//! ends; the windowing driver in [`crate::window`] uses them to cut the stream.

use uuid::Uuid;

use crate::api::{
    ChatCompletionChunk, ChatCompletionFunction, ChatCompletionMessage, ChunkChoice,
    FinishReason, Role, ToolCall, ToolCallDelta, FUNCTION_TYPE,
};
use crate::error::ProviderError;

/// Merge `current` into the accumulator `previous`.
///
/// With no accumulator the current chunk is returned as is, except that a tool
/// call arriving without an identifier gets a freshly generated one. The
/// one-call-per-delta rule holds on this path too.
pub fn merge(
    previous: Option<&ChatCompletionChunk>,
    current: &ChatCompletionChunk,
) -> Result<ChatCompletionChunk, ProviderError> {
    let Some(previous) = previous else {
        let mut seeded = current.clone();
        if let Some(choice) = seeded.choices.first_mut() {
            seed_choice(choice)?;
        }
        return Ok(seeded);
    };

    // Only the first choice is merged; the vendor never streams more than one.
    let choice = match (previous.choices.first(), current.choices.first()) {
        (_, None) => previous.choices.first().cloned(),
        (None, Some(current)) => {
            let mut seeded = current.clone();
            seed_choice(&mut seeded)?;
            Some(seeded)
        }
        (Some(previous), Some(current)) => Some(merge_choice(previous, current)?),
    };

    Ok(ChatCompletionChunk {
        id: current.id.clone().or_else(|| previous.id.clone()),
        object: current.object.clone().or_else(|| previous.object.clone()),
        created: current.created.or(previous.created),
        model: current.model.clone().or_else(|| previous.model.clone()),
        request_id: current
            .request_id
            .clone()
            .or_else(|| previous.request_id.clone()),
        choices: choice.into_iter().collect(),
    })
}

/// Give an id-less tool call a local identifier.
///
/// The vendor only assigns identifiers on the first chunk of a tool call, and
/// not always then; without one the call could not be answered.
fn seed_choice(choice: &mut ChunkChoice) -> Result<(), ProviderError> {
    let delta = &mut choice.delta;
    if !matches!(
        ToolCallDelta::classify(&delta.tool_calls)?,
        Some(ToolCallDelta::ContinuationFragment { .. })
    ) {
        return Ok(());
    }

    if let Some(call) = delta.tool_calls.first_mut() {
        call.id = Some(Uuid::new_v4().to_string());
        call.call_type = Some(FUNCTION_TYPE.to_string());
    }
    delta.role.get_or_insert(Role::Assistant);
    Ok(())
}

fn merge_choice(previous: &ChunkChoice, current: &ChunkChoice) -> Result<ChunkChoice, ProviderError> {
    Ok(ChunkChoice {
        index: current.index.or(previous.index),
        delta: merge_message(&previous.delta, &current.delta)?,
        finish_reason: current.finish_reason.or(previous.finish_reason),
    })
}

fn merge_message(
    previous: &ChatCompletionMessage,
    current: &ChatCompletionMessage,
) -> Result<ChatCompletionMessage, ProviderError> {
    // Content fragments replace each other here; appending happens one layer up.
    let content = current
        .content
        .clone()
        .or_else(|| previous.content.clone())
        .unwrap_or_default();

    Ok(ChatCompletionMessage {
        content: Some(content),
        role: Some(current.role.or(previous.role).unwrap_or(Role::Assistant)),
        name: current.name.clone().or_else(|| previous.name.clone()),
        tool_calls: merge_tool_calls(&previous.tool_calls, &current.tool_calls)?,
    })
}

fn merge_tool_calls(previous: &[ToolCall], current: &[ToolCall]) -> Result<Vec<ToolCall>, ProviderError> {
    let (last_previous, finalized) = match previous.split_last() {
        Some((last, rest)) => (Some(last), rest),
        None => (None, previous),
    };

    let mut tool_calls = finalized.to_vec();
    match ToolCallDelta::classify(current)? {
        None => tool_calls.extend(last_previous.cloned()),
        Some(ToolCallDelta::NewToolCall { call, .. }) => {
            tool_calls.extend(last_previous.cloned());
            tool_calls.push(call);
        }
        Some(ToolCallDelta::ContinuationFragment { call }) => {
            tool_calls.push(match last_previous {
                Some(last) => merge_tool_call(last, &call),
                None => call,
            });
        }
    }
    Ok(tool_calls)
}

fn merge_tool_call(previous: &ToolCall, current: &ToolCall) -> ToolCall {
    ToolCall {
        id: current.id.clone().or_else(|| previous.id.clone()),
        call_type: current.call_type.clone().or_else(|| previous.call_type.clone()),
        function: merge_function(&previous.function, &current.function),
    }
}

fn merge_function(previous: &ChatCompletionFunction, current: &ChatCompletionFunction) -> ChatCompletionFunction {
    let mut arguments = previous.arguments.clone().unwrap_or_default();
    if let Some(fragment) = &current.arguments {
        arguments.push_str(fragment);
    }

    ChatCompletionFunction {
        name: current.name.clone().or_else(|| previous.name.clone()),
        arguments: Some(arguments),
    }
}

/// True if the chunk carries tool-call data, i.e. tool-call streaming has begun.
pub fn is_tool_call_chunk(chunk: &ChatCompletionChunk) -> bool {
    chunk
        .choices
        .first()
        .is_some_and(|choice| !choice.delta.tool_calls.is_empty())
}

/// True if the chunk is the last one of a streamed tool call.
///
/// Completion is signalled through the finish reason, not a structural marker.
pub fn is_tool_call_finished(chunk: &ChatCompletionChunk) -> bool {
    chunk
        .choices
        .first()
        .is_some_and(|choice| choice.finish_reason == Some(FinishReason::ToolCalls))
}
