//! Benchmarks for the translator module.
//!
//! Run with: cargo bench --bench translator_bench
//!
//! These benchmarks measure request, response and stream translation
//! between the Anthropic Messages and Chat Completions formats.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use copilot_gateway_rust::{
    core::sanitize_id,
    services::infer_initiator,
    services::ClientHints,
    transformer::{
        anthropic::AnthropicMessagesRequest,
        openai::{ChatCompletionChunk, ChatCompletionResponse},
        stream::{format_anthropic_event, SseParser, StreamTranslator},
        translate_request, translate_response,
    },
};
use serde_json::json;

fn tool_conversation(turns: usize) -> AnthropicMessagesRequest {
    let mut messages = vec![json!({"role": "user", "content": "Refactor the parser module."})];
    for turn in 0..turns {
        let id = format!("call:{}", turn);
        messages.push(json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Reading the file."},
                {"type": "tool_use", "id": id, "name": "read_file", "input": {"path": "src/parser.rs"}}
            ]
        }));
        messages.push(json!({
            "role": "user",
            "content": [
                {"type": "tool_result", "tool_use_id": id, "content": "fn parse() {}"}
            ]
        }));
    }

    serde_json::from_value(json!({
        "model": "claude-sonnet-4-20250514",
        "max_tokens": 4096,
        "system": "You are a careful engineer.",
        "tools": [{
            "name": "read_file",
            "description": "Read a file",
            "input_schema": {"type": "object", "properties": {"path": {"type": "string"}}}
        }],
        "thinking": {"type": "enabled", "budget_tokens": 2048},
        "messages": messages
    }))
    .unwrap()
}

fn stream_chunks(text_chunks: usize) -> Vec<ChatCompletionChunk> {
    let mut chunks: Vec<ChatCompletionChunk> = (0..text_chunks)
        .map(|i| {
            serde_json::from_value(json!({
                "id": "chatcmpl-bench",
                "model": "claude-sonnet-4",
                "choices": [{"index": 0, "delta": {"content": format!("token{} ", i)}}]
            }))
            .unwrap()
        })
        .collect();
    chunks.push(
        serde_json::from_value(json!({
            "id": "chatcmpl-bench",
            "model": "claude-sonnet-4",
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "id": "call:1", "type": "function",
                "function": {"name": "read_file", "arguments": "{\"path\":\"a.rs\"}"}
            }]}}]
        }))
        .unwrap(),
    );
    chunks.push(
        serde_json::from_value(json!({
            "id": "chatcmpl-bench",
            "model": "claude-sonnet-4",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}],
            "usage": {"prompt_tokens": 1200, "completion_tokens": 300, "total_tokens": 1500}
        }))
        .unwrap(),
    );
    chunks
}

// ============================================================================
// Request Translation Benchmarks
// ============================================================================

fn bench_translate_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate_request");

    for turns in [1, 10, 50].iter() {
        let request = tool_conversation(*turns);
        group.bench_with_input(BenchmarkId::from_parameter(turns), &request, |b, request| {
            b.iter(|| translate_request(black_box(request)))
        });
    }

    group.finish();
}

fn bench_infer_initiator(c: &mut Criterion) {
    let request = tool_conversation(50);
    let hints = ClientHints::default();

    c.bench_function("infer_initiator_50_turns", |b| {
        b.iter(|| infer_initiator(black_box(&request.messages), &hints))
    });
}

// ============================================================================
// Response Translation Benchmarks
// ============================================================================

fn bench_translate_response(c: &mut Criterion) {
    let response: ChatCompletionResponse = serde_json::from_value(json!({
        "id": "chatcmpl-bench",
        "model": "claude-sonnet-4",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "reasoning": "Consider the parser first.",
                "content": "I will read the file.",
                "tool_calls": [{
                    "id": "call:1",
                    "type": "function",
                    "function": {"name": "read_file", "arguments": "{\"path\":\"src/parser.rs\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {
            "prompt_tokens": 1200,
            "completion_tokens": 300,
            "total_tokens": 1500,
            "prompt_tokens_details": {"cached_tokens": 1000}
        }
    }))
    .unwrap();

    c.bench_function("translate_response", |b| {
        b.iter(|| translate_response(black_box(&response)))
    });
}

fn bench_sanitize_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitize_id");
    group.bench_function("valid", |b| {
        b.iter(|| sanitize_id(black_box("toolu_01ABCdef-xyz")))
    });
    group.bench_function("invalid", |b| {
        b.iter(|| sanitize_id(black_box("call:1/toolu.abc")))
    });
    group.finish();
}

// ============================================================================
// Streaming Benchmarks
// ============================================================================

fn bench_stream_translation(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_translation");

    for size in [10, 100, 1000].iter() {
        let chunks = stream_chunks(*size);
        group.throughput(Throughput::Elements(chunks.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &chunks, |b, chunks| {
            b.iter(|| {
                let mut translator = StreamTranslator::new();
                let mut out = String::new();
                for chunk in chunks {
                    for event in translator.translate_chunk(black_box(chunk)) {
                        out.push_str(&format_anthropic_event(&event));
                    }
                }
                out
            })
        });
    }

    group.finish();
}

fn bench_sse_parse(c: &mut Criterion) {
    let body: String = stream_chunks(100)
        .iter()
        .map(|chunk| format!("data: {}\n\n", serde_json::to_string(chunk).unwrap()))
        .collect();
    let bytes = body.into_bytes();

    let mut group = c.benchmark_group("sse_parse");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("split_512", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            bytes
                .chunks(512)
                .map(|piece| parser.parse(black_box(piece)).len())
                .sum::<usize>()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_translate_request,
    bench_infer_initiator,
    bench_translate_response,
    bench_sanitize_id,
    bench_stream_translation,
    bench_sse_parse,
);

criterion_main!(benches);
