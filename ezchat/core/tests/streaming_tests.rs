//! Stream Pump Integration Tests
//!
//! Drives the pump end to end over a scripted in-memory transport:
//! - token extraction for every wire format
//! - malformed records skipped without losing the rest of the reply
//! - identical output for every chunking of the same bytes
//! - cancellation at any point, with the body released
//! - request failures, read failures and backend error frames

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{Script, ScriptedTransport};
use ezchat_core::{
    ClientConfig, HttpRequest, PumpState, StreamError, StreamOptions, StreamPump, Token,
    TransportError, TurnAccumulator, TurnUpdate, WireFormat,
};

// =============================================================================
// Helpers
// =============================================================================

fn open(transport: &Arc<ScriptedTransport>, options: StreamOptions) -> StreamPump {
    StreamPump::open(
        transport.clone(),
        HttpRequest::get("http://test/v1/chat/completions"),
        options,
        CancellationToken::new(),
    )
}

fn format(wire_format: WireFormat) -> StreamOptions {
    StreamOptions::default().with_wire_format(wire_format)
}

/// Collect every token, then the terminal error if there was one
async fn run(pump: &mut StreamPump) -> (Vec<String>, Option<StreamError>) {
    let mut tokens = Vec::new();
    let mut error = None;
    while let Some(item) = pump.next_token().await {
        match item {
            Ok(token) => tokens.push(token.into_string()),
            Err(e) => error = Some(e),
        }
    }
    (tokens, error)
}

async fn tokens_for(script: Script, wire_format: WireFormat) -> Vec<String> {
    let transport = ScriptedTransport::new(script);
    let mut pump = open(&transport, format(wire_format));
    let (tokens, error) = run(&mut pump).await;
    assert!(error.is_none(), "unexpected error: {error:?}");
    tokens
}

// =============================================================================
// Token Extraction
// =============================================================================

#[tokio::test]
async fn test_sse_hello_world() {
    let tokens = tokens_for(Script::ok(&["data: Hello\n\ndata: World\n\n"]), WireFormat::SseText).await;
    assert_eq!(tokens, vec!["Hello", "World"]);
}

#[tokio::test]
async fn test_ndjson_hi_bang() {
    let body = "{\"message\":{\"content\":\"Hi\"}}\n{\"message\":{\"content\":\"!\"}}\n";
    let tokens = tokens_for(Script::ok(&[body]), WireFormat::Ndjson).await;
    assert_eq!(tokens, vec!["Hi", "!"]);
}

#[tokio::test]
async fn test_default_options_read_relayed_ollama_lines() {
    let body = concat!(
        "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
        "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
        "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
    );
    let transport = ScriptedTransport::new(Script::split(body, 17));
    let mut pump = open(&transport, StreamOptions::default());

    let (tokens, error) = run(&mut pump).await;
    assert!(error.is_none());
    assert_eq!(tokens, vec!["Hel", "lo"]);
    assert_eq!(ClientConfig::default().stream_options().wire_format, WireFormat::Ndjson);
}

#[tokio::test]
async fn test_sse_json_openai_chunks_until_done() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Rust\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" rocks\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let tokens = tokens_for(Script::ok(&[body]), WireFormat::SseJson).await;
    assert_eq!(tokens, vec!["Rust", " rocks"]);
}

#[tokio::test]
async fn test_raw_passthrough_yields_each_chunk() {
    let tokens = tokens_for(Script::ok(&["plain ", "text"]), WireFormat::Raw).await;
    assert_eq!(tokens, vec!["plain ", "text"]);
}

#[tokio::test]
async fn test_trailing_frame_without_delimiter_is_flushed() {
    let body = "{\"message\":{\"content\":\"a\"}}\n{\"message\":{\"content\":\"b\"}}";
    let tokens = tokens_for(Script::ok(&[body]), WireFormat::Ndjson).await;
    assert_eq!(tokens, vec!["a", "b"]);
}

#[tokio::test]
async fn test_ndjson_done_carries_final_token() {
    let body = concat!(
        "{\"message\":{\"content\":\"one\"},\"done\":false}\n",
        "{\"message\":{\"content\":\" two\"},\"done\":true}\n",
        "{\"message\":{\"content\":\"ignored\"}}\n",
    );
    let tokens = tokens_for(Script::ok(&[body]), WireFormat::Ndjson).await;
    assert_eq!(tokens, vec!["one", " two"]);
}

// =============================================================================
// Malformed Records
// =============================================================================

#[tokio::test]
async fn test_malformed_record_is_skipped() {
    let body = concat!(
        "data: {\"content\":\"before\"}\n\n",
        "data: {not json\n\n",
        "data: {\"content\":\"after\"}\n\n",
    );
    let transport = ScriptedTransport::new(Script::ok(&[body]));
    let mut pump = open(&transport, format(WireFormat::SseJson));

    let (tokens, error) = run(&mut pump).await;
    assert_eq!(tokens, vec!["before", "after"]);
    assert!(error.is_none());
    assert_eq!(pump.state(), PumpState::Done);
    assert_eq!(pump.stats().malformed_frames, 1);
}

#[tokio::test]
async fn test_ndjson_metadata_frames_are_not_malformed() {
    let body = "{\"model\":\"llama3\",\"created_at\":\"now\"}\n{\"message\":{\"content\":\"x\"}}\n";
    let transport = ScriptedTransport::new(Script::ok(&[body]));
    let mut pump = open(&transport, format(WireFormat::Ndjson));

    let (tokens, _) = run(&mut pump).await;
    assert_eq!(tokens, vec!["x"]);
    assert_eq!(pump.stats().malformed_frames, 0);
}

// =============================================================================
// Chunk-Boundary Independence
// =============================================================================

#[tokio::test]
async fn test_chunking_does_not_change_tokens() {
    let cases = [
        (
            WireFormat::SseText,
            "data: Hello\n\ndata: wörld 🌮\n\n: comment\n\ndata: [DONE]\n\n",
        ),
        (
            WireFormat::SseJson,
            concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n\n",
                "data: {broken\n\n",
                "data: {\"message\":{\"content\":\"日本\"}}\n\n",
            ),
        ),
        (
            WireFormat::Ndjson,
            concat!(
                "{\"message\":{\"content\":\"Grüße\"}}\n",
                "{\"message\":{\"content\":\" 🚀\"}}\n",
                "{\"done\":true}\n",
            ),
        ),
    ];

    for (wire_format, body) in cases {
        let whole = tokens_for(Script::ok(&[body]), wire_format).await;
        assert!(!whole.is_empty(), "{wire_format}: no tokens");

        for size in [1, 2, 3, 5, 7, 64] {
            let split = tokens_for(Script::split(body, size), wire_format).await;
            assert_eq!(split, whole, "{wire_format}: chunk size {size} diverged");
        }
    }
}

#[tokio::test]
async fn test_code_point_split_across_reads() {
    let bytes = "data: 🌮\n\n".as_bytes();
    // Split inside the four-byte emoji.
    let script = Script::bytes(vec![bytes[..8].to_vec(), bytes[8..].to_vec()]);
    let tokens = tokens_for(script, WireFormat::SseText).await;
    assert_eq!(tokens, vec!["🌮"]);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_after_n_tokens_keeps_exactly_n() {
    let transport = ScriptedTransport::new(
        Script::ok(&["data: a\n\ndata: b\n\ndata: c\n\n", "data: d\n\n"]).then_hang(),
    );
    let cancel = CancellationToken::new();
    let mut pump = StreamPump::open(
        transport.clone(),
        HttpRequest::get("http://test/chat"),
        format(WireFormat::SseText),
        cancel.clone(),
    );
    let mut acc = TurnAccumulator::default();
    acc.begin().unwrap();

    for _ in 0..2 {
        let token = pump.next_token().await.unwrap().unwrap();
        acc.on_token(&token);
    }
    cancel.cancel();

    assert!(pump.next_token().await.is_none());
    assert_eq!(pump.state(), PumpState::Cancelled);
    assert!(transport.body_dropped());

    match acc.on_cancel() {
        Some(TurnUpdate::Finalized { message, .. }) => assert_eq!(message.content, "ab"),
        other => panic!("unexpected update {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_while_waiting_for_body_releases_it() {
    let transport = ScriptedTransport::new(Script::ok(&["data: first\n\n"]).then_hang());
    let cancel = CancellationToken::new();
    let mut pump = StreamPump::open(
        transport.clone(),
        HttpRequest::get("http://test/chat"),
        format(WireFormat::SseText),
        cancel.clone(),
    );

    assert_eq!(pump.next_token().await.unwrap().unwrap(), Token::from("first"));

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    // Blocks on the hanging body until the token fires.
    let next = tokio::time::timeout(Duration::from_secs(5), pump.next_token())
        .await
        .expect("cancellation did not interrupt the read");
    assert!(next.is_none());
    assert!(transport.body_dropped());
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_cancel_mid_frame() {
    let transport = ScriptedTransport::new(Script::ok(&["data: whole\n\ndata: hal"]).then_hang());
    let cancel = CancellationToken::new();
    let mut pump = StreamPump::open(
        transport.clone(),
        HttpRequest::get("http://test/chat"),
        format(WireFormat::SseText),
        cancel.clone(),
    );

    assert_eq!(pump.next_token().await.unwrap().unwrap().as_str(), "whole");
    cancel.cancel();
    assert!(pump.next_token().await.is_none());
    assert!(pump.next_token().await.is_none());
    assert_eq!(pump.stats().tokens_yielded, 1);
}

#[tokio::test]
async fn test_done_sentinel_releases_body() {
    let transport =
        ScriptedTransport::new(Script::ok(&["data: x\n\ndata: [DONE]\n\n"]).then_hang());
    let mut pump = open(&transport, format(WireFormat::SseText));

    let (tokens, error) = run(&mut pump).await;
    assert_eq!(tokens, vec!["x"]);
    assert!(error.is_none());
    assert!(transport.body_dropped());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_non_success_status_is_request_failed() {
    let transport = ScriptedTransport::new(Script::status(503, "model is loading"));
    let mut pump = open(&transport, format(WireFormat::SseJson));

    let (tokens, error) = run(&mut pump).await;
    assert!(tokens.is_empty());
    match error {
        Some(StreamError::RequestFailed { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "model is loading");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
    assert_eq!(pump.state(), PumpState::Errored);
}

#[tokio::test]
async fn test_error_body_is_capped() {
    let mut script = Script::split(&"e".repeat(10_000), 1000);
    script.status = 500;
    let transport = ScriptedTransport::new(script);
    let mut pump = open(&transport, format(WireFormat::SseJson));

    match run(&mut pump).await.1 {
        Some(StreamError::RequestFailed { body, .. }) => assert_eq!(body.len(), 4096),
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_body() {
    let transport = ScriptedTransport::new(Script::no_body());
    let mut pump = open(&transport, format(WireFormat::SseText));

    let (tokens, error) = run(&mut pump).await;
    assert!(tokens.is_empty());
    assert!(matches!(error, Some(StreamError::MissingBody)));
}

#[tokio::test]
async fn test_read_failure_keeps_yielded_tokens() {
    let transport = ScriptedTransport::new(
        Script::ok(&["data: Par\n\n", "data: tial\n\n"]).then_fail("connection reset"),
    );
    let mut pump = open(&transport, format(WireFormat::SseText));

    let (tokens, error) = run(&mut pump).await;
    assert_eq!(tokens, vec!["Par", "tial"]);
    match error {
        Some(StreamError::Transport(TransportError::Io(message))) => {
            assert_eq!(message, "connection reset");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(transport.body_dropped());
}

#[tokio::test]
async fn test_backend_error_frame_ends_stream() {
    let body = concat!(
        "data: {\"content\":\"ok\"}\n\n",
        "data: {\"error\":{\"message\":\"model not found\"}}\n\n",
        "data: {\"content\":\"never\"}\n\n",
    );
    let transport = ScriptedTransport::new(Script::ok(&[body]));
    let mut pump = open(&transport, format(WireFormat::SseJson));

    let (tokens, error) = run(&mut pump).await;
    assert_eq!(tokens, vec!["ok"]);
    assert!(matches!(error, Some(StreamError::Backend(m)) if m == "model not found"));
}

#[tokio::test]
async fn test_read_timeout() {
    let transport = ScriptedTransport::new(Script::ok(&["data: early\n\n"]).then_hang());
    let options = format(WireFormat::SseText).with_read_timeout(Duration::from_millis(30));
    let mut pump = open(&transport, options);

    let (tokens, error) = run(&mut pump).await;
    assert_eq!(tokens, vec!["early"]);
    assert!(matches!(
        error,
        Some(StreamError::Transport(TransportError::Timeout))
    ));
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() {
    let unterminated = "x".repeat(64);
    let transport = ScriptedTransport::new(Script::ok(&["data: ok\n\n", unterminated.as_str()]));
    let options = format(WireFormat::SseText).with_max_frame_bytes(16);
    let mut pump = open(&transport, options);

    let (tokens, error) = run(&mut pump).await;
    assert_eq!(tokens, vec!["ok"]);
    assert!(matches!(error, Some(StreamError::FrameTooLarge(_))));
}

#[tokio::test]
async fn test_oversized_tail_keeps_frames_from_same_read() {
    let body = format!("data: ok\n\ndata: fine\n\n{}", "x".repeat(64));
    let transport = ScriptedTransport::new(Script::ok(&[body.as_str()]));
    let options = format(WireFormat::SseText).with_max_frame_bytes(16);
    let mut pump = open(&transport, options);

    let (tokens, error) = run(&mut pump).await;
    assert_eq!(tokens, vec!["ok", "fine"]);
    assert!(matches!(
        error,
        Some(StreamError::FrameTooLarge(e)) if e.limit == 16
    ));
    assert_eq!(pump.state(), PumpState::Errored);
    assert!(transport.body_dropped());
}

#[tokio::test]
async fn test_stalled_error_body_times_out() {
    let transport = ScriptedTransport::new(
        Script {
            status: 502,
            ..Script::ok(&["upstream "])
        }
        .then_hang(),
    );
    let options = format(WireFormat::SseText).with_read_timeout(Duration::from_millis(30));
    let mut pump = open(&transport, options);

    let (tokens, error) = tokio::time::timeout(Duration::from_secs(5), run(&mut pump))
        .await
        .expect("error body read never gave up");
    assert!(tokens.is_empty());
    assert!(matches!(
        error,
        Some(StreamError::RequestFailed { status: 502, .. })
    ));
}

// =============================================================================
// Stream Adapter
// =============================================================================

#[tokio::test]
async fn test_into_stream_matches_next_token() {
    use futures::StreamExt;

    let transport = ScriptedTransport::new(Script::split("data: a\n\ndata: b\n\n", 4));
    let items: Vec<_> = open(&transport, format(WireFormat::SseText))
        .into_stream()
        .collect()
        .await;

    let tokens: Vec<String> = items.into_iter().map(|t| t.unwrap().into_string()).collect();
    assert_eq!(tokens, vec!["a", "b"]);
}
