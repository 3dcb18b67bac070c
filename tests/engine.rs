//! End-to-end engine tests with a scripted chat model.
//!
//! Covers the full upload/ask cycle: grounded answers with citations,
//! the workspace-inventory tool branch, general-knowledge fallback,
//! conversation memory, deletion, and workspace re-sync.

use std::sync::Arc;

use docchat::config::Config;
use docchat::embedding;
use docchat::engine::{AskRequest, Engine};
use docchat::llm::{ChatResponse, ScriptedChatProvider, ToolCallRequest};
use serde_json::json;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.workspace.root = tmp.path().join("ws");
    cfg
}

fn make_engine(tmp: &TempDir, script: Vec<ChatResponse>) -> (Engine, Arc<ScriptedChatProvider>) {
    let cfg = test_config(tmp);
    let embedder = embedding::create_provider(&cfg.embedding).unwrap();
    let provider = Arc::new(ScriptedChatProvider::new(script));
    let engine = Engine::new(cfg, embedder, provider.clone()).unwrap();
    (engine, provider)
}

fn text_reply(text: &str) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        tool_calls: vec![],
    }
}

#[tokio::test]
async fn test_upload_then_grounded_ask() {
    let tmp = TempDir::new().unwrap();
    let (engine, provider) = make_engine(
        &tmp,
        vec![text_reply("Machine learning is great [doc.txt lines 1-1].")],
    );

    let receipt = engine
        .upload("doc.txt", b"machine learning is great")
        .await
        .unwrap();
    assert_eq!(receipt.chunk_count, 1);

    let answer = engine
        .ask(&AskRequest {
            session_id: "s1".to_string(),
            message: "tell me about machine learning".to_string(),
            active_document: None,
        })
        .await
        .unwrap();

    assert!(answer.reply.contains("doc.txt"));
    assert!(!answer.used_general_knowledge);
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].filename, "doc.txt");
    assert_eq!(answer.sources[0].line_start, 1);

    // Grounded path: tools disabled, excerpt in the system prompt.
    let calls = provider.recorded();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool_count, 0);
    assert!(calls[0].system_prompt.contains("machine learning is great"));
}

#[tokio::test]
async fn test_meta_question_lists_workspace() {
    let tmp = TempDir::new().unwrap();
    let (engine, _) = make_engine(
        &tmp,
        vec![
            ChatResponse {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "list_dir".to_string(),
                    arguments: json!({}),
                }],
            },
            text_reply("You have uploaded:\n- a.txt\n- b.txt"),
        ],
    );

    engine.upload("a.txt", b"alpha content").await.unwrap();
    engine.upload("b.txt", b"beta content").await.unwrap();

    let answer = engine
        .ask(&AskRequest {
            session_id: "s1".to_string(),
            message: "what documents do I have?".to_string(),
            active_document: None,
        })
        .await
        .unwrap();

    assert_eq!(answer.tool_calls.len(), 1);
    assert_eq!(answer.tool_calls[0].name, "list_dir");
    assert!(answer.tool_calls[0].result.contains("a.txt"));
    assert!(answer.tool_calls[0].result.contains("b.txt"));
    assert!(!answer.used_general_knowledge);
}

#[tokio::test]
async fn test_unrelated_question_is_general_knowledge() {
    let tmp = TempDir::new().unwrap();
    let (engine, _) = make_engine(
        &tmp,
        vec![text_reply("Paris. (Answering from general knowledge.)")],
    );

    engine
        .upload("doc.txt", b"quarterly revenue projections")
        .await
        .unwrap();

    // No token overlap with the document, so every hit falls below the
    // score floor and the open path runs.
    let answer = engine
        .ask(&AskRequest {
            session_id: "s1".to_string(),
            message: "capital France".to_string(),
            active_document: None,
        })
        .await
        .unwrap();

    assert!(answer.used_general_knowledge);
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn test_memory_carries_across_asks() {
    let tmp = TempDir::new().unwrap();
    let (engine, provider) = make_engine(
        &tmp,
        vec![text_reply("First answer."), text_reply("Second answer.")],
    );

    for message in ["question alpha", "question beta"] {
        engine
            .ask(&AskRequest {
                session_id: "s1".to_string(),
                message: message.to_string(),
                active_document: None,
            })
            .await
            .unwrap();
    }

    let calls = provider.recorded();
    // First ask: system + user. Second: system + prior pair + user.
    assert_eq!(calls[0].message_count, 2);
    assert_eq!(calls[1].message_count, 4);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let (engine, provider) = make_engine(
        &tmp,
        vec![text_reply("one"), text_reply("two")],
    );

    for session in ["s1", "s2"] {
        engine
            .ask(&AskRequest {
                session_id: session.to_string(),
                message: "hello there".to_string(),
                active_document: None,
            })
            .await
            .unwrap();
    }

    // The second session saw no history from the first.
    let calls = provider.recorded();
    assert_eq!(calls[1].message_count, 2);
}

#[tokio::test]
async fn test_delete_removes_from_index_and_disk() {
    let tmp = TempDir::new().unwrap();
    let (engine, _) = make_engine(&tmp, vec![]);

    engine
        .upload("doomed.txt", b"ephemeral content here")
        .await
        .unwrap();
    assert_eq!(engine.document_count(), 1);

    assert!(engine.delete_document("doomed.txt").unwrap());
    assert_eq!(engine.document_count(), 0);
    assert!(!tmp.path().join("ws/doomed.txt").exists());

    let hits = engine.search("ephemeral content").await.unwrap();
    assert!(hits.is_empty());

    // Deleting again reports not found rather than erroring.
    assert!(!engine.delete_document("doomed.txt").unwrap());
}

#[tokio::test]
async fn test_reupload_replaces_document() {
    let tmp = TempDir::new().unwrap();
    let (engine, _) = make_engine(&tmp, vec![]);

    engine.upload("doc.txt", b"old version text").await.unwrap();
    engine.upload("doc.txt", b"new version text").await.unwrap();
    assert_eq!(engine.document_count(), 1);

    let hits = engine.search("new version text").await.unwrap();
    assert_eq!(hits[0].filename, "doc.txt");
    assert!(hits[0].text.contains("new version"));
}

#[tokio::test]
async fn test_empty_document_gets_sentinel_chunk() {
    let tmp = TempDir::new().unwrap();
    let (engine, _) = make_engine(&tmp, vec![]);

    let receipt = engine.upload("empty.txt", b"").await.unwrap();
    assert_eq!(receipt.chunk_count, 1);
    assert_eq!(engine.document_count(), 1);
}

#[tokio::test]
async fn test_upload_rejects_path_separators() {
    let tmp = TempDir::new().unwrap();
    let (engine, _) = make_engine(&tmp, vec![]);

    assert!(engine.upload("../escape.txt", b"x").await.is_err());
    assert!(engine.upload("a/b.txt", b"x").await.is_err());
    assert!(engine.upload("", b"x").await.is_err());
}

#[tokio::test]
async fn test_sync_workspace_indexes_existing_files() {
    let tmp = TempDir::new().unwrap();
    let ws = tmp.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join("left_behind.txt"), "previous run content").unwrap();

    let (engine, _) = make_engine(&tmp, vec![]);
    let indexed = engine.sync_workspace().await.unwrap();
    assert_eq!(indexed, 1);

    let hits = engine.search("previous run content").await.unwrap();
    assert_eq!(hits[0].filename, "left_behind.txt");
}

#[tokio::test]
async fn test_active_document_restricts_retrieval() {
    let tmp = TempDir::new().unwrap();
    let (engine, provider) = make_engine(
        &tmp,
        vec![text_reply("From alpha [alpha.txt lines 1-1].")],
    );

    engine
        .upload("alpha.txt", b"shared topic words appear here")
        .await
        .unwrap();
    engine
        .upload("beta.txt", b"shared topic words appear here too")
        .await
        .unwrap();

    let answer = engine
        .ask(&AskRequest {
            session_id: "s1".to_string(),
            message: "shared topic words".to_string(),
            active_document: Some("alpha.txt".to_string()),
        })
        .await
        .unwrap();

    assert!(answer.sources.iter().all(|s| s.filename == "alpha.txt"));
    assert!(!provider.recorded().is_empty());
}
