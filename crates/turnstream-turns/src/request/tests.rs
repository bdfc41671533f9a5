use serde_json::json;

use super::*;

#[test]
fn test_basic_chat_body() {
    let body = json!({
        "chat_id": "chat-42",
        "messages": [
            {"role": "user", "id": "m1", "content": "first question"},
            {"role": "assistant", "content": "answer"},
            {"role": "user", "id": "m3", "content": "what is the mean age?"}
        ]
    });
    let req = TurnRequest::from_chat_body(&body);
    assert_eq!(req.conversation_id, "chat-42");
    assert_eq!(req.last_user_id, "m3");
    assert_eq!(req.user_text, "what is the mean age?");
    assert_eq!(req.query, "what is the mean age?");
    assert!(req.stream);
    assert!(req.file_path.is_none());
}

#[test]
fn test_conversation_id_precedence_and_missing_fields() {
    let body = json!({"conversation_id": "c", "thread_id": "t", "stream": false, "messages": []});
    let req = TurnRequest::from_chat_body(&body);
    assert_eq!(req.conversation_id, "c");
    assert_eq!(req.last_user_id, "");
    assert_eq!(req.query, "");
    assert!(!req.stream);

    let req = TurnRequest::from_chat_body(&json!({}));
    assert_eq!(req, TurnRequest { stream: true, ..Default::default() });
}

#[test]
fn test_last_user_id_skips_users_without_id() {
    let body = json!({"messages": [
        {"role": "user", "id": "m1", "content": "a"},
        {"role": "user", "content": "b"}
    ]});
    let req = TurnRequest::from_chat_body(&body);
    assert_eq!(req.last_user_id, "m1");
    assert_eq!(req.user_text, "b");
}

#[test]
fn test_history_block_unwrapped() {
    let wrapped = "### Task:\nSuggest follow-ups.\n### Chat History:\n<chat_history>\nUSER: plot the ages\nASSISTANT: done\nUSER: now the median please\n</chat_history>";
    assert_eq!(
        extract_history_user(wrapped).as_deref(),
        Some("now the median please")
    );
    assert!(extract_history_user("plain text").is_none());
    assert!(extract_history_user("### Chat History: but no block").is_none());

    let body = json!({"messages": [{"role": "user", "content": wrapped}]});
    assert_eq!(TurnRequest::from_chat_body(&body).query, "now the median please");
}

#[test]
fn test_multipart_content() {
    let body = json!({"messages": [{"role": "user", "content": [
        {"type": "text", "text": "describe"},
        {"type": "image_url", "image_url": {"url": "http://x/y.png"}},
        {"type": "text", "text": "this"}
    ]}]});
    assert_eq!(TurnRequest::from_chat_body(&body).user_text, "describe\nthis");
}

#[test]
fn test_normalize_query_strips_file_noise() {
    assert_eq!(
        normalize_query("FILE: uploaded/a.csv summarize the data"),
        "summarize the data"
    );
    assert_eq!(
        normalize_query("filename: report.txt count rows"),
        "count rows"
    );
    assert_eq!(
        normalize_query("analyze ab12_ball501.txt for outliers"),
        "analyze for outliers"
    );
    // Short digit runs are ordinary words.
    assert_eq!(normalize_query("top 10 rows of q3.csv"), "top 10 rows of q3.csv");
}

#[test]
fn test_file_tags() {
    let text = "FILE: uploaded/x_1.csv and FILENAME: ball501.txt";
    assert_eq!(extract_file_tag(text).as_deref(), Some("uploaded/x_1.csv"));
    assert_eq!(extract_filename_tag(text).as_deref(), Some("ball501.txt"));
    assert!(extract_file_tag("FILENAME: only.txt").is_none());
    assert!(extract_filename_tag("nothing here").is_none());
}

#[test]
fn test_explicit_file_path_wins_over_tag() {
    let body = json!({
        "file_path": "uploaded/explicit.csv",
        "messages": [{"role": "user", "content": "FILE: uploaded/tagged.csv go"}]
    });
    let req = TurnRequest::from_chat_body(&body);
    assert_eq!(req.file_path.as_deref(), Some("uploaded/explicit.csv"));
    assert_eq!(req.object_key(), Some("uploaded/explicit.csv"));
    assert_eq!(req.query, "go");
}

#[test]
fn test_attachments_and_candidates() {
    let body = json!({
        "files": [
            {"name": "data.csv"},
            {"url": "http://host/files/plot.png?sig=abc"},
            "dir/notes.txt"
        ],
        "messages": [
            {"role": "user", "content": "FILENAME: extra.xlsx look", "attachments": [
                {"filename": "data.csv"},
                {"path": "/var/uploads/raw.json"}
            ]}
        ]
    });
    let req = TurnRequest::from_chat_body(&body);
    assert_eq!(
        req.attachments,
        vec!["data.csv", "plot.png", "notes.txt", "raw.json"]
    );
    assert_eq!(
        req.candidate_names(),
        vec!["extra.xlsx", "data.csv", "plot.png", "notes.txt", "raw.json"]
    );
    assert!(req.object_key().is_none());
}
