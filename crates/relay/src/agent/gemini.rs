use diagram_sync_common::types::Snapshot;
use serde_json::{json, Value};
use tracing::{debug, info_span, Instrument};

use super::AgentError;
use crate::config::AgentConfig;

const SYSTEM_PROMPT: &str = r#"You are an assistant for collaborative editing of UML class diagrams stored as JSON.

The user gives you a PROMPT and the current DIAGRAM.
Reply ONLY with a JSON object of the form:

{
  "updates": [
    { "type": "...", ... }
  ]
}

Always use an array in "updates", even for a single operation.

Supported operations:
- node.add: add a class
  { "type": "node.add", "id": "new-uuid", "data": {...} }
- node.update: change attributes or methods of an existing class
  { "type": "node.update", "id": "existing-uuid", "patch": {...} }
- node.remove: delete a class
  { "type": "node.remove", "id": "existing-uuid" }
- link.add: add a relationship (association, aggregation, composition, generalization)
  {
    "type": "link.add",
    "id": "new-uuid",
    "data": {
      "sourceId": "source-uuid",
      "targetId": "target-uuid",
      "type": "association | aggregation | composition | generalization",
      "cardinality": { "source": "expression", "target": "expression" }
    }
  }
  Allowed cardinalities: "1", "0..1", "*", "1..*", or ranges such as "2..5" and "3..*".
- link.remove: delete a relationship
  { "type": "link.remove", "id": "existing-uuid" }

Rules:
- Always return valid JSON with the "updates" field.
- Keep existing ids when updating or removing.
- Use new UUIDs only for new nodes or links.
- Do not return any additional text.
- Do not return the full snapshot unless the prompt explicitly says "reset".
- If the request cannot be fulfilled, reply with { "error": "reason" }.
"#;

/// Client for a Gemini `generateContent` endpoint.
pub struct GeminiAgent {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl GeminiAgent {
    pub fn new(config: &AgentConfig, api_key: &str) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, api_url: config.api_url.clone(), api_key: api_key.to_string() })
    }

    pub async fn propose(&self, prompt: &str, snapshot: &Snapshot) -> Result<Vec<Value>, AgentError> {
        let body = request_body(prompt, snapshot)?;

        async move {
            let reply = self
                .client
                .post(&self.api_url)
                .query(&[("key", self.api_key.as_str())])
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;

            let edits = parse_reply(&reply)?;
            debug!(edits = edits.len(), "agent proposed edits");
            Ok(edits)
        }
        .instrument(info_span!("agent.gemini.propose", prompt_chars = prompt.chars().count()))
        .await
    }
}

fn request_body(prompt: &str, snapshot: &Snapshot) -> Result<Value, AgentError> {
    let diagram = serde_json::to_string_pretty(snapshot)
        .map_err(|error| AgentError::BadResponse(format!("snapshot is not serializable: {error}")))?;

    Ok(json!({
        "contents": [{
            "parts": [
                { "text": SYSTEM_PROMPT },
                { "text": format!("User prompt:\n{prompt}") },
                { "text": format!("Current diagram:\n{diagram}") },
            ]
        }],
        "generationConfig": {
            "temperature": 0.2,
            "response_mime_type": "application/json",
        },
    }))
}

/// Extract the edit list from a `generateContent` reply. The model's text is
/// itself JSON: `{"updates": [...]}` or `{"error": "..."}`.
fn parse_reply(reply: &Value) -> Result<Vec<Value>, AgentError> {
    let text = reply
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::BadResponse("reply has no candidate text".to_string()))?;

    let parsed: Value = serde_json::from_str(text)
        .map_err(|error| AgentError::BadResponse(format!("candidate text is not JSON: {error}")))?;

    if let Some(error) = parsed.get("error") {
        let message = error.as_str().map(ToOwned::to_owned).unwrap_or_else(|| error.to_string());
        return Err(AgentError::Declined(message));
    }

    parsed
        .get("updates")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| AgentError::BadResponse("reply has no `updates` array".to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{extract::Query, routing::post, Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    fn candidate(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn parses_updates_from_candidate_text() {
        let reply = candidate(r#"{"updates":[{"type":"node.add","id":"n1","data":{"name":"Cat"}}]}"#);

        let edits = parse_reply(&reply).expect("updates should parse");

        assert_eq!(edits, vec![json!({ "type": "node.add", "id": "n1", "data": { "name": "Cat" } })]);
    }

    #[test]
    fn error_field_is_reported_as_declined() {
        let reply = candidate(r#"{"error":"prompt is ambiguous"}"#);
        let error = parse_reply(&reply).expect_err("error replies should fail");
        assert!(matches!(error, AgentError::Declined(message) if message == "prompt is ambiguous"));
    }

    #[test]
    fn malformed_replies_are_rejected() {
        assert!(matches!(parse_reply(&json!({})), Err(AgentError::BadResponse(_))));
        assert!(matches!(parse_reply(&candidate("not json")), Err(AgentError::BadResponse(_))));
        assert!(matches!(parse_reply(&candidate(r#"{"updates":{}}"#)), Err(AgentError::BadResponse(_))));
    }

    #[test]
    fn request_body_carries_prompt_and_snapshot() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert(
            "n1".into(),
            json!({ "id": "n1", "name": "Cat" }).as_object().cloned().expect("object"),
        );

        let body = request_body("add Dog", &snapshot).expect("body should build");

        let parts = body["contents"][0]["parts"].as_array().expect("parts array");
        assert_eq!(parts.len(), 3);
        assert!(parts[1]["text"].as_str().expect("prompt text").contains("add Dog"));
        assert!(parts[2]["text"].as_str().expect("diagram text").contains("\"Cat\""));
        assert_eq!(body["generationConfig"]["response_mime_type"], "application/json");
    }

    #[tokio::test]
    async fn propose_posts_to_endpoint_with_api_key() {
        let app = Router::new().route(
            "/generate",
            post(|Query(params): Query<std::collections::HashMap<String, String>>, Json(body): Json<Value>| async move {
                assert_eq!(params.get("key").map(String::as_str), Some("k-123"));
                assert!(body["contents"][0]["parts"][1]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .contains("add Cat"));
                Json(candidate(r#"{"updates":[{"type":"node.add","id":"Cat"}]}"#))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock agent server should run");
        });

        let config = AgentConfig {
            api_url: format!("http://{addr}/generate"),
            api_key: Some("k-123".into()),
            timeout: Duration::from_secs(5),
        };
        let agent = GeminiAgent::new(&config, "k-123").expect("agent should build");

        let edits = agent.propose("add Cat", &Snapshot::default()).await.expect("propose should succeed");

        assert_eq!(edits, vec![json!({ "type": "node.add", "id": "Cat" })]);
    }

    #[tokio::test]
    async fn http_errors_surface_as_request_failures() {
        let app = Router::new().route(
            "/generate",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock agent server should run");
        });

        let config = AgentConfig {
            api_url: format!("http://{addr}/generate"),
            api_key: Some("k-123".into()),
            timeout: Duration::from_secs(5),
        };
        let agent = GeminiAgent::new(&config, "k-123").expect("agent should build");

        let error = agent
            .propose("add Cat", &Snapshot::default())
            .await
            .expect_err("503 should fail");
        assert!(matches!(error, AgentError::Request(_)));
    }
}
