//! Dialogue backend
//!
//! Sends the transcript to a Voiceflow-style conversational runtime and
//! extracts the spoken reply: display text plus an audio reference.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default dialogue runtime
pub const DEFAULT_DIALOGUE_URL: &str = "https://general-runtime.voiceflow.com";

/// One assistant turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueReply {
    /// Reply text (may be empty)
    pub message: String,
    /// Inline `data:` URI or http(s) URL of the spoken reply
    #[serde(rename = "audioUri")]
    pub audio_uri: String,
}

/// Produces a reply for a transcript
#[async_trait]
pub trait Dialogue: Send + Sync {
    /// Get the assistant's reply to `transcript`
    ///
    /// # Errors
    ///
    /// Returns `Dialogue` if the backend fails or returns no reply payload
    async fn respond(&self, transcript: &str) -> Result<DialogueReply>;
}

#[derive(Serialize)]
struct InteractRequest<'a> {
    action: Action<'a>,
    config: InteractConfig,
}

#[derive(Serialize)]
struct Action<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: EventPayload<'a>,
}

#[derive(Serialize)]
struct EventPayload<'a> {
    event: QuestionEvent<'a>,
}

#[derive(Serialize)]
struct QuestionEvent<'a> {
    name: &'static str,
    question: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InteractConfig {
    tts: bool,
    #[serde(rename = "stripSSML")]
    strip_ssml: bool,
    stop_all: bool,
    exclude_types: [&'static str; 3],
}

/// A trace entry in the runtime's response
///
/// Payload shape depends on the trace type, so it stays untyped until the
/// trace is known to be a `speak`.
#[derive(Debug, Deserialize)]
struct Trace {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SpeakPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    audio: Option<AudioRef>,
}

#[derive(Debug, Deserialize)]
struct AudioRef {
    #[serde(default)]
    src: Option<String>,
}

/// Voiceflow Dialog Manager client
pub struct VoiceflowClient {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
    api_key: SecretString,
}

impl std::fmt::Debug for VoiceflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceflowClient")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl VoiceflowClient {
    /// Create a new dialogue client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the client cannot be built
    pub fn new(
        base_url: &str,
        user_id: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("dialogue API key required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            api_key,
        })
    }

    fn interact_url(&self) -> String {
        format!("{}/state/user/{}/interact", self.base_url, self.user_id)
    }
}

#[async_trait]
impl Dialogue for VoiceflowClient {
    async fn respond(&self, transcript: &str) -> Result<DialogueReply> {
        let request = InteractRequest {
            action: Action {
                kind: "event",
                payload: EventPayload {
                    event: QuestionEvent {
                        name: "question",
                        question: transcript,
                    },
                },
            },
            config: InteractConfig {
                tts: true,
                strip_ssml: true,
                stop_all: false,
                exclude_types: ["block", "debug", "flow"],
            },
        };

        let response = self
            .client
            .post(self.interact_url())
            .header("Authorization", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "dialogue request failed");
                Error::Dialogue(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "dialogue API error");
            return Err(Error::Dialogue(format!("dialogue API error {status}: {body}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Dialogue(e.to_string()))?;

        let reply = parse_traces(&body)?;
        tracing::info!(message = %reply.message, "dialogue reply received");
        Ok(reply)
    }
}

/// Pick the spoken reply out of a trace list
///
/// The first `speak` trace with a payload wins.
///
/// # Errors
///
/// Returns `Dialogue` if the body is not a trace list or has no speak payload
pub fn parse_traces(body: &str) -> Result<DialogueReply> {
    let traces: Vec<Trace> = serde_json::from_str(body)
        .map_err(|e| Error::Dialogue(format!("unexpected dialogue response: {e}")))?;

    let payload = traces
        .into_iter()
        .filter(|trace| trace.kind == "speak")
        .filter_map(|trace| trace.payload)
        .find_map(|payload| serde_json::from_value::<SpeakPayload>(payload).ok())
        .ok_or_else(|| Error::Dialogue("no payload in dialogue response".to_string()))?;

    Ok(DialogueReply {
        message: payload.message.unwrap_or_default(),
        audio_uri: payload.audio.and_then(|a| a.src).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speak_trace_is_extracted() {
        let body = r#"[
            {"type": "path", "payload": {"path": "reference"}},
            {"type": "speak", "payload": {
                "message": "Hi there",
                "type": "message",
                "audio": {"src": "data:audio/mp3;base64,AAAA"}
            }},
            {"type": "end"}
        ]"#;

        let reply = parse_traces(body).unwrap();
        assert_eq!(reply.message, "Hi there");
        assert_eq!(reply.audio_uri, "data:audio/mp3;base64,AAAA");
    }

    #[test]
    fn other_trace_payloads_do_not_need_speak_shape() {
        let body = r#"[
            {"type": "text", "payload": {"message": {"slate": [1, 2]}, "audio": "none"}},
            {"type": "choice", "payload": ["yes", "no"]},
            {"type": "speak", "payload": {"message": 42}},
            {"type": "speak", "payload": {"message": "Done", "audio": {"src": "https://a.example/x.mp3"}}}
        ]"#;

        let reply = parse_traces(body).unwrap();
        assert_eq!(reply.message, "Done");
        assert_eq!(reply.audio_uri, "https://a.example/x.mp3");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let reply = parse_traces(r#"[{"type":"speak","payload":{}}]"#).unwrap();
        assert_eq!(reply, DialogueReply::default());
    }

    #[test]
    fn no_speak_payload_is_an_error() {
        let err = parse_traces(r#"[{"type":"speak"},{"type":"end"}]"#).unwrap_err();
        assert!(matches!(err, Error::Dialogue(_)));

        let err = parse_traces(r#"{"error":"unauthorized"}"#).unwrap_err();
        assert!(matches!(err, Error::Dialogue(_)));
    }

    #[test]
    fn request_body_shape() {
        let request = InteractRequest {
            action: Action {
                kind: "event",
                payload: EventPayload {
                    event: QuestionEvent {
                        name: "question",
                        question: "what time is it",
                    },
                },
            },
            config: InteractConfig {
                tts: true,
                strip_ssml: true,
                stop_all: false,
                exclude_types: ["block", "debug", "flow"],
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["action"]["type"], "event");
        assert_eq!(value["action"]["payload"]["event"]["question"], "what time is it");
        assert_eq!(value["config"]["stripSSML"], true);
        assert_eq!(value["config"]["stopAll"], false);
        assert_eq!(value["config"]["excludeTypes"][2], "flow");
    }

    #[test]
    fn interact_url_is_per_user() {
        let client = VoiceflowClient::new(
            "https://runtime.example.com/",
            "device-1",
            SecretString::from("VF.DM.key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.interact_url(),
            "https://runtime.example.com/state/user/device-1/interact"
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = VoiceflowClient::new(
            DEFAULT_DIALOGUE_URL,
            "device-1",
            SecretString::from(String::new()),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
