use crate::protocol::ProtocolError;
use serde::{Deserialize, Serialize};

/// Which side of the call a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Agent,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

/// Audio description of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMetadata {
    pub channel: Channel,
    /// Unique per call, shared by the agent and client streams
    pub client_call_id: String,
    /// e.g. `s16le`, `g729`, `mulaw`, `alaw`, `libopus`
    pub codec: String,
    /// Empty when the audio is not wrapped in a container
    #[serde(default)]
    pub audio_container: String,
    pub sampling_rate: u32,
    #[serde(default)]
    pub direction: Direction,
}

/// Call metadata, sent once as the first message of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetadata {
    pub voice: VoiceMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_windows_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// VDN, lets the cluster filter triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ani: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ani: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    /// Fields this crate does not know about, passed through as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CallMetadata {
    pub fn new(voice: VoiceMetadata) -> Self {
        Self {
            voice,
            agent_windows_username: None,
            client_id: None,
            agent_id: None,
            category: None,
            ani: None,
            agent_ani: None,
            program_id: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Copy of this record for the other leg of the same call
    pub fn for_channel(&self, channel: Channel) -> Self {
        let mut metadata = self.clone();
        metadata.voice.channel = channel;
        metadata
    }

    /// JSON bytes carried by the metadata frame
    pub fn to_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Random v4 UUID used as `clientCallId`
pub fn generate_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CallMetadata {
        let mut metadata = CallMetadata::new(VoiceMetadata {
            channel: Channel::Agent,
            client_call_id: "call-1".to_string(),
            codec: "s16le".to_string(),
            audio_container: String::new(),
            sampling_rate: 8000,
            direction: Direction::Outbound,
        });
        metadata.agent_id = Some("100900".to_string());
        metadata
    }

    #[test]
    fn test_wire_field_names() {
        let payload = sample().to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "voice": {
                    "channel": "agent",
                    "clientCallId": "call-1",
                    "codec": "s16le",
                    "audioContainer": "",
                    "samplingRate": 8000,
                    "direction": "outbound"
                },
                "agentId": "100900"
            })
        );
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let metadata: CallMetadata = serde_json::from_value(json!({
            "voice": {
                "channel": "client",
                "clientCallId": "call-2",
                "codec": "libopus",
                "samplingRate": 48000
            },
            "tenant": "acme"
        }))
        .unwrap();

        assert_eq!(metadata.voice.direction, Direction::Inbound);
        assert_eq!(metadata.voice.audio_container, "");
        assert_eq!(metadata.extra.get("tenant"), Some(&json!("acme")));

        let payload = metadata.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["tenant"], json!("acme"));
    }

    #[test]
    fn test_for_channel_keeps_call_id() {
        let agent = sample();
        let client = agent.for_channel(Channel::Client);
        assert_eq!(client.voice.channel, Channel::Client);
        assert_eq!(client.voice.client_call_id, agent.voice.client_call_id);
        assert_eq!(client.agent_id, agent.agent_id);
    }

    #[test]
    fn test_generate_call_id() {
        let a = generate_call_id();
        let b = generate_call_id();
        assert_eq!(a.len(), 36);
        assert_eq!(&a[14..15], "4");
        assert_ne!(a, b);
    }
}
