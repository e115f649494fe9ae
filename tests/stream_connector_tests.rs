//! # Stream Connector Tests
//!
//! Runs the connector against a local WebSocket server standing in for the
//! Aigent cluster. The server records every frame it receives and closes the
//! connection once it sees a flush, the way the cluster finishes a call.

use aigent_connector::{
    protocol::{CallMetadata, Channel, Direction, Frame, MessageType, VoiceMetadata},
    Admission, ConnectionState, StreamConnector,
};
use futures_util::StreamExt;
use secrecy::SecretString;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// What the mock cluster saw on one connection
struct Session {
    request_uri: String,
    frames: Vec<Frame>,
}

enum ServerBehaviour {
    /// Close after the flush frame
    CloseOnFlush,
    /// Close right after the handshake
    CloseImmediately,
}

async fn spawn_cluster(
    connections: usize,
    behaviour: ServerBehaviour,
) -> (String, JoinHandle<Vec<Session>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut sessions = Vec::new();
        for _ in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let close_immediately = matches!(behaviour, ServerBehaviour::CloseImmediately);
            sessions.push(tokio::spawn(serve_connection(stream, close_immediately)));
        }

        let mut results = Vec::new();
        for session in sessions {
            results.push(session.await.unwrap());
        }
        results
    });

    (format!("ws://{}/connector", addr), handle)
}

async fn serve_connection(stream: tokio::net::TcpStream, close_immediately: bool) -> Session {
    let mut request_uri = String::new();
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        request_uri = req.uri().to_string();
        Ok(response)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .unwrap();

    let mut frames = Vec::new();
    if close_immediately {
        ws.close(None).await.unwrap();
    }

    while let Some(Ok(message)) = ws.next().await {
        if let Message::Binary(data) = message {
            let frame = Frame::parse(data.as_slice()).unwrap();
            let is_flush = frame.code == MessageType::Flush.code();
            frames.push(frame);
            if is_flush {
                ws.close(None).await.unwrap();
            }
        }
    }

    Session {
        request_uri,
        frames,
    }
}

fn metadata(channel: Channel) -> CallMetadata {
    let mut metadata = CallMetadata::new(VoiceMetadata {
        channel,
        client_call_id: "5b0c3e0a-6d1e-4f8e-9a51-0c1f1a2b3c4d".to_string(),
        codec: "s16le".to_string(),
        audio_container: String::new(),
        sampling_rate: 8000,
        direction: Direction::Outbound,
    });
    metadata.agent_id = Some("agentId".to_string());
    metadata
}

fn token() -> SecretString {
    SecretString::from("tok123".to_string())
}

#[test_log::test(tokio::test)]
async fn test_streams_buffered_audio_in_order() {
    let (url, server) = spawn_cluster(1, ServerBehaviour::CloseOnFlush).await;

    let mut connector = StreamConnector::new(&url, metadata(Channel::Agent), true).unwrap();
    connector.start(&token()).unwrap();

    for i in 0..5u8 {
        assert_eq!(connector.send_voice(vec![i; 16]), Admission::Buffered);
    }
    assert_eq!(connector.send_flush(), Admission::Buffered);
    connector.close();

    tokio::time::timeout(Duration::from_secs(10), connector.run())
        .await
        .expect("connector did not reach Closed");
    assert_eq!(connector.state(), ConnectionState::Closed);
    assert!(connector.is_metadata_sent());

    let sessions = server.await.unwrap();
    let session = &sessions[0];
    assert!(session.request_uri.ends_with("/connector?aigent-api-token=tok123"));

    let codes: Vec<u16> = session.frames.iter().map(|f| f.code).collect();
    assert_eq!(codes, vec![1, 2, 2, 2, 2, 2, 3]);

    let sent_metadata: CallMetadata = serde_json::from_slice(&session.frames[0].payload).unwrap();
    assert_eq!(sent_metadata, metadata(Channel::Agent));

    for (i, frame) in session.frames[1..6].iter().enumerate() {
        assert_eq!(frame.payload, vec![i as u8; 16]);
    }
    assert_eq!(session.frames[6].payload, vec![0]);
}

#[test_log::test(tokio::test)]
async fn test_agent_and_client_streams_share_one_task() {
    let (url, server) = spawn_cluster(2, ServerBehaviour::CloseOnFlush).await;

    let mut agent = StreamConnector::new(&url, metadata(Channel::Agent), false).unwrap();
    let mut client = StreamConnector::new(&url, metadata(Channel::Client), false).unwrap();
    agent.start(&token()).unwrap();
    client.start(&token()).unwrap();

    let audio: Vec<u8> = (0..=255u8).cycle().take(4000).collect();
    for chunk in audio.chunks(1000) {
        agent.send_voice(chunk);
        client.send_voice(chunk);
    }
    agent.send_flush();
    client.send_flush();
    agent.close();
    client.close();

    tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(agent.run(), client.run());
    })
    .await
    .expect("streams did not close");

    let sessions = server.await.unwrap();
    let mut channels = Vec::new();
    for session in &sessions {
        let codes: Vec<u16> = session.frames.iter().map(|f| f.code).collect();
        assert_eq!(codes, vec![1, 2, 2, 2, 2, 3]);

        let received: Vec<u8> = session.frames[1..5]
            .iter()
            .flat_map(|f| f.payload.clone())
            .collect();
        assert_eq!(received, audio);

        let sent: CallMetadata = serde_json::from_slice(&session.frames[0].payload).unwrap();
        channels.push(sent.voice.channel);
    }
    channels.sort_by_key(|c| matches!(c, Channel::Client));
    assert_eq!(channels, vec![Channel::Agent, Channel::Client]);
}

#[test_log::test(tokio::test)]
async fn test_peer_close_discards_unsent_data() {
    let (url, server) = spawn_cluster(1, ServerBehaviour::CloseImmediately).await;

    let mut connector = StreamConnector::new(&url, metadata(Channel::Client), false).unwrap();
    connector.start(&token()).unwrap();
    connector.send_voice(vec![1; 32]);

    tokio::time::timeout(Duration::from_secs(10), connector.run())
        .await
        .expect("connector did not reach Closed");

    assert_eq!(connector.state(), ConnectionState::Closed);
    assert_eq!(connector.buffered_len(), 0);
    assert_eq!(connector.send_voice(vec![2; 32]), Admission::Dropped);
    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_unreachable_cluster_closes_connector() {
    // Grab a free port and release it so nothing is listening there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = format!("ws://{}/connector", addr);
    let mut connector = StreamConnector::new(&url, metadata(Channel::Agent), true).unwrap();
    connector.start(&token()).unwrap();
    connector.send_voice(vec![1; 8]);
    connector.close();

    tokio::time::timeout(Duration::from_secs(10), connector.run())
        .await
        .expect("connector did not reach Closed");

    assert_eq!(connector.state(), ConnectionState::Closed);
    assert!(!connector.is_metadata_sent());
    assert_eq!(connector.buffered_len(), 0);
}
