use aigent_connector::{
    config::load_config,
    keycloak::{KeycloakClient, TokenProvider},
    protocol::{generate_call_id, CallMetadata, Channel, Direction, VoiceMetadata},
    Admission, ConnectorOptions, StreamConnector,
};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Inbound,
    Outbound,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Inbound => Direction::Inbound,
            DirectionArg::Outbound => Direction::Outbound,
        }
    }
}

/// Stream an audio file to the Aigent cluster as the agent and client legs of one call
#[derive(Parser, Debug)]
#[command(name = "aigent-stream", version)]
struct Args {
    /// Cluster endpoint (overrides AIGENT_API_URL)
    #[arg(long)]
    url: Option<String>,

    /// Audio file to stream (overrides AUDIO_FILE)
    #[arg(long)]
    audio_file: Option<String>,

    /// Bytes per voice message
    #[arg(long, default_value_t = 8000)]
    chunk_bytes: usize,

    /// Codec name announced in the call metadata
    #[arg(long, default_value = "s16le")]
    codec: String,

    #[arg(long, default_value_t = 8000)]
    sampling_rate: u32,

    #[arg(long, value_enum, default_value_t = DirectionArg::Outbound)]
    direction: DirectionArg,

    #[arg(long, default_value = "agentId")]
    agent_id: String,

    #[arg(long, default_value = "clientId")]
    client_id: String,

    #[arg(long, default_value = "corp//alex")]
    agent_windows_username: String,

    /// Seconds to wait for the cluster to close each stream after the flush
    #[arg(long, default_value_t = 30)]
    linger_secs: u64,

    /// Send the immediate flush under the voice code
    #[arg(long)]
    legacy_flush: bool,

    /// Log connector activity at info level
    #[arg(short, long)]
    verbose: bool,
}

fn call_metadata(args: &Args, call_id: String) -> CallMetadata {
    let mut metadata = CallMetadata::new(VoiceMetadata {
        channel: Channel::Agent,
        client_call_id: call_id,
        codec: args.codec.clone(),
        audio_container: String::new(),
        sampling_rate: args.sampling_rate,
        direction: args.direction.into(),
    });
    metadata.agent_windows_username = Some(args.agent_windows_username.clone());
    metadata.agent_id = Some(args.agent_id.clone());
    metadata.client_id = Some(args.client_id.clone());
    metadata
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();
    let args = Args::parse();

    let config = load_config()?;
    let url = args.url.clone().unwrap_or_else(|| config.api_url.clone());
    let audio_file = args
        .audio_file
        .clone()
        .unwrap_or_else(|| config.audio_file.clone());

    if args.chunk_bytes == 0 {
        anyhow::bail!("--chunk-bytes must be greater than zero");
    }

    let audio = tokio::fs::read(&audio_file)
        .await
        .with_context(|| format!("failed to read audio file {}", audio_file))?;
    log::info!("🎵 Loaded {} bytes from {}", audio.len(), audio_file);

    let call_id = generate_call_id();
    let agent_metadata = call_metadata(&args, call_id.clone());
    let client_metadata = agent_metadata.for_channel(Channel::Client);

    let options = ConnectorOptions {
        verbose: args.verbose,
        close_linger: Some(Duration::from_secs(args.linger_secs)),
        legacy_flush_code: args.legacy_flush,
        ..ConnectorOptions::default()
    };
    let mut agent_stream = StreamConnector::with_options(&url, agent_metadata, options.clone())?;
    let mut client_stream = StreamConnector::with_options(&url, client_metadata, options)?;

    // Tokens expire, so fetch a fresh one right before starting the streams
    let keycloak = KeycloakClient::new(config.keycloak())?;
    let token = match keycloak.fetch_token().await {
        Ok(token) => token,
        Err(e) => {
            log::error!("❌ Error while getting keycloak token: {}", e);
            std::process::exit(1);
        }
    };

    agent_stream.start(&token)?;
    client_stream.start(&token)?;
    log::info!("📞 Streaming call {}", call_id);

    let mut dropped = 0usize;
    for chunk in audio.chunks(args.chunk_bytes) {
        for stream in [&mut agent_stream, &mut client_stream] {
            if stream.send_voice(chunk) == Admission::Dropped {
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        log::warn!("{} voice chunks were dropped before transmission", dropped);
    }

    agent_stream.send_flush();
    client_stream.send_flush();
    agent_stream.close();
    client_stream.close();

    // Both legs share this task; their events interleave but never run in parallel
    tokio::join!(agent_stream.run(), client_stream.run());

    log::info!(
        "👋 Call {} finished (metadata sent: agent={}, client={})",
        call_id,
        agent_stream.is_metadata_sent(),
        client_stream.is_metadata_sent()
    );
    Ok(())
}
