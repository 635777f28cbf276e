/// Development client for a running relay
/// Streams an audio file as binary chunks and an image as a video envelope,
/// then prints every alert the server sends back.
use base64::engine::general_purpose;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::error::Error;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

const USAGE: &str =
    "usage: lazarus_probe [URL] [--audio FILE] [--image FILE] [--chunk BYTES] [--listen SECS]";

struct Args {
    url: String,
    audio: Option<String>,
    image: Option<String>,
    chunk: usize,
    listen: Duration,
}

fn parse_args() -> Result<Args, Box<dyn Error>> {
    let mut args = Args {
        url: "ws://127.0.0.1:8000/ws".to_string(),
        audio: None,
        image: None,
        chunk: 16 * 1024,
        listen: Duration::from_secs(30),
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| format!("{} needs a value\n{}", arg, USAGE));
        match arg.as_str() {
            "--audio" => args.audio = Some(value()?),
            "--image" => args.image = Some(value()?),
            "--chunk" => args.chunk = value()?.parse()?,
            "--listen" => args.listen = Duration::from_secs(value()?.parse()?),
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            url if !url.starts_with("--") => args.url = url.to_string(),
            other => return Err(format!("unknown option {}\n{}", other, USAGE).into()),
        }
    }

    if args.chunk == 0 {
        return Err("--chunk must be at least 1".into());
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let args = parse_args()?;

    let (ws, _) = tokio_tungstenite::connect_async(args.url.as_str()).await?;
    info!("Connected to {}", args.url);
    let (mut sink, mut stream) = ws.split();

    if let Some(path) = &args.audio {
        let audio = std::fs::read(path)?;
        let mut chunks = 0;
        for chunk in audio.chunks(args.chunk) {
            sink.send(Message::binary(chunk.to_vec())).await?;
            chunks += 1;
        }
        info!("Sent {} bytes of audio from {} in {} chunks", audio.len(), path, chunks);
    }

    if let Some(path) = &args.image {
        let image = std::fs::read(path)?;
        let envelope = json!({
            "type": "video",
            "data": general_purpose::STANDARD.encode(&image),
        });
        sink.send(Message::text(envelope.to_string())).await?;
        info!("Sent {} byte frame from {}", image.len(), path);
    }

    let listen = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => println!("{}", text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Connection error: {}", e);
                    break;
                }
            }
        }
    };
    if tokio::time::timeout(args.listen, listen).await.is_err() {
        info!("Stopped listening after {:?}", args.listen);
    }

    sink.close().await?;
    Ok(())
}
