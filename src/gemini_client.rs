//! Gemini Live API client used as the inference session of one connection
//!
//! The WebSocket is split into a sink owned by the client and a stream drained
//! by a background task that parses server frames into [`ApiResponse`]s. The
//! connection is opened lazily on the first submitted item and re-opened after
//! a failure, resuming the conversation when the server handed out a
//! resumption handle.

use crate::gemini::{
    handle_text_message, ApiResponse, BidiGenerateContentSetup, ClientContent, ClientMessage,
    Content, GeminiClientConfig, GeminiError, GenerationConfig, Part, Result,
    SessionResumptionConfig, RESPONSE_MODALITY,
};
use crate::media_event::MediaItem;
use crate::relay::InferenceSession;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use std::time::Duration;

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsConnection, Message>;
type WsStream = SplitStream<WsConnection>;

/// Bound on the close handshake when dropping a connection
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state of the Gemini client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connected,
    SetupComplete,
}

/// Gemini Live API client holding one conversation
pub struct GeminiClient {
    config: GeminiClientConfig,
    api_key: Option<String>,
    state: ConnectionState,
    session_token: Option<String>,
    going_away: bool,
    ws_writer: Option<WsSink>,
    response_rx: Option<mpsc::Receiver<Result<ApiResponse>>>,
    rx_task: Option<JoinHandle<()>>,
}

impl GeminiClient {
    /// Create a new Gemini client with the given configuration.
    pub fn new(config: GeminiClientConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key,
            state: ConnectionState::Disconnected,
            session_token: None,
            going_away: false,
            ws_writer: None,
            response_rx: None,
            rx_task: None,
        }
    }

    /// Create a new Gemini client from an API key and optional configuration.
    pub fn from_api_key(api_key: Option<&str>, config: Option<GeminiClientConfig>) -> Self {
        Self::new(config.unwrap_or_default(), api_key.map(str::to_string))
    }

    fn endpoint(&self) -> Result<String> {
        let key = self.api_key.as_deref().ok_or(GeminiError::MissingApiKey)?;
        Ok(format!("{}?key={}", self.config.url, key))
    }

    /// Connect to the Live API endpoint and set up the session.
    pub async fn connect_and_setup(&mut self) -> Result<()> {
        self.connect().await?;
        if let Err(e) = self.setup().await {
            self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    /// Connect to the Live API endpoint.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }

        let url = self.endpoint()?;
        info!("Connecting to Gemini API at {}", self.config.url);

        let (ws_stream, resp) = connect_async(url.as_str()).await?;
        debug!("WebSocket connection response: {:?}", resp.status());

        let (sink, stream) = ws_stream.split();
        let (response_tx, response_rx) = mpsc::channel::<Result<ApiResponse>>(100);

        self.ws_writer = Some(sink);
        self.response_rx = Some(response_rx);
        self.rx_task = Some(tokio::spawn(read_loop(stream, response_tx)));
        self.state = ConnectionState::Connected;
        info!("Connected to Gemini API");

        Ok(())
    }

    /// Initialize a session by sending the setup message.
    pub async fn setup(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            error!("Cannot setup session: Connection is closed");
            return Err(GeminiError::ConnectionClosed);
        }

        if self.state == ConnectionState::SetupComplete {
            return Ok(());
        }

        let generation_config = GenerationConfig {
            response_modalities: vec![RESPONSE_MODALITY.to_string()],
            temperature: self.config.temperature,
            media_resolution: self
                .config
                .media_resolution
                .map(|resolution| resolution.as_str().to_string()),
        };

        let setup = BidiGenerateContentSetup {
            model: self.config.model.clone(),
            generation_config: Some(generation_config),
            system_instruction: self.config.system_instruction.as_ref().map(|instruction| {
                Content {
                    role: None,
                    parts: vec![Part {
                        text: Some(instruction.clone()),
                        inline_data: None,
                    }],
                }
            }),
            session_resumption: Some(SessionResumptionConfig {
                handle: self.session_token.clone(),
            }),
        };

        info!(
            "Sending setup message with model: {} (resuming: {})",
            setup.model,
            self.session_token.is_some()
        );
        self.send(&ClientMessage::Setup(setup)).await?;

        let setup_completed = tokio::time::timeout(
            self.config.setup_timeout,
            self.wait_for_setup_complete(),
        )
        .await
        .map_err(|_| {
            error!("Timeout waiting for setup complete message");
            GeminiError::Timeout
        })??;

        if setup_completed {
            self.state = ConnectionState::SetupComplete;
            info!("Gemini session setup complete");
            Ok(())
        } else {
            error!("Failed to complete Gemini session setup");
            Err(GeminiError::SetupNotComplete)
        }
    }

    /// Wait for the setup complete message.
    async fn wait_for_setup_complete(&mut self) -> Result<bool> {
        let mut attempts = 0;
        while attempts < 10 {
            match self.next_response().await {
                Some(Ok(ApiResponse::SetupComplete)) => return Ok(true),
                Some(Ok(ApiResponse::SessionResumptionUpdate(handle))) => {
                    self.set_session_token(handle);
                }
                Some(Ok(_)) => attempts += 1,
                Some(Err(e)) => return Err(e),
                None => return Err(GeminiError::ChannelClosed),
            }
        }
        Ok(false)
    }

    /// Make sure a set-up connection exists, replacing one the server is retiring.
    async fn ensure_ready(&mut self) -> Result<()> {
        if self.going_away {
            info!("Server announced disconnect, reconnecting before next turn");
            self.disconnect().await;
        }
        if self.state != ConnectionState::SetupComplete {
            self.disconnect().await;
            self.connect_and_setup().await?;
        }
        Ok(())
    }

    /// Send a client message to the server using the WebSocket writer.
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        debug!("Sending message ({} bytes)", json.len());

        let writer = self.ws_writer.as_mut().ok_or_else(|| {
            error!("WebSocket writer not available (not connected)");
            GeminiError::ConnectionClosed
        })?;

        writer.send(Message::text(json)).await.map_err(|e| {
            error!("Failed to send message: {:?}", e);
            GeminiError::WebSocket(e)
        })
    }

    /// Send one media item as a complete user turn.
    pub async fn send_media(&mut self, item: &MediaItem) -> Result<()> {
        debug!(
            "Submitting {} item ({} bytes, {})",
            item.kind().as_str(),
            item.len(),
            item.mime_type()
        );
        let msg = ClientMessage::ClientContent(ClientContent::media_turn(item));
        self.send(&msg).await
    }

    /// Receive the next response from the server.
    pub async fn next_response(&mut self) -> Option<Result<ApiResponse>> {
        match self.response_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Drop the connection; the next turn reconnects.
    pub async fn disconnect(&mut self) {
        if let Some(task) = self.rx_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.ws_writer.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await.is_err() {
                debug!("Close handshake with Gemini timed out");
            }
        }
        self.response_rx = None;
        self.going_away = false;
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected from Gemini API");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Store a session resumption token for later reconnection.
    pub fn set_session_token(&mut self, token: String) {
        self.session_token = Some(token);
    }

    /// Get the current connection state.
    pub fn state(&self) -> &'static str {
        match self.state {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
            ConnectionState::SetupComplete => "SetupComplete",
        }
    }
}

impl Drop for GeminiClient {
    fn drop(&mut self) {
        if let Some(task) = self.rx_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl InferenceSession for GeminiClient {
    async fn submit(&mut self, item: &MediaItem) -> Result<()> {
        self.ensure_ready().await?;
        self.send_media(item).await
    }

    async fn next_fragment(&mut self) -> Result<Option<String>> {
        loop {
            match self.next_response().await {
                Some(Ok(ApiResponse::TextResponse(text))) => return Ok(Some(text)),
                Some(Ok(ApiResponse::TurnComplete)) => return Ok(None),
                Some(Ok(ApiResponse::SessionResumptionUpdate(handle))) => {
                    debug!("Received session token for resumption");
                    self.set_session_token(handle);
                }
                Some(Ok(ApiResponse::GoAway)) => {
                    warn!("Gemini will close this connection soon");
                    self.going_away = true;
                }
                Some(Ok(ApiResponse::SetupComplete)) => {}
                Some(Err(e)) => return Err(e),
                None => return Err(GeminiError::ConnectionClosed),
            }
        }
    }

    async fn reset(&mut self) {
        self.disconnect().await;
    }
}

/// Drain server frames into the response channel until the socket closes.
async fn read_loop(mut stream: WsStream, response_tx: mpsc::Sender<Result<ApiResponse>>) {
    debug!("Inbound message task started");

    while let Some(message_result) = stream.next().await {
        let text = match message_result {
            Ok(Message::Text(text)) => text.to_string(),
            // The Live API delivers JSON in binary frames as well
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Received non-UTF-8 binary message ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("Gemini WebSocket closed: {:?}", frame);
                let _ = response_tx.send(Err(GeminiError::ConnectionClosed)).await;
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Gemini WebSocket error: {:?}", e);
                let _ = response_tx.send(Err(GeminiError::WebSocket(e))).await;
                break;
            }
        };

        match handle_text_message(&text, &response_tx).await {
            Ok(()) => {}
            Err(GeminiError::ChannelClosed) => break,
            Err(e) => error!("Failed to handle server message: {}", e),
        }
    }

    debug!("Inbound message task terminated");
}
