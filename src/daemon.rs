//! Daemon - the main bridge service
//!
//! Owns the capture task, the datagram listener, the session listener and
//! the optional status server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use secrecy::{ExposeSecret, SecretString};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};

use crate::api::{StatusServer, StatusState};
use crate::config::SttBackend;
use crate::dialogue::{Dialogue, VoiceflowClient};
use crate::session::{Session, SessionContext, SessionOptions};
use crate::voice::{
    AudioDecoder, AudioFetcher, CaptureHandle, CaptureTask, Conditioner, HttpAudioFetcher,
    Mp3Decoder, ReplyTranscoder, SpeechToText, SttHints, Transcriber, classify, spawn_capture,
};
use crate::{Config, Error, Result};

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 65_536;

/// External services a session talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Speech-to-text backend
    pub transcriber: Arc<dyn Transcriber>,
    /// Dialogue backend
    pub dialogue: Arc<dyn Dialogue>,
    /// Remote reply audio source
    pub fetcher: Arc<dyn AudioFetcher>,
    /// Inline reply audio decoder
    pub decoder: Arc<dyn AudioDecoder>,
}

impl Collaborators {
    /// Build the HTTP-backed collaborators described by `config`
    ///
    /// # Errors
    ///
    /// Returns `Config` if a backend is missing credentials or a client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let hints = SttHints {
            language: config.stt.language.clone(),
            initial_prompt: config.stt.initial_prompt.clone(),
        };

        let transcriber: Arc<dyn Transcriber> = match config.stt.backend {
            SttBackend::WhisperAsr => Arc::new(SpeechToText::new_whisper_asr(
                &config.stt.url,
                hints,
                config.stt.timeout,
            )?),
            SttBackend::OpenAi => {
                let key = config.stt.api_key.as_ref().ok_or_else(|| {
                    Error::Config("OPENAI_API_KEY required for the openai STT backend".to_string())
                })?;
                Arc::new(SpeechToText::new_openai(
                    SecretString::from(key.expose_secret().to_owned()),
                    config.stt.model.clone(),
                    hints,
                    config.stt.timeout,
                )?)
            }
        };

        let dialogue_key = config
            .dialogue
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("VOICEFLOW_API_KEY required".to_string()))?;
        let dialogue = Arc::new(VoiceflowClient::new(
            &config.dialogue.url,
            &config.dialogue.user_id,
            SecretString::from(dialogue_key.expose_secret().to_owned()),
            config.dialogue.timeout,
        )?);

        Ok(Self {
            transcriber,
            dialogue,
            fetcher: Arc::new(HttpAudioFetcher::with_timeouts(
                config.reply.fetch_connect_timeout,
                config.reply.fetch_read_timeout,
            )?),
            decoder: Arc::new(Mp3Decoder),
        })
    }
}

/// The voice bridge daemon
pub struct Daemon {
    config: Config,
    collaborators: Collaborators,
}

impl Daemon {
    /// Create a new daemon with HTTP collaborators built from `config`
    ///
    /// # Errors
    ///
    /// Returns error if a collaborator cannot be configured
    pub fn new(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        tracing::info!(
            stt = collaborators.transcriber.name(),
            dialogue_url = %config.dialogue.url,
            "collaborators initialized"
        );
        Ok(Self::with_collaborators(config, collaborators))
    }

    /// Create a daemon with explicit collaborators
    #[must_use]
    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Bind every listener and start the capture task
    ///
    /// # Errors
    ///
    /// Returns error if a socket cannot be bound
    pub async fn bind(self) -> Result<Listeners> {
        let Self {
            config,
            collaborators,
        } = self;

        let udp = UdpSocket::bind(config.server.udp_bind)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {}: {e}", config.server.udp_bind)))?;
        let tcp = TcpListener::bind(config.server.tcp_bind)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {}: {e}", config.server.tcp_bind)))?;

        let capture = spawn_capture(config.capture.idle_timeout, config.capture.sweep_interval);
        let sessions = Arc::new(AtomicU64::new(0));

        let status = match config.server.status_bind {
            Some(addr) => Some(
                StatusServer::bind(
                    addr,
                    StatusState::new(capture.status.clone(), Arc::clone(&sessions)),
                )
                .await?,
            ),
            None => None,
        };

        let transcoder = ReplyTranscoder::new(
            collaborators.decoder,
            config.reply.target_rate,
            config.reply.playback_rate,
            config.reply.max_bytes,
        );

        let ctx = Arc::new(SessionContext::new(
            capture.handle.clone(),
            collaborators.transcriber,
            collaborators.dialogue,
            collaborators.fetcher,
            transcoder,
            SessionOptions {
                default_include_text: config.reply.include_text,
                config_wait: config.server.config_wait,
                text_delay: config.reply.text_delay,
            },
        ));

        Ok(Listeners {
            udp,
            tcp,
            status,
            capture,
            ctx,
            conditioner: Conditioner::new(config.capture.gate_threshold, config.capture.gain),
            sessions,
        })
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the daemon encounters a fatal error
    pub async fn run(self) -> Result<()> {
        let listeners = self.bind().await?;

        // Set up shutdown signal
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        listeners
            .serve_until(async move {
                shutdown_rx.recv().await;
                tracing::info!("shutdown requested");
            })
            .await
    }
}

/// Bound sockets plus the running capture task
pub struct Listeners {
    udp: UdpSocket,
    tcp: TcpListener,
    status: Option<StatusServer>,
    capture: CaptureTask,
    ctx: Arc<SessionContext>,
    conditioner: Conditioner,
    sessions: Arc<AtomicU64>,
}

impl Listeners {
    /// Datagram listener address
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Session listener address
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Status server address, if enabled
    #[must_use]
    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Handle to the capture buffer
    #[must_use]
    pub fn capture(&self) -> CaptureHandle {
        self.capture.handle.clone()
    }

    /// Serve datagrams and sessions until `shutdown` resolves
    ///
    /// Sessions already accepted keep running on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns error if a listener fails fatally
    pub async fn serve_until(self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let Self {
            udp,
            tcp,
            status,
            capture,
            ctx,
            conditioner,
            sessions,
        } = self;

        tracing::info!(
            udp = %udp.local_addr()?,
            tcp = %tcp.local_addr()?,
            "voice bridge listening"
        );

        let (stop_tx, stop_rx) = watch::channel(false);

        let ingest = tokio::spawn(ingest_datagrams(udp, capture.handle.clone(), conditioner));

        let status_task = status.map(|server| {
            let mut stop = stop_rx.clone();
            tokio::spawn(async move {
                let shutdown = async move {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                };
                if let Err(e) = server.run(shutdown).await {
                    tracing::error!(error = %e, "status server failed");
                }
            })
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        sessions.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(peer = %peer, "device connected");
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            let state = Session::new(stream, peer.to_string(), ctx).run().await;
                            tracing::debug!(peer = %peer, state = ?state, "session ended");
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                    }
                },
            }
        }

        ingest.abort();
        let _ = stop_tx.send(true);
        if let Some(task) = status_task {
            let _ = task.await;
        }

        tracing::info!("voice bridge stopped");
        Ok(())
    }
}

/// Receive datagrams forever, feeding conditioned PCM to the capture buffer
async fn ingest_datagrams(socket: UdpSocket, capture: CaptureHandle, conditioner: Conditioner) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "datagram receive failed");
                continue;
            }
        };

        let packet = classify(&buf[..len]);
        tracing::trace!(
            from = %from,
            bytes = len,
            framed = packet.is_framed(),
            stream = packet.header.as_ref().map_or("", |h| h.stream_name.as_str()),
            "datagram received"
        );

        if packet.payload.is_empty() {
            continue;
        }

        capture.append(conditioner.condition(packet.payload));
    }
}
