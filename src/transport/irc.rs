//! The real chat-client transport: a single TCP or TLS session framed
//! with the line codec, a writer task, and a reader pump that satisfies
//! `wait_for` waiters before handing lines to the engine.

use super::{ParamSpec, ResponseSet, ResponseSpec, Transport, TransportError};
use crate::config::Config;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use slirc_proto::line::LineCodec;
use slirc_proto::sasl::encode_plain;
use slirc_proto::{Command, Message, Response, irc_eq};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

struct Waiter {
    set: ResponseSet,
    reply: oneshot::Sender<Message>,
}

/// Transport over one live IRC session.
pub struct IrcTransport {
    out_tx: mpsc::Sender<String>,
    waiters: Mutex<Vec<Waiter>>,
    nick: RwLock<String>,
}

impl IrcTransport {
    const QUEUE_DEPTH: usize = 256;

    /// Connect to the configured endpoint and start the reader/writer
    /// tasks. Returns the transport handle and the engine's line stream.
    pub async fn connect(
        config: &Config,
    ) -> Result<(Arc<IrcTransport>, mpsc::Receiver<Message>), TransportError> {
        let endpoint = config
            .endpoint()
            .map_err(|e| TransportError::BadServerName(e.to_string()))?;
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        info!(host = %endpoint.host, port = endpoint.port, tls = endpoint.tls, "Connected");

        if endpoint.tls {
            let stream = upgrade_to_tls(tcp, &endpoint.host).await?;
            Ok(Self::start(stream, &config.nickname))
        } else {
            Ok(Self::start(tcp, &config.nickname))
        }
    }

    /// Frame a stream and spawn the pump tasks.
    fn start<S>(stream: S, nickname: &str) -> (Arc<IrcTransport>, mpsc::Receiver<Message>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(
            stream,
            LineCodec::new("utf-8").expect("utf-8 is a valid encoding"),
        );
        let (mut sink, mut source) = framed.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(Self::QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if let Err(e) = sink.send(line).await {
                    warn!(error = %e, "Write failed, stopping writer");
                    break;
                }
            }
        });

        let transport = Arc::new(IrcTransport {
            out_tx,
            waiters: Mutex::new(Vec::new()),
            nick: RwLock::new(nickname.to_string()),
        });

        let (line_tx, line_rx) = mpsc::channel::<Message>(Self::QUEUE_DEPTH);
        let pump = Arc::clone(&transport);
        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                let line = match item {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Read failed, stopping reader");
                        break;
                    }
                };
                let msg: Message = match line.parse() {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(line = %line.trim_end(), error = %e, "Unparsable line skipped");
                        continue;
                    }
                };

                pump.observe(&msg);
                if pump.offer_to_waiters(&msg) {
                    continue;
                }
                if line_tx.send(msg).await.is_err() {
                    break;
                }
            }
            // Session over: fail pending waiters, the engine sees the
            // stream end on its own.
            pump.waiters.lock().clear();
            info!("Transport reader stopped");
        });

        (transport, line_rx)
    }

    /// Track our own nick from the lines that authoritatively carry it.
    fn observe(&self, msg: &Message) {
        match &msg.command {
            Command::Response(Response::RPL_WELCOME, params) => {
                if let Some(nick) = params.first() {
                    *self.nick.write() = nick.clone();
                }
            }
            Command::NICK(new_nick) => {
                if let Some(old) = msg.source_nickname()
                    && self.is_me(old)
                {
                    *self.nick.write() = new_nick.clone();
                }
            }
            _ => {}
        }
    }

    fn offer_to_waiters(&self, msg: &Message) -> bool {
        let me = self.nick.read().clone();
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|w| w.set.matches(msg, &me)) {
            let waiter = waiters.remove(pos);
            let _ = waiter.reply.send(msg.clone());
            true
        } else {
            false
        }
    }

    /// Register on the network: capability/SASL negotiation, PASS, NICK,
    /// USER. Returns once the handshake lines are exchanged; the caller
    /// sees RPL_WELCOME on the line stream.
    pub async fn register(&self, config: &Config) -> Result<(), TransportError> {
        if config.sasl.is_some() {
            self.send_raw("CAP REQ :sasl").await?;
        }
        if let Some(password) = &config.password {
            self.send(Command::PASS(password.clone()).into()).await?;
        }
        self.send(Message::nick(&config.nickname)).await?;
        self.send(Message::user(config.username(), config.realname()))
            .await?;

        if let Some(sasl) = &config.sasl {
            self.send(Command::AUTHENTICATE("PLAIN".into()).into())
                .await?;
            let prompt = self
                .wait_for(
                    ResponseSet::new().or(ResponseSpec::new("AUTHENTICATE", vec![ParamSpec::Any])),
                )
                .await?;
            if !matches!(&prompt.command, Command::AUTHENTICATE(data) if data == "+") {
                return Err(TransportError::Sasl("unexpected AUTHENTICATE reply".into()));
            }

            self.send(
                Command::AUTHENTICATE(encode_plain(&sasl.username, &sasl.password)).into(),
            )
            .await?;
            let outcome = self
                .wait_for(
                    ResponseSet::new()
                        .or(ResponseSpec::new("903", vec![]))
                        .or(ResponseSpec::new("904", vec![])),
                )
                .await?;
            if matches!(&outcome.command, Command::Response(resp, _) if (*resp as u16) == 904)
                || matches!(&outcome.command, Command::Raw(name, _) if name == "904")
            {
                return Err(TransportError::Sasl("authentication rejected".into()));
            }
            info!(account = %sasl.username, "SASL authentication succeeded");
            self.send_raw("CAP END").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for IrcTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.out_tx
            .send(message.to_string())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_raw(&self, line: &str) -> Result<(), TransportError> {
        let mut line = line.trim_end_matches(['\r', '\n']).to_string();
        line.push_str("\r\n");
        self.out_tx
            .send(line)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn wait_for(&self, set: ResponseSet) -> Result<Message, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.waiters.lock().push(Waiter { set, reply });
        rx.await.map_err(|_| TransportError::Closed)
    }

    fn is_me(&self, nick: &str) -> bool {
        irc_eq(nick, &self.nick.read())
    }
}

/// Upgrade an established TCP connection to TLS, verifying against the
/// system root store.
async fn upgrade_to_tls(
    tcp_stream: TcpStream,
    hostname: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
    use tokio_rustls::TlsConnector;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    let mut roots = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        if let Err(e) = roots.add(cert) {
            warn!(error = %e, "Failed to add root cert");
        }
    }
    for e in &certs.errors {
        warn!(error = %e, "Error loading native certs");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| TransportError::BadServerName(hostname.to_string()))?;

    let tls_stream = connector.connect(server_name, tcp_stream).await?;
    info!(hostname = %hostname, "TLS handshake completed");
    Ok(tls_stream)
}
