//! WebSocket dialing and frame codec
//!
//! One JSON text message per frame. TLS settings come from the caller's
//! configuration; ping/pong is handled by the WebSocket layer.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use super::config::WsConfig;
use crate::error::{DroverError, Result};
use crate::frames::{decode_errors, ResponseFrame};

/// Send half of a connected socket
pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Receive half of a connected socket
pub(crate) type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Build a socket URL from the configured HTTP(S) base
pub(crate) fn endpoint_url(
    base: &str,
    path: &str,
    token: &str,
    namespace: &str,
    all_namespaces: bool,
) -> String {
    let base = base
        .replacen("http://", "ws://", 1)
        .replacen("https://", "wss://", 1);

    let mut url = format!("{base}{path}?token={token}&namespace={namespace}");
    if all_namespaces {
        url.push_str("&mode=all");
    }

    url
}

fn tls_connector(config: &WsConfig) -> Result<native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if let Some(pem) = &config.root_ca_pem {
        let certificate = native_tls::Certificate::from_pem(pem)
            .map_err(|e| DroverError::CannotCommunicate(format!("invalid root CA: {e}")))?;
        builder.add_root_certificate(certificate);
    }

    builder.danger_accept_invalid_certs(config.skip_tls_verify);

    builder
        .build()
        .map_err(|e| DroverError::CannotCommunicate(e.to_string()))
}

/// Dial a socket URL, returning the split halves once connected
pub(crate) async fn dial(url: &str, config: &WsConfig) -> Result<(WsSink, WsStream)> {
    debug!(url = %url, "dialing websocket");

    let connector = Connector::NativeTls(tls_connector(config)?);
    let (ws, _) = connect_async_tls_with_config(url, None, false, Some(connector))
        .await
        .map_err(|e| DroverError::CannotCommunicate(e.to_string()))?;

    Ok(ws.split())
}

/// Dial the request socket and perform the handshake
///
/// The server sends one response frame right after the upgrade; the
/// connection is usable only when its status is 200.
pub(crate) async fn dial_api(config: &WsConfig, token: &str) -> Result<(WsSink, WsStream)> {
    let url = endpoint_url(
        &config.url,
        "/wsapi",
        token,
        &config.namespace,
        config.receive_all,
    );

    let (sink, mut stream) = dial(&url, config).await?;

    let handshake: ResponseFrame = read_frame(&mut stream).await?.ok_or_else(|| {
        DroverError::CannotCommunicate("connection closed during handshake".to_string())
    })?;

    if handshake.status_code != 200 {
        return Err(decode_errors(&handshake));
    }

    debug!("api socket connected");
    Ok((sink, stream))
}

/// Dial the event socket
///
/// Unlike the request socket there is no handshake frame; the first read is
/// a regular event or an error.
pub(crate) async fn dial_events(
    config: &WsConfig,
    token: &str,
    all_namespaces: bool,
) -> Result<(WsSink, WsStream)> {
    let url = endpoint_url(
        &config.url,
        "/events",
        token,
        &config.namespace,
        all_namespaces,
    );

    dial(&url, config).await
}

/// Serialize a frame and write it as one text message
pub(crate) async fn send_frame<T: Serialize>(sink: &mut WsSink, frame: &T) -> Result<()> {
    let text =
        serde_json::to_string(frame).map_err(|e| DroverError::CannotMarshal(e.to_string()))?;

    sink.send(Message::Text(text))
        .await
        .map_err(|e| DroverError::CannotCommunicate(e.to_string()))
}

/// Read the next text message and decode it
///
/// Returns `None` when the peer closed the connection. Control and
/// non-text messages are skipped.
pub(crate) async fn read_frame<T: DeserializeOwned>(stream: &mut WsStream) -> Result<Option<T>> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| DroverError::CannotUnmarshal(e.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(DroverError::CannotCommunicate(e.to_string())),
        }
    }
}
