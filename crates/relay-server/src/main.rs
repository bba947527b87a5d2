use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

mod config;
mod context;
mod error;
mod http;
mod idgen;
mod reverse;
mod room;
mod session;
mod ws;

use config::ServerConfig;
use context::ServerContext;
use relay_crypto::ServerIdentity;
use relay_signaling::SignalingEngine;

#[derive(Parser)]
#[command(name = "relay-server", about = "VR media relay signaling server")]
struct Args {
    /// Path to a TOML configuration file, overlaid onto env/default values.
    #[arg(short, long)]
    config: Option<String>,

    /// `host:port` the HTTPS/WebSocket listener binds to, overrides config.
    #[arg(long)]
    address: Option<String>,

    /// TLS certificate file (PEM), overrides config.
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key file (PEM), overrides config.
    #[arg(long)]
    key: Option<String>,

    /// Default room new sessions join when no `?room=` is supplied.
    #[arg(long)]
    room: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install the ring crypto provider for rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_server=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::from_env();
    if let Some(config_path) = &args.config {
        let raw = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {config_path}"))?;
        config
            .merge_toml(&raw)
            .with_context(|| format!("failed to parse config file: {config_path}"))?;
    }
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(cert) = args.cert {
        config.cert_path = cert;
    }
    if let Some(key) = args.key {
        config.key_path = key;
    }
    if let Some(room) = args.room {
        config.default_room = room;
    }

    info!(address = %config.address, default_room = %config.default_room, "relay server starting");

    // Init-time failures from here on are fatal: a server with no RSA
    // identity or no codec registry can't usefully accept a single
    // connection.
    let identity = ServerIdentity::generate().context("failed to generate RSA server identity")?;
    let signaling = SignalingEngine::new().context("failed to build WebRTC signaling engine")?;
    let ctx = ServerContext::new(config.clone(), identity, signaling);

    // Load TLS certificate and key
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS configuration")?;

    let tls_acceptor = TlsAcceptor::from(Arc::new(tls_config));

    // Bind the combined HTTPS/WSS listener
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;

    info!(address = %config.address, "listening");

    loop {
        let (tcp_stream, peer_addr) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "TCP accept error");
                continue;
            }
        };

        let tls_acceptor = tls_acceptor.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            match tls_acceptor.accept(tcp_stream).await {
                Ok(tls_stream) => http::handle_connection(tls_stream, ctx).await,
                Err(err) => error!(peer = %peer_addr, error = %err, "TLS handshake failed"),
            }
        });
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let cert_data = fs::read(path).with_context(|| format!("failed to read cert: {path}"))?;
    let mut reader = std::io::BufReader::new(cert_data.as_slice());
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificates")?;

    if certs.is_empty() {
        anyhow::bail!("no certificates found in {path}");
    }

    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let key_data = fs::read(path).with_context(|| format!("failed to read key: {path}"))?;
    let mut reader = std::io::BufReader::new(key_data.as_slice());

    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            Some(_) => continue, // skip other items
            None => anyhow::bail!("no private key found in {path}"),
        }
    }
}
