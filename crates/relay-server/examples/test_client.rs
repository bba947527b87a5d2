// Smoke test: connect to the running relay server, complete the
// handshake, and exercise a couple of signaling records.
// Run with: cargo run -p relay-server --example test_client

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ClientStream = tokio_rustls::client::TlsStream<tokio::net::TcpStream>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("crypto provider");

    let tcp = tokio::net::TcpStream::connect("127.0.0.1:8000").await?;
    println!("[OK] TCP connected to 127.0.0.1:8000");

    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from("localhost".to_string())?;
    let tls = connector.connect(server_name, tcp).await?;
    println!("[OK] TLS handshake complete");

    let (mut ws, _response) =
        tokio_tungstenite::client_async("wss://localhost:8000/ws/webrtc?peer_id=smoke-test&room=default", tls)
            .await?;
    println!("[OK] WebSocket upgrade complete");

    let init = next_json(&mut ws).await?;
    println!("[OK] init: {init}");

    let rsa_public_key_b64 = init["rsa_public_key"]
        .as_str()
        .ok_or("init record missing rsa_public_key")?;
    let pem = String::from_utf8(BASE64.decode(rsa_public_key_b64)?)?;
    let public_key = RsaPublicKey::from_public_key_pem(&pem)?;

    // The server expects base64(key) as the RSA plaintext, not the raw
    // key bytes (see relay-crypto::ServerIdentity::unwrap_session_key).
    let mut session_key = [0u8; 32];
    OsRng.fill_bytes(&mut session_key);
    let key_b64 = BASE64.encode(session_key);
    let wrapped = public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, key_b64.as_bytes())?;
    let encrypted_key = BASE64.encode(wrapped);

    send_json(&mut ws, json!({"type": "aes_key_exchange", "encrypted_key": encrypted_key})).await?;
    let ack = next_json(&mut ws).await?;
    println!("[OK] key exchange complete: {ack}");

    send_json(&mut ws, json!({"type": "gyro", "alpha": 1.0, "beta": 2.0, "gamma": 3.0})).await?;
    println!("[OK] sent gyro telemetry");

    send_json(&mut ws, json!({"type": "terminate"})).await?;
    println!("[OK] sent terminate");

    println!("\n=== All tests passed! ===");
    Ok(())
}

async fn send_json(
    ws: &mut WebSocketStream<ClientStream>,
    value: serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn next_json(ws: &mut WebSocketStream<ClientStream>) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(Box::new(err)),
            None => return Err("connection closed before a record arrived".into()),
        }
    }
}

#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _: &rustls::pki_types::CertificateDer<'_>,
        _: &[rustls::pki_types::CertificateDer<'_>],
        _: &rustls::pki_types::ServerName<'_>,
        _: &[u8],
        _: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &rustls::pki_types::CertificateDer<'_>,
        _: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &rustls::pki_types::CertificateDer<'_>,
        _: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
