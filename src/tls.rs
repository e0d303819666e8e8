//! 可选 HTTPS 监听的 TLS 配置。

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::config::Args;

/// 加载配置的证书与私钥，未配置时为 `host` 生成自签名证书。
pub async fn build_rustls_config(args: &Args, host: IpAddr) -> Result<RustlsConfig, std::io::Error> {
    let (cert_path, key_path) = match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => (PathBuf::from(cert), PathBuf::from(key)),
        (Some(_), None) | (None, Some(_)) => {
            warn!("both --tls-cert and --tls-key are required, using a self-signed certificate");
            generate_self_signed_paths(host)?
        }
        (None, None) => generate_self_signed_paths(host)?,
    };

    let cert = fs::read(&cert_path).await?;
    let key = fs::read(&key_path).await?;
    RustlsConfig::from_pem(cert, key).await
}

fn generate_self_signed_paths(host: IpAddr) -> Result<(PathBuf, PathBuf), std::io::Error> {
    let cert = generate_simple_self_signed([host.to_string(), "localhost".to_string()])
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    let cert_path = std::env::temp_dir().join("skydrop-cert.pem");
    let key_path = std::env::temp_dir().join("skydrop-key.pem");
    std::fs::write(&cert_path, cert.cert.pem())?;
    std::fs::write(&key_path, cert.key_pair.serialize_pem())?;
    info!(path = ?cert_path, "generated self-signed cert");
    Ok((cert_path, key_path))
}
