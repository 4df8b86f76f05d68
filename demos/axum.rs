/* demos/axum.rs */

use axum::{
    Router,
    extract::ConnectInfo,
    http::HeaderMap,
    response::Json,
    routing::get,
};
use serde_json::json;
use std::net::SocketAddr;
use trusted_real_ip::{Config, Providers, RealIp, RealIpLayer, logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new()
        .with_log_level("debug")
        .with_trusted_ips(vec!["203.0.113.0/24".to_string()]);
    logging::init_from_config(&config);

    // One provider bundle per process; each remote list is fetched once.
    let providers = Providers::remote();
    let layer = RealIpLayer::from_config(&config, &providers)
        .await?
        .with_name("demo");

    let app = Router::new()
        .route("/", get(ip_handler))
        .route("/debug", get(debug_handler))
        .layer(layer);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;

    println!("Server starting on http://localhost:3000");
    println!("Test with headers:");
    println!("  curl -H 'X-Real-IP: 198.51.100.42' http://localhost:3000/");
    println!("  curl -H 'X-Forwarded-For: 198.51.100.1, 192.168.1.1' http://localhost:3000/debug");
    println!("  curl -H 'Cf-Connecting-Ip: 192.0.2.100' http://localhost:3000/");
    println!();

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Handler that returns the resolved IP in JSON format
async fn ip_handler(real_ip: RealIp) -> Json<serde_json::Value> {
    Json(json!({
        "real_ip": real_ip.ip().to_string(),
        "is_trusted": real_ip.is_trusted(),
    }))
}

/// Debug handler showing the rewritten forwarding headers next to the peer
async fn debug_handler(
    real_ip: RealIp,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    Json(json!({
        "real_ip": real_ip.ip().to_string(),
        "connection": {
            "remote_addr": addr.to_string(),
            "remote_ip": addr.ip().to_string(),
        },
        "headers": {
            "x-real-ip": header("x-real-ip"),
            "x-is-trusted": header("x-is-trusted"),
            "x-forwarded-for": header("x-forwarded-for"),
        },
        "ip_matches_connection": real_ip.ip() == addr.ip(),
    }))
}
