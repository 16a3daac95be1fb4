use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    Encoder, Gauge, Histogram, IntCounter, IntCounterVec, TextEncoder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

lazy_static! {
    pub static ref QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rootwalk_queries_total",
        "Counter of queries sent to nameservers, by outcome.",
        &["outcome"]
    ).unwrap();

    pub static ref QUERY_DURATION: Histogram = register_histogram!(
        "rootwalk_query_duration_seconds",
        "Histogram of the time (in seconds) each nameserver query took.",
        vec![0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096]
    ).unwrap();

    pub static ref CACHE_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "rootwalk_cache_requests_total",
        "The count of cache requests."
    ).unwrap();

    pub static ref CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        "rootwalk_cache_hits_total",
        "The count of cache hits."
    ).unwrap();

    pub static ref CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        "rootwalk_cache_misses_total",
        "The count of cache misses, expired entries included."
    ).unwrap();

    pub static ref CACHE_ENTRIES: Gauge = register_gauge!(
        "rootwalk_cache_entries",
        "The number of answers held in the cache."
    ).unwrap();

    pub static ref RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rootwalk_resolutions_total",
        "Counter of resolution calls by mode and result.",
        &["mode", "result"]
    ).unwrap();

    pub static ref REFERRAL_CANDIDATES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rootwalk_referral_candidates_total",
        "Next-hop addresses taken from referrals, by where the address came from.",
        &["source"]
    ).unwrap();
}

/// Text exposition of every registered metric.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Serves `render()` to any HTTP GET on `addr` until the task is aborted.
pub async fn serve(addr: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("[metrics] Listening on {}", addr);

    loop {
        let (mut stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            if let Ok(Ok(n)) = tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf)).await {
                if n == 0 || !buf.starts_with(b"GET ") { return; }
                let body = match render() {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::error!("[metrics] Encoding failed: {}", e);
                        return;
                    }
                };
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let mut response = header.into_bytes();
                response.extend_from_slice(body.as_bytes());
                let _ = tokio::time::timeout(std::time::Duration::from_secs(2), stream.write_all(&response)).await;
                let _ = stream.shutdown().await;
            }
        });
    }
}
