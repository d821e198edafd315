use anyhow::{anyhow, Context};
use http::header::{CONTENT_LENGTH, SERVER};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    body::BodyCounter,
    connection::{resolve, Connector},
    context::RunContext,
    request::RequestTemplate,
};

/// Sends one request to the target before the run and records what the server looks
/// like. The content size found here is the baseline every later response is held to.
///
/// Resolution, connect and the exchange together are bounded by the execution
/// timeout. Returns the connector the workers should use.
pub async fn detect_host(
    ctx: &RunContext,
    template: &RequestTemplate,
) -> Result<Connector, anyhow::Error> {
    let config = ctx.config();
    let budget = config.execution_timeout;

    let exchange = async {
        let addr = resolve(&config.host, config.port).await?;
        let connector = Connector::new(addr, config)?;
        let mut conn = connector
            .open(budget)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?;
        let response = conn
            .send(template.job())
            .await
            .context("failed to send the probe request")?;
        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .context("failed to read the probe response")?;
        Ok::<_, anyhow::Error>((connector, parts, body))
    };
    let (connector, parts, body) = timeout(budget, exchange)
        .await
        .map_err(|_| anyhow!("no response from {} within {:?}", config.host, budget))??;

    if !parts.status.is_success() {
        warn!(status = %parts.status, "probe request was not answered with 2xx");
    }

    let server = parts
        .headers
        .get(SERVER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    ctx.set_server(server);

    let mut counter = BodyCounter::new(&parts.headers, config.gzip);
    let content_size = if counter.is_decoding() {
        // Content-Length counts the compressed bytes
        counter.feed(&body)?;
        counter
            .finish()
            .context("failed to decode the probe response")?
    } else {
        parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(body.len() as u64)
    };
    ctx.set_content_size(content_size);

    info!(
        addr = %connector.addr(),
        tls = connector.is_tls(),
        server,
        content_size,
        "host probe done"
    );
    Ok(connector)
}
