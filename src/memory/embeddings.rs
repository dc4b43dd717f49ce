use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

/// Turns text into fixed-dimension vectors. The store never interprets the
/// numbers; it only needs the same text to land on the same point.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input.
    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut batch = self.embed(&[text]).await?;
        batch
            .pop()
            .ok_or_else(|| anyhow::anyhow!("provider returned no embedding"))
    }
}

// ── Offline hash provider ────────────────────────────────────────────────

/// Default provider: no network, no model. Each whitespace token is hashed
/// with FNV-1a and expanded per dimension through a splitmix64 round; the
/// token vectors are then averaged, so texts sharing words land closer than
/// unrelated texts while identical text always maps to the identical point.
pub struct HashEmbedding {
    dims: usize,
}

impl HashEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn token_seed(token: &str) -> u64 {
        let mut h = 0xcbf2_9ce4_8422_2325_u64;
        for byte in token.bytes() {
            h = (h ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3);
        }
        h
    }

    fn mix(seed: u64) -> u64 {
        let mut z = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Map the top 24 bits of a mixed hash onto `-1.0..=1.0`.
    #[allow(clippy::cast_precision_loss)]
    fn unit(bits: u64) -> f32 {
        let top = (bits >> 40) as u32;
        top as f32 / (((1_u32 << 24) - 1) as f32) * 2.0 - 1.0
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        let mut v = vec![0.0_f32; self.dims];

        for token in &tokens {
            let seed = Self::token_seed(token);
            for (dim, slot) in v.iter_mut().enumerate() {
                *slot += Self::unit(Self::mix(seed ^ dim as u64));
            }
        }

        if tokens.len() > 1 {
            #[allow(clippy::cast_precision_loss)]
            let inv = 1.0 / tokens.len() as f32;
            for slot in &mut v {
                *slot *= inv;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ── OpenAI-compatible provider ───────────────────────────────────────────

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

/// Remote provider speaking the `/v1/embeddings` protocol — the hosted
/// OpenAI endpoint or a `custom:<url>` deployment of the same API.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    endpoint: String,
    bearer: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedding {
    pub fn new(base_url: &str, api_key: &str, model: &str, dims: usize) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            bearer: format!("Bearer {api_key}"),
            model: model.to_string(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", &self.bearer)
            .json(&serde_json::json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("embedding request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("embedding endpoint returned {status}");
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("embedding response malformed: {e}"))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Validate a `custom:` base URL before any request leaves the process.
/// Rejects anything that would point the client at ourselves or the local
/// network.
fn checked_base_url(raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("custom embedding URL is empty");
    }

    let url: reqwest::Url = raw
        .parse()
        .map_err(|_| anyhow::anyhow!("custom embedding URL does not parse"))?;

    if url.scheme() != "https" {
        anyhow::bail!("custom embedding URL must be https");
    }
    if !url.username().is_empty() || url.password().is_some() {
        anyhow::bail!("custom embedding URL must not carry credentials");
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("custom embedding URL has no host"))?;
    if points_at_local_network(host) {
        anyhow::bail!("custom embedding URL host is blocked");
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn points_at_local_network(host: &str) -> bool {
    let host = host
        .trim_end_matches('.')
        .trim_start_matches('[')
        .trim_end_matches(']');

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => {
            let head = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (head & 0xffc0) == 0xfe80 // link-local
                || (head & 0xfe00) == 0xfc00 // unique-local
        }
        Err(_) => false,
    }
}

// ── Factory ──────────────────────────────────────────────────────────────

/// Build the configured provider. Unknown names are hard errors — a broken
/// embedding path must never silently degrade into empty recall.
pub fn create_embedding_provider(
    provider: &str,
    api_key: Option<&str>,
    model: &str,
    dims: usize,
) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match provider {
        "" | "hash" => Ok(Box::new(HashEmbedding::new(dims))),
        "openai" => Ok(Box::new(OpenAiEmbedding::new(
            "https://api.openai.com",
            api_key.unwrap_or(""),
            model,
            dims,
        ))),
        custom if custom.starts_with("custom:") => {
            let base = checked_base_url(custom.strip_prefix("custom:").unwrap_or(""))?;
            Ok(Box::new(OpenAiEmbedding::new(
                &base,
                api_key.unwrap_or(""),
                model,
                dims,
            )))
        }
        other => anyhow::bail!("unknown embedding provider '{other}'"),
    }
}
