/// Uniswap v3 subgraph GraphQL client with transport retry
use async_trait::async_trait;
use reqwest::Client;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::paginator::validate_range;
use super::{HourDataSource, PAGE_SIZE};
use crate::error::{FeedError, Result};
use crate::types::{HourlySample, RetryPolicy, TokenMetadata};
use crate::utils::{now_unix, RateLimiter};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokensData {
    tokens: Vec<WireToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToken {
    name: String,
    symbol: String,
    #[serde(deserialize_with = "de_u128")]
    total_supply: u128,
    #[serde(rename = "volumeUSD", deserialize_with = "de_f64")]
    volume_usd: f64,
    #[serde(deserialize_with = "de_f64")]
    decimals: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HourDatasData {
    token_hour_datas: Vec<WireHourData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHourData {
    #[serde(deserialize_with = "de_i64")]
    period_start_unix: i64,
    #[serde(deserialize_with = "de_f64")]
    open: f64,
    #[serde(deserialize_with = "de_f64")]
    close: f64,
    #[serde(deserialize_with = "de_f64")]
    high: f64,
    #[serde(deserialize_with = "de_f64")]
    low: f64,
    #[serde(rename = "priceUSD", deserialize_with = "de_f64")]
    price_usd: f64,
}

impl From<WireToken> for TokenMetadata {
    fn from(raw: WireToken) -> Self {
        TokenMetadata {
            name: raw.name,
            symbol: raw.symbol,
            total_supply: raw.total_supply,
            volume_usd: raw.volume_usd,
            decimals: raw.decimals,
        }
    }
}

impl From<WireHourData> for HourlySample {
    fn from(raw: WireHourData) -> Self {
        HourlySample {
            period_start_unix: raw.period_start_unix,
            open: raw.open,
            close: raw.close,
            high: raw.high,
            low: raw.low,
            price_usd: raw.price_usd,
        }
    }
}

// BigInt and BigDecimal scalars arrive as strings, Int as numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(serde_json::Number),
    Text(String),
}

fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    match Scalar::deserialize(deserializer)? {
        Scalar::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom(format!("not a float: {}", n))),
        Scalar::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    match Scalar::deserialize(deserializer)? {
        Scalar::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("not an integer: {}", n))),
        Scalar::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn de_u128<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u128, D::Error> {
    let text = match Scalar::deserialize(deserializer)? {
        Scalar::Number(n) => n.to_string(),
        Scalar::Text(s) => s,
    };
    text.trim().parse().map_err(de::Error::custom)
}

/// Subgraph ids are lowercase hex; anything else never matches and is
/// refused before it can reach the query text.
fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim().to_lowercase();
    if address.is_empty() || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FeedError::InvalidParameter(format!(
            "Invalid token address: {:?}",
            address
        )));
    }
    Ok(address)
}

fn token_query(address: &str) -> String {
    format!(
        r#"{{
    tokens(where: {{ id: "{address}" }}) {{
        name
        symbol
        totalSupply
        volumeUSD
        decimals
    }}
}}"#
    )
}

fn hour_page_query(address: &str, from_inclusive: i64, to_exclusive: i64) -> String {
    format!(
        r#"{{
    tokenHourDatas(
        first: {PAGE_SIZE},
        orderBy: periodStartUnix,
        orderDirection: asc,
        where: {{
            token: "{address}",
            periodStartUnix_gte: {from_inclusive},
            periodStartUnix_lt: {to_exclusive},
            priceUSD_gt: 0
        }}
    ) {{
        periodStartUnix
        open
        close
        high
        low
        priceUSD
    }}
}}"#
    )
}

fn decode_response<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: GraphQlResponse<T> = serde_json::from_str(body)?;

    if !envelope.errors.is_empty() {
        let messages: Vec<String> = envelope.errors.into_iter().map(|e| e.message).collect();
        return Err(FeedError::Upstream(messages.join("; ")));
    }

    envelope
        .data
        .ok_or_else(|| FeedError::Upstream("Response carried no data".to_string()))
}

/// GraphQL client for the Uniswap subgraph
pub struct SubgraphClient {
    http: Client,
    url: String,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl SubgraphClient {
    pub fn new(
        url: impl Into<String>,
        retry: RetryPolicy,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(SubgraphClient {
            http,
            url: url.into(),
            retry,
            limiter,
        })
    }

    /// POST a query, retrying transient failures per the retry policy
    async fn post_query<T: DeserializeOwned>(&self, query: &str) -> Result<T> {
        let payload = serde_json::json!({ "query": query });
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire().await;

            let failure = match self
                .http
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if self.retry.is_retryable(status.as_u16()) {
                        format!("HTTP {}", status)
                    } else {
                        let body = response.text().await?;
                        if !status.is_success() {
                            return Err(FeedError::Upstream(format!("HTTP {}: {}", status, body)));
                        }
                        return decode_response(&body);
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => e.to_string(),
                Err(e) => return Err(e.into()),
            };

            if attempt >= self.retry.total {
                return Err(FeedError::TransientFetch(format!(
                    "{} (gave up after {} retries)",
                    failure, attempt
                )));
            }

            attempt += 1;
            let delay = self.retry.backoff_delay(attempt);
            warn!(
                "Subgraph request failed: {} - retry {}/{} in {:?}",
                failure, attempt, self.retry.total, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl HourDataSource for SubgraphClient {
    async fn fetch_token(&self, address: &str) -> Result<TokenMetadata> {
        let address = normalize_address(address)?;
        let data: TokensData = self.post_query(&token_query(&address)).await?;

        let token = data
            .tokens
            .into_iter()
            .next()
            .ok_or_else(|| FeedError::NotFound(format!("Token {} not found in uniswap", address)))?;

        debug!("Resolved token {} -> {}", address, token.symbol);
        Ok(token.into())
    }

    async fn fetch_hour_page(
        &self,
        address: &str,
        from_inclusive: i64,
        to_exclusive: i64,
    ) -> Result<Vec<HourlySample>> {
        validate_range(from_inclusive, to_exclusive, now_unix())?;
        let address = normalize_address(address)?;

        let data: HourDatasData = self
            .post_query(&hour_page_query(&address, from_inclusive, to_exclusive))
            .await?;

        debug!(
            "Fetched {} hour datas for {} in [{}, {})",
            data.token_hour_datas.len(),
            address,
            from_inclusive,
            to_exclusive
        );

        Ok(data.token_hour_datas.into_iter().map(HourlySample::from).collect())
    }
}
