//! Gamma API client for resolving rotating up/down market slugs to CLOB
//! token IDs.
//!
//! 15m markets use dynamic slugs: `{coin}-updown-15m-{window_start_unix}`
//! where the window start is floored to 900-second buckets. The Gamma row
//! carries the two outcome token IDs as a JSON array embedded in a string;
//! by convention the first ID is UP and the second is DOWN.

use serde::Deserialize;

use super::{ClientError, ClientResult};

/// Resolved market with CLOB token IDs for UP and DOWN.
#[derive(Clone, Debug)]
pub struct ResolvedMarket {
    pub slug: String,
    pub question: String,
    pub up_token_id: String,
    pub down_token_id: String,
}

#[derive(Debug, Deserialize)]
struct GammaMarketRow {
    #[serde(default)]
    question: String,
    #[serde(default, rename = "clobTokenIds")]
    clob_token_ids: Option<String>,
}

/// Fetch a single market by slug. Returns `Ok(None)` when the venue has not
/// yet listed the slug (expected around window boundaries).
pub async fn fetch_market_by_slug(
    http: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
) -> ClientResult<Option<ResolvedMarket>> {
    let url = format!("{}/markets/slug/{}", gamma_url.trim_end_matches('/'), slug);
    let resp = http.get(&url).send().await?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::HttpStatus { status, body });
    }

    let row: GammaMarketRow = resp.json().await?;
    let tokens_str = match row.clob_token_ids {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(None),
    };

    // The token list arrives as a JSON array serialized into a string field.
    let tokens: Vec<String> = serde_json::from_str(&tokens_str)
        .map_err(|e| ClientError::Metadata(format!("clobTokenIds is not a JSON array: {e}")))?;
    if tokens.len() < 2 {
        return Err(ClientError::Metadata(format!(
            "expected two outcome tokens, got {}",
            tokens.len()
        )));
    }

    Ok(Some(ResolvedMarket {
        slug: slug.to_string(),
        question: row.question,
        up_token_id: tokens[0].clone(),
        down_token_id: tokens[1].clone(),
    }))
}
