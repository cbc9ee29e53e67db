//! Remote market-data fetch - daily closes from Alpha Vantage

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("API error: {0}")]
    Upstream(String),
    #[error("No daily time series in response; check symbol and API key")]
    MissingSeries,
}

/// Fetch daily closing prices for `symbol`, oldest to newest
pub async fn fetch_daily(symbol: &str, api_key: &str) -> Result<Vec<f64>, FetchError> {
    tracing::info!("Fetching daily closes for {}", symbol);

    let client = reqwest::Client::new();
    let response = client
        .get("https://www.alphavantage.co/query")
        .query(&[
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol),
            ("apikey", api_key),
            // 'compact' would return only the latest 100 points
            ("outputsize", "full"),
        ])
        .header("User-Agent", "DspSearch/0.1")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    let json: serde_json::Value = response.json().await?;

    if let Some(msg) = json.get("Error Message").and_then(|m| m.as_str()) {
        return Err(FetchError::Upstream(msg.to_string()));
    }
    if let Some(note) = json.get("Note").and_then(|n| n.as_str()) {
        // Usually a rate-limit notice; the series may still be present
        tracing::warn!("API note: {}", note);
    }

    let series = json
        .get("Time Series (Daily)")
        .and_then(|s| s.as_object())
        .ok_or(FetchError::MissingSeries)?;

    // BTreeMap keyed by yyyy-mm-dd sorts chronologically
    let mut by_date: BTreeMap<&str, f64> = BTreeMap::new();
    for (date, fields) in series {
        let close = fields
            .get("4. close")
            .and_then(|c| c.as_str())
            .and_then(|c| c.parse::<f64>().ok());
        if let Some(close) = close {
            by_date.insert(date.as_str(), close);
        }
    }

    tracing::debug!("Got {} closes for {}", by_date.len(), symbol);
    Ok(by_date.into_values().collect())
}
