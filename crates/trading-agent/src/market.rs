use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use trading_core::{CandidateCoin, MarketData, MarketSnapshotProvider, OpenInterestTop};

/// How many candidate coins a cycle considers.
const CANDIDATE_LIMIT: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    high_price: String,
    low_price: String,
    price_change_percent: String,
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    symbol: String,
    last_funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestPoint {
    sum_open_interest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LongShortRatio {
    long_short_ratio: String,
}

fn num(s: &str) -> f64 {
    s.parse().unwrap_or_default()
}

/// Public-REST snapshot provider over the Binance futures API. No auth,
/// read-only endpoints only.
pub struct BinanceMarketProvider {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceMarketProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: "https://fapi.binance.com".to_string(),
        }
    }

    pub fn with_base_url(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn all_tickers(&self) -> Result<Vec<Ticker24h>> {
        let url = format!("{}/fapi/v1/ticker/24hr", self.base_url);
        let tickers: Vec<Ticker24h> = self.client.get(&url).send().await?.json().await?;
        Ok(tickers)
    }

    async fn funding_rates(&self) -> HashMap<String, f64> {
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let response = async {
            let rates: Vec<PremiumIndex> = self.client.get(&url).send().await?.json().await?;
            Ok::<_, anyhow::Error>(rates)
        }
        .await;
        match response {
            Ok(rates) => rates
                .into_iter()
                .map(|r| (r.symbol, num(&r.last_funding_rate)))
                .collect(),
            Err(e) => {
                tracing::warn!("funding rate fetch failed: {}", e);
                HashMap::new()
            }
        }
    }
}

#[async_trait]
impl MarketSnapshotProvider for BinanceMarketProvider {
    async fn candidates(&self) -> Result<Vec<CandidateCoin>> {
        let mut tickers: Vec<Ticker24h> = self
            .all_tickers()
            .await?
            .into_iter()
            .filter(|t| t.symbol.ends_with("USDT"))
            .collect();
        tickers.sort_by(|a, b| {
            num(&b.quote_volume)
                .partial_cmp(&num(&a.quote_volume))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(tickers
            .into_iter()
            .take(CANDIDATE_LIMIT)
            .map(|t| CandidateCoin {
                symbol: t.symbol.clone(),
                price: num(&t.last_price),
                change_24h_pct: num(&t.price_change_percent),
                volume_24h: num(&t.quote_volume),
            })
            .collect())
    }

    async fn market_data(&self, symbols: &[String]) -> Result<HashMap<String, MarketData>> {
        let wanted: std::collections::HashSet<&str> =
            symbols.iter().map(String::as_str).collect();
        let funding = self.funding_rates().await;

        Ok(self
            .all_tickers()
            .await?
            .into_iter()
            .filter(|t| wanted.contains(t.symbol.as_str()))
            .map(|t| {
                let data = MarketData {
                    symbol: t.symbol.clone(),
                    price: num(&t.last_price),
                    high_24h: num(&t.high_price),
                    low_24h: num(&t.low_price),
                    change_24h_pct: num(&t.price_change_percent),
                    volume_24h: num(&t.quote_volume),
                    funding_rate: funding.get(&t.symbol).copied().unwrap_or_default(),
                };
                (t.symbol, data)
            })
            .collect())
    }

    async fn open_interest_top(&self) -> Result<HashMap<String, OpenInterestTop>> {
        let candidates = self.candidates().await?;
        let mut top = HashMap::new();

        for coin in candidates {
            let hist_url = format!(
                "{}/futures/data/openInterestHist?symbol={}&period=1d&limit=2",
                self.base_url, coin.symbol
            );
            let ratio_url = format!(
                "{}/futures/data/globalLongShortAccountRatio?symbol={}&period=1d&limit=1",
                self.base_url, coin.symbol
            );

            let hist: Vec<OpenInterestPoint> = match self.client.get(&hist_url).send().await {
                Ok(resp) => resp.json().await.unwrap_or_default(),
                Err(e) => {
                    tracing::debug!("open interest fetch failed for {}: {}", coin.symbol, e);
                    continue;
                }
            };
            let ratios: Vec<LongShortRatio> = match self.client.get(&ratio_url).send().await {
                Ok(resp) => resp.json().await.unwrap_or_default(),
                Err(_) => Vec::new(),
            };

            let Some(latest) = hist.last() else { continue };
            let open_interest = num(&latest.sum_open_interest);
            let oi_change_24h_pct = match hist.first() {
                Some(prior) if hist.len() > 1 && num(&prior.sum_open_interest) > 0.0 => {
                    (open_interest - num(&prior.sum_open_interest))
                        / num(&prior.sum_open_interest)
                        * 100.0
                }
                _ => 0.0,
            };

            top.insert(
                coin.symbol.clone(),
                OpenInterestTop {
                    symbol: coin.symbol,
                    open_interest,
                    oi_change_24h_pct,
                    long_short_ratio: ratios
                        .first()
                        .map(|r| num(&r.long_short_ratio))
                        .unwrap_or_default(),
                },
            );
        }

        Ok(top)
    }
}

/// Fixed-price provider for tests and offline runs.
pub struct StaticMarketProvider {
    prices: RwLock<HashMap<String, f64>>,
}

impl StaticMarketProvider {
    pub fn with_prices(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: RwLock::new(
                prices
                    .iter()
                    .map(|(symbol, price)| (symbol.to_string(), *price))
                    .collect(),
            ),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices
            .write()
            .expect("price lock poisoned")
            .insert(symbol.to_string(), price);
    }

    fn data_for(symbol: &str, price: f64) -> MarketData {
        MarketData {
            symbol: symbol.to_string(),
            price,
            high_24h: price,
            low_24h: price,
            change_24h_pct: 0.0,
            volume_24h: 1_000_000.0,
            funding_rate: 0.0,
        }
    }
}

#[async_trait]
impl MarketSnapshotProvider for StaticMarketProvider {
    async fn candidates(&self) -> Result<Vec<CandidateCoin>> {
        let prices = self.prices.read().expect("price lock poisoned");
        let mut coins: Vec<CandidateCoin> = prices
            .iter()
            .map(|(symbol, &price)| CandidateCoin {
                symbol: symbol.clone(),
                price,
                change_24h_pct: 0.0,
                volume_24h: 1_000_000.0,
            })
            .collect();
        coins.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(coins)
    }

    async fn market_data(&self, symbols: &[String]) -> Result<HashMap<String, MarketData>> {
        let prices = self.prices.read().expect("price lock poisoned");
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                prices
                    .get(symbol)
                    .map(|&price| (symbol.clone(), Self::data_for(symbol, price)))
            })
            .collect())
    }

    async fn open_interest_top(&self) -> Result<HashMap<String, OpenInterestTop>> {
        Ok(HashMap::new())
    }
}
