use super::util::{js_var, jsonp_payload, parse_number, parse_pct, with_retry};
use crate::core::config::EastmoneyProviderConfig;
use crate::core::fund::market_offset;
use crate::core::{
    FundDataProvider, FundEstimate, FundListEntry, FundSnapshot, IndexQuote, MainFlow,
    MarketBreadth, NavPoint, NorthFlow, PeriodReturns, SectorQuote,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Shanghai, Shenzhen, ChiNext and CSI 300
const INDEX_SECIDS: &str = "1.000001,0.399001,0.399006,1.000300";
/// Shanghai and Shenzhen composites, whose flows cover the whole A-share market
const EXCHANGE_SECIDS: &str = "1.000001,0.399001";
/// Shanghai and Shenzhen A shares, including STAR and ChiNext
const A_SHARE_FILTER: &str = "m:0%20t:6,m:0%20t:80,m:1%20t:2,m:1%20t:23";
/// Industry sector boards
const SECTOR_FILTER: &str = "m:90%20t:2";
const LIMIT_MOVE_PCT: f64 = 9.9;
const LIMIT_SCAN_SIZE: usize = 500;
const YUAN_PER_YI: f64 = 1e8;
const WAN_PER_YI: f64 = 1e4;

pub struct EastmoneyProvider {
    fund_base_url: String,
    estimate_base_url: String,
    quote_base_url: String,
    client: reqwest::Client,
}

impl EastmoneyProvider {
    pub fn new(config: &EastmoneyProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; fundwatch/0.1)")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(EastmoneyProvider {
            fund_base_url: config.fund_base_url.trim_end_matches('/').to_string(),
            estimate_base_url: config.estimate_base_url.trim_end_matches('/').to_string(),
            quote_base_url: config.quote_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        debug!("Requesting {}", url);
        let response = with_retry(
            || async {
                self.client
                    .get(url)
                    .header("Referer", "https://fund.eastmoney.com/")
                    .timeout(timeout)
                    .send()
                    .await?
                    .error_for_status()
            },
            3,
            500,
        )
        .await
        .with_context(|| format!("Request to {url} failed"))?;

        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;
        if text.trim().is_empty() {
            return Err(anyhow!("Received empty response from {}", url));
        }
        Ok(text)
    }

    async fn get_rows(&self, url: &str, what: &str) -> Result<Vec<serde_json::Value>> {
        let content = self.get_text(url, REQUEST_TIMEOUT).await?;
        parse_rows(&content, what)
    }

    /// Counts A shares at or past the daily limit, scanning the top of the
    /// change ranking in the given direction.
    async fn count_limit_moves(&self, rising: bool) -> Result<u32> {
        let url = format!(
            "{}/api/qt/clist/get?pn=1&pz={}&po={}&np=1&fltt=2&invt=2&fid=f3&fs={}&fields=f3,f12",
            self.quote_base_url,
            LIMIT_SCAN_SIZE,
            u8::from(rising),
            A_SHARE_FILTER
        );
        let rows = self.get_rows(&url, "limit move").await?;
        let count = rows
            .iter()
            .map(|row| row.get("f3").map_or(0.0, value_as_f64))
            .filter(|&pct| {
                if rising {
                    pct >= LIMIT_MOVE_PCT
                } else {
                    pct <= -LIMIT_MOVE_PCT
                }
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Deserialize)]
struct TrendPoint {
    /// Milliseconds since epoch
    x: i64,
    y: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    fundcode: String,
    name: String,
    jzrq: Option<String>,
    dwjz: Option<String>,
    gsz: Option<String>,
    gszzl: Option<String>,
    gztime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    data: Option<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    diff: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    data: Option<ConnectData>,
}

#[derive(Debug, Deserialize)]
struct ConnectData {
    hk2sh: Option<ConnectSide>,
    hk2sz: Option<ConnectSide>,
}

#[derive(Debug, Deserialize)]
struct ConnectSide {
    /// Ten thousand yuan
    #[serde(rename = "dayNetAmtIn")]
    day_net_amt_in: Option<f64>,
}

fn parse_trend(raw: &str) -> Result<Vec<NavPoint>> {
    let offset = market_offset();
    let points: Vec<TrendPoint> =
        serde_json::from_str(raw).context("Failed to parse Data_netWorthTrend")?;
    let mut trend: Vec<NavPoint> = points
        .into_iter()
        .filter_map(|p| {
            let nav = p.y.filter(|v| v.is_finite())?;
            let date = DateTime::from_timestamp_millis(p.x)?
                .with_timezone(&offset)
                .date_naive();
            Some(NavPoint { date, nav })
        })
        .collect();
    trend.sort_by_key(|p| p.date);
    trend.dedup_by_key(|p| p.date);
    Ok(trend)
}

fn parse_fund_detail(fund_code: &str, content: &str) -> Result<FundSnapshot> {
    let fund_name = js_var(content, "fS_name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("Fund {} has no fS_name in detail payload", fund_code))?
        .to_string();

    let returns = PeriodReturns {
        one_month: js_var(content, "syl_1y").and_then(parse_pct),
        three_months: js_var(content, "syl_3y").and_then(parse_pct),
        six_months: js_var(content, "syl_6y").and_then(parse_pct),
        one_year: js_var(content, "syl_1n").and_then(parse_pct),
        two_years: None,
        three_years: None,
    };

    let net_worth_trend = match js_var(content, "Data_netWorthTrend") {
        Some(raw) => parse_trend(raw)?,
        None => Vec::new(),
    };

    let mut snapshot = FundSnapshot {
        fund_code: fund_code.to_string(),
        fund_name,
        returns,
        net_worth_trend,
    };
    snapshot.fill_missing_returns();
    Ok(snapshot)
}

fn parse_fund_list(content: &str) -> Result<Vec<FundListEntry>> {
    let raw = js_var(content, "r").ok_or_else(|| anyhow!("Fund list payload has no `var r`"))?;
    let rows: Vec<Vec<String>> =
        serde_json::from_str(raw).context("Failed to parse fund list array")?;
    Ok(rows
        .into_iter()
        .filter(|row| row.len() >= 5)
        .map(|mut row| {
            let mut fields = row.drain(..5);
            let mut next = || fields.next().unwrap_or_default();
            FundListEntry {
                code: next(),
                abbreviation: next(),
                name: next(),
                fund_type: next(),
                pinyin: next(),
            }
        })
        .collect())
}

fn value_as_f64(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_rows(content: &str, what: &str) -> Result<Vec<serde_json::Value>> {
    let response: QuoteResponse = serde_json::from_str(content)
        .with_context(|| format!("Failed to parse {what} response"))?;
    Ok(response
        .data
        .ok_or_else(|| anyhow!("The {} response has no data", what))?
        .diff)
}

fn sum_field(rows: &[serde_json::Value], field: &str) -> f64 {
    rows.iter()
        .map(|row| row.get(field).map_or(0.0, value_as_f64))
        .sum()
}

fn count_field(rows: &[serde_json::Value], field: &str) -> u32 {
    // Counts never exceed a few thousand listed shares.
    sum_field(rows, field).max(0.0) as u32
}

fn parse_north_flow(content: &str) -> Result<NorthFlow> {
    let response: ConnectResponse =
        serde_json::from_str(content).context("Failed to parse Stock Connect response")?;
    let data = response
        .data
        .ok_or_else(|| anyhow!("Stock Connect response has no data"))?;
    let net = |side: Option<ConnectSide>| {
        side.and_then(|s| s.day_net_amt_in)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
            / WAN_PER_YI
    };
    let shanghai = net(data.hk2sh);
    let shenzhen = net(data.hk2sz);
    Ok(NorthFlow {
        shanghai: round2(shanghai),
        shenzhen: round2(shenzhen),
        total: round2(shanghai + shenzhen),
    })
}

fn parse_main_flow(rows: &[serde_json::Value]) -> MainFlow {
    let super_large = sum_field(rows, "f66");
    let large = sum_field(rows, "f72");
    MainFlow {
        main_net: round2((super_large + large) / YUAN_PER_YI),
        super_large: round2(super_large / YUAN_PER_YI),
        large: round2(large / YUAN_PER_YI),
        medium: round2(sum_field(rows, "f78") / YUAN_PER_YI),
        small: round2(sum_field(rows, "f84") / YUAN_PER_YI),
    }
}

fn parse_sectors(rows: &[serde_json::Value]) -> Vec<SectorQuote> {
    rows.iter()
        .filter_map(|item| {
            Some(SectorQuote {
                code: item.get("f12")?.as_str()?.to_string(),
                name: item.get("f14")?.as_str()?.to_string(),
                change_pct: item.get("f3").map_or(0.0, value_as_f64),
                main_net_inflow: item.get("f62").map_or(0.0, value_as_f64),
            })
        })
        .collect()
}

fn parse_quotes(content: &str) -> Result<Vec<IndexQuote>> {
    let diff = parse_rows(content, "index quote")?;
    Ok(diff
        .iter()
        .filter_map(|item| {
            let code = item.get("f12")?.as_str()?.to_string();
            let name = item.get("f14")?.as_str()?.to_string();
            Some(IndexQuote {
                code,
                name,
                price: item.get("f2").map_or(0.0, value_as_f64),
                change_pct: item.get("f3").map_or(0.0, value_as_f64),
                change_amount: item.get("f4").map_or(0.0, value_as_f64),
                amount: item.get("f6").map_or(0.0, value_as_f64),
            })
        })
        .collect())
}

#[async_trait]
impl FundDataProvider for EastmoneyProvider {
    async fn fetch_fund(&self, fund_code: &str) -> Result<FundSnapshot> {
        let url = format!("{}/pingzhongdata/{}.js", self.fund_base_url, fund_code);
        let content = self.get_text(&url, REQUEST_TIMEOUT).await?;
        parse_fund_detail(fund_code, &content).inspect_err(|e| {
            error!(error = %e, fund_code, "Failed to parse fund detail");
        })
    }

    async fn fetch_estimate(&self, fund_code: &str) -> Result<FundEstimate> {
        let url = format!("{}/js/{}.js", self.estimate_base_url, fund_code);
        let content = self.get_text(&url, REQUEST_TIMEOUT).await?;
        let payload = jsonp_payload(&content, "jsonpgz")?;
        if payload.is_empty() {
            return Err(anyhow!("No estimate available for fund {}", fund_code));
        }
        let raw: EstimateResponse = serde_json::from_str(payload)
            .with_context(|| format!("Failed to parse estimate for fund {fund_code}"))?;
        Ok(FundEstimate {
            fund_code: raw.fundcode,
            name: raw.name,
            net_worth: raw.dwjz.as_deref().and_then(parse_number),
            net_worth_date: raw.jzrq,
            estimate_value: raw.gsz.as_deref().and_then(parse_number),
            estimate_change_pct: raw.gszzl.as_deref().and_then(parse_pct),
            estimate_time: raw.gztime,
        })
    }

    async fn fetch_fund_list(&self) -> Result<Vec<FundListEntry>> {
        let url = format!("{}/js/fundcode_search.js", self.fund_base_url);
        let content = self.get_text(&url, LIST_TIMEOUT).await?;
        let funds = parse_fund_list(&content)?;
        debug!("Fetched {} funds from fund list", funds.len());
        Ok(funds)
    }

    async fn fetch_market_indices(&self) -> Result<Vec<IndexQuote>> {
        let url = format!(
            "{}/api/qt/ulist.np/get?fltt=2&invt=2&fields=f2,f3,f4,f6,f12,f13,f14&secids={}",
            self.quote_base_url, INDEX_SECIDS
        );
        let content = self.get_text(&url, REQUEST_TIMEOUT).await?;
        parse_quotes(&content)
    }

    async fn fetch_north_flow(&self) -> Result<NorthFlow> {
        let url = format!(
            "{}/api/qt/kamt/get?fields1=f1,f2,f3,f4&fields2=f51,f52,f53,f54,f56",
            self.quote_base_url
        );
        let content = self.get_text(&url, REQUEST_TIMEOUT).await?;
        parse_north_flow(&content)
    }

    async fn fetch_main_flow(&self) -> Result<MainFlow> {
        let url = format!(
            "{}/api/qt/ulist.np/get?fltt=2&invt=2&fields=f12,f62,f66,f72,f78,f84&secids={}",
            self.quote_base_url, EXCHANGE_SECIDS
        );
        let rows = self.get_rows(&url, "capital flow").await?;
        Ok(parse_main_flow(&rows))
    }

    async fn fetch_market_breadth(&self) -> Result<MarketBreadth> {
        let url = format!(
            "{}/api/qt/ulist.np/get?fltt=2&invt=2&fields=f12,f104,f105,f106&secids={}",
            self.quote_base_url, EXCHANGE_SECIDS
        );
        let rows = self.get_rows(&url, "market breadth").await?;
        let (limit_up_count, limit_down_count) =
            tokio::try_join!(self.count_limit_moves(true), self.count_limit_moves(false))?;
        Ok(MarketBreadth {
            up_count: count_field(&rows, "f104"),
            down_count: count_field(&rows, "f105"),
            flat_count: count_field(&rows, "f106"),
            limit_up_count,
            limit_down_count,
        })
    }

    async fn fetch_hot_sectors(&self, limit: usize) -> Result<Vec<SectorQuote>> {
        let url = format!(
            "{}/api/qt/clist/get?pn=1&pz={}&po=1&np=1&fltt=2&invt=2&fid=f3&fs={}&fields=f3,f12,f14,f62",
            self.quote_base_url, limit, SECTOR_FILTER
        );
        let rows = self.get_rows(&url, "sector quote").await?;
        let mut sectors = parse_sectors(&rows);
        sectors.sort_by(|a, b| b.change_pct.total_cmp(&a.change_pct));
        sectors.truncate(limit);
        Ok(sectors)
    }
}
