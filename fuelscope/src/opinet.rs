//! Client for the Opinet fuel-price API (`http://www.opinet.co.kr/api`).
//!
//! Every endpoint answers `{"RESULT": {"OIL": [...]}}`; the list is decoded into
//! typed records here and any deviation surfaces as `Error::UnexpectedSchema`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::agent::StationLookup;
use crate::cache::TtlCache;
use crate::error::{require_env, Error};
use crate::schema::{self, number, yes_no};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuelKind {
    Gasoline,
    Diesel,
    Lpg,
    PremiumGasoline,
    Kerosene,
}

impl FuelKind {
    pub const ALL: [FuelKind; 5] = [
        FuelKind::Gasoline,
        FuelKind::PremiumGasoline,
        FuelKind::Diesel,
        FuelKind::Lpg,
        FuelKind::Kerosene,
    ];

    pub fn code(self) -> &'static str {
        match self {
            FuelKind::Gasoline => "B027",
            FuelKind::Diesel => "D047",
            FuelKind::Lpg => "K015",
            FuelKind::PremiumGasoline => "B034",
            FuelKind::Kerosene => "C004",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FuelKind::Gasoline => "휘발유",
            FuelKind::Diesel => "경유",
            FuelKind::Lpg => "LPG",
            FuelKind::PremiumGasoline => "고급휘발유",
            FuelKind::Kerosene => "등유",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }
}

impl fmt::Display for FuelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FuelKind {
    type Err = anyhow::Error;

    /// Accepts the Opinet code, the Korean name or a short English alias.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(kind) = Self::ALL
            .into_iter()
            .find(|k| k.code().eq_ignore_ascii_case(s) || k.name().eq_ignore_ascii_case(s))
        {
            return Ok(kind);
        }
        match s.to_ascii_lowercase().as_str() {
            "gasoline" | "petrol" => Ok(FuelKind::Gasoline),
            "diesel" => Ok(FuelKind::Diesel),
            "premium" => Ok(FuelKind::PremiumGasoline),
            "kerosene" => Ok(FuelKind::Kerosene),
            _ => Err(anyhow::anyhow!("unknown fuel type: {}", s)),
        }
    }
}

/// Display name for a product code; unknown codes are returned unchanged.
pub fn fuel_name(code: &str) -> String {
    FuelKind::from_code(code)
        .map(|k| k.name().to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Display name for a brand code; unknown codes are returned unchanged.
pub fn brand_name(code: &str) -> String {
    let name = match code {
        "SKE" => "SK에너지",
        "GSC" => "GS칼텍스",
        "HDO" => "현대오일뱅크",
        "SOL" => "S-OIL",
        "RTO" => "알뜰주유소(전체)",
        "RTE" => "알뜰주유소(자영)",
        "RTX" => "알뜰주유소(고속)",
        "NHO" => "알뜰주유소(농협)",
        "ETC" => "자가상표",
        "E1G" => "E1",
        "SKG" => "SK가스",
        other => other,
    };
    name.to_string()
}

/// Ordering Opinet applies to around-station results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Price,
    Distance,
}

impl SortOrder {
    pub fn code(self) -> u8 {
        match self {
            SortOrder::Price => 1,
            SortOrder::Distance => 2,
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price" | "1" | "가격순" => Ok(SortOrder::Price),
            "distance" | "2" | "거리순" => Ok(SortOrder::Distance),
            other => Err(anyhow::anyhow!("unknown sort order: {}", other)),
        }
    }
}

fn parse_trade_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d").ok()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AreaCode {
    #[serde(rename = "AREA_CD")]
    pub code: String,
    #[serde(rename = "AREA_NM")]
    pub name: String,
}

/// National average price for one product.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AvgPrice {
    #[serde(rename = "TRADE_DT")]
    pub trade_date: String,
    #[serde(rename = "PRODCD")]
    pub product: String,
    #[serde(rename = "PRODNM", default)]
    pub product_name: Option<String>,
    #[serde(rename = "PRICE", deserialize_with = "number")]
    pub price: f64,
    #[serde(rename = "DIFF", deserialize_with = "number")]
    pub diff: f64,
}

impl AvgPrice {
    pub fn date(&self) -> Option<NaiveDate> {
        parse_trade_date(&self.trade_date)
    }

    pub fn fuel_name(&self) -> String {
        fuel_name(&self.product)
    }
}

/// Average price for one product in one province.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SidoPrice {
    #[serde(rename = "SIDOCD")]
    pub sido_code: String,
    #[serde(rename = "SIDONM")]
    pub sido_name: String,
    #[serde(rename = "PRODCD")]
    pub product: String,
    #[serde(rename = "PRICE", deserialize_with = "number")]
    pub price: f64,
    #[serde(rename = "DIFF", deserialize_with = "number")]
    pub diff: f64,
}

/// One day of a seven-day average price series.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DailyPrice {
    #[serde(rename = "DATE")]
    pub date: String,
    #[serde(rename = "PRODCD")]
    pub product: String,
    #[serde(rename = "AREA_CD", default)]
    pub area_code: Option<String>,
    #[serde(rename = "PRICE", deserialize_with = "number")]
    pub price: f64,
}

impl DailyPrice {
    pub fn day(&self) -> Option<NaiveDate> {
        parse_trade_date(&self.date)
    }
}

/// A station returned by the radius search. Coordinates are KATEC.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AroundStation {
    #[serde(rename = "UNI_ID")]
    pub id: String,
    #[serde(rename = "POLL_DIV_CD")]
    pub brand: String,
    #[serde(rename = "OS_NM")]
    pub name: String,
    #[serde(rename = "PRICE", deserialize_with = "number")]
    pub price: f64,
    #[serde(rename = "DISTANCE", deserialize_with = "number")]
    pub distance: f64,
    #[serde(rename = "GIS_X_COOR", deserialize_with = "number")]
    pub x: f64,
    #[serde(rename = "GIS_Y_COOR", deserialize_with = "number")]
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StationPrice {
    #[serde(rename = "PRODCD")]
    pub product: String,
    #[serde(rename = "PRICE", deserialize_with = "number")]
    pub price: f64,
    #[serde(rename = "TRADE_DT", default)]
    pub trade_date: String,
    #[serde(rename = "TRADE_TM", default)]
    pub trade_time: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StationDetail {
    #[serde(rename = "UNI_ID")]
    pub id: String,
    #[serde(rename = "POLL_DIV_CO")]
    pub brand: String,
    #[serde(rename = "GPOLL_DIV_CO", default)]
    pub secondary_brand: String,
    #[serde(rename = "OS_NM")]
    pub name: String,
    #[serde(rename = "VAN_ADR", default)]
    pub lot_address: String,
    #[serde(rename = "NEW_ADR", default)]
    pub road_address: String,
    #[serde(rename = "TEL", default)]
    pub phone: String,
    #[serde(rename = "CAR_WASH_YN", default, deserialize_with = "yes_no")]
    pub car_wash: bool,
    #[serde(rename = "CVS_YN", default, deserialize_with = "yes_no")]
    pub convenience_store: bool,
    #[serde(rename = "MAINT_YN", default, deserialize_with = "yes_no")]
    pub maintenance: bool,
    #[serde(rename = "OIL_PRICE", default)]
    pub prices: Vec<StationPrice>,
}

impl StationDetail {
    /// Road address when known, lot address otherwise.
    pub fn address(&self) -> &str {
        if self.road_address.trim().is_empty() {
            self.lot_address.trim()
        } else {
            self.road_address.trim()
        }
    }

    /// Record handed back to the model, with codes replaced by display names.
    pub fn to_tool_json(&self) -> Value {
        json!({
            "station_id": self.id,
            "주유소명": self.name,
            "상표": brand_name(&self.brand),
            "보조상표": brand_name(&self.secondary_brand),
            "지번주소": self.lot_address,
            "도로명주소": self.road_address,
            "전화번호": self.phone,
            "세차장": self.car_wash,
            "편의점": self.convenience_store,
            "경정비": self.maintenance,
            "기름가격": self.prices.iter().map(|p| json!({
                "유종": fuel_name(&p.product),
                "가격": p.price,
                "기준일시": format!("{} {}", p.trade_date, p.trade_time).trim().to_string(),
            })).collect::<Vec<_>>(),
        })
    }
}

pub struct OpinetClient {
    base_url: String,
    api_key: String,
    client: Client,
    cache: Option<Arc<TtlCache>>,
}

impl OpinetClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            cache: None,
        })
    }

    pub fn from_config(config: &common::OpinetConfig) -> Result<Self> {
        let api_key = require_env(config.api_key_env())?;
        Self::new(config.api_url(), api_key, config.timeout_seconds())
    }

    pub fn with_cache(mut self, cache: Arc<TtlCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// GET `endpoint` and return the `RESULT.OIL` list.
    async fn call(&self, endpoint: &'static str, params: &[(&str, String)]) -> Result<Value> {
        let key = TtlCache::key(
            endpoint,
            &params.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>(),
        );
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(hit);
        }

        let mut query: Vec<(&str, String)> = vec![("out", "json".to_string()), ("code", self.api_key.clone())];
        query.extend(params.iter().cloned());

        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("opinet: GET {}", endpoint);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("opinet request to {} failed", endpoint))?;

        let status = response.status();
        let body = response.text().await.context("failed to read opinet response")?;
        if !status.is_success() {
            return Err(Error::Api {
                api: "opinet",
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| Error::UnexpectedSchema {
            api: "opinet",
            detail: format!("{} returned non-JSON body: {}", endpoint, e),
        })?;
        let oil = value
            .get("RESULT")
            .and_then(|r| r.get("OIL"))
            .filter(|o| o.is_array())
            .cloned()
            .ok_or_else(|| Error::UnexpectedSchema {
                api: "opinet",
                detail: format!("{} response lacks RESULT.OIL", endpoint),
            })?;

        if let Some(cache) = &self.cache {
            cache.insert(key, oil.clone());
        }
        Ok(oil)
    }

    async fn records<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let value = self.call(endpoint, params).await?;
        Ok(schema::decode("opinet", value)?)
    }

    pub async fn area_codes(&self) -> Result<Vec<AreaCode>> {
        self.records("areaCode.do", &[]).await
    }

    pub async fn avg_all_price(&self) -> Result<Vec<AvgPrice>> {
        self.records("avgAllPrice.do", &[]).await
    }

    pub async fn avg_sido_price(&self) -> Result<Vec<SidoPrice>> {
        self.records("avgSidoPrice.do", &[]).await
    }

    /// National averages for the seven days up to `date`.
    pub async fn recent_avg_price(&self, fuel: FuelKind, date: NaiveDate) -> Result<Vec<DailyPrice>> {
        self.records(
            "dateAvgRecentPrice.do",
            &[
                ("prodcd", fuel.code().to_string()),
                ("date", date.format("%Y%m%d").to_string()),
            ],
        )
        .await
    }

    /// Regional averages for the seven days up to `date`.
    pub async fn recent_area_avg_price(
        &self,
        area_code: &str,
        fuel: FuelKind,
        date: NaiveDate,
    ) -> Result<Vec<DailyPrice>> {
        self.records(
            "dateAreaAvgRecentPrice.do",
            &[
                ("area", area_code.to_string()),
                ("prodcd", fuel.code().to_string()),
                ("date", date.format("%Y%m%d").to_string()),
            ],
        )
        .await
    }

    /// Stations within `radius_m` of the KATEC point `(x, y)`.
    pub async fn around_all(
        &self,
        x: f64,
        y: f64,
        radius_m: u32,
        fuel: FuelKind,
        sort: SortOrder,
    ) -> Result<Vec<AroundStation>> {
        self.records(
            "aroundAll.do",
            &[
                ("x", x.to_string()),
                ("y", y.to_string()),
                ("radius", radius_m.to_string()),
                ("prodcd", fuel.code().to_string()),
                ("sort", sort.code().to_string()),
            ],
        )
        .await
    }

    pub async fn detail_by_id(&self, station_id: &str) -> Result<Vec<StationDetail>> {
        self.records("detailById.do", &[("id", station_id.to_string())]).await
    }
}

#[async_trait::async_trait]
impl StationLookup for OpinetClient {
    async fn station_detail(&self, station_id: &str) -> Result<Vec<StationDetail>> {
        self.detail_by_id(station_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuel_kinds_parse_from_codes_names_and_aliases() {
        assert_eq!("B027".parse::<FuelKind>().unwrap(), FuelKind::Gasoline);
        assert_eq!("경유".parse::<FuelKind>().unwrap(), FuelKind::Diesel);
        assert_eq!("lpg".parse::<FuelKind>().unwrap(), FuelKind::Lpg);
        assert_eq!("premium".parse::<FuelKind>().unwrap(), FuelKind::PremiumGasoline);
        assert!("jet".parse::<FuelKind>().is_err());
        assert_eq!(fuel_name("C004"), "등유");
        assert_eq!(fuel_name("X999"), "X999");
    }

    #[test]
    fn brand_codes_map_to_names() {
        assert_eq!(brand_name("SKE"), "SK에너지");
        assert_eq!(brand_name("RTX"), "알뜰주유소(고속)");
        assert_eq!(brand_name("ZZZ"), "ZZZ");
    }

    #[test]
    fn detail_records_decode_strings_and_flags() {
        let value = json!([{
            "UNI_ID": "A0011826",
            "POLL_DIV_CO": "GSC",
            "GPOLL_DIV_CO": "",
            "OS_NM": "행복주유소",
            "VAN_ADR": "서울 강남구 역삼동 1-1",
            "NEW_ADR": "서울 강남구 테헤란로 1",
            "TEL": "02-000-0000",
            "CAR_WASH_YN": "Y",
            "CVS_YN": "N",
            "MAINT_YN": "N",
            "OIL_PRICE": [{"PRODCD": "B027", "PRICE": "1689", "TRADE_DT": "20261016", "TRADE_TM": "093000"}]
        }]);
        let details: Vec<StationDetail> = schema::decode("opinet", value).unwrap();
        let d = &details[0];
        assert!(d.car_wash && !d.convenience_store);
        assert_eq!(d.address(), "서울 강남구 테헤란로 1");
        assert_eq!(d.prices[0].price, 1689.0);

        let tool = d.to_tool_json();
        assert_eq!(tool["상표"], "GS칼텍스");
        assert_eq!(tool["기름가격"][0]["유종"], "휘발유");
        assert_eq!(tool["기름가격"][0]["기준일시"], "20261016 093000");
    }

    #[test]
    fn avg_price_date_parses() {
        let value = json!([{"TRADE_DT": "20261016", "PRODCD": "D047", "PRODNM": "자동차용경유", "PRICE": "1523.45", "DIFF": "-2.10"}]);
        let prices: Vec<AvgPrice> = schema::decode("opinet", value).unwrap();
        assert_eq!(prices[0].date(), NaiveDate::from_ymd_opt(2026, 10, 16));
        assert_eq!(prices[0].diff, -2.1);
        assert_eq!(prices[0].fuel_name(), "경유");
    }

    #[test]
    fn sort_order_codes() {
        assert_eq!(SortOrder::Price.code(), 1);
        assert_eq!("distance".parse::<SortOrder>().unwrap(), SortOrder::Distance);
        assert_eq!("2".parse::<SortOrder>().unwrap().code(), 2);
    }
}
