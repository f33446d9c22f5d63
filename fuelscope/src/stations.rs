use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::cmp::Ordering;
use tracing::info;

use crate::kakao::{CoordSystem, KakaoClient};
use crate::opinet::{brand_name, AroundStation, FuelKind, OpinetClient, SortOrder};

/// A nearby station offered to the recommendation agent.
#[derive(Debug, Clone, PartialEq)]
pub struct StationCandidate {
    pub station_id: String,
    pub brand: String,
    pub name: String,
    /// KRW per litre
    pub price: f64,
    /// metres
    pub distance: f64,
    pub fuel: FuelKind,
}

impl StationCandidate {
    /// The record shown to the model: Korean keys, formatted price and distance.
    pub fn prompt_record(&self) -> Value {
        json!({
            "station_id": self.station_id,
            "상표": self.brand,
            "주유소명": self.name,
            "가격": format!("{}원", thousands(self.price.round() as i64)),
            "거리": format!("{}m", thousands(self.distance.round() as i64)),
            "유종": self.fuel.name(),
        })
    }
}

pub(crate) fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

pub fn candidates_from_around(stations: &[AroundStation], fuel: FuelKind) -> Vec<StationCandidate> {
    stations
        .iter()
        .map(|s| StationCandidate {
            station_id: s.id.clone(),
            brand: brand_name(&s.brand),
            name: s.name.trim().to_string(),
            price: s.price,
            distance: s.distance,
            fuel,
        })
        .collect()
}

/// Price order breaks ties on distance; distance order breaks ties on price.
pub fn rank_candidates(candidates: &mut [StationCandidate], sort: SortOrder) {
    let cmp = |a: f64, b: f64| a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    match sort {
        SortOrder::Price => candidates.sort_by(|a, b| {
            cmp(a.price, b.price).then_with(|| cmp(a.distance, b.distance))
        }),
        SortOrder::Distance => candidates.sort_by(|a, b| {
            cmp(a.distance, b.distance).then_with(|| cmp(a.price, b.price))
        }),
    }
}

/// Stations around a WGS84 point, ranked.
pub async fn search_candidates(
    kakao: &KakaoClient,
    opinet: &OpinetClient,
    lon: f64,
    lat: f64,
    radius_m: u32,
    fuel: FuelKind,
    sort: SortOrder,
) -> Result<Vec<StationCandidate>> {
    let (x, y) = kakao
        .transcoord(lon, lat, CoordSystem::Wgs84, CoordSystem::Ktm)
        .await?
        .context("coordinate conversion returned no result")?;

    let around = opinet.around_all(x, y, radius_m, fuel, sort).await?;
    let mut candidates = candidates_from_around(&around, fuel);
    rank_candidates(&mut candidates, sort);

    info!(
        "stations: {} {} stations within {}m",
        candidates.len(),
        fuel,
        radius_m
    );
    Ok(candidates)
}
