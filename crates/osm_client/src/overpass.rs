//! Overpass feature counts (schools, fuel stations, bus stops) inside an area.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use gorodindex_config::Settings;
use gorodindex_recon::InfrastructureCounts;

use crate::geocode::Area;
use crate::retry::{CancelToken, Cancelled, FailureClass, Retrier, RetryError, RetryPolicy, Sleeper};
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    School,
    FuelStation,
    BusStop,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::School, Feature::FuelStation, Feature::BusStop];

    /// (element kind, tag key, tag value). An empty kind means nodes and ways.
    pub fn selector(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Feature::School => ("", "amenity", "school"),
            Feature::FuelStation => ("", "amenity", "fuel"),
            Feature::BusStop => ("node", "highway", "bus_stop"),
        }
    }

    pub fn label(self) -> &'static str {
        self.selector().2
    }
}

/// Overpass area clause: `s,w,n,e` for a box, `around:r,lat,lon` for a point.
pub fn area_clause(area: &Area) -> String {
    match *area {
        Area::BoundingBox {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        } => format!("{},{},{},{}", min_lat, min_lon, max_lat, max_lon),
        Area::Around { lat, lon, radius_m } => format!("around:{},{},{}", radius_m, lat, lon),
    }
}

/// Count query for `kind["key"="value"]` inside `area`, ids only.
pub fn build_query(kind: &str, key: &str, value: &str, area: &Area, server_timeout_secs: u64) -> String {
    let clause = area_clause(area);
    let header = format!("[out:json][timeout:{}];", server_timeout_secs);
    if kind.is_empty() {
        format!(
            "{header}(node[\"{key}\"=\"{value}\"]({clause});way[\"{key}\"=\"{value}\"]({clause}););out ids;"
        )
    } else {
        format!("{header}{kind}[\"{key}\"=\"{value}\"]({clause});out ids;")
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    #[serde(default)]
    elements: Vec<serde_json::Value>,
}

pub struct FeatureCounter {
    http: reqwest::blocking::Client,
    url: String,
    server_timeout_secs: u64,
    policy: RetryPolicy,
    throttle: Throttle,
    sleeper: Arc<dyn Sleeper>,
}

impl FeatureCounter {
    pub fn new(settings: &Settings, sleeper: Arc<dyn Sleeper>) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.overpass.client_timeout_secs))
            .user_agent(settings.user_agent())
            .build()?;
        Ok(Self {
            http,
            url: settings.overpass.url.clone(),
            server_timeout_secs: settings.overpass.server_timeout_secs,
            policy: RetryPolicy::from_settings(&settings.retry),
            throttle: Throttle::new(Duration::from_millis(settings.overpass.min_interval_ms)),
            sleeper,
        })
    }

    /// Count elements of one kind inside `area`, retrying transient failures.
    pub fn count_feature(
        &self,
        kind: &str,
        key: &str,
        value: &str,
        area: &Area,
        cancel: &CancelToken,
    ) -> Result<u32, RetryError> {
        let query = build_query(kind, key, value, area, self.server_timeout_secs);
        let retrier = Retrier {
            policy: &self.policy,
            sleeper: self.sleeper.as_ref(),
            cancel,
        };
        retrier.run(value, |attempt| {
            self.throttle
                .acquire(self.sleeper.as_ref(), cancel)
                .map_err(|_| FailureClass::Unexpected("cancelled".into()))?;
            log::debug!("{value}: attempt {} query {:.100}", attempt + 1, query);
            self.attempt(&query)
        })
    }

    fn attempt(&self, query: &str) -> Result<u32, FailureClass> {
        let resp = self
            .http
            .post(&self.url)
            .form(&[("data", query)])
            .send()
            .map_err(|e| FailureClass::from_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FailureClass::from_status(status.as_u16()));
        }

        let body: CountResponse = resp
            .json()
            .map_err(|e| FailureClass::from_transport(&e))?;
        Ok(body.elements.len() as u32)
    }

    /// All three counts for an area. A feature that could not be counted is
    /// logged and recorded as 0; only cancellation is an error.
    pub fn count_all(&self, area: &Area, cancel: &CancelToken) -> Result<FeatureTally, Cancelled> {
        let mut tally = FeatureTally::default();
        for feature in Feature::ALL {
            let (kind, key, value) = feature.selector();
            let n = match self.count_feature(kind, key, value, area, cancel) {
                Ok(n) => {
                    log::info!("  {}: {}", value, n);
                    n
                }
                Err(RetryError::Cancelled) => return Err(Cancelled),
                Err(_) if cancel.is_cancelled() => return Err(Cancelled),
                Err(e @ RetryError::Exhausted { .. }) => {
                    log::warn!("  {}: {}; recording 0", value, e);
                    tally.defaulted.push(feature);
                    0
                }
            };
            match feature {
                Feature::School => tally.counts.schools = n,
                Feature::FuelStation => tally.counts.gas_stations = n,
                Feature::BusStop => tally.counts.bus_stops = n,
            }
        }
        Ok(tally)
    }
}

/// Counts for one area plus the features whose query gave up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureTally {
    pub counts: InfrastructureCounts,
    pub defaulted: Vec<Feature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> Area {
        Area::BoundingBox {
            min_lat: 55.18,
            min_lon: 34.25,
            max_lat: 55.24,
            max_lon: 34.35,
        }
    }

    #[test]
    fn union_query_for_nodes_and_ways() {
        assert_eq!(
            build_query("", "amenity", "school", &bbox(), 60),
            "[out:json][timeout:60];(node[\"amenity\"=\"school\"](55.18,34.25,55.24,34.35);\
             way[\"amenity\"=\"school\"](55.18,34.25,55.24,34.35););out ids;"
        );
    }

    #[test]
    fn single_kind_query_around_point() {
        let area = Area::Around {
            lat: 55.21,
            lon: 34.3,
            radius_m: 5000,
        };
        assert_eq!(
            build_query("node", "highway", "bus_stop", &area, 60),
            "[out:json][timeout:60];node[\"highway\"=\"bus_stop\"](around:5000,55.21,34.3);out ids;"
        );
    }

    #[test]
    fn feature_selectors() {
        assert_eq!(Feature::School.selector(), ("", "amenity", "school"));
        assert_eq!(Feature::FuelStation.selector(), ("", "amenity", "fuel"));
        assert_eq!(Feature::BusStop.selector(), ("node", "highway", "bus_stop"));
    }
}
