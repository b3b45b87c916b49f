//! Nominatim geocoding: city name → bounding box or point, plus place description.
//!
//! One request per lookup, first result only. Every failure is terminal for
//! the city; geocoding is never retried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT_LANGUAGE;
use serde::{Deserialize, Serialize};

use gorodindex_config::Settings;

use crate::retry::{CancelToken, Sleeper};
use crate::throttle::Throttle;

/// Area that feature counts are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Area {
    BoundingBox {
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    },
    Around {
        lat: f64,
        lon: f64,
        radius_m: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLocation {
    pub area: Area,
    /// Comma-separated place hierarchy, specific to general.
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NoResults,
    Transport(String),
    Status(u16),
    Malformed(String),
    Cancelled,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResults => write!(f, "no results"),
            Self::Transport(msg) => write!(f, "request failed: {}", msg),
            Self::Status(code) => write!(f, "HTTP {}", code),
            Self::Malformed(msg) => write!(f, "unexpected response: {}", msg),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ResolveError {}

#[derive(Debug, Deserialize)]
struct Place {
    #[serde(default)]
    lat: Option<String>,
    #[serde(default)]
    lon: Option<String>,
    #[serde(default)]
    display_name: String,
    /// `[min_lat, max_lat, min_lon, max_lon]` as strings.
    #[serde(default)]
    boundingbox: Option<Vec<String>>,
}

pub struct Geocoder {
    http: reqwest::blocking::Client,
    url: String,
    around_radius_m: u32,
    throttle: Throttle,
    sleeper: Arc<dyn Sleeper>,
}

impl Geocoder {
    pub fn new(settings: &Settings, sleeper: Arc<dyn Sleeper>) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.geocoder.timeout_secs))
            .user_agent(settings.user_agent())
            .build()?;
        Ok(Self {
            http,
            url: settings.geocoder.url.clone(),
            around_radius_m: settings.overpass.around_radius_m,
            throttle: Throttle::new(Duration::from_millis(settings.geocoder.min_interval_ms)),
            sleeper,
        })
    }

    /// Resolve `city`, optionally narrowed by a region, to its first match.
    pub fn resolve(
        &self,
        city: &str,
        region_hint: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<ResolvedLocation, ResolveError> {
        let query = match region_hint {
            Some(region) if !region.trim().is_empty() => format!("{}, {}", city, region),
            _ => city.to_string(),
        };

        cancel.check().map_err(|_| ResolveError::Cancelled)?;
        self.throttle
            .acquire(self.sleeper.as_ref(), cancel)
            .map_err(|_| ResolveError::Cancelled)?;
        log::debug!("geocoding '{}'", query);

        let resp = self
            .http
            .get(&self.url)
            .header(ACCEPT_LANGUAGE, "ru")
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("limit", "1"),
                ("addressdetails", "1"),
            ])
            .send()
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status.as_u16()));
        }

        let places: Vec<Place> = resp
            .json()
            .map_err(|e| ResolveError::Malformed(e.to_string()))?;
        let place = places.into_iter().next().ok_or(ResolveError::NoResults)?;
        self.to_location(place)
    }

    fn to_location(&self, place: Place) -> Result<ResolvedLocation, ResolveError> {
        let area = match place.boundingbox.as_deref().and_then(parse_bbox) {
            Some(area) => area,
            None => {
                let lat = parse_coord(place.lat.as_deref());
                let lon = parse_coord(place.lon.as_deref());
                match (lat, lon) {
                    (Some(lat), Some(lon)) => Area::Around {
                        lat,
                        lon,
                        radius_m: self.around_radius_m,
                    },
                    _ => {
                        return Err(ResolveError::Malformed(
                            "result has neither a bounding box nor a point".into(),
                        ))
                    }
                }
            }
        };
        Ok(ResolvedLocation {
            area,
            display_name: place.display_name,
        })
    }
}

fn parse_coord(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_bbox(raw: &[String]) -> Option<Area> {
    if raw.len() != 4 {
        return None;
    }
    let v: Vec<f64> = raw
        .iter()
        .map(|s| parse_coord(Some(s)))
        .collect::<Option<Vec<_>>>()?;
    Some(Area::BoundingBox {
        min_lat: v[0],
        max_lat: v[1],
        min_lon: v[2],
        max_lon: v[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_order_is_lat_then_lon() {
        let raw: Vec<String> = ["55.18", "55.24", "34.25", "34.35"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            parse_bbox(&raw),
            Some(Area::BoundingBox {
                min_lat: 55.18,
                min_lon: 34.25,
                max_lat: 55.24,
                max_lon: 34.35,
            })
        );
    }

    #[test]
    fn bad_bbox_is_ignored() {
        let short: Vec<String> = vec!["1".into(), "2".into()];
        assert_eq!(parse_bbox(&short), None);
        let junk: Vec<String> = ["a", "2", "3", "4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(parse_bbox(&junk), None);
    }

    #[test]
    fn coords_must_be_finite() {
        assert_eq!(parse_coord(Some(" 55.2 ")), Some(55.2));
        assert_eq!(parse_coord(Some("NaN")), None);
        assert_eq!(parse_coord(None), None);
    }
}
