//! Feature encoding for priority classification
//!
//! Maps a `ReportRecord` to a fixed-length f64 vector under a frozen
//! `FeatureSchema`. Encoding is total: unknown categories, missing
//! locations and empty descriptions land in reserved slots instead of
//! producing errors.
//!
//! Slot groups, in order:
//!   category one-hot (+ unknown)
//!   hour-of-day sin/cos, day-of-week sin/cos
//!   location bucket one-hot (+ other, + unknown)
//!   text: length, urgent keyword hits, has keyword, text missing
//!   reporter: prior report volume, anonymous

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::TAU;

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::EncoderConfig;
use crate::geo::{GeoPoint, GridCell};
use crate::models::{Location, ReportRecord};

/// Bumped whenever the slot layout produced by `encode` changes.
pub const LAYOUT_REVISION: u32 = 1;

const UNKNOWN: &str = "<unknown>";
const OTHER: &str = "<other>";

/// How a slot's value should be treated by downstream consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// 0.0 / 1.0
    Indicator,
    /// Real-valued; oversampling may jitter it
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSlot {
    pub name: String,
    pub kind: SlotKind,
}

/// Frozen definition of how report fields map to feature slots.
///
/// Built once at training time and bundled into every model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub revision: u32,
    /// SHA-256 over the vocabularies below
    pub fingerprint: String,
    pub categories: Vec<String>,
    /// Location bucket vocabulary (grid cell keys or `zone:<name>`)
    pub zones: Vec<String>,
    pub zone_centroids: BTreeMap<String, GeoPoint>,
    pub grid_cell_deg: f64,
    pub urgent_keywords: Vec<String>,
    pub max_text_chars: usize,
    pub max_keyword_hits: usize,
    pub max_prior_reports: u32,
    pub slots: Vec<FeatureSlot>,
}

/// Fields covered by the fingerprint. Field order is part of the hash.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    revision: u32,
    categories: &'a [String],
    zones: &'a [String],
    zone_centroids: &'a BTreeMap<String, GeoPoint>,
    grid_cell_deg: f64,
    urgent_keywords: &'a [String],
    max_text_chars: usize,
    max_keyword_hits: usize,
    max_prior_reports: u32,
}

impl FeatureSchema {
    /// Build a schema with an explicit location vocabulary.
    pub fn new(config: &EncoderConfig, zones: Vec<String>) -> Self {
        let categories: Vec<String> = config.categories.iter().map(|c| c.trim().to_string()).collect();
        let urgent_keywords: Vec<String> = config
            .urgent_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let mut schema = Self {
            revision: LAYOUT_REVISION,
            fingerprint: String::new(),
            categories,
            zones,
            zone_centroids: config.zone_points(),
            grid_cell_deg: config.grid_cell_deg,
            urgent_keywords,
            max_text_chars: config.max_text_chars.max(1),
            max_keyword_hits: config.max_keyword_hits.max(1),
            max_prior_reports: config.max_prior_reports.max(1),
            slots: Vec::new(),
        };
        schema.slots = schema.build_slots();
        schema.fingerprint = schema.compute_fingerprint();
        schema
    }

    /// Freeze a schema against training history: the location vocabulary
    /// becomes the `max_zones` most frequent buckets (ties broken by key).
    pub fn fit<'r>(config: &EncoderConfig, history: impl IntoIterator<Item = &'r ReportRecord>) -> Self {
        let probe = Self::new(config, Vec::new());

        let mut counts: HashMap<String, usize> = HashMap::new();
        for report in history {
            if let Some(key) = probe.location_key(report.location.as_ref()) {
                *counts.entry(key).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let zones = ranked
            .into_iter()
            .take(config.max_zones)
            .map(|(key, _)| key)
            .collect();

        Self::new(config, zones)
    }

    /// Number of slots in every vector produced under this schema.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    fn build_slots(&self) -> Vec<FeatureSlot> {
        let indicator = |name: String| FeatureSlot {
            name,
            kind: SlotKind::Indicator,
        };
        let continuous = |name: &str| FeatureSlot {
            name: name.to_string(),
            kind: SlotKind::Continuous,
        };

        let mut slots = Vec::new();
        slots.extend(self.categories.iter().map(|c| indicator(format!("category={c}"))));
        slots.push(indicator(format!("category={UNKNOWN}")));

        slots.push(continuous("hour_sin"));
        slots.push(continuous("hour_cos"));
        slots.push(continuous("weekday_sin"));
        slots.push(continuous("weekday_cos"));

        slots.extend(self.zones.iter().map(|z| indicator(format!("zone={z}"))));
        slots.push(indicator(format!("zone={OTHER}")));
        slots.push(indicator(format!("zone={UNKNOWN}")));

        slots.push(continuous("text_length"));
        slots.push(continuous("urgent_keyword_hits"));
        slots.push(indicator("has_urgent_keyword".to_string()));
        slots.push(indicator("text_missing".to_string()));

        slots.push(continuous("reporter_history"));
        slots.push(indicator("reporter_anonymous".to_string()));
        slots
    }

    fn compute_fingerprint(&self) -> String {
        let input = FingerprintInput {
            revision: self.revision,
            categories: &self.categories,
            zones: &self.zones,
            zone_centroids: &self.zone_centroids,
            grid_cell_deg: self.grid_cell_deg,
            urgent_keywords: &self.urgent_keywords,
            max_text_chars: self.max_text_chars,
            max_keyword_hits: self.max_keyword_hits,
            max_prior_reports: self.max_prior_reports,
        };
        // Serializing plain strings, numbers and a BTreeMap cannot fail.
        let bytes = serde_json::to_vec(&input).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        format!("{:x}", digest)[..16].to_string()
    }

    fn category_index(&self, category: &str) -> Option<usize> {
        let category = category.trim();
        self.categories
            .iter()
            .position(|c| c.eq_ignore_ascii_case(category))
    }

    /// Resolve a location to coordinates, using zone centroids for named zones.
    pub fn resolve_point(&self, location: Option<&Location>) -> Option<GeoPoint> {
        match location? {
            Location::Coordinates { lat, lon } => {
                let point = GeoPoint::new(*lat, *lon);
                point.is_valid().then_some(point)
            }
            Location::Zone { name } => self.zone_centroids.get(&name.trim().to_lowercase()).copied(),
        }
    }

    /// Bucket key for a location; `None` when the location is absent or unusable.
    fn location_key(&self, location: Option<&Location>) -> Option<String> {
        if let Some(point) = self.resolve_point(location) {
            return Some(GridCell::of(&point, self.grid_cell_deg).key());
        }
        match location? {
            Location::Zone { name } if !name.trim().is_empty() => {
                Some(format!("zone:{}", name.trim().to_lowercase()))
            }
            _ => None,
        }
    }
}

/// Encoded report, tagged with the fingerprint of the schema that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub fingerprint: String,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[inline]
fn indicator(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// ln(1 + x) scaled so that `cap` maps to 1.0.
#[inline]
fn log_norm(x: f64, cap: f64) -> f64 {
    (x.min(cap) + 1.0).ln() / (cap + 1.0).ln()
}

/// Count description tokens that are urgent keywords.
fn keyword_hits(text: &str, keywords: &[String]) -> usize {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .filter(|token| keywords.iter().any(|k| k == token))
        .count()
}

/// Encode a report under `schema`. Never fails.
pub fn encode(report: &ReportRecord, schema: &FeatureSchema) -> FeatureVector {
    let mut values = Vec::with_capacity(schema.len());

    // 1. Category one-hot + unknown
    let category = schema.category_index(&report.category);
    values.extend((0..schema.categories.len()).map(|i| indicator(category == Some(i))));
    values.push(indicator(category.is_none()));

    // 2. Cyclical time: no false discontinuity at midnight / week boundary
    let ts = report.timestamp;
    let hour = ts.hour() as f64 + ts.minute() as f64 / 60.0;
    let weekday = ts.weekday().num_days_from_monday() as f64;
    values.push((TAU * hour / 24.0).sin());
    values.push((TAU * hour / 24.0).cos());
    values.push((TAU * weekday / 7.0).sin());
    values.push((TAU * weekday / 7.0).cos());

    // 3. Location bucket one-hot + other + unknown
    let key = schema.location_key(report.location.as_ref());
    let zone = key
        .as_deref()
        .and_then(|k| schema.zones.iter().position(|z| z == k));
    values.extend((0..schema.zones.len()).map(|i| indicator(zone == Some(i))));
    values.push(indicator(key.is_some() && zone.is_none()));
    values.push(indicator(key.is_none()));

    // 4. Text signals
    let text = report.description.trim();
    let chars = text.chars().count() as f64;
    let hits = keyword_hits(text, &schema.urgent_keywords);
    let max_hits = schema.max_keyword_hits as f64;
    values.push(log_norm(chars, schema.max_text_chars as f64));
    values.push((hits as f64).min(max_hits) / max_hits);
    values.push(indicator(hits > 0));
    values.push(indicator(text.is_empty()));

    // 5. Reporter history
    let prior = report.reporter.as_ref().map(|r| r.prior_reports).unwrap_or(0);
    values.push(log_norm(prior as f64, schema.max_prior_reports as f64));
    values.push(indicator(report.reporter.is_none()));

    debug_assert_eq!(values.len(), schema.len());

    FeatureVector {
        fingerprint: schema.fingerprint.clone(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use chrono::{TimeZone, Utc};

    fn schema() -> FeatureSchema {
        FeatureSchema::new(&EncoderConfig::default(), vec!["zone:downtown".into()])
    }

    fn slot(schema: &FeatureSchema, name: &str) -> usize {
        schema
            .feature_names()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("no slot {name}"))
    }

    fn report(category: &str) -> ReportRecord {
        ReportRecord::new(category, Utc.with_ymd_and_hms(2024, 5, 6, 2, 0, 0).unwrap())
    }

    #[test]
    fn test_vector_length_matches_schema() {
        let schema = schema();
        let v = encode(&report("Theft"), &schema);
        assert_eq!(v.len(), schema.len());
        // 11 categories + unknown, 4 time, 1 zone + other + unknown, 4 text, 2 reporter
        assert_eq!(schema.len(), 12 + 4 + 3 + 4 + 2);
        assert_eq!(v.fingerprint, schema.fingerprint);
    }

    #[test]
    fn test_unknown_category_uses_reserved_slot() {
        let schema = schema();
        let v = encode(&report("Piracy"), &schema);
        assert_eq!(v.values[slot(&schema, "category=<unknown>")], 1.0);
        let category_hot: f64 = v.values[..12].iter().sum();
        assert_eq!(category_hot, 1.0);

        let known = encode(&report("cybercrime"), &schema);
        assert_eq!(known.values[slot(&schema, "category=Cybercrime")], 1.0);
        assert_eq!(known.values[slot(&schema, "category=<unknown>")], 0.0);
    }

    #[test]
    fn test_missing_location_and_text() {
        let schema = schema();
        let v = encode(&report("Cybercrime"), &schema);
        assert_eq!(v.values[slot(&schema, "zone=<unknown>")], 1.0);
        assert_eq!(v.values[slot(&schema, "zone=<other>")], 0.0);
        assert_eq!(v.values[slot(&schema, "text_missing")], 1.0);
        assert_eq!(v.values[slot(&schema, "text_length")], 0.0);
        assert_eq!(v.values[slot(&schema, "reporter_anonymous")], 1.0);
    }

    #[test]
    fn test_zone_buckets() {
        let schema = schema();
        let known = encode(&report("Theft").with_location(Location::zone(" Downtown ")), &schema);
        assert_eq!(known.values[slot(&schema, "zone=zone:downtown")], 1.0);

        let other = encode(&report("Theft").with_location(Location::point(10.0, 10.0)), &schema);
        assert_eq!(other.values[slot(&schema, "zone=<other>")], 1.0);
        assert_eq!(other.values[slot(&schema, "zone=<unknown>")], 0.0);
    }

    #[test]
    fn test_cyclical_time_is_continuous_across_midnight() {
        let schema = schema();
        let before = ReportRecord::new("Theft", Utc.with_ymd_and_hms(2024, 5, 6, 23, 59, 0).unwrap());
        let after = ReportRecord::new("Theft", Utc.with_ymd_and_hms(2024, 5, 6, 0, 1, 0).unwrap());
        let a = encode(&before, &schema);
        let b = encode(&after, &schema);
        let h = slot(&schema, "hour_sin");
        assert!((a.values[h] - b.values[h]).abs() < 0.01);
        assert!((a.values[h + 1] - b.values[h + 1]).abs() < 0.01);
    }

    #[test]
    fn test_urgent_keywords() {
        let schema = schema();
        let r = report("Assault").with_description("Man with a KNIFE, victim bleeding; knife dropped");
        let v = encode(&r, &schema);
        assert_eq!(v.values[slot(&schema, "has_urgent_keyword")], 1.0);
        assert!((v.values[slot(&schema, "urgent_keyword_hits")] - 3.0 / 5.0).abs() < 1e-12);

        // Substrings of keywords do not count
        let calm = encode(&report("Fraud").with_description("gunnysack knifepoint"), &schema);
        assert_eq!(calm.values[slot(&schema, "has_urgent_keyword")], 0.0);
    }

    #[test]
    fn test_encoding_is_bit_identical() {
        let schema = schema();
        let r = report("Robbery")
            .with_description("armed robbery at the corner store")
            .with_location(Location::point(40.7128, -74.006))
            .with_reporter("citizen-9", 4)
            .labeled(Priority::High);
        let a = encode(&r, &schema);
        let b = encode(&r, &schema);
        let bits = |v: &FeatureVector| v.values.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_fit_keeps_most_frequent_buckets() {
        let mut config = EncoderConfig::default();
        config.max_zones = 2;
        let history = vec![
            report("Theft").with_location(Location::zone("North")),
            report("Theft").with_location(Location::zone("North")),
            report("Theft").with_location(Location::zone("South")),
            report("Theft").with_location(Location::zone("East")),
            report("Theft"),
        ];
        let schema = FeatureSchema::fit(&config, &history);
        assert_eq!(schema.zones, vec!["zone:north".to_string(), "zone:east".to_string()]);
    }

    #[test]
    fn test_zone_centroid_resolves_to_cell() {
        let mut config = EncoderConfig::default();
        config.zone_centroids.insert("Harbor".into(), [40.7005, -74.0105]);
        let history = vec![report("Theft").with_location(Location::point(40.7005, -74.0105))];
        let schema = FeatureSchema::fit(&config, &history);

        let by_zone = encode(&report("Theft").with_location(Location::zone("harbor")), &schema);
        let by_point = encode(
            &report("Theft").with_location(Location::point(40.7005, -74.0105)),
            &schema,
        );
        assert_eq!(by_zone.values, by_point.values);
    }

    #[test]
    fn test_fingerprint_tracks_vocabulary() {
        let a = schema();
        let b = schema();
        assert_eq!(a.fingerprint, b.fingerprint);

        let c = FeatureSchema::new(&EncoderConfig::default(), vec!["zone:uptown".into()]);
        assert_ne!(a.fingerprint, c.fingerprint);
    }
}
