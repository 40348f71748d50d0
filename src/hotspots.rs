//! Hotspot aggregation
//!
//! Batch clustering of recent report locations. Reports inside the trailing
//! window are bucketed into grid cells; busy cells are merged with their busy
//! 8-connected neighbours and the merged groups large enough are reported.
//! Results are recomputed from scratch on every run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::HotspotConfig;
use crate::geo::{GeoPoint, GridCell};
use crate::models::{HotspotCluster, Location, ReportRecord};

/// Categories listed per cluster
const TOP_CATEGORIES: usize = 3;

pub struct HotspotAggregator {
    config: HotspotConfig,
    /// Zone centroids keyed by lowercased zone name
    zones: BTreeMap<String, GeoPoint>,
}

/// A report that survived window and location filtering
struct Placed<'a> {
    report: &'a ReportRecord,
    point: GeoPoint,
}

impl HotspotAggregator {
    pub fn new(config: HotspotConfig, zones: BTreeMap<String, GeoPoint>) -> Self {
        Self { config, zones }
    }

    fn resolve(&self, location: Option<&Location>) -> Option<GeoPoint> {
        match location? {
            Location::Coordinates { lat, lon } => {
                let point = GeoPoint::new(*lat, *lon);
                point.is_valid().then_some(point)
            }
            Location::Zone { name } => self.zones.get(&name.trim().to_lowercase()).copied(),
        }
    }

    /// Clusters among `reports` within the trailing window ending at `now`,
    /// largest first. Never fails; no qualifying reports means no clusters.
    pub fn aggregate(&self, reports: &[ReportRecord], now: DateTime<Utc>) -> Vec<HotspotCluster> {
        let Some(window_start) = Duration::try_days(self.config.window_days)
            .and_then(|window| now.checked_sub_signed(window))
        else {
            warn!("Hotspot window of {} days is out of range", self.config.window_days);
            return Vec::new();
        };

        let placed: Vec<Placed<'_>> = reports
            .iter()
            .filter(|r| r.timestamp >= window_start && r.timestamp <= now)
            .filter_map(|report| {
                self.resolve(report.location.as_ref())
                    .map(|point| Placed { report, point })
            })
            .collect();

        if placed.is_empty() {
            return Vec::new();
        }

        let mut by_cell: HashMap<GridCell, Vec<usize>> = HashMap::new();
        for (i, p) in placed.iter().enumerate() {
            by_cell
                .entry(GridCell::of(&p.point, self.config.cell_size_deg))
                .or_default()
                .push(i);
        }

        let busy: BTreeSet<GridCell> = by_cell
            .iter()
            .filter(|(_, members)| members.len() >= self.config.min_cell_reports)
            .map(|(cell, _)| *cell)
            .collect();

        let mut seen: BTreeSet<GridCell> = BTreeSet::new();
        let mut clusters = Vec::new();

        for &seed in &busy {
            if !seen.insert(seed) {
                continue;
            }

            // Flood fill over busy neighbours
            let mut cells = vec![seed];
            let mut frontier = vec![seed];
            while let Some(cell) = frontier.pop() {
                for next in cell.neighbours() {
                    if busy.contains(&next) && seen.insert(next) {
                        cells.push(next);
                        frontier.push(next);
                    }
                }
            }
            cells.sort();

            let members: Vec<&Placed<'_>> = cells
                .iter()
                .flat_map(|c| by_cell.get(c).into_iter().flatten())
                .map(|&i| &placed[i])
                .collect();

            if members.len() < self.config.min_reports {
                debug!("Dropping {}-report group at {}", members.len(), seed.key());
                continue;
            }
            if let Some(cluster) = build_cluster(&members, cells) {
                clusters.push(cluster);
            }
        }

        clusters.sort_by(|a, b| {
            b.report_count
                .cmp(&a.report_count)
                .then_with(|| a.cells.cmp(&b.cells))
        });

        debug!(
            "Hotspots: {} reports placed, {} busy cells, {} clusters",
            placed.len(),
            busy.len(),
            clusters.len()
        );
        clusters
    }
}

fn build_cluster(members: &[&Placed<'_>], cells: Vec<GridCell>) -> Option<HotspotCluster> {
    let points: Vec<GeoPoint> = members.iter().map(|m| m.point).collect();
    let centroid = GeoPoint::centroid(&points)?;
    let radius_m = points
        .iter()
        .map(|p| centroid.haversine_m(p))
        .fold(0.0_f64, f64::max);

    let window_start = members.iter().map(|m| m.report.timestamp).min()?;
    let window_end = members.iter().map(|m| m.report.timestamp).max()?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for m in members {
        *counts.entry(m.report.category.as_str()).or_default() += 1;
    }
    let mut top_categories: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(category, n)| (category.to_string(), n))
        .collect();
    top_categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_categories.truncate(TOP_CATEGORIES);

    Some(HotspotCluster {
        centroid,
        radius_m,
        report_count: members.len(),
        window_start,
        window_end,
        cells,
        top_categories,
    })
}
