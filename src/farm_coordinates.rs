//! Regroups a GPS survey sheet into per-farmer plot polygons.
//!
//! The sheet interleaves farmer header rows ("#12 Juan Dela Cruz") with
//! blocks of DMS coordinate rows and has no other delimiters, so block
//! boundaries are inferred from row shape alone.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::cleansers::clean_number;
use crate::coordinates::dms_to_decimal;
use crate::import_schema::PlotCoordinatePoint;
use crate::sheet_parser::Cell;

/// A polygon needs at least this many vertices.
pub const MIN_POLYGON_POINTS: usize = 3;

fn farmer_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#?(\d+)\s+(.+)$").expect("static farmer header regex"))
}

#[derive(Debug)]
enum ScanState {
    SeekingFarmer,
    Consuming {
        plot_id: String,
        farmer_name: String,
        next_order: u32,
    },
}

/// Parse raw coordinate-sheet rows into ordered plot points.
pub fn cleanse_farm_coordinates(rows: &[Vec<String>]) -> Vec<PlotCoordinatePoint> {
    let mut state = ScanState::SeekingFarmer;
    let mut points = Vec::new();
    let mut skipped = 0usize;

    for (idx, row) in rows.iter().enumerate() {
        if let ScanState::Consuming {
            plot_id,
            farmer_name,
            next_order,
        } = &mut state
        {
            if looks_like_coordinate_row(row) {
                let lat = dms_to_decimal(&row[1]);
                let lng = dms_to_decimal(&row[2]);
                match (lat, lng) {
                    (Some(latitude), Some(longitude)) => {
                        points.push(PlotCoordinatePoint {
                            plot_id: plot_id.clone(),
                            farmer_name: farmer_name.clone(),
                            point_order: *next_order,
                            latitude,
                            longitude,
                            elevation: row
                                .get(3)
                                .and_then(|e| clean_number(&Cell::Text(e.clone()))),
                        });
                        *next_order += 1;
                    }
                    _ => {
                        debug!("Row {}: unparsable coordinate pair, skipped", idx + 1);
                        skipped += 1;
                    }
                }
                continue;
            }
        }

        if let Some((index, name)) = farmer_header(row) {
            state = ScanState::Consuming {
                plot_id: format!("PLOT-{:05}", index),
                farmer_name: name,
                next_order: 1,
            };
        }
    }

    info!(
        "Parsed {} coordinate points ({} malformed rows skipped)",
        points.len(),
        skipped
    );
    points
}

/// cell[1] ends in N/S and cell[2] ends in E/W.
fn looks_like_coordinate_row(row: &[String]) -> bool {
    if row.len() < 3 {
        return false;
    }
    let ends_with = |cell: &str, letters: [char; 2]| {
        cell.trim()
            .chars()
            .next_back()
            .map(|c| letters.contains(&c.to_ascii_uppercase()))
            .unwrap_or(false)
    };
    ends_with(&row[1], ['N', 'S']) && ends_with(&row[2], ['E', 'W'])
}

fn farmer_header(row: &[String]) -> Option<(u64, String)> {
    let first = row.iter().map(|c| c.trim()).find(|c| !c.is_empty())?;
    let caps = farmer_header_regex().captures(first)?;
    let index = caps[1].parse().ok()?;
    let name = caps[2].trim().to_string();
    Some((index, name))
}

/// All points of one plot, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotPolygon {
    pub plot_id: String,
    pub farmer_name: String,
    pub points: Vec<PlotCoordinatePoint>,
}

impl PlotPolygon {
    pub fn is_valid_polygon(&self) -> bool {
        self.points.len() >= MIN_POLYGON_POINTS
    }
}

/// Group points by plot, keeping first-seen plot order and sorting by point order.
pub fn group_plots(points: &[PlotCoordinatePoint]) -> Vec<PlotPolygon> {
    let mut plots: Vec<PlotPolygon> = Vec::new();
    for point in points {
        match plots.iter_mut().find(|p| p.plot_id == point.plot_id) {
            Some(plot) => plot.points.push(point.clone()),
            None => plots.push(PlotPolygon {
                plot_id: point.plot_id.clone(),
                farmer_name: point.farmer_name.clone(),
                points: vec![point.clone()],
            }),
        }
    }
    for plot in &mut plots {
        plot.points.sort_by_key(|p| p.point_order);
    }
    plots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn sample_sheet() -> Vec<Vec<String>> {
        vec![
            row(&["GPS SURVEY - BARANGAY SAN ISIDRO"]),
            row(&["#1 Juan Dela Cruz"]),
            row(&["P1", "7°15'50.01\"N", "125°22'10.5\"E", "512"]),
            row(&["P2", "7°15'51.20\"N", "125°22'11.0\"E", "515 m"]),
            row(&["P3", "7°15'49.80\"N", "125°22'12.3\"E"]),
            row(&["", "", ""]),
            row(&["", "2 Maria Santos"]),
            row(&["P1", "7°16'01.00\"N", "125°21'58.0\"E", "600"]),
            row(&["P2", "7°16'02.10\"N", "125°21'59.4\"E", "601"]),
        ]
    }

    #[test]
    fn test_point_order_restarts_per_farmer() {
        let points = cleanse_farm_coordinates(&sample_sheet());
        assert_eq!(points.len(), 5);

        let orders: Vec<(&str, u32)> = points
            .iter()
            .map(|p| (p.plot_id.as_str(), p.point_order))
            .collect();
        assert_eq!(
            orders,
            vec![
                ("PLOT-00001", 1),
                ("PLOT-00001", 2),
                ("PLOT-00001", 3),
                ("PLOT-00002", 1),
                ("PLOT-00002", 2),
            ]
        );
        assert_eq!(points[0].farmer_name, "Juan Dela Cruz");
        assert_eq!(points[3].farmer_name, "Maria Santos");
        assert_eq!(points[0].elevation, Some(512.0));
        assert_eq!(points[1].elevation, Some(515.0));
        assert_eq!(points[2].elevation, None);
    }

    #[test]
    fn test_malformed_coordinates_skipped_without_gap() {
        let sheet = vec![
            row(&["#7 Pedro Reyes"]),
            row(&["P1", "7°15'50.01\"N", "125°22'10.5\"E"]),
            row(&["P2", "7-15-50 N", "125°22'10.5\"E"]),
            row(&["P3", "7°15'52.00\"N", "125°22'10.9\"E"]),
        ];
        let points = cleanse_farm_coordinates(&sheet);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].point_order, 2);
        assert_eq!(points[1].plot_id, "PLOT-00007");
    }

    #[test]
    fn test_coordinates_before_any_farmer_ignored() {
        let sheet = vec![
            row(&["P1", "7°15'50.01\"N", "125°22'10.5\"E"]),
            row(&["stray note"]),
        ];
        assert!(cleanse_farm_coordinates(&sheet).is_empty());
    }

    #[test]
    fn test_group_plots_flags_short_polygons() {
        let plots = group_plots(&cleanse_farm_coordinates(&sample_sheet()));
        assert_eq!(plots.len(), 2);
        assert!(plots[0].is_valid_polygon());
        assert!(!plots[1].is_valid_polygon());
        assert_eq!(plots[1].farmer_name, "Maria Santos");
    }
}
