// src/tools/routing/gates.rs
// Gate-aware endpoint attachment: sibling detection, endpoint reuse, and
// road splitting at gate coordinates

use super::graph::{
    DEFAULT_DRIVING_SPEED_MPS, Gate, RoadEdge, SPLIT_FROM_OFFSET, SPLIT_TO_OFFSET, TravelMode,
    WALKING_SPEED_MPS,
};
use crate::error::{Result, ServerError};

/// Two gate coordinates within this distance are the same physical gate.
/// Handles dual-carriageway roads that carry one gate per direction.
pub const GATE_COORD_TOLERANCE_M: f64 = 1.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two `[lon, lat]` coordinates.
pub fn haversine(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (lon1, lat1) = (a[0].to_radians(), a[1].to_radians());
    let (lon2, lat2) = (b[0].to_radians(), b[1].to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Travel speed over an edge in m/s for the given mode.
fn travel_speed(mode: TravelMode, road: &RoadEdge) -> f64 {
    match mode {
        TravelMode::Walking => WALKING_SPEED_MPS,
        TravelMode::Driving => match road.max_speed {
            Some(speed) if speed > 0.0 => speed,
            _ => DEFAULT_DRIVING_SPEED_MPS,
        },
    }
}

/// Result of attaching a path endpoint to a gate: the junction to route
/// from/to, plus any split edges to add to the graph.
#[derive(Debug)]
pub struct GateAttachment {
    pub junction: i64,
    pub split_edges: Vec<RoadEdge>,
}

/// Attach a path endpoint at the gate of `road_id` belonging to `aoi_id`.
///
/// When the gate sits on an existing road endpoint, that junction is reused.
/// Otherwise a synthetic junction is allocated and every sibling road sharing
/// the gate coordinate is split into two edges meeting at it.
pub fn attach_gate(
    roads: &[RoadEdge],
    road_id: i64,
    aoi_id: i64,
    mode: TravelMode,
    next_synthetic: &mut i64,
) -> Result<GateAttachment> {
    let road = roads
        .iter()
        .find(|r| r.id == road_id)
        .ok_or_else(|| ServerError::InvalidArguments(format!("road {road_id} not found")))?;

    let gate = road
        .gates
        .iter()
        .find(|g| g.aoi_id == aoi_id && g.accessible(mode))
        .ok_or_else(|| {
            ServerError::InvalidArguments(format!(
                "road {road_id} has no gate for AOI {aoi_id} accessible in the requested mode"
            ))
        })?;

    // Endpoint reuse: a gate sitting on a junction needs no split.
    if haversine(gate.coordinates, road.start) <= GATE_COORD_TOLERANCE_M {
        return Ok(GateAttachment {
            junction: road.from_junction,
            split_edges: Vec::new(),
        });
    }
    if haversine(gate.coordinates, road.end) <= GATE_COORD_TOLERANCE_M {
        return Ok(GateAttachment {
            junction: road.to_junction,
            split_edges: Vec::new(),
        });
    }

    let junction = *next_synthetic;
    *next_synthetic += 1;

    let mut split_edges = Vec::new();
    for sibling in roads.iter().filter(|r| shares_gate(r, gate)) {
        let (from_side, to_side) = split_road(sibling, gate.coordinates, junction, mode);
        split_edges.push(from_side);
        split_edges.push(to_side);
    }

    Ok(GateAttachment {
        junction,
        split_edges,
    })
}

/// Whether a road carries a gate at (within tolerance of) the coordinate.
fn shares_gate(road: &RoadEdge, gate: &Gate) -> bool {
    road.gates
        .iter()
        .any(|g| haversine(g.coordinates, gate.coordinates) <= GATE_COORD_TOLERANCE_M)
}

/// Split a road at a gate coordinate into two edges joined at `junction`.
/// Lengths are apportioned by haversine distance to each end; costs follow
/// from the mode's travel speed.
fn split_road(
    road: &RoadEdge,
    gate: [f64; 2],
    junction: i64,
    mode: TravelMode,
) -> (RoadEdge, RoadEdge) {
    let to_start = haversine(gate, road.start);
    let to_end = haversine(gate, road.end);
    let total = to_start + to_end;
    let from_fraction = if total > 0.0 { to_start / total } else { 0.5 };

    let length_from = road.length * from_fraction;
    let length_to = road.length - length_from;
    let speed = travel_speed(mode, road);

    let from_side = RoadEdge {
        id: road.id + SPLIT_FROM_OFFSET,
        from_junction: road.from_junction,
        to_junction: junction,
        length: length_from,
        cost: length_from / speed,
        name: road.name.clone(),
        category: road.category.clone(),
        max_speed: road.max_speed,
        start: road.start,
        end: gate,
        gates: Vec::new(),
    };
    let to_side = RoadEdge {
        id: road.id + SPLIT_TO_OFFSET,
        from_junction: junction,
        to_junction: road.to_junction,
        length: length_to,
        cost: length_to / speed,
        name: road.name.clone(),
        category: road.category.clone(),
        max_speed: road.max_speed,
        start: gate,
        end: road.end,
        gates: Vec::new(),
    };
    (from_side, to_side)
}
