// src/tools/routing/graph.rs
// Road-network model and Dijkstra shortest path

use std::collections::{BinaryHeap, HashMap, HashSet};

use futures::StreamExt;
use mongodb::bson::{Bson, Document, doc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};
use crate::provider::Provider;

/// Base of the reserved ID range for synthetic junctions created by gate
/// splitting.
pub const SYNTHETIC_JUNCTION_BASE: i64 = 60_000_000_000;

/// ID offsets for the two halves of a split road.
pub const SPLIT_FROM_OFFSET: i64 = 10_000_000_000;
pub const SPLIT_TO_OFFSET: i64 = 20_000_000_000;

/// Pedestrian speed used for walking-mode costs.
pub const WALKING_SPEED_MPS: f64 = 1.4;

/// Fallback driving speed when a road reports no usable maxSpeed.
pub const DEFAULT_DRIVING_SPEED_MPS: f64 = 8.33;

/// Conversion factor for displaying stored m/s speeds as km/h.
pub const MPS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Driving,
    Walking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WeightField {
    #[default]
    Cost,
    Length,
}

/// Road categories excluded from the driving graph.
const NON_DRIVABLE_CATEGORIES: &[&str] = &["footway", "cycleway", "steps"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateType {
    Driving,
    Walking,
}

/// An AOI access point on a road.
#[derive(Debug, Clone)]
pub struct Gate {
    pub aoi_id: i64,
    pub gate_type: GateType,
    pub coordinates: [f64; 2],
}

impl Gate {
    /// Whether this gate grants access for the travel mode. A drivable gate
    /// is always walkable; the reverse does not hold.
    pub fn accessible(&self, mode: TravelMode) -> bool {
        match mode {
            TravelMode::Driving => self.gate_type == GateType::Driving,
            TravelMode::Walking => true,
        }
    }
}

/// One directed road segment between two junctions.
#[derive(Debug, Clone)]
pub struct RoadEdge {
    pub id: i64,
    pub from_junction: i64,
    pub to_junction: i64,
    pub length: f64,
    pub cost: f64,
    pub name: Option<String>,
    pub category: Option<String>,
    pub max_speed: Option<f64>,
    /// First and last coordinate of the LineString geometry.
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub gates: Vec<Gate>,
}

impl RoadEdge {
    pub fn weight(&self, field: WeightField) -> f64 {
        match field {
            WeightField::Cost => self.cost,
            WeightField::Length => self.length,
        }
    }

    /// maxSpeed for display, converted from stored m/s to km/h.
    pub fn max_speed_kmh(&self) -> Option<f64> {
        self.max_speed.map(|s| s * MPS_TO_KMH)
    }
}

/// A loaded road network: LineString roads plus the count of Point junctions
/// seen alongside them.
#[derive(Debug, Default)]
pub struct RoadNetwork {
    pub roads: Vec<RoadEdge>,
    pub junction_count: usize,
}

/// Interpret a stored numeric ID. 64-bit values may arrive boxed as
/// `{high, low}` pairs; those convert as `high * 2^32 + (low as unsigned)`.
pub fn bson_to_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        Bson::Document(boxed) => {
            let high = bson_number(boxed.get("high")?)?;
            let low = bson_number(boxed.get("low")?)?;
            Some((high as i64) * (1_i64 << 32) + (low as i64 as u32 as i64))
        }
        _ => None,
    }
}

fn bson_number(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        _ => None,
    }
}

fn bson_to_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}

fn coordinate_pair(value: &Bson) -> Option<[f64; 2]> {
    let Bson::Array(items) = value else {
        return None;
    };
    if items.len() < 2 {
        return None;
    }
    Some([bson_to_f64(&items[0])?, bson_to_f64(&items[1])?])
}

fn parse_gates(doc: &Document) -> Vec<Gate> {
    let Ok(raw) = doc.get_array("gates") else {
        return Vec::new();
    };
    raw.iter()
        .filter_map(|entry| {
            let Bson::Document(gate) = entry else {
                return None;
            };
            let aoi_id = bson_to_i64(gate.get("aoi_id")?)?;
            let gate_type = match gate.get_str("type").ok()? {
                "driving" => GateType::Driving,
                "walking" => GateType::Walking,
                _ => return None,
            };
            let coordinates = coordinate_pair(gate.get("coordinates")?)?;
            Some(Gate {
                aoi_id,
                gate_type,
                coordinates,
            })
        })
        .collect()
}

fn parse_road(doc: &Document) -> Option<RoadEdge> {
    let geometry = doc.get_document("geometry").ok()?;
    let coordinates = geometry.get_array("coordinates").ok()?;
    let start = coordinate_pair(coordinates.first()?)?;
    let end = coordinate_pair(coordinates.last()?)?;

    let id = bson_to_i64(doc.get("id").or_else(|| doc.get("_id"))?)?;
    Some(RoadEdge {
        id,
        from_junction: bson_to_i64(doc.get("from_junction")?)?,
        to_junction: bson_to_i64(doc.get("to_junction")?)?,
        length: doc.get("length").and_then(bson_to_f64).unwrap_or(0.0),
        cost: doc.get("cost").and_then(bson_to_f64).unwrap_or(0.0),
        name: doc.get_str("name").ok().map(str::to_string),
        category: doc.get_str("category").ok().map(str::to_string),
        max_speed: doc.get("max_speed").and_then(bson_to_f64),
        start,
        end,
        gates: parse_gates(doc),
    })
}

/// Load the mixed Point/LineString collection into a road network. When a
/// driving mode is given, non-drivable categories are excluded.
pub async fn load_network(
    provider: &dyn Provider,
    db: &str,
    coll: &str,
    mode: Option<TravelMode>,
    cancellation: &CancellationToken,
) -> Result<RoadNetwork> {
    let mut stream = provider
        .find(db, coll, doc! {}, crate::provider::QueryOptions::default())
        .await?;

    let mut network = RoadNetwork::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ServerError::Cancelled),
            next = stream.next() => next,
        };
        let Some(item) = next else { break };
        let doc = item?;

        let Ok(geometry) = doc.get_document("geometry") else {
            continue;
        };
        match geometry.get_str("type") {
            Ok("Point") => network.junction_count += 1,
            Ok("LineString") => {
                let Some(road) = parse_road(&doc) else {
                    continue;
                };
                if mode == Some(TravelMode::Driving)
                    && let Some(category) = &road.category
                    && NON_DRIVABLE_CATEGORIES.contains(&category.as_str())
                {
                    continue;
                }
                network.roads.push(road);
            }
            _ => {}
        }
    }
    Ok(network)
}

/// Result of a shortest-path search.
#[derive(Debug)]
pub struct PathResult {
    pub junctions: Vec<i64>,
    pub edge_indexes: Vec<usize>,
    pub total_length: f64,
    pub total_cost: f64,
    pub visited: usize,
}

/// Min-heap entry. Ordering is by weight, then node ID, so equal-weight
/// entries pop in a stable order.
#[derive(Debug, PartialEq)]
struct HeapEntry {
    weight: f64,
    node: i64,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra over directed road edges with visit-once semantics.
pub fn dijkstra(
    roads: &[RoadEdge],
    start: i64,
    end: i64,
    weight: impl Fn(&RoadEdge) -> f64,
) -> Option<PathResult> {
    let mut adjacency: HashMap<i64, Vec<usize>> = HashMap::new();
    for (index, road) in roads.iter().enumerate() {
        adjacency.entry(road.from_junction).or_default().push(index);
    }

    let mut distances: HashMap<i64, f64> = HashMap::from([(start, 0.0)]);
    let mut previous: HashMap<i64, (i64, usize)> = HashMap::new();
    let mut settled: HashSet<i64> = HashSet::new();
    let mut heap = BinaryHeap::from([HeapEntry {
        weight: 0.0,
        node: start,
    }]);
    let mut visited = 0usize;

    while let Some(HeapEntry { weight: dist, node }) = heap.pop() {
        if !settled.insert(node) {
            continue;
        }
        visited += 1;
        if node == end {
            break;
        }

        let Some(outgoing) = adjacency.get(&node) else {
            continue;
        };
        for &index in outgoing {
            let road = &roads[index];
            let next = road.to_junction;
            if settled.contains(&next) {
                continue;
            }
            let candidate = dist + weight(road).max(0.0);
            if distances
                .get(&next)
                .is_none_or(|&existing| candidate < existing)
            {
                distances.insert(next, candidate);
                previous.insert(next, (node, index));
                heap.push(HeapEntry {
                    weight: candidate,
                    node: next,
                });
            }
        }
    }

    if start != end && !previous.contains_key(&end) {
        return None;
    }

    let mut junctions = vec![end];
    let mut edge_indexes = Vec::new();
    let mut cursor = end;
    while cursor != start {
        let (prev, index) = *previous.get(&cursor)?;
        edge_indexes.push(index);
        junctions.push(prev);
        cursor = prev;
    }
    junctions.reverse();
    edge_indexes.reverse();

    let total_length = edge_indexes.iter().map(|&i| roads[i].length).sum();
    let total_cost = edge_indexes.iter().map(|&i| roads[i].cost).sum();
    Some(PathResult {
        junctions,
        edge_indexes,
        total_length,
        total_cost,
        visited,
    })
}

/// Merge consecutive path edges that share name, category, and maxSpeed, and
/// where the predecessor ends at the successor's start junction. Lengths and
/// costs are summed.
pub fn merge_consecutive(edges: Vec<RoadEdge>) -> Vec<RoadEdge> {
    let mut merged: Vec<RoadEdge> = Vec::with_capacity(edges.len());
    for edge in edges {
        if let Some(last) = merged.last_mut()
            && last.name == edge.name
            && last.category == edge.category
            && last.max_speed == edge.max_speed
            && last.to_junction == edge.from_junction
        {
            last.to_junction = edge.to_junction;
            last.length += edge.length;
            last.cost += edge.cost;
            last.end = edge.end;
            continue;
        }
        merged.push(edge);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(id: i64, from: i64, to: i64, cost: f64) -> RoadEdge {
        RoadEdge {
            id,
            from_junction: from,
            to_junction: to,
            length: cost * 10.0,
            cost,
            name: None,
            category: None,
            max_speed: None,
            start: [0.0, 0.0],
            end: [0.0, 0.0],
            gates: Vec::new(),
        }
    }

    #[test]
    fn dijkstra_finds_the_optimal_path() {
        // 1->2 cost 5, 1->3 cost 2, 3->2 cost 2, 2->4 cost 1.
        let roads = vec![
            edge(1, 1, 2, 5.0),
            edge(2, 1, 3, 2.0),
            edge(3, 3, 2, 2.0),
            edge(4, 2, 4, 1.0),
        ];
        let result = dijkstra(&roads, 1, 4, |r| r.cost).expect("path exists");
        assert_eq!(result.junctions, vec![1, 3, 2, 4]);
        assert_eq!(result.total_cost, 5.0);
        assert!(result.visited >= 4);
    }

    #[test]
    fn dijkstra_respects_the_weight_function() {
        // Shorter hop count but heavier length; length-weighted search must
        // pick the cheaper-length route.
        let mut direct = edge(1, 1, 2, 1.0);
        direct.length = 100.0;
        let mut via_a = edge(2, 1, 3, 5.0);
        via_a.length = 10.0;
        let mut via_b = edge(3, 3, 2, 5.0);
        via_b.length = 10.0;

        let roads = vec![direct, via_a, via_b];
        let by_cost = dijkstra(&roads, 1, 2, |r| r.cost).expect("path");
        assert_eq!(by_cost.junctions, vec![1, 2]);

        let by_length = dijkstra(&roads, 1, 2, |r| r.length).expect("path");
        assert_eq!(by_length.junctions, vec![1, 3, 2]);
    }

    #[test]
    fn dijkstra_returns_none_when_disconnected() {
        let roads = vec![edge(1, 1, 2, 1.0)];
        assert!(dijkstra(&roads, 2, 1, |r| r.cost).is_none());
        assert!(dijkstra(&roads, 1, 99, |r| r.cost).is_none());
    }

    #[test]
    fn dijkstra_start_equals_end() {
        let roads = vec![edge(1, 1, 2, 1.0)];
        let result = dijkstra(&roads, 1, 1, |r| r.cost).expect("trivial path");
        assert_eq!(result.junctions, vec![1]);
        assert_eq!(result.total_cost, 0.0);
    }

    #[test]
    fn heap_breaks_ties_by_node_id() {
        let a = HeapEntry {
            weight: 1.0,
            node: 7,
        };
        let b = HeapEntry {
            weight: 1.0,
            node: 3,
        };
        // Min-heap: the smaller node ID pops first on equal weight.
        assert!(b > a);
    }

    #[test]
    fn boxed_int64_conversion() {
        let boxed = Bson::Document(mongodb::bson::doc! { "high": 2, "low": 5 });
        assert_eq!(bson_to_i64(&boxed), Some(2 * 4_294_967_296 + 5));

        // A negative low word reads as its unsigned 32-bit value.
        let boxed = Bson::Document(mongodb::bson::doc! { "high": 0, "low": -1 });
        assert_eq!(bson_to_i64(&boxed), Some(4_294_967_295));

        assert_eq!(bson_to_i64(&Bson::Int32(41)), Some(41));
        assert_eq!(bson_to_i64(&Bson::Int64(1 << 40)), Some(1 << 40));
        assert_eq!(bson_to_i64(&Bson::String("x".into())), None);
    }

    #[test]
    fn merge_consecutive_sums_lengths_and_costs() {
        let mut a = edge(1, 1, 2, 2.0);
        a.name = Some("Main St".into());
        let mut b = edge(2, 2, 3, 3.0);
        b.name = Some("Main St".into());
        let mut c = edge(3, 3, 4, 1.0);
        c.name = Some("Side St".into());

        let total_length: f64 = [&a, &b, &c].iter().map(|e| e.length).sum();
        let total_cost: f64 = [&a, &b, &c].iter().map(|e| e.cost).sum();

        let merged = merge_consecutive(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].to_junction, 3);
        assert_eq!(merged[0].length, 50.0);
        assert_eq!(merged[0].cost, 5.0);

        let merged_length: f64 = merged.iter().map(|e| e.length).sum();
        let merged_cost: f64 = merged.iter().map(|e| e.cost).sum();
        assert!((merged_length - total_length).abs() < 1e-9);
        assert!((merged_cost - total_cost).abs() < 1e-9);
    }

    #[test]
    fn merge_requires_contiguity() {
        let mut a = edge(1, 1, 2, 2.0);
        a.name = Some("Main St".into());
        // Same attributes but not contiguous: 2 != 5.
        let mut b = edge(2, 5, 6, 3.0);
        b.name = Some("Main St".into());
        let merged = merge_consecutive(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn road_parses_from_document() {
        let doc = mongodb::bson::doc! {
            "id": 42i64,
            "geometry": {
                "type": "LineString",
                "coordinates": [[116.30, 39.98], [116.31, 39.99]],
            },
            "from_junction": 7,
            "to_junction": 8,
            "length": 150.0,
            "cost": 18.0,
            "name": "Ring Rd",
            "category": "primary",
            "max_speed": 16.67,
            "gates": [
                { "aoi_id": 5, "type": "driving", "coordinates": [116.305, 39.985] },
            ],
        };
        let road = parse_road(&doc).expect("parses");
        assert_eq!(road.id, 42);
        assert_eq!(road.from_junction, 7);
        assert_eq!(road.gates.len(), 1);
        assert!(road.gates[0].accessible(TravelMode::Walking));
        assert!(road.gates[0].accessible(TravelMode::Driving));
        let kmh = road.max_speed_kmh().expect("has speed");
        assert!((kmh - 60.012).abs() < 1e-9);
    }

    #[test]
    fn walking_gate_is_not_drivable() {
        let gate = Gate {
            aoi_id: 1,
            gate_type: GateType::Walking,
            coordinates: [0.0, 0.0],
        };
        assert!(gate.accessible(TravelMode::Walking));
        assert!(!gate.accessible(TravelMode::Driving));
    }
}
