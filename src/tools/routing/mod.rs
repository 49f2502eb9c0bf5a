// src/tools/routing/mod.rs
// Graph routing tools over road networks stored as documents

pub mod gates;
pub mod graph;

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use serde::Deserialize;

use self::gates::attach_gate;
use self::graph::{
    PathResult, RoadEdge, SYNTHETIC_JUNCTION_BASE, TravelMode, WALKING_SPEED_MPS, WeightField,
    dijkstra, load_network, merge_consecutive,
};
use crate::cursor::{Caps, collect_capped};
use crate::error::{Result, ServerError};
use crate::output::{docs_to_extended_json, wrap_untrusted};
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, ToolRegistry,
    TypedTool,
};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ShortestPathTool));
    registry.register(Arc::new(ShortestPathFromGatesTool));
    registry.register(Arc::new(AoisByPoiTool));
    registry.register(Arc::new(RoadsByAoiTool));
}

fn describe_path(result: &PathResult, roads: &[RoadEdge], include_details: bool) -> Result<Vec<String>> {
    let junctions: Vec<String> = result.junctions.iter().map(|j| j.to_string()).collect();
    let mut blocks = vec![
        format!(
            "Found a shortest path through {} junction(s); the search visited {} junction(s).",
            result.junctions.len(),
            result.visited
        ),
        format!(
            "Total length: {:.1} m. Total cost: {:.3}.",
            result.total_length, result.total_cost
        ),
        format!("Path: {}", junctions.join(" -> ")),
    ];

    if include_details {
        let path_edges: Vec<RoadEdge> = result
            .edge_indexes
            .iter()
            .map(|&i| roads[i].clone())
            .collect();
        blocks.push(wrap_untrusted(&docs_to_extended_json(&edge_details(
            &merge_consecutive(path_edges),
        ))?));
    }
    Ok(blocks)
}

fn edge_details(edges: &[RoadEdge]) -> Vec<Document> {
    edges
        .iter()
        .map(|edge| {
            let mut detail = doc! {
                "id": edge.id,
                "fromJunction": edge.from_junction,
                "toJunction": edge.to_junction,
                "length": edge.length,
                "cost": edge.cost,
            };
            if let Some(name) = &edge.name {
                detail.insert("name", name.clone());
            }
            if let Some(category) = &edge.category {
                detail.insert("category", category.clone());
            }
            if let Some(kmh) = edge.max_speed_kmh() {
                detail.insert("maxSpeedKmh", kmh);
            }
            detail
        })
        .collect()
}

fn no_path_error(start: i64, end: i64) -> ServerError {
    ServerError::Unexpected(format!(
        "no path exists between junction {start} and junction {end}"
    ))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShortestPathArgs {
    /// Database name.
    pub database: String,
    /// Collection holding the road network (Point and LineString features).
    pub collection: String,
    /// Junction ID to start from.
    pub start_junction: i64,
    /// Junction ID to reach.
    pub end_junction: i64,
    /// Edge weight to minimize.
    #[serde(default)]
    pub weight_field: WeightField,
    /// Include per-road details in the response.
    #[serde(default)]
    pub include_road_details: bool,
}

pub struct ShortestPathTool;

static SHORTEST_PATH_META: ToolMeta = ToolMeta {
    name: "shortest_path",
    description: "Find the shortest path between two junctions of a stored road network using \
                  Dijkstra's algorithm.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for ShortestPathTool {
    type Args = ShortestPathArgs;

    fn meta(&self) -> &'static ToolMeta {
        &SHORTEST_PATH_META
    }

    async fn run(&self, args: ShortestPathArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        let network = load_network(
            provider.as_ref(),
            &args.database,
            &args.collection,
            None,
            &ctx.cancellation,
        )
        .await?;

        let weight_field = args.weight_field;
        let result = dijkstra(
            &network.roads,
            args.start_junction,
            args.end_junction,
            |road| road.weight(weight_field),
        )
        .ok_or_else(|| no_path_error(args.start_junction, args.end_junction))?;

        Ok(ToolOutput::from_blocks(describe_path(
            &result,
            &network.roads,
            args.include_road_details,
        )?))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShortestPathFromGatesArgs {
    /// Database name.
    pub database: String,
    /// Collection holding the road network.
    pub collection: String,
    /// Road carrying the start gate.
    pub start_road_id: i64,
    /// AOI whose gate on the start road is the origin.
    pub start_aoi_id: i64,
    /// Road carrying the end gate.
    pub end_road_id: i64,
    /// AOI whose gate on the end road is the destination.
    pub end_aoi_id: i64,
    /// Travel mode; driving excludes footways, cycleways, and steps.
    pub mode: TravelMode,
    /// Edge weight to minimize in driving mode. Walking always weighs by
    /// travel time at pedestrian speed.
    #[serde(default)]
    pub weight_field: WeightField,
    /// Include per-road details in the response.
    #[serde(default)]
    pub include_road_details: bool,
}

pub struct ShortestPathFromGatesTool;

static FROM_GATES_META: ToolMeta = ToolMeta {
    name: "shortest_path_from_gates",
    description: "Find the shortest path between two AOI gates, splitting roads at gate \
                  coordinates where needed.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for ShortestPathFromGatesTool {
    type Args = ShortestPathFromGatesArgs;

    fn meta(&self) -> &'static ToolMeta {
        &FROM_GATES_META
    }

    async fn run(
        &self,
        args: ShortestPathFromGatesArgs,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        let network = load_network(
            provider.as_ref(),
            &args.database,
            &args.collection,
            Some(args.mode),
            &ctx.cancellation,
        )
        .await?;

        let mut next_synthetic = SYNTHETIC_JUNCTION_BASE;
        let start = attach_gate(
            &network.roads,
            args.start_road_id,
            args.start_aoi_id,
            args.mode,
            &mut next_synthetic,
        )?;
        let end = attach_gate(
            &network.roads,
            args.end_road_id,
            args.end_aoi_id,
            args.mode,
            &mut next_synthetic,
        )?;

        let mut roads = network.roads;
        roads.extend(start.split_edges);
        roads.extend(end.split_edges);

        let mode = args.mode;
        let weight_field = args.weight_field;
        let result = dijkstra(&roads, start.junction, end.junction, |road| match mode {
            TravelMode::Walking => road.length / WALKING_SPEED_MPS,
            TravelMode::Driving => road.weight(weight_field),
        })
        .ok_or_else(|| no_path_error(start.junction, end.junction))?;

        Ok(ToolOutput::from_blocks(describe_path(
            &result,
            &roads,
            args.include_road_details,
        )?))
    }
}

/// Escape a user-supplied string for literal use inside a `$regex` match.
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if ".^$*+?()[]{}|\\".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn name_match(name: &str, fuzzy: bool) -> Document {
    if fuzzy {
        doc! { "name": { "$regex": escape_regex(name), "$options": "i" } }
    } else {
        doc! { "name": name }
    }
}

fn lookup_caps(limit: i64) -> Caps {
    Caps {
        max_documents: limit,
        server_max_bytes: 0,
        caller_max_bytes: None,
    }
}

fn default_lookup_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AoisByPoiArgs {
    /// Database name.
    pub database: String,
    /// Collection holding the map features.
    pub collection: String,
    /// POI name to match.
    pub poi_name: String,
    /// Case-insensitive substring match instead of exact equality.
    #[serde(default = "default_true")]
    pub fuzzy: bool,
    /// Maximum number of POIs to return.
    #[serde(default = "default_lookup_limit")]
    pub limit: i64,
}

fn default_true() -> bool {
    true
}

pub struct AoisByPoiTool;

static AOIS_BY_POI_META: ToolMeta = ToolMeta {
    name: "get_aois_by_poi",
    description: "Look up POIs by name and return them with the AOIs that contain them.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for AoisByPoiTool {
    type Args = AoisByPoiArgs;

    fn meta(&self) -> &'static ToolMeta {
        &AOIS_BY_POI_META
    }

    async fn run(&self, args: AoisByPoiArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        let mut match_stage = name_match(&args.poi_name, args.fuzzy);
        match_stage.insert("geometry.type", "Point");
        let pipeline = vec![doc! { "$match": match_stage }, doc! { "$limit": args.limit }];

        let stream = provider
            .aggregate(&args.database, &args.collection, pipeline, None)
            .await?;
        let capped = collect_capped(stream, lookup_caps(args.limit), &ctx.cancellation).await?;

        let mut blocks = vec![format!(
            "Found {} POI(s) matching '{}'.",
            capped.documents.len(),
            args.poi_name
        )];
        if !capped.documents.is_empty() {
            blocks.push(wrap_untrusted(&docs_to_extended_json(&capped.documents)?));
        }
        Ok(ToolOutput::from_blocks(blocks))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoadsByAoiArgs {
    /// Database name.
    pub database: String,
    /// Collection holding the map features.
    pub collection: String,
    /// AOI name to match; ignored when `aoiId` is given.
    #[serde(default)]
    pub aoi_name: Option<String>,
    /// AOI ID whose gated roads to return.
    #[serde(default)]
    pub aoi_id: Option<i64>,
    /// Case-insensitive substring match for `aoiName`.
    #[serde(default = "default_true")]
    pub fuzzy: bool,
    /// Maximum number of roads to return.
    #[serde(default = "default_lookup_limit")]
    pub limit: i64,
}

pub struct RoadsByAoiTool;

static ROADS_BY_AOI_META: ToolMeta = ToolMeta {
    name: "get_roads_by_aoi",
    description: "Return the roads carrying gates of an AOI, addressed by ID or by name.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for RoadsByAoiTool {
    type Args = RoadsByAoiArgs;

    fn meta(&self) -> &'static ToolMeta {
        &ROADS_BY_AOI_META
    }

    async fn run(&self, args: RoadsByAoiArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;

        let aoi_id = match (args.aoi_id, &args.aoi_name) {
            (Some(id), _) => id,
            (None, Some(name)) => {
                // Resolve the AOI polygon by name first.
                let mut match_stage = name_match(name, args.fuzzy);
                match_stage.insert("geometry.type", "Polygon");
                let pipeline = vec![doc! { "$match": match_stage }, doc! { "$limit": 1 }];
                let stream = provider
                    .aggregate(&args.database, &args.collection, pipeline, None)
                    .await?;
                let capped = collect_capped(stream, lookup_caps(1), &ctx.cancellation).await?;
                let aoi = capped.documents.first().ok_or_else(|| {
                    ServerError::InvalidArguments(format!("no AOI named '{name}' was found"))
                })?;
                aoi.get("id")
                    .or_else(|| aoi.get("_id"))
                    .and_then(graph::bson_to_i64)
                    .ok_or_else(|| {
                        ServerError::Unexpected(format!("AOI '{name}' has no numeric ID"))
                    })?
            }
            (None, None) => {
                return Err(ServerError::InvalidArguments(
                    "provide either aoiId or aoiName".to_string(),
                ));
            }
        };

        let pipeline = vec![
            doc! { "$match": { "geometry.type": "LineString", "gates.aoi_id": aoi_id } },
            doc! { "$limit": args.limit },
        ];
        let stream = provider
            .aggregate(&args.database, &args.collection, pipeline, None)
            .await?;
        let capped = collect_capped(stream, lookup_caps(args.limit), &ctx.cancellation).await?;

        let mut blocks = vec![format!(
            "Found {} road(s) with gates of AOI {}.",
            capped.documents.len(),
            aoi_id
        )];
        if !capped.documents.is_empty() {
            blocks.push(wrap_untrusted(&docs_to_extended_json(&capped.documents)?));
        }
        Ok(ToolOutput::from_blocks(blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_escaping_neutralizes_metacharacters() {
        assert_eq!(escape_regex("cafe (west)"), "cafe \\(west\\)");
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn name_match_builds_fuzzy_and_exact_stages() {
        let fuzzy = name_match("Central Park", true);
        let regex = fuzzy.get_document("name").expect("regex doc");
        assert_eq!(regex.get_str("$regex"), Ok("Central Park"));
        assert_eq!(regex.get_str("$options"), Ok("i"));

        let exact = name_match("Central Park", false);
        assert_eq!(exact.get_str("name"), Ok("Central Park"));
    }
}
