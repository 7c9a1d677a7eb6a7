//! Benchmark for netver using a synthetic grid network.
//!
//! Ingests a `size` x `size` grid, stacks a chain of project changesets on
//! it, diffs an edited export, packs the result into netchange bundles and
//! renders a tile pyramid over the grid.

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use netver::codec::{decode_bundle, encode_bundle, encode_bundle_compressed};
use netver::model::builder::OperationsBuilder;
use netver::model::{FeatureRow, NetworkRows};
use netver::{
    ChangesetId, ChangesetMeta, CommitOutcome, Coord, EngineConfig, Geometry, NetworkService,
    ReadOutcome, TileResponse, Value,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Grid spacing in degrees.
const STEP: f64 = 0.001;
const ORIGIN: (f64, f64) = (4.30, 50.80);
const PROJECT_CHANGESETS: usize = 10;

#[derive(Debug, Default, Serialize)]
struct Summary {
    nodes: usize,
    links: usize,
    ingest_ms: f64,
    changesets_ms: f64,
    resolve_ms: f64,
    diff_operations: usize,
    diff_ms: f64,
    bundle_bytes: usize,
    bundle_compressed_bytes: usize,
    tiles: usize,
    empty_tiles: usize,
    tile_bytes: usize,
    tiles_ms: f64,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn node_key(size: usize, row: usize, col: usize) -> String {
    (row * size + col + 1).to_string()
}

fn at(row: usize, col: usize) -> Coord {
    Coord::new(ORIGIN.0 + col as f64 * STEP, ORIGIN.1 + row as f64 * STEP)
}

fn grid(size: usize) -> NetworkRows {
    let mut rows = NetworkRows::default();
    for r in 0..size {
        for c in 0..size {
            let mut attrs = netver::Attributes::new();
            attrs.insert("n".into(), Value::Text(node_key(size, r, c)));
            rows.nodes.push(FeatureRow::new(Geometry::Point(at(r, c)), attrs));
        }
    }
    let mut link = |from: (usize, usize), to: (usize, usize)| {
        let mut attrs = netver::Attributes::new();
        attrs.insert("a".into(), Value::Text(node_key(size, from.0, from.1)));
        attrs.insert("b".into(), Value::Text(node_key(size, to.0, to.1)));
        attrs.insert("speed".into(), Value::Int(50));
        attrs.insert("lanes".into(), Value::Int(2));
        rows.links.push(FeatureRow::new(
            Geometry::LineString(vec![at(from.0, from.1), at(to.0, to.1)]),
            attrs,
        ));
    };
    for r in 0..size {
        for c in 0..size {
            if c + 1 < size {
                link((r, c), (r, c + 1));
            }
            if r + 1 < size {
                link((r, c), (r + 1, c));
            }
        }
    }
    rows
}

/// Slippy tile containing a WGS84 coordinate.
fn tile_of(lon: f64, lat: f64, z: u8) -> (u32, u32) {
    let n = f64::from(1u32 << z);
    let x = ((lon + 180.0) / 360.0 * n).floor();
    let lat = lat.to_radians();
    let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n).floor();
    (x as u32, y as u32)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let size: usize = std::env::args()
        .nth(1)
        .map(|s| s.parse().expect("grid size must be a number"))
        .unwrap_or(100);
    let service = NetworkService::new(EngineConfig::default());
    let mut summary = Summary::default();

    // Ingest
    let rows = grid(size);
    summary.nodes = rows.nodes.len();
    summary.links = rows.links.len();
    let start = Instant::now();
    let base = service
        .create_base_network(ChangesetMeta::new("bench"), rows)
        .expect("Failed to ingest base network")
        .changeset;
    summary.ingest_ms = ms(start.elapsed());
    info!(nodes = summary.nodes, links = summary.links, "grid ingested");

    // Chain of project changesets, each retuning a slice of the links.
    let start = Instant::now();
    let mut chain: Vec<ChangesetId> = Vec::new();
    let snapshot = match service.resolve_snapshot(base, &[]).expect("Failed to resolve") {
        ReadOutcome::Resolved(s) => s,
        ReadOutcome::Conflicted(report) => panic!("base conflicts: {report}"),
    };
    let slice = (snapshot.links.len() / 100).max(1);
    for i in 0..PROJECT_CHANGESETS {
        let mut ops = OperationsBuilder::new();
        for link in snapshot.links.iter().skip(i * slice).take(slice) {
            let mut attrs = link.attributes.clone();
            attrs.insert("speed".into(), Value::Int(30 + i as i64));
            let geometry = link.geometry.clone();
            ops = ops.modify_link(link.link.0, geometry, |mut a| {
                for (k, v) in attrs {
                    a = a.set(k, v);
                }
                a
            });
        }
        let deps = chain.last().copied().into_iter().collect::<Vec<_>>();
        let meta = ChangesetMeta::new("bench").project(format!("p{i}"));
        match service
            .create_changeset(meta, base, &deps, &ops.build())
            .expect("Failed to create changeset")
        {
            CommitOutcome::Committed(receipt) => chain.push(receipt.changeset),
            CommitOutcome::Conflicted(report) => panic!("unexpected conflict: {report}"),
        }
    }
    summary.changesets_ms = ms(start.elapsed());

    // Resolve the whole stack
    let start = Instant::now();
    let resolved = service
        .resolve_snapshot(base, &chain)
        .expect("Failed to resolve")
        .resolved()
        .expect("chain should be conflict free");
    summary.resolve_ms = ms(start.elapsed());

    // Diff an edited export: every tenth node dropped, one lane added everywhere.
    let mut edited = NetworkRows::default();
    for (i, node) in resolved.nodes.iter().enumerate() {
        if i % 10 != 0 {
            edited.nodes.push(FeatureRow::new(
                Geometry::Point(node.geometry),
                node.attributes.clone(),
            ));
        }
    }
    for link in &resolved.links {
        let mut attrs = link.attributes.clone();
        attrs.insert("lanes".into(), Value::Int(3));
        edited
            .links
            .push(FeatureRow::new(Geometry::LineString(link.geometry.clone()), attrs));
    }
    let start = Instant::now();
    let diff = service
        .diff(base, &chain, edited, "bench")
        .expect("Failed to diff")
        .resolved()
        .expect("chain should be conflict free");
    summary.diff_ms = ms(start.elapsed());
    summary.diff_operations = diff.operation_count();

    let docs = diff.netchanges(&ChangesetMeta::new("bench"), 0);
    let bundle = encode_bundle(&docs).expect("Failed to encode bundle");
    let compressed = encode_bundle_compressed(&docs, 3).expect("Failed to compress bundle");
    let decoded = decode_bundle(&compressed, service.config().limits.max_bundle_size)
        .expect("Failed to decode bundle");
    assert_eq!(decoded.len(), docs.len(), "bundle should round-trip");
    summary.bundle_bytes = bundle.len();
    summary.bundle_compressed_bytes = compressed.len();

    // Tile pyramid over the grid
    let far = at(size.saturating_sub(1), size.saturating_sub(1));
    let start = Instant::now();
    for z in 8u8..=15 {
        let (x0, y1) = tile_of(ORIGIN.0, ORIGIN.1, z);
        let (x1, y0) = tile_of(far.x, far.y, z);
        for x in x0..=x1 {
            for y in y0..=y1 {
                match service
                    .get_tile(z, x, y, base, &chain, None)
                    .expect("Failed to render tile")
                {
                    TileResponse::Tile(bytes) => {
                        summary.tiles += 1;
                        summary.tile_bytes += bytes.len();
                    }
                    TileResponse::NoContent => summary.empty_tiles += 1,
                    TileResponse::Conflicted(report) => panic!("unexpected conflict: {report}"),
                }
            }
        }
    }
    summary.tiles_ms = ms(start.elapsed());

    println!("=== Summary ===");
    println!("Grid: {size}x{size} ({} nodes, {} links)", summary.nodes, summary.links);
    println!("Ingest: {:.1} ms", summary.ingest_ms);
    println!(
        "Changesets: {} in {:.1} ms",
        PROJECT_CHANGESETS, summary.changesets_ms
    );
    println!("Resolve: {:.1} ms", summary.resolve_ms);
    println!(
        "Diff: {} operations in {:.1} ms",
        summary.diff_operations, summary.diff_ms
    );
    println!(
        "Bundle: {} bytes, {} compressed ({:.1}x)",
        summary.bundle_bytes,
        summary.bundle_compressed_bytes,
        summary.bundle_bytes as f64 / summary.bundle_compressed_bytes.max(1) as f64
    );
    println!(
        "Tiles: {} rendered, {} empty, {} bytes in {:.1} ms",
        summary.tiles, summary.empty_tiles, summary.tile_bytes, summary.tiles_ms
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("Failed to serialize summary")
    );
}
