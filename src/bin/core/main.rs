use datafusion::arrow::util::pretty::pretty_format_batches;
use geo_types::{Coord, Point, Rect};
use sjoin::join::SpatialJoinOptions;
use sjoin::{Feature, FeatureCollection, spatial_join};
use tikv_jemallocator::Jemalloc;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const DEFAULT_HOW: &str = "left";
const DEFAULT_OP: &str = "intersects";

fn cities() -> FeatureCollection {
    [
        ("P1", 0.0, 0.0),
        ("P2", 5.0, 5.0),
        ("P3", 10.0, 10.0),
        ("P4", 100.0, 100.0),
    ]
    .into_iter()
    .map(|(name, x, y)| Feature::new(Point::new(x, y)).with_attribute("city", name))
    .collect::<FeatureCollection>()
    .with_crs("EPSG:4326")
}

fn regions() -> FeatureCollection {
    [("Box1", -1.0, -1.0, 6.0, 6.0), ("Box2", 9.0, 9.0, 11.0, 11.0)]
        .into_iter()
        .map(|(name, x0, y0, x1, y1)| {
            let rect = Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 });
            Feature::new(rect.to_polygon()).with_attribute("region", name)
        })
        .collect::<FeatureCollection>()
        .with_crs("EPSG:4326")
}

fn main() -> anyhow::Result<()> {
    let _guards = common_telemetry::init_logging();

    let how = std::env::var("SJOIN_HOW").unwrap_or(DEFAULT_HOW.to_owned());
    let op = std::env::var("SJOIN_OP").unwrap_or(DEFAULT_OP.to_owned());
    let mut options = SpatialJoinOptions::try_new(&how, &op)?;
    if let Ok(partitions) = std::env::var("SJOIN_TARGET_PARTITIONS") {
        options = options.with_target_partitions(partitions.parse()?);
    }

    let left = cities();
    let right = regions();
    let result = spatial_join(&left, &right, &options)?;
    for diagnostic in result.diagnostics() {
        warn!("{diagnostic}");
    }

    let table = pretty_format_batches(&[result.to_record_batch()?])?;
    info!(%how, %op, rows = result.len(), "\n{table}");
    Ok(())
}
