#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line tool for the metalert data folder and index.
//!
//! ```text
//! metalert ingest-cap <paths...> [--recursive] [--overwrite]
//! metalert ingest-maps <file> --source <name> [--label-property <p>] [--overwrite]
//! metalert rebuild [alert|map]
//! metalert search <alert|map> <geojson-file> [--vertical low,high] [--cutoff r] [--maxres n]
//! ```
//!
//! Settings come from `metalert.toml` (or `METALERT_CONFIG`) and the
//! `METALERT_DATA_PATH` / `METALERT_INDEX_PATH` overrides.
//!
//! Uses `indicatif-log-bridge` (via [`metalert_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use metalert_cli_utils::{IndicatifProgress, MultiProgress};
use metalert_config::Config;
use metalert_database::SpatialIndex;
use metalert_geometry::codec;
use metalert_ingest::{BatchSummary, IngestError, IngestPipeline, MapCollectionOptions};
use metalert_models::{Domain, VerticalRange};
use metalert_search::SearchEngine;

#[derive(Parser)]
#[command(
    name = "metalert",
    about = "Ingest, index and search CAP alerts and boundary regions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest CAP XML files, or every `*.xml` file in the given folders
    IngestCap {
        /// CAP files or folders
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Descend into sub-folders
        #[arg(long)]
        recursive: bool,
        /// Replace alerts that are already stored
        #[arg(long)]
        overwrite: bool,
    },
    /// Ingest the features of a `GeoJSON` `FeatureCollection` as boundary regions
    IngestMaps {
        /// `GeoJSON` file
        file: PathBuf,
        /// Dataset name recorded for every region
        #[arg(long)]
        source: String,
        /// Feature property holding the region label
        #[arg(long, default_value = "name")]
        label_property: String,
        /// Feature property holding the administrative unit name
        #[arg(long)]
        admin_name_property: Option<String>,
        /// Feature property holding the administrative unit number
        #[arg(long)]
        admin_id_property: Option<String>,
        /// Start of validity for every region
        #[arg(long)]
        valid_from: Option<String>,
        /// End of validity for every region
        #[arg(long)]
        valid_to: Option<String>,
        /// Replace regions with the same source and label
        #[arg(long)]
        overwrite: bool,
    },
    /// Re-index every canonical record file (both domains if none is given)
    Rebuild {
        /// `alert` or `map`
        domain: Option<Domain>,
    },
    /// Find records overlapping a `GeoJSON` polygon
    Search {
        /// `alert` or `map`
        domain: Domain,
        /// `GeoJSON` Polygon, `MultiPolygon` or Feature
        file: PathBuf,
        /// Vertical range as `low,high` (alerts only)
        #[arg(long, value_parser = parse_vertical)]
        vertical: Option<VerticalRange>,
        /// Minimum overlap ratio in (0.0, 1.0]
        #[arg(long)]
        cutoff: Option<f64>,
        /// Maximum number of results
        #[arg(long)]
        maxres: Option<usize>,
    },
}

fn parse_vertical(value: &str) -> Result<VerticalRange, String> {
    let (low, high) = value
        .split_once(',')
        .ok_or_else(|| format!("expected 'low,high', got '{value}'"))?;
    let low: f64 = low.trim().parse().map_err(|e| format!("bad low value: {e}"))?;
    let high: f64 = high.trim().parse().map_err(|e| format!("bad high value: {e}"))?;
    VerticalRange::new(low, high).ok_or_else(|| format!("{low} is above {high}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = metalert_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = Config::load()?;
    let index = SpatialIndex::open(&config.index_file())?;

    let summary = match cli.command {
        Commands::IngestCap {
            paths,
            recursive,
            overwrite,
        } => ingest_cap(&multi, &config, &index, &paths, recursive, overwrite),
        Commands::IngestMaps {
            file,
            source,
            label_property,
            admin_name_property,
            admin_id_property,
            valid_from,
            valid_to,
            overwrite,
        } => {
            let options = MapCollectionOptions {
                source,
                label_property,
                admin_name_property,
                admin_id_property,
                valid_from,
                valid_to,
                allow_replace: overwrite,
            };
            let progress = IndicatifProgress::features_bar(&multi, &options.source);
            IngestPipeline::new(&config, &index).ingest_map_collection(
                &file,
                &options,
                Some(progress),
            )?
        }
        Commands::Rebuild { domain } => {
            let pipeline = IngestPipeline::new(&config, &index);
            let mut total = BatchSummary::default();
            for domain in domain.map_or_else(|| Domain::ALL.to_vec(), |d| vec![d]) {
                let progress = IndicatifProgress::files_bar(&multi, &format!("Indexing {domain}"));
                total += pipeline.rebuild_index(domain, Some(progress))?;
            }
            total
        }
        Commands::Search {
            domain,
            file,
            vertical,
            cutoff,
            maxres,
        } => {
            let query = codec::decode(&file)?;
            let response = SearchEngine::new(&config, &index)
                .find_overlap(domain, &query, vertical, cutoff, maxres)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(());
        }
    };

    println!("{summary}");
    if summary.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn ingest_cap(
    multi: &MultiProgress,
    config: &Config,
    index: &SpatialIndex,
    paths: &[PathBuf],
    recursive: bool,
    overwrite: bool,
) -> BatchSummary {
    let pipeline = IngestPipeline::new(config, index);
    let mut summary = BatchSummary::default();

    for path in paths {
        if path.is_dir() {
            let progress =
                IndicatifProgress::files_bar(multi, &format!("Ingesting {}", path.display()));
            match pipeline.ingest_alert_dir(path, recursive, overwrite, Some(progress)) {
                Ok(batch) => summary += batch,
                Err(e) => {
                    log::error!("Could not read folder {}: {e}", path.display());
                    summary.failed += 1;
                }
            }
            continue;
        }

        match pipeline.ingest_alert(path, overwrite) {
            Ok(ingested) => {
                log::info!("Stored {} as {}", path.display(), ingested.uuid);
                summary.ingested += 1;
            }
            Err(IngestError::AlreadyExists { .. }) => summary.skipped += 1,
            Err(e) => {
                log::error!("Failed to ingest {}: {e}", path.display());
                summary.failed += 1;
            }
        }
    }

    summary
}
