use clap::Parser;
use log::info;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use taxaview::layout::{LayoutConfig, LayoutEngine, LayoutExtent};
use taxaview::positioner::TidyPositioner;
use taxaview::records::{Metric, TaxonomyLevel};
use taxaview::render::{self, RenderOptions};
use taxaview::source::TableSource;
use taxaview::session::TreeSession;
use taxaview::tree::MultiTree;
use taxaview::{Error, Result};

#[derive(Parser)]
#[command(name = "taxaview")]
#[command(about = "Visualize a taxonomy across several cohorts side by side.", long_about = None)]
struct Args {
    // MANDATORY OPTIONS
    /// Load comparison taxonomy nodes from this TSV FILE.
    #[arg(short = 'c', long = "comparisons", value_name = "FILE")]
    comparisons: PathBuf,

    /// Load per-cohort taxonomy nodes and statistics from this TSV FILE.
    #[arg(short = 'k', long = "cohorts", value_name = "FILE")]
    cohorts: PathBuf,

    /// Write the visualization to this FILE (PNG or SVG based on extension).
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    out: PathBuf,

    // Selection Options
    /// Comparison to display [default: the only one in the table].
    #[arg(short = 'C', long = "comparison", value_name = "ID")]
    comparison: Option<String>,

    /// Cohort to display, in order; repeat for more [default: all, sorted].
    #[arg(short = 'g', long = "cohort", value_name = "ID")]
    cohort: Vec<String>,

    /// Taxonomy level of the root node.
    #[arg(long = "root-level", value_name = "LEVEL", default_value = "kingdom")]
    root_level: TaxonomyLevel,

    /// Expand every node above this depth.
    #[arg(short = 'd', long = "depth", value_name = "N", default_value_t = 2)]
    depth: usize,

    /// Highlight nodes with a top feature ranked at or above N.
    #[arg(short = 'T', long = "threshold", value_name = "N", default_value_t = 10)]
    threshold: u32,

    // Layout Options
    /// Distance between taxonomy level columns.
    #[arg(long = "horizontal-spacing", value_name = "N", default_value_t = 180.0)]
    horizontal_spacing: f64,

    /// Width of each cohort block.
    #[arg(long = "node-width", value_name = "N", default_value_t = 12.0)]
    node_width: f64,

    /// Block height per unit of mean abundance.
    #[arg(long = "abundance-scale", value_name = "N", default_value_t = 200.0)]
    abundance_scale: f64,

    /// Minimum vertical gap between nodes of one column.
    #[arg(long = "min-spacing", value_name = "N", default_value_t = 8.0)]
    min_spacing: f64,

    /// Connector curvature in [0, 1].
    #[arg(long = "curvature", value_name = "F", default_value_t = 0.5)]
    curvature: f64,

    /// Shift columns left by this many levels.
    #[arg(long = "hidden-top-levels", value_name = "N", default_value_t = 0)]
    hidden_top_levels: usize,

    /// Vertical distance between neighbouring leaves.
    #[arg(long = "breadth-unit", value_name = "N", default_value_t = 24.0)]
    breadth_unit: f64,

    // Color Options
    /// Read cohort colors from this FILE (cohort<TAB>#rrggbb or r,g,b).
    #[arg(short = 'F', long = "cohort-colors", value_name = "FILE")]
    cohort_colors: Option<PathBuf>,

    // General Options
    /// Number of threads to use for parallel operations.
    #[arg(short = 't', long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Verbosity level (0 = error, 1 = info, 2 = debug).
    #[arg(short = 'v', long = "verbose", value_name = "N", default_value_t = 1)]
    verbose: u8,
}

/// `<out>.<suffix>`, next to the picture.
fn side_path(out: &Path, suffix: &str) -> PathBuf {
    let mut name = out.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn pick_comparison(args: &Args, source: &TableSource) -> Result<String> {
    if let Some(id) = &args.comparison {
        return Ok(id.clone());
    }
    let mut ids: Vec<&str> = source.comparison_ids().collect();
    ids.sort_unstable();
    match ids[..] {
        [only] => Ok(only.to_string()),
        _ => Err(Error::Source(format!(
            "expected one comparison in {:?}, found {}; pick one with -C",
            args.comparisons,
            ids.len()
        ))),
    }
}

fn pick_cohorts(args: &Args, source: &TableSource) -> Vec<String> {
    if !args.cohort.is_empty() {
        return args.cohort.clone();
    }
    let mut ids: Vec<String> = source.cohort_ids().map(str::to_string).collect();
    ids.sort_unstable();
    ids
}

/// Loads the tables, expands the tree and lays it out.
async fn build(args: &Args) -> Result<(MultiTree, LayoutExtent)> {
    let source = Rc::new(TableSource::load(&args.comparisons, &args.cohorts)?);
    let comparison_id = pick_comparison(args, &source)?;
    let cohort_ids = pick_cohorts(args, &source);

    let session = TreeSession::new(Rc::clone(&source), source);
    session
        .load(&comparison_id, &cohort_ids, args.root_level)
        .await?;
    session.expand_to_depth(args.depth).await?;

    let config = LayoutConfig {
        horizontal_spacing: args.horizontal_spacing,
        node_width: args.node_width,
        abundance_scale: args.abundance_scale,
        min_spacing: args.min_spacing,
        curvature: args.curvature,
        hidden_top_levels: args.hidden_top_levels,
    };
    let positioner = TidyPositioner {
        breadth_unit: args.breadth_unit,
        ..TidyPositioner::default()
    };
    let engine = LayoutEngine::with_positioner(config, positioner);

    info!("Computing layout...");
    session.with_tree_mut(|tree| {
        let extent = engine.apply(tree);
        (tree.clone(), extent)
    })
}

fn run(args: &Args) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let (tree, extent) = runtime.block_on(build(args))?;

    let custom = match &args.cohort_colors {
        Some(path) => Some(render::load_cohort_colors(path)?),
        None => None,
    };
    let colors = render::palette(tree.cohort_ids(), custom.as_ref());
    let options = RenderOptions {
        node_width: args.node_width,
        threshold: args.threshold,
        ..RenderOptions::default()
    };

    // Detect output format by file extension
    let is_svg = args
        .out
        .extension()
        .map(|ext| ext.to_ascii_lowercase() == "svg")
        .unwrap_or(false);

    if is_svg {
        info!("Rendering SVG...");
        let svg_content = render::render_svg(&tree, &extent, &colors, &options);
        info!("Saving to {:?}...", args.out);
        write_text(&args.out, &svg_content)?;
    } else {
        info!("Rendering image...");
        let img = render::render_png(&tree, &extent, &colors, &options);
        info!("Saving to {:?}...", args.out);
        img.save(&args.out)?;
    }

    let nodes_path = side_path(&args.out, "nodes.tsv");
    write_text(&nodes_path, &render::nodes_tsv(&tree, args.threshold))?;
    info!("Node table written to {:?}", nodes_path);

    let dist_path = side_path(&args.out, "distributions.tsv");
    write_text(&dist_path, &render::distributions_tsv(&tree, Metric::Abundance)?)?;
    info!("Distribution table written to {:?}", dist_path);

    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    if let Some(threads) = args.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            eprintln!("Warning: could not configure thread pool: {}", e);
        }
    }

    info!("Starting visualization...");

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    info!("Done.");
}
