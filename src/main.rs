use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use demand_pipeline::fetch::{CenaceClient, FetchCache};
use demand_pipeline::store::{self, CleanStore};
use demand_pipeline::{load_tidy, merge, report, DetectOptions, NormalizedTable, PipelineConfig, Zone};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod folder_processor;

#[derive(Parser)]
#[command(name = "cenace_demand")]
#[command(about = "Normalize CENACE hourly demand exports into a canonical hourly table")]
struct Args {
    /// JSON configuration file; missing keys keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target timezone (IANA name), overrides the configuration
    #[arg(long, global = true)]
    tz: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize one raw export or a folder of exports (CSV and ZIP)
    Normalize {
        #[arg(short, long)]
        input: PathBuf,

        /// Output parquet file (default: <clean_dir>/historical_demand.parquet)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also write a CSV next to the parquet output
        #[arg(long)]
        export_csv: bool,
    },
    /// Load a tidy (timestamp, zone, demand) extract into the clean store
    Historical {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "historical_demand")]
        name: String,

        #[arg(long)]
        export_csv: bool,
    },
    /// Fetch today's demand for one system through the cache
    Fetch {
        #[arg(short, long, default_value = "SIN")]
        system: Zone,

        #[arg(long)]
        no_cache: bool,

        #[arg(long)]
        no_fallback: bool,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the quality report of a stored table
    Report {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// List tables in the clean store
    List,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(tz) = &args.tz {
        config.timezone = tz.clone();
    }
    config.tz()?;
    Ok(config)
}

fn print_summary(table: &NormalizedTable) {
    match (table.start(), table.end()) {
        (Some(start), Some(end)) => println!("  📅 Range: {} → {} ({} hours)", start, end, table.height()),
        _ => println!("  📅 Range: empty"),
    }
    let zones: Vec<String> = table.zones().map(|(z, _)| z.to_string()).collect();
    println!("  🗺️  Zones: {}", zones.join(", "));
    println!("  ❓ Missing values:");
    for (column, count) in table.missing_counts() {
        println!("     {:<16} {}", column, count);
    }
}

fn write_outputs(table: &NormalizedTable, path: &Path, export_csv: bool) -> Result<()> {
    store::write_parquet(table, path).with_context(|| format!("writing {}", path.display()))?;
    println!("  💾 Saved: {}", path.display());
    if export_csv {
        let csv_path = path.with_extension("csv");
        store::write_csv(table, &csv_path)
            .with_context(|| format!("writing {}", csv_path.display()))?;
        println!("  💾 Saved: {}", csv_path.display());
    }
    Ok(())
}

fn run_normalize(config: &PipelineConfig, input: &Path, out: Option<PathBuf>, export_csv: bool) -> Result<()> {
    println!("\n🔄 Normalizing {}", input.display());
    println!("{}", "=".repeat(60));

    let inputs = folder_processor::collect_inputs(input)?;
    if inputs.is_empty() {
        bail!("no CSV files found in {}", input.display());
    }
    println!("  📁 {} raw files", inputs.len());

    let outcome = folder_processor::normalize_inputs(&inputs, DetectOptions::from(config), config.tz()?);
    for (name, err) in &outcome.failed {
        println!("  ⚠️  {}: {}", name, err);
    }
    let skipped = outcome.failed.len();
    if outcome.processed.is_empty() {
        if input.is_file() {
            if let Some((_, err)) = outcome.failed.into_iter().next() {
                return Err(err.into());
            }
        }
        bail!("none of the {} files in {} could be normalized", inputs.len(), input.display());
    }

    println!("  ✅ {} files normalized, {} skipped", outcome.processed.len(), skipped);
    print_summary(&outcome.table);

    let out = out.unwrap_or_else(|| CleanStore::new(&config.clean_dir).path_for("historical_demand"));
    write_outputs(&outcome.table, &out, export_csv)
}

fn run_historical(config: &PipelineConfig, input: &Path, name: &str, export_csv: bool) -> Result<()> {
    println!("\n📚 Loading historical extract {}", input.display());
    let series = load_tidy(input)?;
    let table = merge(&[series], config.tz()?);
    print_summary(&table);

    let clean = CleanStore::new(&config.clean_dir);
    write_outputs(&table, &clean.path_for(name), export_csv)
}

fn run_fetch(
    config: &PipelineConfig,
    system: Zone,
    use_cache: bool,
    allow_fallback: bool,
    timeout: Duration,
) -> Result<()> {
    let cache = FetchCache::new(CenaceClient::new(&config.endpoint), &config.cache_dir, config.tz()?);
    println!("\n⚡ Fetching {} demand for {}", system, cache.today());

    let result = cache.fetch(system, use_cache, timeout, allow_fallback)?;
    println!(
        "  from_cache={} batches={}{}",
        result.from_cache,
        result.batches,
        if result.synthetic { "  ⚠️  placeholder data" } else { "" }
    );

    let table = &result.table;
    let measures: Vec<(&str, &[Option<f64>])> = table.measures().collect();
    print!("  {:<26} {:>12}", "timestamp", system.as_str());
    for (name, _) in &measures {
        print!(" {:>14}", name);
    }
    println!();
    let cell = |v: Option<f64>| v.map(|x| format!("{:.1}", x)).unwrap_or_else(|| "-".to_string());
    for (row, ts) in table.index().iter().enumerate() {
        print!("  {:<26} {:>12}", ts.to_rfc3339(), cell(table.zone(system)[row]));
        for (_, values) in &measures {
            print!(" {:>14}", cell(values[row]));
        }
        println!();
    }
    Ok(())
}

fn run_report(input: &Path) -> Result<()> {
    let table = store::read_parquet(input).with_context(|| format!("reading {}", input.display()))?;
    println!("\n🔍 Quality report for {}", input.display());
    println!("{}", "=".repeat(60));
    print!("{}", report(&table));
    Ok(())
}

fn run_list(config: &PipelineConfig) -> Result<()> {
    let clean = CleanStore::new(&config.clean_dir);
    let names = clean.list()?;
    if names.is_empty() {
        println!("No tables in {}", clean.root().display());
    }
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()
        .context("configuring the thread pool")?;

    let args = Args::parse();
    let config = load_config(&args)?;
    info!("timezone {}, clean dir {}", config.timezone, config.clean_dir.display());

    match args.command {
        Command::Normalize { input, out, export_csv } => run_normalize(&config, &input, out, export_csv),
        Command::Historical { input, name, export_csv } => run_historical(&config, &input, &name, export_csv),
        Command::Fetch {
            system,
            no_cache,
            no_fallback,
            timeout,
        } => {
            let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| config.timeout());
            run_fetch(&config, system, !no_cache, !no_fallback, timeout)
        }
        Command::Report { input } => run_report(&input),
        Command::List => run_list(&config),
    }
}
