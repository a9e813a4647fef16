use anyhow::{bail, Context, Result};
use demand_pipeline::{merge, read_raw, report, DetectOptions, PipelineConfig};
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let Some(arg) = std::env::args().nth(1) else {
        bail!("usage: summarize_file <raw.csv>");
    };
    let path = Path::new(&arg);
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .context("input has no file name")?;

    let config = PipelineConfig::default();
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let series = read_raw(&bytes, name, DetectOptions::from(&config))?;
    let table = merge(&[series], config.tz()?);

    println!("Demand summary for {}", name);
    println!("===================");
    if let (Some(start), Some(end)) = (table.start(), table.end()) {
        println!("Range: {} to {}", start, end);
    }
    for (zone, values) in table.zones() {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        if present.is_empty() {
            println!("{}: no data", zone);
        } else {
            let peak = present.iter().copied().fold(f64::MIN, f64::max);
            println!("{}: {} hours, peak {:.0} MW", zone, present.len(), peak);
        }
    }
    println!();
    print!("{}", report(&table));
    Ok(())
}
