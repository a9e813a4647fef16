use anyhow::{Context, Result};
use chrono_tz::Tz;
use demand_pipeline::{merge, read_raw, DetectOptions, IngestError, NormalizedTable, ZoneSeries};
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use rayon::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Raw export held in memory, named after its file (or `archive.zip/entry.csv`).
pub struct RawInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

pub struct FolderOutcome {
    pub table: NormalizedTable,
    pub processed: Vec<String>,
    pub failed: Vec<(String, IngestError)>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn read_zip_entries(zip_path: &Path) -> Result<Vec<RawInput>> {
    let file = std::fs::File::open(zip_path)
        .with_context(|| format!("opening {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("reading archive {}", zip_path.display()))?;
    let archive_name = file_name(zip_path);

    let mut inputs = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.is_file() || !entry.name().to_lowercase().ends_with(".csv") {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        inputs.push(RawInput {
            name: format!("{}/{}", archive_name, entry.name()),
            bytes,
        });
    }
    Ok(inputs)
}

fn matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(pattern);
    let pattern = pattern.to_str().context("input path is not valid UTF-8")?;
    Ok(glob(pattern)?.filter_map(|p| p.ok()).collect())
}

/// Raw inputs under `path`: the file itself, or every `*.csv` in a folder plus
/// the `.csv` entries of its `*.zip` archives, ordered by name.
pub fn collect_inputs(path: &Path) -> Result<Vec<RawInput>> {
    if path.is_file() {
        let is_zip = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if is_zip {
            return read_zip_entries(path);
        }
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return Ok(vec![RawInput {
            name: file_name(path),
            bytes,
        }]);
    }

    let mut inputs = Vec::new();
    for csv_path in matching(path, "*.csv")? {
        inputs.push(RawInput {
            name: file_name(&csv_path),
            bytes: std::fs::read(&csv_path)?,
        });
    }
    let archives = matching(path, "*.zip")?;
    if !archives.is_empty() {
        println!("  🗜️  Found {} ZIP files, reading CSV entries...", archives.len());
    }
    for zip_path in archives {
        inputs.extend(read_zip_entries(&zip_path)?);
    }
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(inputs)
}

/// Detects and normalizes every input in parallel, then merges the survivors
/// in input order. Failed files are reported and skipped.
pub fn normalize_inputs(inputs: &[RawInput], options: DetectOptions, tz: Tz) -> FolderOutcome {
    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let results: Vec<(String, Result<ZoneSeries, IngestError>)> = inputs
        .par_iter()
        .map(|input| {
            let result = read_raw(&input.bytes, &input.name, options);
            pb.inc(1);
            (input.name.clone(), result)
        })
        .collect();
    pb.finish_and_clear();

    let mut series = Vec::new();
    let mut processed = Vec::new();
    let mut failed = Vec::new();
    for (name, result) in results {
        match result {
            Ok(s) => {
                processed.push(name);
                series.push(s);
            }
            Err(e) => {
                warn!("skipping {}: {}", name, e);
                failed.push((name, e));
            }
        }
    }

    FolderOutcome {
        table: merge(&series, tz),
        processed,
        failed,
    }
}
