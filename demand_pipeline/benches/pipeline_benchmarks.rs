use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use demand_pipeline::{merge, read_raw, DetectOptions, ZoneSeries};

/// One year of daily raw files, alternating wide and long layouts, each
/// behind a short preamble.
fn synthetic_year() -> Vec<(String, Vec<u8>)> {
    let first = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    (0..365)
        .map(|day| {
            let date = first + Duration::days(day);
            let mut text = String::from("Centro Nacional de Control de Energia\nDemanda horaria\n\n");
            if day % 2 == 0 {
                text.push_str("Hora,SIN,BCA,BCS\n");
                for h in 1..=24 {
                    text.push_str(&format!("{},{},{},{}\n", h, 30000 + h * 10, 2500 + h, 400 + h));
                }
            } else {
                text.push_str("Sistema;Area;Hora;Demanda Balance (MWh)\n");
                for h in 1..=24 {
                    for (system, area) in [("SIN", "CEN"), ("SIN", "NTE"), ("BCA", "BCA"), ("BCS", "BCS")] {
                        text.push_str(&format!("{};{};{};{}\n", system, area, h, 1000 + h));
                    }
                }
            }
            (format!("{}.csv", date.format("%Y-%m-%d")), text.into_bytes())
        })
        .collect()
}

fn benchmark_detect_and_normalize(c: &mut Criterion) {
    let files = synthetic_year();
    c.bench_function("detect_normalize_year", |b| {
        b.iter(|| {
            let series: Vec<ZoneSeries> = files
                .iter()
                .filter_map(|(name, bytes)| read_raw(bytes, name, DetectOptions::default()).ok())
                .collect();
            black_box(series)
        });
    });
}

fn benchmark_merge(c: &mut Criterion) {
    let series: Vec<ZoneSeries> = synthetic_year()
        .iter()
        .filter_map(|(name, bytes)| read_raw(bytes, name, DetectOptions::default()).ok())
        .collect();

    c.bench_function("merge_year", |b| {
        b.iter(|| black_box(merge(&series, chrono_tz::America::Mexico_City)));
    });
}

criterion_group!(benches, benchmark_detect_and_normalize, benchmark_merge);
criterion_main!(benches);
