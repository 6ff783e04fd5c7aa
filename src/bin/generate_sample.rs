//! Write the synthetic mixed-gambles dataset and its exports.
//!
//! Usage: `generate_sample [out_dir] [n_subjects] [n_runs]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use bids_variables::data::writer::{format_table, save_collection, write_table};
use bids_variables::sample::{merged_collection, SampleSpec};
use bids_variables::{ExportOptions, TableFormat};

fn parse_arg<T: std::str::FromStr>(arg: Option<String>, what: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match arg {
        Some(s) => s.parse().with_context(|| format!("invalid {what}: {s}")),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "sample_data".to_string()));
    let defaults = SampleSpec::default();
    let spec = SampleSpec {
        n_subjects: parse_arg(args.next(), "subject count", defaults.n_subjects)?,
        n_runs: parse_arg(args.next(), "run count", defaults.n_runs)?,
        ..defaults
    };

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let collection = merged_collection(&spec)?;
    info!(
        "generated {} variables over {} runs",
        collection.len(),
        spec.n_subjects * spec.n_runs
    );
    save_collection(&collection, &out_dir.join("collection.json"))?;

    let exports = [
        ("events_wide", ExportOptions::new()),
        ("events_long", ExportOptions::new().format(TableFormat::Long)),
        ("dense_wide", ExportOptions::new().sparse(false).sampling_rate("TR")),
    ];
    for (stem, options) in &exports {
        let table = collection.to_df(options)?;
        for ext in ["csv", "parquet"] {
            let path = out_dir.join(format!("{stem}.{ext}"));
            write_table(&table, &path)?;
            info!("wrote {} ({} rows x {} cols)", path.display(), table.n_rows(), table.n_cols());
        }
        if *stem == "events_wide" {
            println!("{}", format_table(&table.head(5))?);
        }
    }

    println!(
        "Wrote {} subjects x {} runs to {}",
        spec.n_subjects,
        spec.n_runs,
        out_dir.display()
    );
    Ok(())
}
