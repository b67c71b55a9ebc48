use super::bench::{BenchResult, SweepReport};
use super::tune::TuneReport;
use super::Error;
use console::{style, Style};
use stats::counters;
use std::io::Write;
use std::path::Path;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Csv,
}

impl Format {
    /// Format implied by the file extension, JSON unless it is `.csv`.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

fn counter(result: &BenchResult, name: &str) -> f64 {
    result.counters.get(name).unwrap_or(f64::NAN)
}

/// Throughput in giga units per second for an amount and a time in ns.
fn giga_per_second(amount: f64, nanos: f64) -> f64 {
    if nanos > 0.0 {
        amount / nanos
    } else {
        0.0
    }
}

fn format_nanos(nanos: f64) -> String {
    format!("{:?}", std::time::Duration::from_nanos(nanos as u64))
}

#[must_use]
pub fn render_result(result: &BenchResult) -> String {
    let avg_event = counter(result, counters::AVG_EVENT_TIME);
    let avg_overall = counter(result, counters::AVG_OVERALL_TIME);
    format!(
        "{:<48} {:>6} {:>12} {:>12} {:>10.2} {:>10.2}",
        result.name,
        result.counters.iterations().unwrap_or_default(),
        format_nanos(avg_event),
        format_nanos(avg_overall),
        giga_per_second(counter(result, counters::N_FL_OPS), avg_event),
        giga_per_second(counter(result, counters::BYTES_PROCESSED), avg_event),
    )
}

pub fn print_sweep(report: &SweepReport) {
    let header = Style::new().bold();
    println!(
        "{}",
        header.apply_to(format!(
            "{:<48} {:>6} {:>12} {:>12} {:>10} {:>10}",
            "benchmark", "iters", "event", "overall", "GFLOP/s", "GB/s"
        ))
    );
    for result in &report.results {
        println!("{}", render_result(result));
    }
    for skipped in &report.skipped {
        println!(
            "{:<48} {}",
            skipped.name,
            style(format!("skipped: {}", skipped.reason)).yellow()
        );
    }
    let summary = format!(
        "{} measured, {} skipped",
        report.results.len(),
        report.skipped.len()
    );
    if report.skipped.is_empty() {
        println!("\n => {}", style(summary).green());
    } else {
        println!("\n => {}", style(summary).yellow());
    }
}

pub fn print_tune(report: &TuneReport) {
    for (rank, entry) in report.entries.iter().enumerate() {
        let line = format!("{:>3}. {:<16} {}", rank + 1, entry.config.to_string(), render_result(&entry.result));
        if rank == 0 {
            println!("{}", style(line).green());
        } else {
            println!("{line}");
        }
    }
    for skipped in &report.skipped {
        println!(
            "     {:<16} {}",
            skipped.name,
            style(format!("skipped: {}", skipped.reason)).yellow()
        );
    }
}

/// Write one CSV row per result: name, element type, parameters, counters.
pub fn write_csv(writer: impl Write, results: &[BenchResult]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(writer);
    let counter_names: Vec<&str> = results
        .first()
        .map(|result| result.counters.iter().map(|(name, _)| name).collect())
        .unwrap_or_default();

    let mut header = vec![
        "name", "scalar", "t_a", "t_b", "m", "k", "n", "alpha", "beta", "batch_size",
    ];
    header.extend(counter_names.iter().copied());
    writer.write_record(&header)?;

    for result in results {
        let params = &result.params;
        let mut record = vec![
            result.name.clone(),
            result.scalar.clone(),
            params.t_a.clone(),
            params.t_b.clone(),
            params.m.to_string(),
            params.k.to_string(),
            params.n.to_string(),
            params.alpha.to_string(),
            params.beta.to_string(),
            params.batch_size.to_string(),
        ];
        record.extend(
            counter_names
                .iter()
                .map(|name| result.counters.get(name).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<S>(writer: impl Write, value: &S) -> Result<(), Error>
where
    S: serde::Serialize,
{
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

pub fn write_sweep(path: &Path, format: Option<Format>, report: &SweepReport) -> Result<(), Error> {
    let format = format.unwrap_or_else(|| Format::from_path(path));
    let mut writer = utils::fs::create_writable(path)?;
    match format {
        Format::Json => write_json(&mut writer, report)?,
        Format::Csv => write_csv(&mut writer, &report.results)?,
    }
    writer.flush()?;
    log::info!("wrote {} results to {}", report.results.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::bench::{self, BenchResult};
    use crate::range::GemmBatchedParams;
    use color_eyre::eyre;
    use std::path::Path;

    fn result() -> eyre::Result<BenchResult> {
        let params = GemmBatchedParams::<f32>::new("n", "t", 64, 64, 64, 1.0, 0.0, 4)?;
        let mut counters = bench::static_counters(&params);
        counters.init()?;
        counters.update(2000.0, 1000.0)?;
        counters.finalize(1)?;
        Ok(BenchResult {
            name: bench::benchmark_name(&params),
            scalar: "float".to_string(),
            params: (&params).into(),
            counters,
        })
    }

    #[test]
    fn format_from_extension() {
        use super::Format;
        assert_eq!(Format::from_path(Path::new("out/results.CSV")), Format::Csv);
        assert_eq!(Format::from_path(Path::new("results.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("results")), Format::Json);
    }

    #[test]
    fn csv_has_params_and_counters() -> eyre::Result<()> {
        let mut out = Vec::new();
        super::write_csv(&mut out, &[result()?])?;
        let out = String::from_utf8(out)?;
        let mut lines = out.lines();
        utils::diff::assert_eq!(
            have: lines.next().unwrap_or_default(),
            want: "name,scalar,t_a,t_b,m,k,n,alpha,beta,batch_size,m,k,n,batch_size,n_fl_ops,bytes_processed,total_event_time,best_event_time,total_overall_time,best_overall_time,avg_event_time,avg_overall_time"
        );
        let row = lines.next().unwrap_or_default();
        assert!(row.starts_with("BM_GemmBatched<float>/n/t/64/64/64/4,float,n,t,64,64,64,1,0,4,"));
        assert!(row.ends_with(",1000,1000,2000,2000,1000,2000"));
        assert_eq!(lines.next(), None);
        Ok(())
    }

    #[test]
    fn render_shows_throughput() -> eyre::Result<()> {
        let line = super::render_result(&result()?);
        assert!(line.starts_with("BM_GemmBatched<float>/n/t/64/64/64/4"));
        // 2 * 64^3 * 4 flops in 1000ns
        assert!(line.contains("2097.15"), "{line}");
        Ok(())
    }
}
