use super::config::ScalarKind;
use super::report::Format;
use super::verify::Verify;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default, Clone)]
pub struct Bench {
    #[clap(
        short = 'p',
        long = "params",
        help = "CSV file with rows t_a,t_b,m,k,n,alpha,beta,batch_size (default: built-in sweep)"
    )]
    pub params: Option<PathBuf>,

    #[clap(long = "scalar", help = "element types to benchmark")]
    pub scalars: Vec<ScalarKind>,

    #[clap(short = 'o', long = "output", help = "write results to this file")]
    pub output: Option<PathBuf>,

    #[clap(long = "format", help = "output format (default: from file extension)")]
    pub format: Option<Format>,
}

#[derive(Parser, Debug, Clone)]
pub struct Tune {
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub batch_size: usize,

    #[clap(help = "timed repetitions per configuration")]
    pub repetitions: Option<u64>,

    #[clap(long = "t-a", default_value = "t")]
    pub t_a: String,

    #[clap(long = "t-b", default_value = "t")]
    pub t_b: String,

    #[clap(long = "scalar", default_value = "float")]
    pub scalar: ScalarKind,

    #[clap(short = 'o', long = "output", help = "write the ranking as JSON")]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub enum Command {
    /// Measure a parameter sweep.
    Bench(Bench),
    /// Search tile configurations for one problem size.
    Tune(Tune),
    /// Print the device properties.
    Device,
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "batched GEMM measurement harness")]
pub struct Options {
    #[clap(short = 'c', long = "config", help = "path to YAML config file")]
    pub config: Option<PathBuf>,

    #[clap(long = "verify", help = "check kernel results against the host reference")]
    pub verify: Option<Verify>,

    #[clap(long = "iterations", help = "fixed number of timed iterations")]
    pub iterations: Option<u64>,

    #[clap(long = "min-time", help = "minimum measured seconds per configuration")]
    pub min_time: Option<f64>,

    #[clap(long = "seed", help = "seed of the input generator")]
    pub seed: Option<u64>,

    #[clap(long = "device-name")]
    pub device_name: Option<String>,

    #[clap(long = "compute-units")]
    pub compute_units: Option<usize>,

    #[clap(subcommand)]
    pub command: Command,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bench(_) => write!(f, "bench"),
            Self::Tune(_) => write!(f, "tune"),
            Self::Device => write!(f, "device"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, Options};
    use crate::config::ScalarKind;
    use clap::Parser;
    use color_eyre::eyre;

    #[test]
    fn parse_tune_arguments() -> eyre::Result<()> {
        let options = Options::try_parse_from(["gemmbench", "tune", "64", "32", "16", "4", "10"])?;
        let Command::Tune(tune) = options.command else {
            eyre::bail!("expected tune command");
        };
        assert_eq!((tune.m, tune.k, tune.n, tune.batch_size), (64, 32, 16, 4));
        assert_eq!(tune.repetitions, Some(10));
        assert_eq!((tune.t_a.as_str(), tune.t_b.as_str()), ("t", "t"));
        assert_eq!(tune.scalar, ScalarKind::Float);
        Ok(())
    }

    #[test]
    fn parse_bench_arguments() -> eyre::Result<()> {
        let options = Options::try_parse_from([
            "gemmbench",
            "bench",
            "--scalar",
            "float",
            "--scalar",
            "double",
            "-o",
            "results.csv",
        ])?;
        let Command::Bench(bench) = options.command else {
            eyre::bail!("expected bench command");
        };
        assert_eq!(bench.scalars, vec![ScalarKind::Float, ScalarKind::Double]);
        assert!(bench.params.is_none());
        assert_eq!(options.verify, None);
        Ok(())
    }
}
