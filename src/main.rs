use clap::Parser;
use color_eyre::eyre;
use console::style;
use exec::Device;
use gemmbench::bench::{self, Iterations, RunConfig, SweepReport};
use gemmbench::config::{Config, ScalarKind};
use gemmbench::data::DataGenerator;
use gemmbench::options::{self, Command, Options};
use gemmbench::range::{GemmBatchedParams, ParamSource};
use gemmbench::{report, tune, Error};
use kernels::{GemmBatched, Scalar};
use std::sync::Arc;

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn sweep<T>(
    device: &Arc<Device>,
    config: &Config,
    source: &ParamSource,
) -> Result<SweepReport, Error>
where
    T: Scalar,
{
    let kernel = GemmBatched::new(config.tiles);
    let run_config = config.run_config()?;
    let mut data = DataGenerator::from_seed(config.seed);
    bench::run_sweep(
        device,
        &kernel,
        source.params::<T>()?,
        &run_config,
        &mut data,
    )
}

fn run_bench(device: &Arc<Device>, config: &Config, opts: &options::Bench) -> Result<(), Error> {
    let source = match opts.params {
        Some(ref path) => ParamSource::File(path.clone()),
        None => ParamSource::Default,
    };
    let scalars = if opts.scalars.is_empty() {
        &config.scalars
    } else {
        &opts.scalars
    };

    let mut report = SweepReport::default();
    for scalar in scalars {
        log::info!("benchmarking {scalar} on {}", device.name());
        let scalar_report = match scalar {
            ScalarKind::Float => sweep::<f32>(device, config, &source)?,
            ScalarKind::Double => sweep::<f64>(device, config, &source)?,
        };
        report.extend(scalar_report);
    }

    report::print_sweep(&report);
    if let Some(ref output) = opts.output {
        report::write_sweep(output, opts.format, &report)?;
    }
    Ok(())
}

fn tune_scalar<T>(
    device: &Arc<Device>,
    config: &Config,
    opts: &options::Tune,
) -> Result<tune::TuneReport, Error>
where
    T: Scalar,
{
    let params = GemmBatchedParams::<T>::new(
        &opts.t_a,
        &opts.t_b,
        opts.m,
        opts.k,
        opts.n,
        T::one(),
        T::zero(),
        opts.batch_size,
    )?;
    let mut run_config: RunConfig = config.run_config()?;
    if let Some(repetitions) = opts.repetitions {
        run_config.iterations = Iterations::Fixed(repetitions);
    }
    tune::tune(device, &params, &config.tune, &run_config, config.seed)
}

fn run_tune(device: &Arc<Device>, config: &Config, opts: &options::Tune) -> Result<(), Error> {
    for (name, t) in [("t_a", &opts.t_a), ("t_b", &opts.t_b)] {
        if !t.starts_with(['n', 't', 'c']) {
            log::warn!("unknown transposition {t:?} for {name}, using normal");
        }
    }
    let report = match opts.scalar {
        ScalarKind::Float => tune_scalar::<f32>(device, config, opts)?,
        ScalarKind::Double => tune_scalar::<f64>(device, config, opts)?,
    };
    report::print_tune(&report);
    if let Some(best) = report.best() {
        println!(
            "\n => best configuration: {}",
            style(best.config.to_string()).green()
        );
    }
    if let Some(ref output) = opts.output {
        let mut writer = utils::fs::create_writable(output)?;
        report::write_json(&mut writer, &report)?;
    }
    Ok(())
}

fn run(options: &Options) -> Result<(), Error> {
    let config = Config::load(options)?;
    let device = Device::new(config.device.clone())?;
    log::debug!("{} ({:?})", device.name(), device.kind());

    match options.command {
        Command::Device => {
            serde_yaml::to_writer(std::io::stdout(), device.properties())?;
            println!(
                "\n => {}: {} compute units, {} global memory, {} local memory",
                style(device.name()).bold(),
                device.compute_units(),
                human_bytes::human_bytes(device.global_memory_bytes() as f64),
                human_bytes::human_bytes(device.local_memory_bytes() as f64),
            );
            Ok(())
        }
        Command::Bench(ref opts) => run_bench(&device, &config, opts),
        Command::Tune(ref opts) => run_tune(&device, &config, opts),
    }
}

fn main() -> eyre::Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let start = std::time::Instant::now();
    let options = Options::parse();

    if gemmbench::is_debug() {
        eprintln!(
            "{}",
            style("WARNING: measuring a debug build, timings are not representative").yellow()
        );
    }

    match run(&options) {
        Ok(()) => {
            log::info!("{} finished in {:?}", options.command, start.elapsed());
            Ok(())
        }
        Err(err @ Error::VerificationMismatch { .. }) => {
            // wrong kernel results terminate with `VERIFICATION_EXIT_CODE`, no report is written
            eprintln!("{}", style(&err).red());
            std::process::exit(err.exit_code());
        }
        Err(err) => Err(err.into()),
    }
}
