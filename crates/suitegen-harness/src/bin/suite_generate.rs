use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use suitegen_error::GenError;
use suitegen_harness::config::GenerationConfig;
use suitegen_harness::fixture::ScenarioFixture;
use suitegen_harness::orchestrator::{PassReport, SessionReport, SuiteOrchestrator};
use suitegen_harness::storage::DirectoryStore;

const DEFAULT_SCENARIO: &str = "fixtures/mqtt_connect.json";

#[derive(Debug, Clone)]
struct Config {
    config_path: Option<PathBuf>,
    scenario: PathBuf,
    iterations: Option<u32>,
    output_dir: Option<PathBuf>,
    keep_output: bool,
}

impl Config {
    fn parse() -> Result<Self, String> {
        let mut config_path = None;
        let mut scenario = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_SCENARIO);
        let mut iterations = None;
        let mut output_dir = None;
        let mut keep_output = false;

        let args: Vec<String> = env::args().skip(1).collect();
        let mut idx = 0_usize;
        while idx < args.len() {
            match args[idx].as_str() {
                "--config" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| "missing value for --config".to_owned())?;
                    config_path = Some(PathBuf::from(value));
                }
                "--scenario" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| "missing value for --scenario".to_owned())?;
                    scenario = PathBuf::from(value);
                }
                "--iterations" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| "missing value for --iterations".to_owned())?;
                    let parsed = value
                        .parse::<u32>()
                        .map_err(|error| format!("invalid --iterations '{value}': {error}"))?;
                    iterations = Some(parsed);
                }
                "--output-dir" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| "missing value for --output-dir".to_owned())?;
                    output_dir = Some(PathBuf::from(value));
                }
                "--keep-output" => keep_output = true,
                "--help" | "-h" => {
                    println!(
                        "\
suite_generate: generate a conformance test suite from a scripted scenario

USAGE:
  cargo run -p suitegen-harness --bin suite_generate -- [OPTIONS]

OPTIONS:
  --config <PATH>         JSON generation config (default: built-in defaults)
  --scenario <PATH>       Scenario fixture (default: fixtures/mqtt_connect.json)
  --iterations <N>        Iteration budget, overrides the config file
  --output-dir <DIR>      Transcript directory, overrides the config file
  --keep-output           Do not clear the output directory first
  -h, --help              Show help
"
                    );
                    std::process::exit(0);
                }
                other => return Err(format!("unknown_argument: {other}")),
            }
            idx += 1;
        }

        Ok(Self {
            config_path,
            scenario,
            iterations,
            output_dir,
            keep_output,
        })
    }

    fn generation_config(&self) -> Result<GenerationConfig, GenError> {
        let mut config = match &self.config_path {
            Some(path) => GenerationConfig::load(path)?,
            None => GenerationConfig::default(),
        };
        if let Some(iterations) = self.iterations {
            config.iteration_budget = iterations;
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir.clone_from(output_dir);
        }
        if self.keep_output {
            config.reset_output_dir = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn print_pass(report: &PassReport) {
    println!(
        "Test {} {} {}",
        report.pass, report.measurement.primary, report.measurement.secondary
    );
}

fn run(cli: &Config) -> Result<SessionReport, GenError> {
    let config = cli.generation_config()?;
    let scenario = ScenarioFixture::load(&cli.scenario)?;
    let session = scenario.build(config.markers.clone())?;
    let store = DirectoryStore::open(
        &config.output_dir,
        config.reset_output_dir,
        config.storage_write_attempts,
    )?;
    let mut orchestrator = SuiteOrchestrator::new(
        config,
        session.sut,
        session.model,
        session.model_log,
        session.harness_log,
        store,
    )?
    .with_pass_observer(print_pass);
    orchestrator.run()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Config::parse() {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("ERROR suite_generate: {message}");
            return ExitCode::from(2);
        }
    };

    match run(&cli) {
        Ok(report) => {
            println!(
                "{} test case(s), {} statement(s) discovered, coverage {}",
                report.passes.len(),
                report.discovered.len(),
                report.final_coverage
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "suite generation failed");
            if let Some(hint) = err.suggestion() {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}
