//! timeline-verify entry point
//!
//! Exits 0 when every scenario passes, 1 when a scenario fails verification
//! and 2 when a scenario (or the whole run) could not be carried out.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use timeline_verify::playwright::{Browser, PlaywrightConfig};
use timeline_verify::{RunnerConfig, Scenario, VerifyResult, VerifyRunner};

#[derive(Parser, Debug)]
#[command(name = "timeline-verify")]
#[command(about = "Smoke-check the timeline editor against a mocked backend")]
#[command(version)]
struct Args {
    /// Scenario file to run instead of the built-in timeline editor check
    #[arg(long, conflicts_with = "scenarios")]
    scenario: Option<PathBuf>,

    /// Directory of scenario files to run in order
    #[arg(long)]
    scenarios: Option<PathBuf>,

    /// Override the page each scenario opens
    #[arg(long, env = "TIMELINE_VERIFY_TARGET")]
    target: Option<String>,

    /// Directory screenshots are written to
    #[arg(long, default_value = "verification")]
    artifacts: PathBuf,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Node.js executable
    #[arg(long, env = "TIMELINE_VERIFY_NODE", default_value = "node")]
    node: PathBuf,

    /// Directory whose node_modules provides playwright
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Seconds to wait for the target to answer before launching (0 = don't wait)
    #[arg(long, default_value = "0")]
    wait_for_target: u64,

    /// Hard deadline for one scenario, in seconds
    #[arg(long, default_value = "120")]
    run_timeout: u64,

    /// Write the suite report as JSON to this file
    #[arg(long)]
    results: Option<PathBuf>,

    /// Print the generated driver script(s) and exit
    #[arg(long)]
    print_script: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> VerifyResult<i32> {
    let scenarios = if let Some(path) = &args.scenario {
        vec![Scenario::from_file(path)?]
    } else if let Some(dir) = &args.scenarios {
        Scenario::load_all(dir)?
    } else {
        vec![Scenario::timeline_editor()?]
    };

    let config = RunnerConfig {
        playwright: PlaywrightConfig {
            node_binary: args.node,
            workdir: args.workdir,
            artifact_dir: args.artifacts,
            run_timeout: Duration::from_secs(args.run_timeout),
        },
        target: args.target,
        browser: args.browser,
        headed: args.headed,
        wait_for_target: (args.wait_for_target > 0).then(|| Duration::from_secs(args.wait_for_target)),
    };

    let runner = VerifyRunner::with_config(config);

    if args.print_script {
        for scenario in scenarios {
            println!("// scenario: {}", scenario.name);
            println!("{}", runner.script_for(scenario)?);
        }
        return Ok(0);
    }

    if scenarios.is_empty() {
        info!("No scenarios found");
        return Ok(0);
    }

    let results = runner.run_all(scenarios).await?;

    if let Some(path) = &args.results {
        runner.write_results(&results, path)?;
    }

    Ok(results.exit_code())
}
