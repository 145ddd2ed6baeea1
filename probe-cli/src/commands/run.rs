//! Run selected tests.

use anyhow::Result;
use clap::Args;
use probe_core::{
    MockProvisioner, Provisioner, Runner, Selection, StaticPoolProvisioner, Test, TestRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::report::{self, RunReport, Summary};
use crate::retry::run_with_retries;

/// Arguments of `vmprobe run`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Name patterns (`*` and `?` wildcards); all tests if omitted
    pub patterns: Vec<String>,

    /// Tests executed at once (overrides `[run] parallel`)
    #[arg(long, short = 'j')]
    pub parallel: Option<usize>,

    /// Target platform (overrides `[run] platform`)
    #[arg(long)]
    pub platform: Option<String>,

    /// Target architecture (overrides `[run] arch`)
    #[arg(long)]
    pub arch: Option<String>,

    /// Extra attempts for infrastructure errors (overrides `[run] infra_retries`)
    #[arg(long)]
    pub infra_retries: Option<u32>,

    /// Write a JSON report to this path
    #[arg(long)]
    pub json_report: Option<PathBuf>,
}

impl RunArgs {
    /// Apply command-line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(parallel) = self.parallel {
            config.run.parallel = parallel;
        }
        if let Some(platform) = &self.platform {
            config.run.platform = platform.clone();
        }
        if let Some(arch) = &self.arch {
            config.run.arch = arch.clone();
        }
        if let Some(retries) = self.infra_retries {
            config.run.infra_retries = retries;
        }
    }
}

/// Run the run command. Returns true if every executed test passed.
pub async fn run(
    config: &Config,
    registry: &TestRegistry,
    args: &RunArgs,
    mock: bool,
) -> Result<bool> {
    let selection = Selection::all()
        .with_patterns(&args.patterns)?
        .on_arch(config.arch());
    let tests: Vec<Test> = registry.select(&selection).into_iter().cloned().collect();
    if tests.is_empty() {
        anyhow::bail!(
            "No tests match {:?} on architecture {}",
            args.patterns,
            config.arch()
        );
    }

    let provisioner = provisioner(config, mock)?;
    let backend = provisioner.name().to_string();
    let runner = Runner::new(provisioner, config.runner_options());
    tracing::info!(
        tests = tests.len(),
        platform = %config.platform(),
        arch = %config.arch(),
        %backend,
        "running tests"
    );

    let records = run_with_retries(&runner, tests, config.run.infra_retries).await;

    println!("=== vmprobe run ({} on {}) ===", config.platform(), backend);
    println!("{}", report::render(&records));

    let summary = Summary::from_records(&records);
    if let Some(path) = &args.json_report {
        RunReport {
            platform: &config.run.platform,
            arch: &config.run.arch,
            backend: &backend,
            summary: summary.clone(),
            tests: &records,
        }
        .write(path)?;
        tracing::info!(path = %path.display(), "report written");
    }

    Ok(summary.all_passed())
}

fn provisioner(config: &Config, mock: bool) -> Result<Arc<dyn Provisioner>> {
    if mock {
        return Ok(Arc::new(
            MockProvisioner::new().on_create(probe_suite::demo::script_machine),
        ));
    }
    if config.pool.hosts.is_empty() {
        anyhow::bail!("No hosts configured in [pool]; add hosts to the config file or use --mock");
    }
    Ok(Arc::new(StaticPoolProvisioner::new(&config.pool, &config.ssh)))
}
