//! List registered tests.

use anyhow::Result;
use clap::Args;
use probe_core::{Arch, PlatformId, Selection, Test, TestRegistry};
use serde::Serialize;

/// Arguments of `vmprobe list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Name patterns (`*` and `?` wildcards); all tests if omitted
    pub patterns: Vec<String>,

    /// Only tests that run on this platform
    #[arg(long)]
    pub platform: Option<String>,

    /// Only tests that run on this architecture
    #[arg(long)]
    pub arch: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// A test as shown by `list --json`.
#[derive(Debug, Serialize)]
struct ListedTest<'a> {
    name: &'a str,
    description: &'a str,
    cluster_size: usize,
    platforms: Vec<&'a str>,
    architectures: Vec<&'a str>,
    multipath_disk: bool,
    tags: &'a [String],
}

impl<'a> From<&'a Test> for ListedTest<'a> {
    fn from(test: &'a Test) -> Self {
        Self {
            name: test.name(),
            description: test.description(),
            cluster_size: test.cluster_size(),
            platforms: test.platforms().iter().map(|p| p.as_str()).collect(),
            architectures: test.architectures().iter().map(|a| a.as_str()).collect(),
            multipath_disk: test.disk_spec().multipath,
            tags: test.tags(),
        }
    }
}

/// Run the list command.
pub fn run(registry: &TestRegistry, args: &ListArgs) -> Result<()> {
    let mut selection = Selection::all().with_patterns(&args.patterns)?;
    if let Some(platform) = &args.platform {
        selection = selection.on_platform(PlatformId::new(platform.clone()));
    }
    if let Some(arch) = &args.arch {
        selection = selection.on_arch(Arch::new(arch.clone()));
    }
    let tests: Vec<ListedTest<'_>> = registry
        .select(&selection)
        .into_iter()
        .map(ListedTest::from)
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tests)?);
        return Ok(());
    }

    if tests.is_empty() {
        println!("No matching tests.");
        return Ok(());
    }

    let width = tests.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for test in &tests {
        let platforms = if test.platforms.is_empty() {
            "all".to_string()
        } else {
            test.platforms.join(",")
        };
        println!(
            "{:<width$}  machines={}  platforms={:<12}  {}",
            test.name, test.cluster_size, platforms, test.description
        );
    }
    Ok(())
}
