use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Config;
use crate::leaf::{TestBuilder, TestResult, TestUnit};
use crate::root::{MainBuilder, MainUnit};
use crate::telemetry;
use crate::unit::Reporter;

#[derive(Parser)]
#[command(name = "testunit")]
#[command(about = "testunit - run code as isolated test units", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter (overrides config file and env vars; RUST_LOG still wins)
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a root-unit scenario and exit with its process outcome
    Scenario {
        #[arg(value_enum)]
        name: RootScenario,

        /// Exit code the built-in batch runner reports
        #[arg(long, default_value = "0")]
        runner_code: i32,
    },

    /// Run a leaf-unit scenario and print its result
    Test {
        #[arg(value_enum)]
        name: LeafScenario,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RootScenario {
    Pass,
    Skip,
    SkipOnCleanup,
    Fail,
    FailOnCleanup,
    FailNow,
    FailNowOnCleanup,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LeafScenario {
    Pass,
    Fail,
    FailNow,
    SkipNow,
    Panic,
    PanicOnCleanup,
    CleanupChain,
}

/// Run the CLI by parsing process arguments
///
/// Returns the process exit code.
pub fn run_cli() -> Result<i32> {
    run_cli_with_args(Cli::parse())
}

fn run_cli_with_args(cli: Cli) -> Result<i32> {
    let mut builder = Config::builder().config_path(cli.config.clone());
    if let Some(filter) = &cli.log {
        builder = builder.log_filter(filter.clone());
    }
    let config = builder.build().context("Failed to load configuration")?;

    telemetry::init_tracing(&config.log.filter);

    match cli.command {
        Commands::Scenario { name, runner_code } => Ok(run_root_scenario(name, runner_code, config)),

        Commands::Test { name, json } => {
            let result = run_leaf_scenario(name, config);
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialize result")?
                );
            } else {
                print_result(&result);
            }
            Ok(0)
        }

        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(0)
        }
    }
}

/* ===================== Scenarios ===================== */

/// Root scenarios around a batch runner that prints `test passed`
pub fn run_root_scenario(scenario: RootScenario, runner_code: i32, config: Config) -> i32 {
    let runner = move || {
        println!("test passed");
        runner_code
    };

    MainBuilder::new()
        .config(config)
        .run(runner, move |m: &MainUnit| match scenario {
            RootScenario::Pass => {
                m.run();
            }
            RootScenario::Skip => m.skip("skipping the whole batch"),
            RootScenario::SkipOnCleanup => {
                let h = m.clone();
                m.cleanup(move || h.skip("skipped in cleanup"));
                m.run();
            }
            RootScenario::Fail => {
                m.fail();
                m.run();
            }
            RootScenario::FailOnCleanup => {
                let h = m.clone();
                m.cleanup(move || h.fail());
                m.run();
            }
            RootScenario::FailNow => {
                m.fail_now();
            }
            RootScenario::FailNowOnCleanup => {
                let h = m.clone();
                m.cleanup(move || h.fail_now());
                m.run();
            }
            RootScenario::Panic => panic!("setup panicked before the batch"),
        })
}

pub fn run_leaf_scenario(scenario: LeafScenario, config: Config) -> TestResult {
    TestBuilder::new()
        .name(format!("scenario::{scenario:?}"))
        .config(config)
        .run(move |t: &TestUnit| match scenario {
            LeafScenario::Pass => t.log("nothing to report"),
            LeafScenario::Fail => t.error("failed but kept going"),
            LeafScenario::FailNow => t.fatal("failed and stopped"),
            LeafScenario::SkipNow => t.skip("not applicable"),
            LeafScenario::Panic => panic!("leaf body panicked"),
            LeafScenario::PanicOnCleanup => {
                t.cleanup(|| panic!("cleanup panicked"));
            }
            LeafScenario::CleanupChain => {
                let h = t.clone();
                t.cleanup(move || h.log("A"));
                let h = t.clone();
                t.cleanup(move || h.fatal("B"));
                let h = t.clone();
                t.cleanup(move || h.skip("C"));
            }
        })
}

fn print_result(result: &TestResult) {
    let verdict = match (result.failed(), result.skipped()) {
        (true, true) => "FAIL (skipped)",
        (true, false) => "FAIL",
        (false, true) => "SKIP",
        (false, false) => "PASS",
    };
    println!("{} {} ({:?})", verdict, result.name, result.duration());
    for line in result.logs().lines() {
        println!("    {}", line);
    }
    if let Some(cause) = result.cause() {
        println!("cause: {}", cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated_config() -> Config {
        Config::builder()
            .env_vars(Default::default())
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_scenario_args() {
        let cli = Cli::try_parse_from(["testunit", "scenario", "fail-now-on-cleanup", "--runner-code", "3"])
            .unwrap();
        let Commands::Scenario { name, runner_code } = cli.command else {
            unreachable!("Expected scenario command");
        };
        assert_eq!(name, RootScenario::FailNowOnCleanup);
        assert_eq!(runner_code, 3);
    }

    #[test]
    fn test_unknown_scenario_is_rejected() {
        assert!(Cli::try_parse_from(["testunit", "scenario", "explode"]).is_err());
    }

    #[test]
    fn test_root_scenarios_exit_codes() {
        let cases = [
            (RootScenario::Pass, 0),
            (RootScenario::Skip, 0),
            (RootScenario::SkipOnCleanup, 0),
            (RootScenario::Fail, 1),
            (RootScenario::FailOnCleanup, 1),
            (RootScenario::FailNow, 1),
            (RootScenario::FailNowOnCleanup, 1),
        ];
        for (scenario, expected) in cases {
            assert_eq!(
                run_root_scenario(scenario, 0, isolated_config()),
                expected,
                "{scenario:?}"
            );
        }
        assert_eq!(run_root_scenario(RootScenario::Pass, 4, isolated_config()), 4);
    }

    #[test]
    fn test_leaf_cleanup_chain() {
        let result = run_leaf_scenario(LeafScenario::CleanupChain, isolated_config());
        assert!(result.failed());
        assert!(result.skipped());
        assert_eq!(result.logs(), "C\nB\nA\n");
    }

    #[test]
    fn test_leaf_panic_on_cleanup() {
        let result = run_leaf_scenario(LeafScenario::PanicOnCleanup, isolated_config());
        assert!(result.failed());
        assert_eq!(result.cause(), Some("cleanup panicked"));
    }
}
