/*!

This is the command line interface for installing Testbed into a cluster, submitting tests and
reporting their results.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

mod cancel;
mod error;
mod install;
mod k8s;
mod results;
mod run;
mod status;

use crate::k8s::{k8s_client, tests};
use env_logger::Builder;
use error::Result;
use log::LevelFilter;
use std::path::PathBuf;
use structopt::StructOpt;
use testbed_model::constants::NAMESPACE;

/// The command line interface for setting up a Testbed cluster and running tests.
#[derive(Debug, StructOpt)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[structopt(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    /// Path to the kubeconfig file. Also can be passed with the KUBECONFIG environment variable.
    #[structopt(long = "kubeconfig", parse(from_os_str))]
    kubeconfig: Option<PathBuf>,
    /// The namespace `Test` objects live in. Must match the controller's `TESTBED_NAMESPACE`.
    #[structopt(long = "namespace", default_value = NAMESPACE)]
    namespace: String,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Install Testbed components into the cluster.
    Install(install::Install),
    /// Submit a Testbed test.
    Run(run::Run),
    /// Show the status of Testbed tests.
    Status(status::Status),
    /// Report the results of a test suite run.
    Results(results::Results),
    /// Cancel a test and tear down its environment.
    Cancel(cancel::Cancel),
}

#[tokio::main]
async fn main() {
    let args = Args::from_args();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let k8s_client = k8s_client(&args.kubeconfig).await?;
    match args.command {
        Command::Install(install) => install.run(k8s_client, &args.namespace).await,
        Command::Run(run) => run.run(k8s_client, &args.namespace).await,
        Command::Status(status) => status.run(tests(k8s_client, &args.namespace)).await,
        Command::Results(results) => results.run(tests(k8s_client, &args.namespace)).await,
        Command::Cancel(cancel) => cancel.run(tests(k8s_client, &args.namespace)).await,
    }
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("testbed_model"), level)
                .init();
        }
    }
}
