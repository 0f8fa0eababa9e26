use crate::error::{self, Result};
use log::info;
use snafu::ResultExt;
use structopt::StructOpt;
use testbed_model::clients::TestClient;

/// Record where a test suite's report was uploaded. An exit code of 0 completes the test, anything
/// else fails it. Either way the controller tears the environment down on its next pass.
#[derive(Debug, StructOpt)]
pub(crate) struct Results {
    /// The name of the test.
    name: String,

    /// Where the report can be found.
    #[structopt(long = "results", short = "r")]
    results: String,

    /// The test suite's exit code.
    #[structopt(long = "exit-code", allow_hyphen_values = true)]
    exit_code: i32,
}

impl Results {
    pub(crate) async fn run(&self, tests: TestClient) -> Result<()> {
        let test = tests
            .send_results(&self.name, &self.results, self.exit_code)
            .await
            .context(error::SendResultsSnafu { name: &self.name })?;
        info!("Test '{}' is now {}", self.name, test.phase());
        Ok(())
    }
}
