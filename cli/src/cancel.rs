use crate::error::{self, Result};
use snafu::ResultExt;
use structopt::StructOpt;
use testbed_model::clients::TestClient;

/// Cancel a test. The controller deletes its namespace on its next pass.
#[derive(Debug, StructOpt)]
pub(crate) struct Cancel {
    /// The name of the test.
    name: String,
}

impl Cancel {
    pub(crate) async fn run(&self, tests: TestClient) -> Result<()> {
        tests
            .cancel(&self.name)
            .await
            .context(error::CancelSnafu { name: &self.name })?;
        println!("Cancelled test '{}'", self.name);
        Ok(())
    }
}
