use crate::error::{self, Result};
use serde::Serialize;
use snafu::{ensure, ResultExt};
use structopt::StructOpt;
use tabled::{Style, Table, Tabled};
use testbed_model::clients::{CrdClient, TestClient};
use testbed_model::{CrdExt, Phase, Test};

/// Check the status of Testbed tests.
#[derive(Debug, StructOpt)]
pub(crate) struct Status {
    /// Check the status of `Test` named `test_name`. Omit to check the status of all tests.
    #[structopt(long = "test-name", short = "t")]
    test_name: Option<String>,

    /// Continue checking the status of the test(s) until all have been torn down.
    #[structopt(long = "wait")]
    wait: bool,

    /// Output the results in JSON format.
    #[structopt(long = "json")]
    json: bool,
}

impl Status {
    pub(crate) async fn run(&self, tests_api: TestClient) -> Result<()> {
        let rows = loop {
            let tests = match self.test_name.as_ref() {
                Some(test_name) => vec![tests_api
                    .get(test_name)
                    .await
                    .context(error::GetTestSnafu)?],
                None => tests_api.get_all().await.context(error::GetTestSnafu)?,
            };
            let rows: Vec<TestRow> = tests.iter().map(TestRow::from).collect();
            let all_complete = rows.iter().all(|row| row.complete);
            if !self.wait || all_complete {
                break rows;
            }
            if !self.json {
                println!("{}\n", table(&rows));
            }
            tokio::time::sleep(std::time::Duration::from_millis(2000)).await;
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string(&rows).context(error::JsonSerializeSnafu)?
            );
        } else {
            println!("{}", table(&rows));
        }

        let failures: Vec<String> = rows
            .iter()
            .filter(|row| row.failed())
            .map(|row| row.name.clone())
            .collect();
        ensure!(
            failures.is_empty(),
            error::FailedTestSnafu { tests: failures }
        );
        Ok(())
    }
}

#[derive(Debug, Tabled, Serialize)]
struct TestRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PHASE")]
    phase: Phase,
    #[tabled(rename = "RESULTS")]
    #[tabled(display_with = "display_option")]
    results: Option<String>,
    #[tabled(rename = "COMPLETE")]
    complete: bool,
}

impl TestRow {
    fn failed(&self) -> bool {
        self.phase == Phase::Failed
    }
}

impl From<&Test> for TestRow {
    fn from(test: &Test) -> Self {
        Self {
            name: test.object_name().to_string(),
            phase: test.phase(),
            results: test.results().map(String::from),
            complete: test.is_complete(),
        }
    }
}

fn display_option(o: &Option<String>) -> String {
    o.clone().unwrap_or_default()
}

fn table(rows: &[TestRow]) -> String {
    Table::new(rows).with(Style::blank()).to_string()
}
