use crate::error::{self, Result};
use crate::k8s;
use kube::Client;
use log::info;
use snafu::{OptionExt, ResultExt};
use std::path::PathBuf;
use structopt::StructOpt;
use testbed_model::clients::CrdClient;
use testbed_model::{create_test_crd, validate_name, Component, CrdExt, Test, TestSpec};

/// Submit a test, either from a YAML file or from the components given on the command line.
///
/// Components are `name` or `name=image` to override the default image, e.g.
/// `testbed run --name quick-red-fox --infra postgres --infra redis --app hermes --test pytest`.
#[derive(Debug, StructOpt)]
pub(crate) struct Run {
    /// Path to a test YAML file.
    #[structopt(long = "file", short = "f", parse(from_os_str))]
    file: Option<PathBuf>,

    /// The name of the test and of its namespace. Overrides the name in the file.
    #[structopt(long = "name", short = "n")]
    name: Option<String>,

    /// An infrastructure component. May be repeated, components are created in order.
    #[structopt(long = "infra", parse(from_str = parse_component))]
    infrastructure: Vec<Component>,

    /// An application component. May be repeated, components are created in order.
    #[structopt(long = "app", parse(from_str = parse_component))]
    applications: Vec<Component>,

    /// The test suite.
    #[structopt(long = "test", short = "t", parse(from_str = parse_component))]
    test: Option<Component>,
}

impl Run {
    pub(crate) async fn run(&self, k8s_client: Client, namespace: &str) -> Result<()> {
        let test = self.test_crd(namespace)?;
        validate_name(test.object_name(), namespace).context(error::InvalidTestSnafu)?;

        let tests = k8s::tests(k8s_client, namespace);
        let test = tests.create(test).await.context(error::CreateTestSnafu)?;
        info!("Created test '{}'", test.object_name());
        println!("{}", test.object_name());
        Ok(())
    }

    fn test_crd(&self, namespace: &str) -> Result<Test> {
        match &self.file {
            Some(path) => {
                let file = std::fs::File::open(path).context(error::FileSnafu { path })?;
                let test: Test = serde_yaml::from_reader(file)
                    .context(error::TestFileParseSnafu { path })?;
                let name = self
                    .name
                    .clone()
                    .unwrap_or_else(|| test.object_name().to_string());
                // Tests always live in the controller's namespace, whatever the file says.
                Ok(create_test_crd(
                    name,
                    namespace,
                    test.metadata.labels.as_ref(),
                    test.spec,
                ))
            }
            None => {
                let name = self.name.as_ref().context(error::MissingTestDefinitionSnafu)?;
                let suite = self.test.clone().context(error::MissingTestDefinitionSnafu)?;
                Ok(create_test_crd(
                    name,
                    namespace,
                    None,
                    TestSpec {
                        infrastructure: self.infrastructure.clone(),
                        applications: self.applications.clone(),
                        test: suite,
                    },
                ))
            }
        }
    }
}

/// `name` or `name=image`.
fn parse_component(input: &str) -> Component {
    match input.split_once('=') {
        Some((name, image)) => Component::with_image(name, image),
        None => Component::new(input),
    }
}
