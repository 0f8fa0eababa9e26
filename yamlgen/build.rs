/*!

The `Test` custom resource definition is modeled as a Rust struct in the model crate. Here we
generate the corresponding k8s yaml file, together with the RBAC objects the controller needs.
These are needed when setting up a testbed cluster without the `testbed` CLI. Crates that depend
on these files can add yamlgen as a build dependency to ensure the files are current. Scripts can
call `cargo build --package yamlgen`.

!*/

use kube::CustomResourceExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use testbed_model::system::{
    controller_cluster_role, controller_cluster_role_binding, controller_service_account,
    testbed_namespace,
};
use testbed_model::constants::NAMESPACE;
use testbed_model::Test;

const YAMLGEN_DIR: &str = env!("CARGO_MANIFEST_DIR");
const HEADER: &str = "# This file is generated. Do not edit.\n";

fn main() {
    // Re-run this build script if the model changes.
    println!("cargo:rerun-if-changed=../model/src");

    let dir = PathBuf::from(YAMLGEN_DIR).join("deploy");
    fs::create_dir_all(&dir).expect("unable to create the deploy directory");
    let path = dir.join("testbed.yaml");

    let mut f = File::create(&path)
        .unwrap_or_else(|_| panic!("unable to open file '{}' for writing", path.display()));

    f.write_all(HEADER.as_bytes())
        .expect("unable to write file header");
    serde_yaml::to_writer(&f, &testbed_namespace(NAMESPACE)).expect("unable to write namespace");
    serde_yaml::to_writer(&f, &Test::crd()).expect("unable to write Test CRD");
    serde_yaml::to_writer(&f, &controller_service_account(None))
        .expect("unable to write controller service account");
    serde_yaml::to_writer(&f, &controller_cluster_role())
        .expect("unable to write controller cluster role");
    serde_yaml::to_writer(&f, &controller_cluster_role_binding())
        .expect("unable to write controller cluster role binding");
}
