use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn validates_a_single_compute_template_successfully() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
      properties:
        num_cpus: 2
        mem_size: "4 MB"
        disk_size: "10 GB"
"#
    )
    .unwrap();

    Command::cargo_bin("tosca-validate")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 node template(s)"));
}

#[test]
fn reports_a_constraint_violation_and_exits_nonzero() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
tosca_definitions_version: tosca_simple_yaml_1_3
topology_template:
  inputs:
    cpus:
      type: integer
      constraints:
        - valid_values: [1, 2, 4, 8]
"#
    )
    .unwrap();

    Command::cargo_bin("tosca-validate")
        .unwrap()
        .arg(file.path())
        .args(["--input", "cpus=3"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("ConstraintViolation"));
}

#[test]
fn an_unparsable_version_aborts_with_a_nonzero_exit() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "tosca_definitions_version: bogus\n").unwrap();

    Command::cargo_bin("tosca-validate")
        .unwrap()
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("Parsing aborted"));
}
