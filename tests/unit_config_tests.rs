//! # Run Configuration Unit Tests / 运行配置单元测试
//!
//! Tests for loading and validating the `.litf.json` run configuration.
//!
//! 加载和校验 `.litf.json` 运行配置的测试。

mod common;

use litf_relay::core::config::{CONFIG_FILE, ToolSpec, load_run_config};

use common::{setup_test_environment, write_config};

#[test]
fn test_valid_config_loads_in_order() {
    let temp = setup_test_environment();
    write_config(
        temp.path(),
        &[("pytest --litf", "pytest"), ("cargo test-litf", "cargo")],
    );

    let specs = load_run_config(temp.path()).expect("config is valid");
    assert_eq!(
        specs,
        vec![
            ToolSpec {
                tool: "pytest --litf".to_string(),
                name: "pytest".to_string()
            },
            ToolSpec {
                tool: "cargo test-litf".to_string(),
                name: "cargo".to_string()
            },
        ]
    );
}

#[test]
fn test_missing_config_file_fails() {
    let temp = setup_test_environment();
    let err = load_run_config(temp.path()).expect_err("no config present");
    assert!(err.to_string().contains(CONFIG_FILE));
}

#[test]
fn test_invalid_json_fails() {
    let temp = setup_test_environment();
    std::fs::write(temp.path().join(CONFIG_FILE), "[{\"tool\": ").unwrap();
    assert!(load_run_config(temp.path()).is_err());
}

#[test]
fn test_empty_tool_list_is_rejected() {
    let temp = setup_test_environment();
    std::fs::write(temp.path().join(CONFIG_FILE), "[]").unwrap();
    assert!(load_run_config(temp.path()).is_err());
}

#[test]
fn test_blank_tool_command_is_rejected() {
    let temp = setup_test_environment();
    write_config(temp.path(), &[("   ", "blank")]);
    assert!(load_run_config(temp.path()).is_err());
}

#[test]
fn test_duplicate_names_are_rejected() {
    let temp = setup_test_environment();
    write_config(temp.path(), &[("pytest", "same"), ("cargo", "same")]);
    assert!(load_run_config(temp.path()).is_err());
}

#[test]
fn test_unknown_fields_in_entries_are_rejected_gracefully() {
    // Extra fields on entries are tolerated by serde's defaults being
    // absent: they are simply ignored.
    let temp = setup_test_environment();
    std::fs::write(
        temp.path().join(CONFIG_FILE),
        r#"[{"tool": "pytest", "name": "py", "color": "blue"}]"#,
    )
    .unwrap();
    let specs = load_run_config(temp.path()).expect("extra fields are ignored");
    assert_eq!(specs[0].name, "py");
}
