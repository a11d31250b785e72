//! Integration Test Harness
//!
//! Runs every integration test category and prints a summary.
//!
//! # Usage
//!
//! Run all tests:
//! ```text
//! cargo run -p integration-tests
//! ```
//!
//! Run one category:
//! ```text
//! cargo test -p integration-tests --test bidirectional_tests
//! cargo test -p integration-tests --test valuetype_tests
//! ```

use std::process::Command;
use std::time::{Duration, Instant};

/// Test category
#[derive(Debug, Clone)]
struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "Bidirectional Tests",
        description: "Callbacks over the client's own connection (BI_DIR_IIOP)",
        test_name: "bidirectional_tests",
    },
    TestCategory {
        name: "Reentrancy Tests",
        description: "Nested A->B->A calls and request multiplexing",
        test_name: "reentrancy_tests",
    },
    TestCategory {
        name: "Value Type Tests",
        description: "Subtypes, sharing and cycles across the wire",
        test_name: "valuetype_tests",
    },
    TestCategory {
        name: "Naming Tests",
        description: "corbaloc, corbaname, IOR strings and the naming service",
        test_name: "naming_tests",
    },
    TestCategory {
        name: "Shutdown Tests",
        description: "Draining, cancellation and idle connections",
        test_name: "shutdown_tests",
    },
    TestCategory {
        name: "Fragmentation Tests",
        description: "Large messages split into GIOP fragments",
        test_name: "fragmentation_tests",
    },
];

fn print_header() {
    println!("{}", "=".repeat(80));
    println!("ORB integration suite: {} categories", TEST_CATEGORIES.len());
    println!("{}", "=".repeat(80));
    for (i, category) in TEST_CATEGORIES.iter().enumerate() {
        println!("  {}. {:<22} {}", i + 1, category.name, category.description);
    }
    println!();
}

/// Outcome of one `cargo test --test <category>` run
struct CategoryResult {
    name: &'static str,
    passed: bool,
    duration: Duration,
    detail: String,
}

fn run_category(category: &TestCategory) -> CategoryResult {
    println!("--- {} ---", category.name);
    let start = Instant::now();
    let output = Command::new("cargo")
        .args(["test", "-p", "integration-tests", "--test", category.test_name, "--", "--nocapture"])
        .output();
    let duration = start.elapsed();

    let (passed, detail) = match output {
        Ok(output) => {
            print!("{}", String::from_utf8_lossy(&output.stdout));
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                (true, "ok".to_string())
            } else {
                (false, format!("exit code {:?}", output.status.code()))
            }
        }
        Err(e) => (false, format!("could not run cargo: {}", e)),
    };

    CategoryResult {
        name: category.name,
        passed,
        duration,
        detail,
    }
}

fn main() {
    print_header();

    let start = Instant::now();
    let results: Vec<_> = TEST_CATEGORIES.iter().map(run_category).collect();
    let failed = results.iter().filter(|r| !r.passed).count();

    println!("\n{}", "=".repeat(80));
    println!("{:<24} {:<6} {:<14} Details", "Category", "Status", "Duration");
    println!("{}", "-".repeat(80));
    for result in &results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        println!("{:<24} {:<6} {:<14?} {}", result.name, status, result.duration, result.detail);
    }
    println!("{}", "-".repeat(80));
    println!(
        "{} passed, {} failed in {:?}",
        results.len() - failed,
        failed,
        start.elapsed()
    );

    std::process::exit(if failed > 0 { 1 } else { 0 });
}
