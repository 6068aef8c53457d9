//! # Replicant Sync CLI
//!
//! Command-line utilities for inspecting operation paths and replaying
//! operation batches offline.

use anyhow::{bail, Context, Result};
use replicant_sync_core::{apply_operation, decode_path, encode_path, Operation};
use serde_json::Value;
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode-path" => {
            println!("{}", encode_path(&args[2..]));
        }
        "decode-path" => {
            if args.len() < 3 {
                eprintln!("Usage: replicant-sync decode-path <path>");
                std::process::exit(1);
            }
            let segments = decode_path(&args[2]);
            println!("{}", serde_json::to_string(&segments)?);
        }
        "apply" => {
            if args.len() < 4 {
                eprintln!("Usage: replicant-sync apply <value-json> <operations-json>");
                std::process::exit(1);
            }
            let result = apply(&args[2], &args[3])?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Apply a JSON array of operations to a JSON value.
fn apply(value: &str, operations: &str) -> Result<Value> {
    let mut value: Value = serde_json::from_str(value).context("Invalid value JSON")?;
    let operations: Vec<Operation> =
        serde_json::from_str(operations).context("Invalid operations JSON")?;

    for (index, op) in operations.iter().enumerate() {
        if op.is_unsupported() {
            bail!("Operation {index}: unsupported method '{}'", op.method_name());
        }
        apply_operation(&mut value, op).with_context(|| format!("Operation {index} failed"))?;
    }

    Ok(value)
}

fn print_help() {
    println!(
        r#"Replicant Sync CLI

USAGE:
    replicant-sync <COMMAND> [OPTIONS]

COMMANDS:
    encode-path <segment>...       Join segments into an operation path
    decode-path <path>             Split an operation path into segments
    apply <value> <operations>     Apply a JSON operation batch to a JSON value
    help                           Show this help message

EXAMPLES:
    replicant-sync encode-path teams 0 "a/b"
    replicant-sync decode-path "/teams/0/a~1b"
    replicant-sync apply '{{"a":0}}' '[{{"path":"/","method":"update","args":{{"prop":"a","newValue":1}}}}]'
"#
    );
}
