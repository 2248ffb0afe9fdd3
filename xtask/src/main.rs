use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;

use jsonschema::JSONSchema;
use trace_schema::TraceEntry;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("trace-schema") => trace_schema(),
        Some("check-traces") => {
            let dir = args.next().unwrap_or_else(|| ".".to_string());
            check_traces(Path::new(&dir))
        }
        Some("help") | None => {
            print_usage();
            Ok(())
        }
        Some(cmd) => {
            eprintln!("Unknown xtask '{cmd}'.");
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Usage: cargo xtask trace-schema");
    eprintln!("       cargo xtask check-traces [dir]");
    eprintln!("       cargo xtask help");
}

fn entry_schema() -> Result<serde_json::Value, Box<dyn Error>> {
    Ok(serde_json::to_value(schemars::schema_for!(TraceEntry))?)
}

fn trace_schema() -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(&entry_schema()?)?);
    Ok(())
}

fn check_traces(dir: &Path) -> Result<(), Box<dyn Error>> {
    let schema_value = entry_schema()?;
    let schema = JSONSchema::compile(&schema_value)
        .map_err(|err| format!("trace entry schema does not compile: {err}"))?;

    let pattern = dir.join("**").join("*.jsonl");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format!("non UTF-8 path {}", dir.display()))?;

    let mut checked = 0usize;
    let mut invalid = 0usize;
    for path in glob::glob(pattern)? {
        let path = path?;
        let text = fs::read_to_string(&path)?;
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            checked += 1;
            let instance: serde_json::Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(err) => {
                    invalid += 1;
                    eprintln!("{}:{}: not JSON: {err}", path.display(), index + 1);
                    continue;
                }
            };
            if let Err(errors) = schema.validate(&instance) {
                invalid += 1;
                for error in errors {
                    eprintln!("{}:{}: {error}", path.display(), index + 1);
                }
            };
        }
    }

    println!("Checked {checked} trace entries under {}", dir.display());
    if invalid > 0 {
        return Err(format!("{invalid} trace entries failed validation").into());
    }
    Ok(())
}
