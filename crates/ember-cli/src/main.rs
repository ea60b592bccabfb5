use std::{env, fs, process::ExitCode, time::Instant};

use ember::{CodeSpec, NoLimitTracker, ProfilingTracer, Runtime, StdPrint};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let profile = args.iter().any(|arg| arg == "--profile");
    let file_path = args
        .iter()
        .skip(1)
        .find(|arg| !arg.starts_with("--"))
        .map_or("example.json", String::as_str);

    let code = match read_code(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut runtime = match Runtime::new(NoLimitTracker) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error:\n{err}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let mut profiler = ProfilingTracer::new();
    let result = if profile {
        runtime.run_traced(&code, &mut StdPrint, &mut profiler)
    } else {
        runtime.run(&code, &mut StdPrint)
    };
    let elapsed = start.elapsed();
    if profile {
        eprintln!("{}", profiler.report());
    }

    match result {
        Ok(value) => {
            eprintln!("success after: {elapsed:?}\n{}", value.py_repr());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after: {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}

/// Loads a code object from JSON, or from the binary form when the file ends in `.bin`.
fn read_code(file_path: &str) -> Result<CodeSpec, String> {
    eprintln!("Reading file: {file_path}");
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{file_path} is not a file"));
            }
        }
        Err(err) => return Err(format!("reading {file_path}: {err}")),
    }
    if file_path.ends_with(".bin") {
        let bytes = fs::read(file_path).map_err(|err| format!("reading file: {err}"))?;
        CodeSpec::from_bytes(&bytes).map_err(|err| format!("decoding {file_path}: {err}"))
    } else {
        let json = fs::read_to_string(file_path).map_err(|err| format!("reading file: {err}"))?;
        CodeSpec::from_json(&json).map_err(|err| format!("parsing {file_path}: {err}"))
    }
}
