#![allow(dead_code)]

use serde_json::{Value, json};

use differential_harness::driver::{
    CommandDriver, CommandProgram, CommandSpec, DriverData, DriverType, FnDriver,
};
use differential_harness::params::{ArgumentSet, ArgumentSetGenerator, ParameterSpec, ValueSource};

pub fn int(args: &ArgumentSet, name: &str) -> i64 {
    args.get(name).and_then(Value::as_i64).unwrap_or_default()
}

pub fn result(value: Value) -> DriverData {
    DriverData::from([("result".to_string(), value)])
}

/// In-process calculator; `op` is `+` or `-`.
pub fn py_calc(name: &str, op: char) -> DriverType {
    FnDriver::driver_type(name, move |args, _| {
        let (a, b) = (int(args, "a"), int(args, "b"));
        match op {
            '+' => Ok(result(json!(a + b))),
            '-' => Ok(result(json!(a - b))),
            other => Err(format!("unsupported op {other}")),
        }
    })
}

/// The same calculator as a `sh` subprocess.
pub fn sh_calc(name: &str, op: char) -> DriverType {
    let script = format!("echo $(($1 {op} $2))");
    let spec = CommandSpec::new(
        CommandProgram::Fixed("sh".to_string()),
        ["-c", script.as_str(), "sh", "{a}", "{b}"],
    )
    .expect("command spec");
    CommandDriver::driver_type(name, spec)
}

/// `a ∈ {1, 2}`, `b ∈ {3, 4}`: four argument sets, `b` varying fastest.
pub fn calc_grid() -> ArgumentSetGenerator {
    ArgumentSetGenerator::new(
        ParameterSpec::new()
            .with("a", ValueSource::values([1, 2]))
            .with("b", ValueSource::values([3, 4])),
    )
    .expect("valid spec")
}

/// Live processes whose argv contains `arg` exactly.
#[cfg(target_os = "linux")]
pub fn processes_with_arg(arg: &str) -> usize {
    std::fs::read_dir("/proc")
        .expect("procfs")
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read(entry.path().join("cmdline")).ok())
        .filter(|cmdline| cmdline.split(|b| *b == 0).any(|part| part == arg.as_bytes()))
        .count()
}
