use log::warn;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Check every lowered function before accepting it.
    pub verify: bool,
    /// Print the IR of each item in the REPL.
    pub dump_ir: bool,
    /// Instruction budget for a single evaluation.
    pub max_steps: u64,
    pub max_call_depth: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            verify: true,
            dump_ir: false,
            max_steps: 10_000_000,
            max_call_depth: 512,
        }
    }
}

impl Options {
    /// Defaults overridden by `KALEIDOSCOPE_*` environment variables.
    pub fn from_env() -> Options {
        let mut options = Options::default();
        if env::var_os("KALEIDOSCOPE_DUMP_IR").is_some() {
            options.dump_ir = true;
        }
        if env::var_os("KALEIDOSCOPE_NO_VERIFY").is_some() {
            options.verify = false;
        }
        override_from_env("KALEIDOSCOPE_MAX_STEPS", &mut options.max_steps);
        override_from_env("KALEIDOSCOPE_MAX_DEPTH", &mut options.max_call_depth);
        options
    }
}

fn override_from_env<T: FromStr>(key: &str, value: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.parse() {
            Ok(parsed) => *value = parsed,
            Err(_) => warn!("ignoring {}={:?}: not a number", key, raw),
        }
    }
}
