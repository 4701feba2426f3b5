use anyhow::Context;
use std::process::ExitCode;

fn main() -> ExitCode {
    match phasegate::run().context("phasegate") {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(1)
        }
    }
}
