// src/main.rs

use std::env;
use std::path::Path;

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use household_microsynth::census::CacheSource;
use household_microsynth::pipeline;
use household_microsynth::synth::expand::DirectExpansion;

/// Populated by the external census retrieval client.
const CACHE_DIR: &str = "./cache";
const OUTPUT_PATH: &str = "./synHouseholds.csv";

fn usage(prog: &str) -> String {
    format!(
        "usage: {prog} <region(s)> <resolution>\n\
         e.g: {prog} \"Newcastle upon Tyne\" OA\n\
         \x20    {prog} \"Leeds, Bradford\" MSOA"
    )
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let args: Vec<String> = env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or("run_microsynth");
    if args.len() != 3 {
        // wrong argument count is guidance, not an error
        println!("{}", usage(prog));
        return Ok(());
    }

    let source = CacheSource::new(CACHE_DIR);
    pipeline::run(
        &args[1],
        &args[2],
        &source,
        &DirectExpansion,
        Path::new(OUTPUT_PATH),
    )?;
    Ok(())
}
