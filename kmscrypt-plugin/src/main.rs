//! One-shot key provider: reads a single protocol request from stdin and
//! writes the response to stdout.

use std::io::{self, Read, Write};

use anyhow::Context;
use clap::Parser;
use kmscrypt::{KeyProvider, ProviderArgs};

/// Wrap or unwrap one OCI layer key with a KMS key. The request is read
/// from stdin, the response written to stdout.
#[derive(Parser)]
#[command(name = "kmscrypt-plugin", version)]
struct Cli {
    #[command(flatten)]
    provider: ProviderArgs,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let provider = cli
        .provider
        .build()
        .context("error initializing kms client")?;
    run(&provider, &mut io::stdin().lock(), &mut io::stdout().lock())
}

fn run(provider: &KeyProvider, input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<()> {
    let mut request = Vec::new();
    input.read_to_end(&mut request).context("reading request")?;

    let response = provider.handle(&request).map_err(|e| {
        log::error!("{e}");
        e
    })?;

    output.write_all(&response)?;
    output.flush()?;
    Ok(())
}
