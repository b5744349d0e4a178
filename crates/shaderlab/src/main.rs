mod cli;
mod paths;
mod run;

use std::process::ExitCode;

use anyhow::Result;
use cli::Command;
use paths::AppPaths;
use renderer::ShaderCompiler;
use run::Session;

fn main() -> Result<ExitCode> {
    let cli = cli::parse();
    run::initialise_tracing();

    let paths = match AppPaths::discover() {
        Ok(paths) => Some(paths),
        Err(err) => {
            tracing::debug!(error = %err, "no platform directories; using defaults");
            None
        }
    };
    let config = run::load_config(cli.config.as_deref(), paths.as_ref())?;
    let compiler = cli
        .compiler
        .unwrap_or_else(|| ShaderCompiler::from_backend(config.compiler.backend));
    let session = Session {
        config,
        compiler,
        paths,
    };

    match cli.command {
        Command::Check(args) => run::check(&session, args),
        Command::Grade(args) => run::grade(&session, args),
        Command::Capture(args) => run::capture(&session, args),
        Command::Preview(args) => run::preview(&session, args),
    }
}
