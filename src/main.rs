//! stpl's main application entry point.
//! Resolves configuration, loads the requested template and streams its
//! output to stdout.

use std::io::Write;

use stpl::{
    cli::{get_args, get_context, Args, ContextSource},
    config::{get_config, read_config},
    error::{default_error_handler, Error, Result},
    logger::init_logger,
    manager::Manager,
};

/// Main application entry point.
fn main() {
    let args = get_args();
    init_logger(args.verbose);

    if let Err(err) = run(args) {
        default_error_handler(err);
    }
}

/// Main application logic execution.
///
/// # Flow
/// 1. Loads configuration and applies command-line overrides
/// 2. Loads and compiles the template
/// 3. Prints the code listing, or renders with the JSON context in chunks
fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => get_config(".")?,
    };
    if !args.directories.is_empty() {
        config.directories = args.directories.clone();
    }
    if let Some(size) = args.buffer_size {
        config.buffer_size = size;
    }

    let manager = Manager::from_config(&config);
    let template = manager.get_template(&args.template)?;
    if args.code {
        print!("{}", template.code());
        return Ok(());
    }

    let env = get_context(ContextSource::from_args(&args))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for chunk in template.render_chunked(env, config.buffer_size)? {
        out.write_all(chunk?.as_bytes()).map_err(Error::IoError)?;
    }
    out.flush().map_err(Error::IoError)
}
