//! Command-line interface implementation for stpl.
//! Provides argument parsing and render-context loading using clap.

use crate::error::{Error, Result};
use clap::{error::ErrorKind, CommandFactory, Parser};
use std::io::Read;
use std::path::PathBuf;

/// Command-line arguments structure for stpl.
#[derive(Parser, Debug)]
#[command(author, version, about = "stpl: line-oriented template renderer", long_about = None)]
pub struct Args {
    /// Name of the template to render
    #[arg(value_name = "TEMPLATE")]
    pub template: String,

    /// Directory searched for templates; may be given several times
    #[arg(short = 'd', long = "directory", value_name = "DIR")]
    pub directories: Vec<PathBuf>,

    /// JSON object bound in the template namespace
    #[arg(short, long, value_name = "JSON", conflicts_with = "stdin")]
    pub context: Option<String>,

    /// Read the JSON context from stdin
    #[arg(short, long)]
    pub stdin: bool,

    /// Configuration file, instead of stpl.json, stpl.yml or stpl.yaml
    /// in the current directory
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Size in bytes of the chunks written to stdout
    #[arg(long, value_name = "N")]
    pub buffer_size: Option<usize>,

    /// Print the compiled code listing instead of rendering
    #[arg(long)]
    pub code: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parses command line arguments and returns the Args structure.
///
/// # Returns
/// * `Args` - Parsed command line arguments
///
/// # Exits
/// * With status code 1 if required arguments are missing
/// * With clap's default error handling for other argument errors
pub fn get_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if e.kind() == ErrorKind::MissingRequiredArgument {
                let _ = Args::command()
                    .help_template(
                        r#"{about-section}
{usage-heading} {usage}

{all-args}
{after-help}
"#,
                    )
                    .print_help();
                std::process::exit(1);
            } else {
                e.exit();
            }
        }
    }
}

/// Where the render context comes from.
#[derive(Debug, PartialEq, Eq)]
pub enum ContextSource<'a> {
    Argument(&'a str),
    Stdin,
    None,
}

impl<'a> ContextSource<'a> {
    pub fn from_args(args: &'a Args) -> Self {
        match (args.context.as_deref(), args.stdin) {
            (Some(json), _) => ContextSource::Argument(json),
            (None, true) => ContextSource::Stdin,
            (None, false) => ContextSource::None,
        }
    }
}

/// Parses a JSON render context; blank input is an empty context.
///
/// # Errors
/// * `Error::JsonError` if the input is not valid JSON
pub fn parse_context(input: &str) -> Result<serde_json::Value> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_str(input)?)
}

/// Loads the render context selected by the command line.
pub fn get_context(source: ContextSource<'_>) -> Result<serde_json::Value> {
    match source {
        ContextSource::Argument(json) => parse_context(json),
        ContextSource::Stdin => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(Error::IoError)?;
            parse_context(&buffer)
        }
        ContextSource::None => Ok(serde_json::Value::Null),
    }
}
