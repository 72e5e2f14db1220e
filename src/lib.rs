//! stpl is a line-oriented template compiler and renderer.
//! Templates interleave literal text with `%` statement lines, `<% %>` code
//! regions and `{{ }}` substitutions, and compose through `extends`/`block`,
//! `rebase`/`base` and `include`.

/// Fixed-size chunking of rendered output
pub mod chunked;

/// Command-line interface module for the stpl binary
pub mod cli;

/// Configuration handling
/// Supports JSON and YAML formats (stpl.json, stpl.yml, stpl.yaml)
pub mod config;

/// Shared constants: template syntax markers and defaults
pub mod constants;

/// Inheritance runtime: context arenas of linked template instances
pub mod context;

/// Error types and handling
pub mod error;

/// Embedded expressions and statements
pub mod host;

/// Template source loading from directories or memory
pub mod loader;

/// Logger initialization for the binary
pub mod logger;

/// Name-to-template cache resolving inheritance and includes
pub mod manager;

/// Directive parameter parsing
pub mod params;

/// Assembly of code listings into executable programs
pub mod program;

/// Lazy execution of compiled programs
pub mod render;

/// Compiled templates and their context pools
pub mod template;

/// Directive keyword recognition
pub mod token;

/// Line-by-line translation of template sources into code listings
pub mod translator;
