//! Output formatting: text or JSON lines.
//!
//! Every command renders through [`render`], so `--output json` always
//! produces one compact JSON document per line.

use std::io::{self, Write};

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Render `data` in the chosen format. Text uses `text_fn`.
pub fn render<T>(format: OutputFormat, data: &T, text_fn: impl Fn(&T) -> String) -> Result<String, CliError>
where
    T: Serialize + ?Sized,
{
    match format {
        OutputFormat::Text => Ok(text_fn(data)),
        OutputFormat::Json => Ok(serde_json::to_string(data)?),
    }
}

/// Render and print one line to stdout.
pub fn emit<T>(format: OutputFormat, data: &T, text_fn: impl Fn(&T) -> String) -> Result<(), CliError>
where
    T: Serialize + ?Sized,
{
    let line = render(format, data, text_fn)?;
    if line.is_empty() {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}
