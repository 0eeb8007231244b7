//! Handles all user-facing output for the CLI.
//!
//! Pretty-printing, colourised diffs, and error rendering live here so every
//! command reports the same way.

use difference::{Changeset, Difference};
use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::evaluator::OverrideResult;
use crate::HarnessError;

// ============================================================================
// CORE OUTPUT FUNCTIONS
// ============================================================================

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the line diff from `before` to `after`.
pub fn print_diff(before: &str, after: &str, use_colors: bool) {
    let mut stdout = StandardStream::stdout(color_choice(use_colors));
    let changeset = Changeset::new(before, after, "\n");
    write_diff(&mut stdout, &changeset.diffs);
}

/// Prints an override diagnostic.
pub fn print_override_result(result: &OverrideResult, use_colors: bool) {
    let mut stderr = StandardStream::stderr(color_choice(use_colors));
    if result.result {
        let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true));
        eprintln!("override applied");
    } else {
        let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
        eprintln!("override reported errors");
    }
    let _ = stderr.reset();
    for error in &result.parse_errors {
        eprintln!("  {error}");
    }
}

/// Renders `error` as a miette report on stderr.
pub fn print_error(error: HarnessError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}

// ============================================================================
// PRIVATE HELPERS
// ============================================================================

fn color_choice(use_colors: bool) -> ColorChoice {
    if use_colors {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn write_diff<W: WriteColor>(out: &mut W, diffs: &[Difference]) {
    for diff in diffs {
        let (prefix, color, text) = match diff {
            Difference::Same(x) => (' ', None, x),
            Difference::Add(x) => ('+', Some(Color::Green), x),
            Difference::Rem(x) => ('-', Some(Color::Red), x),
        };
        let _ = out.set_color(ColorSpec::new().set_fg(color));
        for line in text.lines() {
            let _ = writeln!(out, "{prefix}{line}");
        }
    }
    let _ = out.reset();
}
