use std::io::Write;

use anyhow::{Context, Result};
use cbir_core::MatchResult;

/// Writes `rank. identifier score` lines, ranks starting at 1.
pub(crate) fn write_text(writer: &mut impl Write, matches: &[MatchResult]) -> Result<()> {
    for (index, result) in matches.iter().enumerate() {
        writeln!(writer, "{}. {} {}", index + 1, result.id, result.score)
            .context("failed to write match")?;
    }
    Ok(())
}

pub(crate) fn write_json(writer: &mut impl Write, matches: &[MatchResult]) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, matches).context("failed to encode matches")?;
    writeln!(writer).context("failed to write matches")?;
    Ok(())
}

pub(crate) fn print_matches(matches: &[MatchResult], json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    if json {
        write_json(&mut lock, matches)
    } else {
        write_text(&mut lock, matches)
    }
}
