//! Colored terminal output with verbose and quiet modes.

use std::io::{self, IsTerminal, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Writes user-facing messages.
///
/// Progress and results go to stdout; warnings and errors go to stderr.
/// Quiet mode keeps only errors; build tool output is shown in verbose mode.
/// Colors are used only when the stream is a terminal.
#[derive(Debug, Clone)]
pub struct OutputManager {
    verbose: bool,
    quiet: bool,
}

impl OutputManager {
    /// Create a new output manager
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    /// Whether verbose output is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Print a step that is starting
    pub fn progress(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        write_tagged(&mut stdout(), "→", Color::Cyan, message)
    }

    /// Print a completed step
    pub fn success(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        write_tagged(&mut stdout(), "✓", Color::Green, message)
    }

    /// Print a warning
    pub fn warn(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        write_tagged(&mut stderr(), "⚠", Color::Yellow, message)
    }

    /// Print an error; shown even in quiet mode
    pub fn error(&self, message: &str) -> io::Result<()> {
        write_tagged(&mut stderr(), "✗", Color::Red, message)
    }

    /// Print an indented detail line, verbose mode only
    pub fn indent(&self, message: &str) -> io::Result<()> {
        if !self.is_verbose() {
            return Ok(());
        }
        let mut out = stdout();
        out.set_color(ColorSpec::new().set_dimmed(true))?;
        write!(out, "    {}", message)?;
        out.reset()?;
        writeln!(out)
    }

    /// Print a line to stdout regardless of mode, never colored
    pub fn println(&self, message: &str) -> io::Result<()> {
        writeln!(io::stdout().lock(), "{}", message)
    }
}

fn color_choice(is_terminal: bool) -> ColorChoice {
    if is_terminal {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn stdout() -> StandardStream {
    StandardStream::stdout(color_choice(io::stdout().is_terminal()))
}

fn stderr() -> StandardStream {
    StandardStream::stderr(color_choice(io::stderr().is_terminal()))
}

fn write_tagged<W: WriteColor>(out: &mut W, tag: &str, color: Color, message: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(out, "{}", tag)?;
    out.reset()?;
    writeln!(out, " {}", message)
}
