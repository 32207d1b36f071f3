//! Status messages on stderr

/// Print an error message
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("pssh: "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("pssh: warning: "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
