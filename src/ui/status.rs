use dialoguer::console::style;

pub enum CommandStatus {
    Success,
    Error,
    Warning,
}

/// One styled status line on stderr; stdout is reserved for results.
pub fn print_command_status(status: CommandStatus, message: &str) {
    let indicator = match status {
        CommandStatus::Success => style("✓").green(),
        CommandStatus::Error => style("✗").red(),
        CommandStatus::Warning => style("!").yellow(),
    };
    eprintln!("{indicator} {message}");
}
