mod command;

pub use command::{parse_command, Command, CommandError, SettingsChange, HELP_TEXT};
