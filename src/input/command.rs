use std::path::PathBuf;

use thiserror::Error;

use crate::geometry::{Point, Rect, Size};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    ShowTutorial(bool),
    TutorialMessage(String),
}

/// One line of terminal input resolved to a session action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    LoadImage(PathBuf),
    ClearImage,
    Select(Rect),
    SelectOff,
    Resize(Size),
    Cancel,
    ClearHistory,
    ShowTutorial,
    Settings(SettingsChange),
    Help,
    About,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `/{0}` (try /help)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("`{0}` is not a valid number")]
    InvalidNumber(String),
}

const IMAGE_USAGE: &str = "/image <path>";
const SELECT_USAGE: &str = "/select <x> <y> <width> <height> | /select off";
const DRAG_USAGE: &str = "/drag <x1> <y1> <x2> <y2>";
const VIEW_USAGE: &str = "/view <width> <height>";
const SETTINGS_USAGE: &str = "/settings tutorial on|off | /settings message <text>";

pub const HELP_TEXT: &str = "\
Commands:
  <text>                          ask about the current image
  /image <path>                   attach an image (png, jpg, jpeg, bmp, gif)
  /clear-image                    detach the image
  /select <x> <y> <w> <h>         focus on a region of the preview
  /drag <x1> <y1> <x2> <y2>       select by the two corners of a drag
  /select off                     use the full image again
  /view <w> <h>                   set the preview size used by /select
  /cancel                         stop the running request
  /clear                          clear the chat history
  /tutorial                       show the tutorial
  /settings tutorial on|off       show the tutorial at startup
  /settings message <text>        replace the tutorial text
  /about                          about this program
  /quit                           exit";

/// Returns `None` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "image" | "open" => {
            if args.is_empty() {
                return Err(CommandError::Usage(IMAGE_USAGE));
            }
            Command::LoadImage(PathBuf::from(args))
        }
        "clear-image" => Command::ClearImage,
        "select" => parse_select(args)?,
        "drag" => {
            let [x1, y1, x2, y2] = parse_numbers::<i32, 4>(args, DRAG_USAGE)?;
            Command::Select(Rect::from_corners(Point::new(x1, y1), Point::new(x2, y2)))
        }
        "view" => {
            let [width, height] = parse_numbers::<u32, 2>(args, VIEW_USAGE)?;
            Command::Resize(Size::new(width, height))
        }
        "cancel" => Command::Cancel,
        "clear" => Command::ClearHistory,
        "tutorial" => Command::ShowTutorial,
        "settings" => Command::Settings(parse_settings(args)?),
        "help" => Command::Help,
        "about" => Command::About,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_select(args: &str) -> Result<Command, CommandError> {
    if args.eq_ignore_ascii_case("off") {
        return Ok(Command::SelectOff);
    }
    let [x, y] = parse_numbers::<i32, 2>(
        &args.split_whitespace().take(2).collect::<Vec<_>>().join(" "),
        SELECT_USAGE,
    )?;
    let [width, height] = parse_numbers::<u32, 2>(
        &args.split_whitespace().skip(2).collect::<Vec<_>>().join(" "),
        SELECT_USAGE,
    )?;
    Ok(Command::Select(Rect::new(x, y, width, height)))
}

fn parse_settings(args: &str) -> Result<SettingsChange, CommandError> {
    let (key, value) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let value = value.trim();
    match (key, value) {
        ("tutorial", "on") => Ok(SettingsChange::ShowTutorial(true)),
        ("tutorial", "off") => Ok(SettingsChange::ShowTutorial(false)),
        ("message", text) if !text.is_empty() => {
            Ok(SettingsChange::TutorialMessage(text.replace("\\n", "\n")))
        }
        _ => Err(CommandError::Usage(SETTINGS_USAGE)),
    }
}

fn parse_numbers<T: std::str::FromStr + Copy + Default, const N: usize>(
    args: &str,
    usage: &'static str,
) -> Result<[T; N], CommandError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != N {
        return Err(CommandError::Usage(usage));
    }
    let mut values = [T::default(); N];
    for (slot, part) in values.iter_mut().zip(parts) {
        *slot = part
            .parse()
            .map_err(|_| CommandError::InvalidNumber(part.to_string()))?;
    }
    Ok(values)
}
