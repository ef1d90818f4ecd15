//! Line-oriented front-end driving a [`SessionController`].
//!
//! Input is read on a helper thread; the interactive loop wakes every
//! [`ACTION_RESULT_POLL_INTERVAL`] to dispatch commands and to reconcile
//! worker outcomes, so a request in flight never blocks typing `/cancel`.

use std::io::Write;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use crate::config::SettingsStore;
use crate::error::AppResult;
use crate::input::{parse_command, Command, SettingsChange, HELP_TEXT};
use crate::session::{SessionController, SessionError, SessionUpdate};

mod bootstrap;
mod input_bridge;
mod render;

pub use self::bootstrap::StartupOptions;
use self::bootstrap::bootstrap_session;
use self::input_bridge::spawn_line_reader;
use self::render::render_turn;

pub(crate) const ACTION_RESULT_POLL_INTERVAL: Duration = Duration::from_millis(24);

const ABOUT_TEXT: &str = concat!(
    "ITT-Qwen ",
    env!("CARGO_PKG_VERSION"),
    "\nAsk a local vision-language model about an image, or a region of it."
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub fn run_terminal(options: &StartupOptions) -> AppResult<()> {
    let mut session = bootstrap_session(options)?;
    let lines = spawn_line_reader()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "{ABOUT_TEXT}\nType /help for commands.\n")?;
    if session.show_tutorial(false) {
        if let Some(turn) = session.conversation().last() {
            writeln!(out, "{}", render_turn(turn))?;
        }
    }

    let mut input_open = true;
    loop {
        if input_open {
            match lines.recv_timeout(ACTION_RESULT_POLL_INTERVAL) {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(command)) => {
                        if dispatch(&mut session, command, &mut out)? == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => writeln!(out, "{err}")?,
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("input closed");
                    input_open = false;
                }
            }
        }

        let update = if input_open {
            session.poll()
        } else if session.is_busy() {
            session.poll_timeout(ACTION_RESULT_POLL_INTERVAL)
        } else {
            break;
        };
        if let Some(update) = update {
            render_update(&update, &mut out)?;
        }
        flush_notices(&mut session, &mut out)?;
    }

    session.shutdown();
    flush_notices(&mut session, &mut out)?;
    Ok(())
}

fn dispatch<S: SettingsStore>(
    session: &mut SessionController<S>,
    command: Command,
    out: &mut impl Write,
) -> AppResult<Flow> {
    match command {
        Command::Send(text) => match session.submit(&text) {
            Ok(()) => {
                if let Some(turn) = session.conversation().last() {
                    writeln!(out, "{}", render_turn(turn))?;
                }
            }
            Err(SessionError::Busy | SessionError::EmptyMessage) => {}
            Err(err) => writeln!(out, "{err}")?,
        },
        Command::LoadImage(path) => {
            if session.load_image(path).is_ok() {
                if let Some(image) = session.image() {
                    let size = image.original_size();
                    writeln!(out, "Image is {}x{} pixels.", size.width, size.height)?;
                }
            }
        }
        Command::ClearImage => session.clear_image(),
        Command::Select(selection) => match session.select_region(selection) {
            Ok(Some(region)) => writeln!(
                out,
                "Focusing on {}x{} at ({}, {}) in the original image.",
                region.width, region.height, region.x, region.y
            )?,
            Ok(None) => writeln!(
                out,
                "The selection does not cover the image; the full image will be used."
            )?,
            Err(err) => writeln!(out, "Cannot select a region: {err}")?,
        },
        Command::SelectOff => {
            session.clear_selection();
            writeln!(out, "Selection cleared; the full image will be used.")?;
        }
        Command::Resize(size) => {
            session.set_display_size(size);
            writeln!(out, "Preview size set to {}x{}.", size.width, size.height)?;
        }
        Command::Cancel => {
            if !session.cancel() && !session.is_busy() {
                writeln!(out, "Nothing to cancel.")?;
            }
        }
        Command::ClearHistory => session.clear_history(),
        Command::ShowTutorial => {
            session.show_tutorial(true);
            if let Some(turn) = session.conversation().last() {
                writeln!(out, "{}", render_turn(turn))?;
            }
        }
        Command::Settings(change) => {
            let settings = session.settings_mut();
            let saved = match change {
                SettingsChange::ShowTutorial(value) => settings.set_show_tutorial(value),
                SettingsChange::TutorialMessage(text) => settings.set_tutorial_message(text),
            };
            match saved {
                Ok(()) => writeln!(out, "Settings saved.")?,
                Err(err) => writeln!(out, "Failed to save settings: {err}")?,
            }
        }
        Command::Help => writeln!(out, "{HELP_TEXT}")?,
        Command::About => writeln!(out, "{ABOUT_TEXT}")?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn render_update(update: &SessionUpdate, out: &mut impl Write) -> AppResult<()> {
    match update {
        SessionUpdate::Responded(turn) => writeln!(out, "{}", render_turn(turn))?,
        SessionUpdate::Failed(reason) => crate::notification::send(reason.clone()),
    }
    Ok(())
}

fn flush_notices<S: SettingsStore>(
    session: &mut SessionController<S>,
    out: &mut impl Write,
) -> AppResult<()> {
    for notice in session.drain_notices() {
        writeln!(out, "{notice}")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, MemorySettingsStore};
    use crate::geometry::Size;
    use crate::storage::TempImageStore;
    use crate::worker::test_support::{BackendControl, ScriptedBackend};
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(5);

    fn session() -> (
        SessionController<MemorySettingsStore>,
        BackendControl,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let (backend, control) = ScriptedBackend::new();
        let session = SessionController::new(
            Arc::new(backend),
            MemorySettingsStore::new(AppConfig::default()),
            TempImageStore::with_dir(dir.path().to_path_buf()),
            Size::new(800, 400),
        );
        (session, control, dir)
    }

    fn run(session: &mut SessionController<MemorySettingsStore>, line: &str) -> (Flow, String) {
        let mut out = Vec::new();
        let command = parse_command(line).unwrap().unwrap();
        let flow = dispatch(session, command, &mut out).unwrap();
        (flow, String::from_utf8(out).unwrap())
    }

    #[test]
    fn send_echoes_user_turn_and_starts_request() {
        let (mut session, control, _dir) = session();
        let (flow, printed) = run(&mut session, "what is this?");
        assert_eq!(flow, Flow::Continue);
        assert!(printed.starts_with("You ("), "{printed}");
        assert!(printed.contains("what is this?"));
        assert!(session.is_busy());

        control.entered.recv_timeout(WAIT).unwrap();
        control.reply.send(Ok("a lamp".to_string())).unwrap();
        let update = session.poll_timeout(WAIT).unwrap();
        let mut out = Vec::new();
        render_update(&update, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("a lamp"));
    }

    #[test]
    fn select_without_image_explains_the_problem() {
        let (mut session, _control, _dir) = session();
        let (_, printed) = run(&mut session, "/select 1 2 3 4");
        assert!(printed.starts_with("Cannot select a region"), "{printed}");
    }

    #[test]
    fn cancel_when_idle_and_settings_changes() {
        let (mut session, _control, _dir) = session();
        assert_eq!(run(&mut session, "/cancel").1, "Nothing to cancel.\n");

        assert_eq!(
            run(&mut session, "/settings tutorial off").1,
            "Settings saved.\n"
        );
        assert!(!session.settings().show_tutorial());
        run(&mut session, "/settings message hello there");
        assert_eq!(session.settings().tutorial_message(), "hello there");

        let (_, printed) = run(&mut session, "/tutorial");
        assert!(printed.contains("hello there"));
    }

    #[test]
    fn quit_stops_the_loop() {
        let (mut session, _control, _dir) = session();
        assert_eq!(run(&mut session, "/quit").0, Flow::Quit);
    }

    #[test]
    fn notices_are_flushed_in_order() {
        let (mut session, _control, _dir) = session();
        session.clear_history();
        let mut out = Vec::new();
        flush_notices(&mut session, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[info] Chat history cleared\n"
        );
    }
}
