use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};

/// Reads stdin on its own thread so the interactive loop never blocks on it.
/// The receiver disconnects at end of input.
pub(super) fn spawn_line_reader() -> std::io::Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(?err, "failed to read terminal input");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}
