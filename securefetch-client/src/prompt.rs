//! Terminal prompts

use std::io::{self, BufRead, Write};
use zeroize::Zeroizing;

/// Interactive menu entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    List,
    Download,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(MenuChoice::List),
            "2" => Some(MenuChoice::Download),
            "3" => Some(MenuChoice::Exit),
            _ => None,
        }
    }
}

pub const MENU_PROMPT: &str = "Enter 1 to list dir, 2 to download file, and 3 to exit: ";

/// Print `prompt` and read one line without its terminator.
///
/// Returns `None` at end of input.
pub fn read_line<R: BufRead>(input: &mut R, prompt: &str) -> io::Result<Option<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(&['\r', '\n'][..]).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Read a password with terminal echo disabled
pub fn read_password(prompt: &str) -> io::Result<Zeroizing<String>> {
    rpassword::prompt_password(prompt).map(Zeroizing::new)
}

/// [`read_line`] on stdin, run on the blocking pool
pub async fn ask(prompt: &str) -> io::Result<Option<String>> {
    let prompt = prompt.to_string();
    off_runtime(move || read_line(&mut io::stdin().lock(), &prompt)).await
}

/// [`read_password`], run on the blocking pool
pub async fn ask_password(prompt: &str) -> io::Result<Zeroizing<String>> {
    let prompt = prompt.to_string();
    off_runtime(move || read_password(&prompt)).await
}

async fn off_runtime<T, F>(read: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(read)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
