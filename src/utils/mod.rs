use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Command for an external tool that never pops up a console window.
pub fn tool_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    #[allow(unused_mut)]
    let mut command = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    {
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

/// Command that shows `path` in the platform file manager.
fn reveal_command(path: &Path) -> tokio::process::Command {
    #[cfg(target_os = "windows")]
    let command = {
        let mut command = tool_command("explorer");
        command.raw_arg(format!("/select,\"{}\"", path.display()));
        command
    };

    #[cfg(target_os = "macos")]
    let command = {
        let mut command = tool_command("open");
        command.arg("-R").arg(path);
        command
    };

    #[cfg(all(unix, not(target_os = "macos")))]
    let command = {
        let mut command = tool_command("xdg-open");
        command.arg(path.parent().unwrap_or(path));
        command
    };

    command
}

/// Open the file manager on a saved download. Does not wait for it to exit.
pub async fn reveal_in_file_manager(path: &Path) -> std::io::Result<()> {
    reveal_command(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

/// Read one line from a child process pipe, replacing invalid UTF-8.
///
/// Returns `Ok(None)` at end of stream. Trailing `\r`/`\n` are stripped.
pub async fn read_lossy_line<R>(
    reader: &mut R,
    raw_buffer: &mut Vec<u8>,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    raw_buffer.clear();
    let bytes_read = reader.read_until(b'\n', raw_buffer).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    while matches!(raw_buffer.last(), Some(b'\n' | b'\r')) {
        raw_buffer.pop();
    }
    Ok(Some(String::from_utf8_lossy(raw_buffer).to_string()))
}
