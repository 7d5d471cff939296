use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Name adopted when a client sends a blank name or disconnects during the handshake.
pub const DEFAULT_NAME: &str = "Anonymous";

/// Line that ends a session, compared case-insensitively after trimming.
pub const QUIT_TOKEN: &str = "/quit";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Lines the server writes to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    Welcome,
    Greeting { name: String },
    Joined { name: String },
    Left { name: String },
    Chat { name: String, text: String },
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Welcome => f.write_str("Welcome! Enter your name:"),
            ServerLine::Greeting { name } => {
                write!(f, "Hi {name}! You can start typing. Type {QUIT_TOKEN} to exit.")
            }
            ServerLine::Joined { name } => write!(f, "🔔 {name} joined the chat."),
            ServerLine::Left { name } => write!(f, "👋 {name} left the chat."),
            ServerLine::Chat { name, text } => write!(f, "🗨️ {name}: {text}"),
        }
    }
}

/// Lines a client sends once its name has been accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    Quit,
    Chat(String),
}

impl ClientLine {
    pub fn parse(line: String) -> Self {
        if line.trim().eq_ignore_ascii_case(QUIT_TOKEN) {
            ClientLine::Quit
        } else {
            ClientLine::Chat(line)
        }
    }
}

/// Picks the display name from the handshake line, falling back to [`DEFAULT_NAME`].
pub fn display_name(candidate: Option<&str>) -> String {
    match candidate.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_NAME.to_string(),
    }
}

/// Reads one line without its terminator. `Ok(None)` means the peer closed the stream.
///
/// Blank lines are returned as empty strings. Invalid UTF-8 is replaced rather
/// than treated as a protocol error.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn quit_ignores_case_and_surrounding_whitespace() {
        assert_eq!(ClientLine::parse("/quit".into()), ClientLine::Quit);
        assert_eq!(ClientLine::parse("  /QUIT  ".into()), ClientLine::Quit);
        assert_eq!(ClientLine::parse("/Quit\t".into()), ClientLine::Quit);
    }

    #[test]
    fn quit_must_be_the_whole_line() {
        assert_eq!(
            ClientLine::parse("/quit now".into()),
            ClientLine::Chat("/quit now".into())
        );
        assert_eq!(
            ClientLine::parse("please /quit".into()),
            ClientLine::Chat("please /quit".into())
        );
    }

    #[test]
    fn blank_or_missing_names_fall_back_to_default() {
        assert_eq!(display_name(Some("  Alice ")), "Alice");
        assert_eq!(display_name(Some("   ")), DEFAULT_NAME);
        assert_eq!(display_name(Some("")), DEFAULT_NAME);
        assert_eq!(display_name(None), DEFAULT_NAME);
    }

    #[test]
    fn server_lines_render_the_wire_format() {
        let name = "Alice".to_string();
        assert_eq!(ServerLine::Welcome.to_string(), "Welcome! Enter your name:");
        assert_eq!(
            ServerLine::Greeting { name: name.clone() }.to_string(),
            "Hi Alice! You can start typing. Type /quit to exit."
        );
        assert_eq!(
            ServerLine::Joined { name: name.clone() }.to_string(),
            "🔔 Alice joined the chat."
        );
        assert_eq!(
            ServerLine::Left { name: name.clone() }.to_string(),
            "👋 Alice left the chat."
        );
        assert_eq!(
            ServerLine::Chat {
                name,
                text: String::new()
            }
            .to_string(),
            "🗨️ Alice: "
        );
    }

    #[tokio::test]
    async fn read_line_keeps_blank_lines_and_strips_terminators() {
        let input: &[u8] = b"hello\r\n\nlast";
        let mut reader = BufReader::new(input);

        assert_eq!(read_line(&mut reader).await.unwrap(), Some("hello".into()));
        assert_eq!(read_line(&mut reader).await.unwrap(), Some(String::new()));
        assert_eq!(read_line(&mut reader).await.unwrap(), Some("last".into()));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_line_replaces_invalid_utf8() {
        let input: &[u8] = b"caf\xff\n";
        let mut reader = BufReader::new(input);

        let line = read_line(&mut reader).await.unwrap().expect("line");
        assert_eq!(line, "caf\u{FFFD}");
    }

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = BufReader::new(reader);

        write_line(&mut writer, "hi there").await.expect("write line");
        drop(writer);

        assert_eq!(
            read_line(&mut reader).await.unwrap(),
            Some("hi there".into())
        );
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }
}
