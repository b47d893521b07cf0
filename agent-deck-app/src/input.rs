use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One decoded terminal key. The connection carries raw bytes; only the
/// small set of sequences the dashboard binds is decoded, everything else
/// is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Char(char),
    Enter,
    Tab,
    BackTab,
    Backspace,
    Up,
    Down,
    CtrlS,
    CtrlX,
}

/// Reads the next key from the connection. `None` on EOF.
pub async fn read_key<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<KeyEvent>> {
    loop {
        let Some(byte) = read_byte(reader).await? else {
            return Ok(None);
        };
        let event = match byte {
            b'\t' => KeyEvent::Tab,
            b'\r' | b'\n' => KeyEvent::Enter,
            0x7f | 0x08 => KeyEvent::Backspace,
            0x13 => KeyEvent::CtrlS,
            0x18 => KeyEvent::CtrlX,
            0x1b => match read_escape(reader).await? {
                Some(event) => event,
                None => continue,
            },
            0x20..=0x7e => KeyEvent::Char(byte as char),
            _ => continue,
        };
        return Ok(Some(event));
    }
}

/// CSI decoding for the few sequences in use: arrows and shift-tab.
async fn read_escape<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<KeyEvent>> {
    let Some(next) = read_byte(reader).await? else {
        return Ok(None);
    };
    if next != b'[' {
        return Ok(None);
    }
    let Some(code) = read_byte(reader).await? else {
        return Ok(None);
    };
    Ok(match code {
        b'A' => Some(KeyEvent::Up),
        b'B' => Some(KeyEvent::Down),
        b'Z' => Some(KeyEvent::BackTab),
        _ => None,
    })
}

async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match reader.read(&mut buf).await? {
        0 => Ok(None),
        _ => Ok(Some(buf[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode_all(bytes: &[u8]) -> Vec<KeyEvent> {
        let mut reader = bytes;
        let mut events = Vec::new();
        while let Some(event) = read_key(&mut reader).await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_plain_keys() {
        let events = decode_all(b"aq1\t\r").await;
        assert_eq!(
            events,
            vec![
                KeyEvent::Char('a'),
                KeyEvent::Char('q'),
                KeyEvent::Char('1'),
                KeyEvent::Tab,
                KeyEvent::Enter,
            ]
        );
    }

    #[tokio::test]
    async fn test_escape_sequences() {
        let events = decode_all(b"\x1b[A\x1b[B\x1b[Z").await;
        assert_eq!(events, vec![KeyEvent::Up, KeyEvent::Down, KeyEvent::BackTab]);
    }

    #[tokio::test]
    async fn test_unknown_sequences_dropped() {
        let events = decode_all(b"\x1b[Cx\x01").await;
        assert_eq!(events, vec![KeyEvent::Char('x')]);
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let mut reader: &[u8] = b"";
        assert_eq!(read_key(&mut reader).await.unwrap(), None);
    }
}
