use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One complete control-channel response: a status line plus a header map.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RtspResponse {
    pub code: u16,
    pub message: String,
    headers: FxHashMap<String, String>,
}

impl RtspResponse {
    pub const STATUS_OK: u16 = 200;

    pub fn new(code: u16, message: impl Into<String>) -> RtspResponse {
        RtspResponse {
            code,
            message: message.into(),
            headers: FxHashMap::default(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> RtspResponse {
        self.headers.insert(name.to_uppercase(), value.to_string());
        self
    }

    /// Reads one response off the control stream: `RTSP/<ver> <code> <message>`
    ///  followed by `Name: value` lines up to the blank-line terminator.
    pub async fn read(reader: &mut (impl AsyncBufRead + Unpin)) -> anyhow::Result<RtspResponse> {
        let status_line = read_crlf_line(reader).await?
            .ok_or_else(|| anyhow!("control stream closed before a status line"))?;

        let mut parts = status_line.splitn(3, ' ');
        let protocol = parts.next().unwrap_or("");
        if !protocol.starts_with("RTSP/") {
            bail!("not a valid status line: {:?}", status_line);
        }
        let code: u16 = parts.next()
            .ok_or_else(|| anyhow!("status line without a code: {:?}", status_line))?
            .parse()?;
        let message = parts.next().unwrap_or("").to_string();

        let mut headers = FxHashMap::default();
        loop {
            let line = read_crlf_line(reader).await?
                .ok_or_else(|| anyhow!("control stream closed inside a response"))?;
            if line.is_empty() {
                break;
            }

            match line.split_once(':') {
                Some((name, value)) => {
                    headers.insert(name.trim().to_uppercase(), value.trim().to_string());
                }
                None => bail!("not a valid header line: {:?}", line),
            }
        }

        Ok(RtspResponse { code, message, headers })
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::STATUS_OK
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_uppercase())
            .map(|s| s.as_str())
    }
}

/// next line without its line terminator, or `None` on a cleanly closed stream
async fn read_crlf_line(reader: &mut (impl AsyncBufRead + Unpin)) -> anyhow::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_success_response() {
        let raw: &[u8] = b"RTSP/1.0 200 OK\r\nCSeq: 0\r\nSession: 1234\r\n\r\n";
        let response = RtspResponse::read(&mut &raw[..]).await.unwrap();

        assert_eq!(response.code, 200);
        assert_eq!(response.message, "OK");
        assert!(response.is_success());
        assert_eq!(response.header_value("Session"), Some("1234"));
        assert_eq!(response.header_value("CSEQ"), Some("0"));
        assert_eq!(response.header_value("Transport"), None);
    }

    #[tokio::test]
    async fn test_read_error_response() {
        let raw: &[u8] = b"RTSP/1.0 404 Not Found\r\n\r\n";
        let response = RtspResponse::read(&mut &raw[..]).await.unwrap();

        assert_eq!(response.code, 404);
        assert_eq!(response.message, "Not Found");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_header_lookup_is_case_insensitive() {
        let raw: &[u8] = b"RTSP/1.0 200 OK\r\nsession: abc\r\n\r\n";
        let response = RtspResponse::read(&mut &raw[..]).await.unwrap();

        assert_eq!(response.header_value("SESSION"), Some("abc"));
        assert_eq!(response.header_value("SeSsIoN"), Some("abc"));
    }

    #[tokio::test]
    async fn test_rejects_garbage_status_line() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";
        assert!(RtspResponse::read(&mut &raw[..]).await.is_err());

        let raw: &[u8] = b"RTSP/1.0\r\n\r\n";
        assert!(RtspResponse::read(&mut &raw[..]).await.is_err());

        let raw: &[u8] = b"RTSP/1.0 abc whatever\r\n\r\n";
        assert!(RtspResponse::read(&mut &raw[..]).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_truncated_response() {
        let raw: &[u8] = b"RTSP/1.0 200 OK\r\nSession: 1234\r\n";
        assert!(RtspResponse::read(&mut &raw[..]).await.is_err());

        let raw: &[u8] = b"";
        assert!(RtspResponse::read(&mut &raw[..]).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_header_line_without_separator() {
        let raw: &[u8] = b"RTSP/1.0 200 OK\r\nno-separator-here\r\n\r\n";
        assert!(RtspResponse::read(&mut &raw[..]).await.is_err());
    }
}
