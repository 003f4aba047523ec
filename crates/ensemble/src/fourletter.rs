//! Client for ZooKeeper's four-letter-word admin protocol.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::Error;

/// Sends a four-letter word (`ruok`, `srvr`, ...) to a ZooKeeper server and
/// returns the raw response.
///
/// # Errors
///
/// [`Error::InvalidWord`] for malformed words, [`Error::Timeout`] when the
/// server does not answer within `deadline`, [`Error::Io`] for connection
/// failures.
pub async fn four_letter(
    host: &str,
    port: u16,
    word: &str,
    deadline: Duration,
) -> Result<String, Error> {
    if word.len() != 4 || !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::InvalidWord(word.to_string()));
    }

    timeout(deadline, async {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Io("error connecting to zookeeper", e))?;
        stream
            .write_all(word.as_bytes())
            .await
            .map_err(|e| Error::Io("error sending four letter word", e))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|e| Error::Io("error reading four letter response", e))?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    })
    .await
    .map_err(|_| Error::Timeout("four letter word"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn fake_server(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut word = [0u8; 4];
                let _ = stream.read_exact(&mut word).await;
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn ruok_roundtrip() {
        let port = fake_server("imok").await;

        let response = four_letter("127.0.0.1", port, "ruok", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(response, "imok");
    }

    #[tokio::test]
    async fn rejects_bad_words() {
        assert!(matches!(
            four_letter("127.0.0.1", 2181, "too-long", Duration::from_secs(1)).await,
            Err(Error::InvalidWord(_))
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_io_error() {
        // port 1 is essentially never listening
        let result = four_letter("127.0.0.1", 1, "ruok", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Io(_, _)) | Err(Error::Timeout(_))));
    }
}
