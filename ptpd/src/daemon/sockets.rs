use std::fs::Permissions;
use std::path::Path;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write `value` as JSON preceded by its length as a big endian u64
pub async fn write_json<T>(stream: &mut (impl AsyncWrite + Unpin), value: &T) -> std::io::Result<()>
where
    T: serde::Serialize,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_u64(bytes.len() as u64).await?;
    stream.write_all(&bytes).await
}

fn other_error<T>(msg: String) -> std::io::Result<T> {
    use std::io::{Error, ErrorKind};
    Err(Error::new(ErrorKind::Other, msg))
}

pub fn create_unix_socket_with_permissions(
    path: &Path,
    permissions: Permissions,
) -> std::io::Result<tokio::net::UnixListener> {
    let listener = create_unix_socket(path)?;

    std::fs::set_permissions(path, permissions)?;

    Ok(listener)
}

fn create_unix_socket(path: &Path) -> std::io::Result<tokio::net::UnixListener> {
    // a stale socket from an earlier run blocks the bind
    if path.exists() {
        use std::os::unix::fs::FileTypeExt;

        let meta = std::fs::metadata(path)?;
        if !meta.file_type().is_socket() {
            return other_error(format!("path {path:?} exists but is not a socket"));
        }

        std::fs::remove_file(path)?;
    }

    let error = match tokio::net::UnixListener::bind(path) {
        Ok(listener) => return Ok(listener),
        Err(e) => e,
    };

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            return other_error(format!(
                "Could not create observe socket at {path:?} because its parent directory does not exist"
            ));
        }
    }

    other_error(format!(
        "Could not create observe socket at {path:?}: {error:?}"
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use tokio::{
        io::{AsyncRead, AsyncReadExt},
        net::{UnixListener, UnixStream},
    };

    use super::*;

    pub(crate) async fn read_json<T>(stream: &mut (impl AsyncRead + Unpin)) -> std::io::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let len = stream.read_u64().await?;
        let mut buffer = vec![0; len as usize];
        stream.read_exact(&mut buffer).await?;
        serde_json::from_slice(&buffer)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    }

    #[tokio::test]
    async fn written_json_is_length_prefixed() {
        // tests run concurrently, so every test needs its own socket name
        let path = std::env::temp_dir().join("ptpd-test-stream-1");
        if path.exists() {
            std::fs::remove_file(&path).unwrap();
        }
        let listener = UnixListener::bind(&path).unwrap();
        let mut writer = UnixStream::connect(&path).await.unwrap();
        let (mut reader, _) = listener.accept().await.unwrap();

        let object = vec![7u32; 100];
        write_json(&mut writer, &object).await.unwrap();

        let output: Vec<u32> = read_json(&mut reader).await.unwrap();
        assert_eq!(object, output);
    }

    #[test]
    fn refuses_to_replace_regular_file() {
        let path = std::env::temp_dir().join("ptpd-test-not-a-socket");
        std::fs::write(&path, b"data").unwrap();
        assert!(create_unix_socket(&path).is_err());
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }
}
