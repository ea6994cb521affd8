use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::Frame;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Snapshot endpoint; every GET returns one encoded still image.
    pub url: String,
    pub fetch_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "http://192.168.4.1:1607/capture".into(),
            fetch_timeout_ms: 2000,
        }
    }
}

impl CameraConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("camera did not answer within {0:?}")]
    Timeout(Duration),
    #[error("camera answered HTTP {0}")]
    Status(u16),
    #[error("camera request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("camera sent an empty body")]
    Empty,
    #[error("decode camera image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decode task failed: {0}")]
    DecodeTask(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait FrameSource: Send {
    async fn fetch_frame(&mut self) -> Result<Frame, FetchError>;
}

/// Pulls single snapshots over HTTP. No retry or backoff: the caller's loop
/// simply asks again on the next cycle.
pub struct HttpFrameSource {
    client: Client,
    url: String,
    timeout: Duration,
    next_seq: u64,
}

impl HttpFrameSource {
    pub fn new(cfg: &CameraConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(cfg.fetch_timeout()).build()?;
        Ok(Self { client, url: cfg.url.clone(), timeout: cfg.fetch_timeout(), next_seq: 1 })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() { FetchError::Timeout(self.timeout) } else { FetchError::Transport(e) }
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn fetch_frame(&mut self) -> Result<Frame, FetchError> {
        let resp = self.client.get(&self.url).send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        if body.is_empty() {
            return Err(FetchError::Empty);
        }

        let len = body.len();
        // JPEG decode of a full frame is CPU work; keep it off the async workers.
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&body).map(|i| i.to_rgb8())).await??;
        let frame = Frame::new(self.next_seq, image);
        self.next_seq += 1;
        debug!("camera: frame {} {}x{} ({} bytes)", frame.seq, frame.width(), frame.height(), len);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::encode_png;
    use image::{Rgb, RgbImage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves each canned (status line, body) pair to one connection, in order.
    async fn serve(responses: Vec<(&'static str, Vec<u8>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut req = [0u8; 1024];
                let _ = sock.read(&mut req).await;
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                sock.write_all(head.as_bytes()).await.unwrap();
                sock.write_all(&body).await.unwrap();
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{}/capture", addr)
    }

    fn png(w: u32, h: u32) -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(w, h, Rgb([1, 2, 3]))).unwrap().to_vec()
    }

    fn jpeg(w: u32, h: u32) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        RgbImage::from_pixel(w, h, Rgb([200, 40, 40])).write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn source(url: String, timeout_ms: u64) -> HttpFrameSource {
        HttpFrameSource::new(&CameraConfig { url, fetch_timeout_ms: timeout_ms }).unwrap()
    }

    #[tokio::test]
    async fn decodes_snapshots_with_increasing_sequence_numbers() {
        let url = serve(vec![("200 OK", png(8, 6)), ("200 OK", png(4, 4))]).await;
        let mut src = source(url, 2000);

        let a = src.fetch_frame().await.unwrap();
        let b = src.fetch_frame().await.unwrap();
        assert_eq!((a.width(), a.height()), (8, 6));
        assert_eq!(*a.image.get_pixel(0, 0), Rgb([1, 2, 3]));
        assert!(b.seq > a.seq);
    }

    #[tokio::test]
    async fn jpeg_snapshot_is_decoded() {
        let url = serve(vec![("200 OK", jpeg(32, 24))]).await;
        let frame = source(url, 2000).fetch_frame().await.unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));
        let px = frame.image.get_pixel(16, 12);
        assert!(px[0] > 150 && px[1] < 100, "{px:?}");
        assert!(frame.age() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn non_200_is_a_fetch_error() {
        let url = serve(vec![("503 Service Unavailable", b"busy".to_vec())]).await;
        let err = source(url, 2000).fetch_frame().await.unwrap_err();
        assert!(matches!(err, FetchError::Status(503)), "{err:?}");
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let url = serve(vec![("200 OK", b"not an image".to_vec())]).await;
        let err = source(url, 2000).fetch_frame().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let url = serve(vec![("200 OK", Vec::new())]).await;
        let err = source(url, 2000).fetch_frame().await.unwrap_err();
        assert!(matches!(err, FetchError::Empty), "{err:?}");
    }

    #[tokio::test]
    async fn silent_camera_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/capture", listener.local_addr().unwrap());
        tokio::spawn(async move {
            // accept and never answer
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let err = source(url, 200).fetch_frame().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/capture", listener.local_addr().unwrap());
        drop(listener);
        let err = source(url, 2000).fetch_frame().await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)), "{err:?}");
    }
}
