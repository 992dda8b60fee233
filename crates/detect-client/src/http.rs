use std::time::{Duration, Instant};

use reqwest::blocking::{
    Client,
    multipart::{Form, Part},
};
use tracing::debug;

use crate::{Detection, DiseasePrediction, InferenceBackend, InferenceError, decode_detections};

/// Blocking HTTP client for the detection service.
///
/// Must only be used from plain threads, never from inside an async executor.
pub struct HttpInferenceClient {
    client: Client,
    predict_url: String,
    classify_url: Option<String>,
}

impl HttpInferenceClient {
    pub fn new(
        predict_url: impl Into<String>,
        classify_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| InferenceError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            predict_url: predict_url.into(),
            classify_url,
        })
    }

    pub fn predict_url(&self) -> &str {
        &self.predict_url
    }

    fn post_image(&self, url: &str, jpeg: &[u8]) -> Result<Vec<u8>, InferenceError> {
        let part = Part::bytes(jpeg.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|err| InferenceError::Encode(err.to_string()))?;
        let form = Form::new().part("image", part);

        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status(status.as_u16()));
        }
        let body = response.bytes().map_err(map_transport)?;
        debug!(
            "inference round trip to {url}: {} bytes in {:.1} ms",
            body.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(body.to_vec())
    }
}

impl InferenceBackend for HttpInferenceClient {
    fn detect(&self, jpeg: &[u8]) -> Result<Vec<Detection>, InferenceError> {
        let body = self.post_image(&self.predict_url, jpeg)?;
        decode_detections(&body)
    }

    fn classify(&self, crop_jpeg: &[u8]) -> Result<Option<DiseasePrediction>, InferenceError> {
        let Some(url) = self.classify_url.as_deref() else {
            return Ok(None);
        };
        let body = self.post_image(url, crop_jpeg)?;
        serde_json::from_slice::<DiseasePrediction>(&body)
            .map(Some)
            .map_err(|err| InferenceError::Decode(err.to_string()))
    }
}

fn map_transport(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read, net::TcpListener, thread};

    use super::*;

    #[test]
    fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpInferenceClient::new(
            format!("http://{addr}/predict"),
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.detect(b"jpeg").unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Transport(_) | InferenceError::Timeout
        ));
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf);
                thread::sleep(Duration::from_millis(600));
            }
        });

        let client = HttpInferenceClient::new(
            format!("http://{addr}/predict"),
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let started = Instant::now();
        let err = client.detect(b"jpeg").unwrap_err();
        assert!(matches!(err, InferenceError::Timeout), "got {err:?}");
        assert!(started.elapsed() < Duration::from_millis(550));
        server.join().unwrap();
    }

    #[test]
    fn classify_without_url_is_a_no_op() {
        let client =
            HttpInferenceClient::new("http://127.0.0.1:1/predict", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.classify(b"crop").unwrap(), None);
    }
}
