use std::io;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::{AppStateInner, BlobStore, router};
use parley_db::Database;
use parley_gateway::Authenticator;

/// Collects everything the fmt subscriber writes.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn request_logs_leave_the_query_out() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let db = Arc::new(Database::open_in_memory().unwrap());
    let blob_dir = std::env::temp_dir().join(format!("parley-trace-{}", Uuid::new_v4()));
    let blobs = BlobStore::new(blob_dir.clone(), "http://localhost:3000")
        .await
        .unwrap();
    let state = AppStateInner::new(db, Authenticator::new("test-secret"), blobs, 1024);

    let response = router(state)
        .oneshot(
            Request::builder()
                .uri("/gateway?token=secret-token-value")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let _ = std::fs::remove_dir_all(&blob_dir);

    let logs = captured.text();
    assert!(logs.contains("path=/gateway"), "{logs}");
    assert!(!logs.contains("secret-token-value"), "{logs}");
}
