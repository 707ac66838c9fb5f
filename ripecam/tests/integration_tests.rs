use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Multipart,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::protocol::Ripeness;
use ripecam::{
    client::{ClientError, DetectService, HttpDetectService, ReadinessProbe},
    sensors::{DeviceConfig, SourceOpener, SourceSpec},
    session::{Event, Readiness, Session},
    terminal::TerminalSurface,
    view::Status,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

type Error = Box<dyn std::error::Error>;

/// Serve `app` on an ephemeral local port.
async fn spawn_server(app: Router) -> Result<SocketAddr, Error> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    let server = axum::Server::from_tcp(listener)?.serve(app.into_make_service());
    tokio::spawn(server);
    Ok(addr)
}

fn client(addr: SocketAddr, probe: ReadinessProbe) -> Result<HttpDetectService, Error> {
    Ok(HttpDetectService::new(
        &format!("http://{addr}/"),
        Duration::from_secs(5),
        probe,
    )?)
}

async fn detect_banana(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let image = body["image"].as_str().unwrap_or_default();
    if !image.starts_with("data:image/jpeg;base64,") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "expected a JPEG data URL"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "image": image,
            "detections": [{"class": "banana", "ripeness": "RIPEN", "confidence": 0.92, "bbox": [10, 20, 200, 220]}],
            "stats": {"RIPEN": 1},
            "library": [{"url": "/static/1.jpg", "fruit": "banana", "ripeness": "RIPEN", "date": "2024-05-01 10:00"}]
        })),
    )
}

async fn upload(mut multipart: Multipart) -> Json<Value> {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or("?").to_owned();
            let len = field.bytes().await.map(|data| data.len()).unwrap_or(0);
            return Json(json!({"msg": format!("stored {name} ({len} bytes)")}));
        }
    }
    Json(json!({"error": "no file field"}))
}

fn fruit_server() -> Router {
    Router::new()
        .route("/ready", get(|| async { Json(json!({"ready": true})) }))
        .route("/detect", post(detect_banana))
        .route("/upload", post(upload))
}

#[tokio::test]
async fn test_ready_endpoint_not_ready() -> Result<(), Error> {
    let app = Router::new().route(
        "/ready",
        get(|| async { Json(json!({"ready": false, "error": "model missing"})) }),
    );
    let addr = spawn_server(app).await?;

    let ready = client(addr, ReadinessProbe::Endpoint)?.ready().await?;
    assert!(!ready.ready);
    assert_eq!(ready.error.as_deref(), Some("model missing"));

    Ok(())
}

#[tokio::test]
async fn test_ready_endpoint_error_body() -> Result<(), Error> {
    let app = Router::new().route(
        "/ready",
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "model missing"})),
            )
        }),
    );
    let addr = spawn_server(app).await?;

    let ready = client(addr, ReadinessProbe::Endpoint)?.ready().await?;
    assert!(!ready.ready);
    assert_eq!(ready.error.as_deref(), Some("model missing"));

    Ok(())
}

#[tokio::test]
async fn test_warmup_probe() -> Result<(), Error> {
    let addr = spawn_server(fruit_server()).await?;
    let ready = client(addr, ReadinessProbe::Warmup)?.ready().await?;
    assert!(ready.ready);

    let failing = Router::new().route(
        "/detect",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "weights not downloaded"})),
            )
        }),
    );
    let addr = spawn_server(failing).await?;
    let ready = client(addr, ReadinessProbe::Warmup)?.ready().await?;
    assert!(!ready.ready);
    assert_eq!(ready.error.as_deref(), Some("weights not downloaded"));

    Ok(())
}

#[tokio::test]
async fn test_error_body_with_500_is_service_error() -> Result<(), Error> {
    let addr = spawn_server(fruit_server()).await?;

    let result = client(addr, ReadinessProbe::Endpoint)?
        .detect("not a data url".to_owned())
        .await;
    match result {
        Err(ClientError::Service(msg)) => assert_eq!(msg, "expected a JPEG data URL"),
        other => panic!("unexpected result {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_non_json_body_is_decode_error() -> Result<(), Error> {
    let app = Router::new().route(
        "/detect",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let addr = spawn_server(app).await?;

    let result = client(addr, ReadinessProbe::Endpoint)?
        .detect("data:image/jpeg;base64,".to_owned())
        .await;
    match result {
        Err(ClientError::Decode { status, .. }) => assert_eq!(status.as_u16(), 502),
        other => panic!("unexpected result {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_unreachable_service_is_http_error() -> Result<(), Error> {
    // Bind and drop to get a port nobody listens on
    let addr = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;

    let result = client(addr, ReadinessProbe::Endpoint)?.ready().await;
    assert!(matches!(result, Err(ClientError::Http(_))));

    Ok(())
}

#[tokio::test]
async fn test_upload_multipart() -> Result<(), Error> {
    let addr = spawn_server(fruit_server()).await?;

    let msg = client(addr, ReadinessProbe::Endpoint)?
        .upload("pear.jpg".to_owned(), vec![7; 42])
        .await?;
    assert_eq!(msg, "stored pear.jpg (42 bytes)");

    Ok(())
}

#[tokio::test]
async fn test_session_against_service() -> Result<(), Error> {
    let addr = spawn_server(fruit_server()).await?;
    let service = Arc::new(client(addr, ReadinessProbe::Endpoint)?);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        service,
        Box::new(SourceOpener::new(
            SourceSpec::Synthetic,
            DeviceConfig::default(),
        )),
        TerminalSurface::new(None),
        tx,
    );

    session.start();
    let event = rx.recv().await.ok_or("channel closed")?;
    assert!(matches!(event, Event::ReadyDone(Ok(_))));
    session.handle(event);
    assert_eq!(*session.readiness(), Readiness::Ready);
    assert_eq!(session.view().status, Status::Ready);

    session.power_on()?;
    session.capture()?;
    let event = rx.recv().await.ok_or("channel closed")?;
    assert!(matches!(event, Event::DetectDone(Ok(_))));
    session.handle(event);

    let view = session.view();
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].to_string(), "banana → RIPEN (92%)");
    assert_eq!(
        view.chart.current().map(|chart| chart.count(Ripeness::Ripen)),
        Some(1)
    );
    assert_eq!(view.gallery.len(), 1);

    // The annotated image is the submitted 640x480 frame echoed back
    let image = image::load_from_memory(view.image.as_deref().ok_or("no image")?)?;
    assert_eq!((image.width(), image.height()), (640, 480));

    Ok(())
}
