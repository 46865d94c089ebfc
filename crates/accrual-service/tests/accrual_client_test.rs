//! 积分服务客户端集成测试
//!
//! 在 127.0.0.1 随机端口上启动 axum 桩服务，验证各类响应的归类

use std::time::Duration;

use axum::{
    Json, Router,
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use gophermart_accrual::{
    AccrualClient, AccrualClientError, AccrualStatus, Amount, HttpAccrualClient,
};
use gophermart_shared::config::AccrualConfig;
use serde_json::json;
use tokio::net::TcpListener;

async fn stub_handler(Path(number): Path<String>) -> Response {
    match number.as_str() {
        "12345678903" => Json(json!({
            "order": number,
            "status": "PROCESSED",
            "accrual": 729.98
        }))
        .into_response(),
        "79927398713" => Json(json!({ "order": number, "status": "PROCESSING" })).into_response(),
        "18" => Json(json!({ "order": number, "status": "REGISTERED" })).into_response(),
        "26" => Json(json!({ "order": number, "status": "INVALID" })).into_response(),
        "2377225624" => StatusCode::NO_CONTENT.into_response(),
        "34" => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "7")],
            "No more than 10 requests per minute allowed",
        )
            .into_response(),
        "42" => StatusCode::TOO_MANY_REQUESTS.into_response(),
        "59" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        "67" => StatusCode::NOT_FOUND.into_response(),
        "75" => (StatusCode::OK, "definitely not json").into_response(),
        "83" => Json(json!({ "order": "91", "status": "PROCESSING" })).into_response(),
        "91" => Json(json!({ "order": number, "status": "DONE" })).into_response(),
        "109" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({ "order": number, "status": "PROCESSING" })).into_response()
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// 启动桩服务，返回 `host:port` 形式的地址
async fn spawn_stub() -> String {
    let app = Router::new().route("/api/orders/{number}", get(stub_handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

fn client_for(base_url: String) -> HttpAccrualClient {
    HttpAccrualClient::new(&AccrualConfig {
        base_url,
        request_timeout_ms: 500,
        default_retry_after_secs: 60,
    })
    .unwrap()
}

#[tokio::test]
async fn test_success_statuses() {
    let client = client_for(spawn_stub().await);

    let reply = client.query("12345678903").await.unwrap();
    assert_eq!(reply.order, "12345678903");
    assert_eq!(
        reply.status,
        AccrualStatus::Processed {
            accrual: Amount::from_minor(72_998)
        }
    );

    assert_eq!(
        client.query("79927398713").await.unwrap().status,
        AccrualStatus::Processing
    );
    assert_eq!(
        client.query("18").await.unwrap().status,
        AccrualStatus::Registered
    );
    assert_eq!(client.query("26").await.unwrap().status, AccrualStatus::Invalid);
}

#[tokio::test]
async fn test_no_content_means_unknown_order() {
    let client = client_for(spawn_stub().await);
    assert_eq!(
        client.query("2377225624").await,
        Err(AccrualClientError::UnknownOrder)
    );
}

#[tokio::test]
async fn test_rate_limit_reads_retry_after() {
    let client = client_for(spawn_stub().await);

    assert_eq!(
        client.query("34").await,
        Err(AccrualClientError::RateLimited {
            retry_after: Duration::from_secs(7)
        })
    );
    // 缺少 Retry-After 时使用默认值
    assert_eq!(
        client.query("42").await,
        Err(AccrualClientError::RateLimited {
            retry_after: Duration::from_secs(60)
        })
    );
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let client = client_for(spawn_stub().await);

    assert_eq!(
        client.query("59").await,
        Err(AccrualClientError::ServerError(503))
    );
    assert_eq!(
        client.query("67").await,
        Err(AccrualClientError::UnexpectedStatus(404))
    );
    assert!(matches!(
        client.query("75").await,
        Err(AccrualClientError::Malformed(_))
    ));
    assert!(matches!(
        client.query("83").await,
        Err(AccrualClientError::Malformed(_))
    ));
    assert!(matches!(
        client.query("91").await,
        Err(AccrualClientError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let client = client_for(spawn_stub().await);
    let err = client.query("109").await.unwrap_err();
    assert_eq!(err, AccrualClientError::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // 占用一个端口后立即释放，确保没有服务在监听
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(format!("http://{addr}"));
    assert!(matches!(
        client.query("12345678903").await,
        Err(AccrualClientError::Transport(_))
    ));
}

#[tokio::test]
async fn test_port_only_address_targets_localhost() {
    let client = client_for(":8081".to_string());
    assert_eq!(client.base_url(), "http://localhost:8081");
}
