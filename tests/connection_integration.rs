//! Connection 통합 테스트
//!
//! wiremock으로 Jolokia agent를 흉내내어 connect / read 경로를 검증

use std::time::Duration;

use jmx_scraper::connection::{
    AttributeValue, ConnectionBuilder, ConnectionDescriptor, DescriptorFields, ReadRequest,
    ServiceAddress,
};
use jmx_scraper::error::{ConnectionError, ReadError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn version_body() -> serde_json::Value {
    json!({
        "request": {"type": "version"},
        "value": {"agent": "1.7.2", "protocol": "7.2"},
        "status": 200,
        "timestamp": 1609459200
    })
}

fn builder_for(server: &MockServer, fields: DescriptorFields) -> ConnectionBuilder {
    let address = ServiceAddress::parse(&server.uri()).unwrap();
    ConnectionBuilder::new(
        ConnectionDescriptor::new(address, fields),
        Duration::from_millis(500),
    )
}

async fn mount_version(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/jolokia/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(version_body()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_connect_reads_agent_version() {
    let server = MockServer::start().await;
    mount_version(&server).await;

    let builder = builder_for(&server, DescriptorFields::default());
    let session = builder.connect().await.unwrap();

    assert_eq!(session.agent().agent, "1.7.2");
    assert_eq!(session.agent().protocol.as_deref(), Some("7.2"));
    assert_eq!(session.endpoint(), builder.descriptor().address());
}

#[tokio::test]
async fn test_connect_unreachable_names_endpoint() {
    let address = ServiceAddress::parse("127.0.0.1:1").unwrap();
    let builder = ConnectionBuilder::new(
        ConnectionDescriptor::new(address, DescriptorFields::default()),
        Duration::from_millis(200),
    );

    let err = builder.connect().await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("127.0.0.1:1"), "got: {err}");
}

#[tokio::test]
async fn test_connect_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jolokia/version"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(version_body())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = builder_for(&server, DescriptorFields::default())
        .connect()
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Timeout { timeout_ms: 500, .. }), "got: {err}");
}

#[tokio::test]
async fn test_connect_sends_basic_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jolokia/version"))
        .and(header("authorization", "Basic dXNlcjpzZWNyZXQ="))
        .respond_with(ResponseTemplate::new(200).set_body_json(version_body()))
        .expect(1)
        .mount(&server)
        .await;

    let fields = DescriptorFields {
        username: Some("user".to_string()),
        password: Some("secret".to_string()),
        ..Default::default()
    };
    let session = builder_for(&server, fields).connect().await.unwrap();
    assert_eq!(session.agent().agent, "1.7.2");
}

#[tokio::test]
async fn test_connect_rejected_without_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jolokia/version"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"jolokia\""),
        )
        .mount(&server)
        .await;

    let err = builder_for(&server, DescriptorFields::default())
        .connect()
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::AuthenticationFailed { .. }), "got: {err}");
}

#[tokio::test]
async fn test_connect_wrong_password_with_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jolokia/version"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"jolokia\""),
        )
        // initial version request plus the one retry after answering the challenge
        .expect(2)
        .mount(&server)
        .await;

    let fields = DescriptorFields {
        username: Some("user".to_string()),
        password: Some("wrong".to_string()),
        profile: Some("SASL/PLAIN".to_string()),
        realm: Some("jolokia".to_string()),
        ..Default::default()
    };
    let err = builder_for(&server, fields).connect().await.unwrap_err();
    assert!(matches!(err, ConnectionError::AuthenticationFailed { .. }), "got: {err}");
}

#[tokio::test]
async fn test_connect_unsupported_challenge_scheme() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jolokia/version"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Negotiate"),
        )
        .mount(&server)
        .await;

    let fields = DescriptorFields {
        username: Some("user".to_string()),
        password: Some("secret".to_string()),
        profile: Some("SASL/GSSAPI".to_string()),
        ..Default::default()
    };
    let err = builder_for(&server, fields).connect().await.unwrap_err();
    match err {
        ConnectionError::UnsupportedCallback { callback, .. } => {
            assert_eq!(callback, "Negotiate challenge")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_connect_rejects_non_agent_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jolokia/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not jolokia</html>"))
        .mount(&server)
        .await;

    let err = builder_for(&server, DescriptorFields::default())
        .connect()
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Protocol { .. }), "got: {err}");
}

#[tokio::test]
async fn test_session_bulk_read() {
    let server = MockServer::start().await;
    mount_version(&server).await;

    Mock::given(method("POST"))
        .and(path("/jolokia"))
        .and(body_json(json!([
            {
                "type": "read",
                "mbean": "java.lang:type=Threading",
                "attribute": ["DaemonThreadCount", "ThreadCount"],
                "config": {"ignoreErrors": true}
            },
            {
                "type": "read",
                "mbean": "java.lang:type=GarbageCollector,name=*",
                "attribute": ["CollectionCount"],
                "config": {"ignoreErrors": true}
            },
            {
                "type": "read",
                "mbean": "java.lang:type=Missing",
                "attribute": ["Value"],
                "config": {"ignoreErrors": true}
            }
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "request": {"mbean": "java.lang:type=Threading", "attribute": ["DaemonThreadCount", "ThreadCount"], "type": "read"},
                "value": {"ThreadCount": 42, "DaemonThreadCount": 10},
                "status": 200,
                "timestamp": 1609459200
            },
            {
                "request": {"mbean": "java.lang:type=GarbageCollector,name=*", "attribute": "CollectionCount", "type": "read"},
                "value": {
                    "java.lang:name=G1 Young Generation,type=GarbageCollector": {"CollectionCount": 7},
                    "java.lang:name=G1 Old Generation,type=GarbageCollector": {"CollectionCount": 1}
                },
                "status": 200,
                "timestamp": 1609459200
            },
            {
                "request": {"mbean": "java.lang:type=Missing", "attribute": "Value", "type": "read"},
                "error_type": "javax.management.InstanceNotFoundException",
                "error": "No MBean found",
                "status": 404
            }
        ])))
        .mount(&server)
        .await;

    let session = builder_for(&server, DescriptorFields::default())
        .connect()
        .await
        .unwrap();
    let results = session
        .read(&[
            ReadRequest::new(
                "java.lang:type=Threading",
                vec!["DaemonThreadCount".to_string(), "ThreadCount".to_string()],
            ),
            ReadRequest::new(
                "java.lang:type=GarbageCollector,name=*",
                vec!["CollectionCount".to_string()],
            ),
            ReadRequest::new("java.lang:type=Missing", vec!["Value".to_string()]),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(
        results.attribute("java.lang:type=Threading", "ThreadCount"),
        Some(&AttributeValue::Integer(42))
    );
    assert_eq!(
        results.attribute(
            "java.lang:name=G1 Young Generation,type=GarbageCollector",
            "CollectionCount"
        ),
        Some(&AttributeValue::Integer(7))
    );
    assert!(results.attribute("java.lang:type=Missing", "Value").is_none());
}

#[tokio::test]
async fn test_session_read_http_error() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    Mock::given(method("POST"))
        .and(path("/jolokia"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let builder = builder_for(&server, DescriptorFields::default());
    let session = builder.connect().await.unwrap();
    let err = session
        .read(&[ReadRequest::new("java.lang:type=Memory", vec![])])
        .await
        .unwrap_err();

    assert!(matches!(err, ReadError::HttpStatus { status: 500, .. }), "got: {err}");
    assert_eq!(err.endpoint(), builder.descriptor().address());
}

#[tokio::test]
async fn test_session_read_undecodable_body() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    Mock::given(method("POST"))
        .and(path("/jolokia"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"truncated\":"))
        .mount(&server)
        .await;

    let session = builder_for(&server, DescriptorFields::default())
        .connect()
        .await
        .unwrap();
    let err = session
        .read(&[ReadRequest::new("java.lang:type=Memory", vec![])])
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Parse { .. }), "got: {err}");
}

#[tokio::test]
async fn test_empty_read_plan_skips_round_trip() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let session = builder_for(&server, DescriptorFields::default())
        .connect()
        .await
        .unwrap();
    let results = session.read(&[]).await.unwrap();
    assert!(results.is_empty());
}
